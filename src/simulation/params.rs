//! Per-tick parameters handed explicitly to every field operation.

use glam::Vec2;
use serde::{Deserialize, Serialize};

use super::config::{ErosionConfig, FluidConfig, SimulationConfig, WaveConfig};

/// What the erosion brush does to the terrain under it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum BrushMode {
    #[default]
    AddWater,
    RemoveWater,
    AddTerrain,
    RemoveTerrain,
}

impl BrushMode {
    pub fn index(self) -> u32 {
        match self {
            BrushMode::AddWater => 0,
            BrushMode::RemoveWater => 1,
            BrushMode::AddTerrain => 2,
            BrushMode::RemoveTerrain => 3,
        }
    }

    pub fn from_index(index: u32) -> Option<Self> {
        match index {
            0 => Some(BrushMode::AddWater),
            1 => Some(BrushMode::RemoveWater),
            2 => Some(BrushMode::AddTerrain),
            3 => Some(BrushMode::RemoveTerrain),
            _ => None,
        }
    }
}

/// How the Visualize kernel maps a field to RGBA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisualizeMode {
    /// First three components are already a colour.
    Color,
    /// Component 0 as grey over the value range.
    Scalar,
    /// Surface height shaded as land, tinted by water depth.
    Terrain,
    /// Wave height (component 1) from deep blue to crest.
    Wave,
}

impl VisualizeMode {
    pub fn index(self) -> u32 {
        match self {
            VisualizeMode::Color => 0,
            VisualizeMode::Scalar => 1,
            VisualizeMode::Terrain => 2,
            VisualizeMode::Wave => 3,
        }
    }

    pub fn from_index(index: u32) -> Option<Self> {
        match index {
            0 => Some(VisualizeMode::Color),
            1 => Some(VisualizeMode::Scalar),
            2 => Some(VisualizeMode::Terrain),
            3 => Some(VisualizeMode::Wave),
            _ => None,
        }
    }
}

/// Brush state for one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BrushInput {
    /// Position in cell units.
    pub position: Vec2,
    /// Position on the previous tick, in cell units.
    pub previous: Vec2,
    /// Position normalised to the unit square.
    pub normalized: Vec2,
    pub pressed: bool,
    pub mode: BrushMode,
}

impl BrushInput {
    pub fn idle() -> Self {
        Self {
            position: Vec2::ZERO,
            previous: Vec2::ZERO,
            normalized: Vec2::ZERO,
            pressed: false,
            mode: BrushMode::default(),
        }
    }

    pub fn pressed_flag(&self) -> f32 {
        if self.pressed {
            1.0
        } else {
            0.0
        }
    }
}

/// Everything a tick's operations read, built once per tick by the scheduler.
#[derive(Debug, Clone)]
pub struct TickParams {
    pub tick: u64,
    /// Seconds since the session started.
    pub time: f32,
    pub dt: f32,
    pub brush: BrushInput,
    pub dye_color: [f32; 4],
    pub fluid: FluidConfig,
    pub erosion: ErosionConfig,
    pub waves: WaveConfig,
}

impl TickParams {
    pub fn new(tick: u64, time: f32, brush: BrushInput, config: &SimulationConfig) -> Self {
        Self {
            tick,
            time,
            dt: config.time_step,
            brush,
            dye_color: dye_color(time),
            fluid: config.fluid.clone(),
            erosion: config.erosion.clone(),
            waves: config.waves.clone(),
        }
    }

    /// Erosion step length after time scaling.
    pub fn erosion_dt(&self) -> f32 {
        self.dt * self.erosion.time_scale
    }

    /// Erosion brush as `(x, y, radius, amount)` in normalised coordinates.
    pub fn erosion_brush(&self) -> [f32; 4] {
        let amount = if self.brush.pressed { self.erosion.brush_amount } else { 0.0 };
        [
            self.brush.normalized.x,
            self.brush.normalized.y,
            self.erosion.brush_radius,
            amount,
        ]
    }
}

/// Slowly cycling dye colour.
///
/// Hue follows the fractional part of two beating sines, saturation and value wobble in
/// narrow bands so the colour never washes out.
pub fn dye_color(time: f32) -> [f32; 4] {
    let a = (time * 0.8 + 1.2).sin();
    let b = (time * 0.7 + 2.0).sin();
    let hue = (a + b).abs().fract();
    let saturation = a.abs() * 0.2 + 0.8;
    let value = b.abs() * 0.2 + 0.5;
    let [r, g, bl] = hsv_to_rgb(hue, saturation, value);
    [r, g, bl, 1.0]
}

/// HSV with all channels in `[0, 1]` to linear RGB.
pub fn hsv_to_rgb(h: f32, s: f32, v: f32) -> [f32; 3] {
    let h6 = (h.fract() + 1.0).fract() * 6.0;
    let sector = h6.floor() as u32 % 6;
    let f = h6 - h6.floor();
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    match sector {
        0 => [v, t, p],
        1 => [q, v, p],
        2 => [p, v, t],
        3 => [p, q, v],
        4 => [t, p, v],
        _ => [v, p, q],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brush_mode_index_roundtrip() {
        for mode in [
            BrushMode::AddWater,
            BrushMode::RemoveWater,
            BrushMode::AddTerrain,
            BrushMode::RemoveTerrain,
        ] {
            assert_eq!(BrushMode::from_index(mode.index()), Some(mode));
        }
        assert_eq!(BrushMode::from_index(9), None);
        assert_eq!(VisualizeMode::from_index(3), Some(VisualizeMode::Wave));
    }

    #[test]
    fn test_hsv_primaries() {
        assert_eq!(hsv_to_rgb(0.0, 1.0, 1.0), [1.0, 0.0, 0.0]);
        let green = hsv_to_rgb(1.0 / 3.0, 1.0, 1.0);
        assert!((green[1] - 1.0).abs() < 1e-5 && green[0].abs() < 1e-5);
        assert_eq!(hsv_to_rgb(0.5, 0.0, 0.25), [0.25, 0.25, 0.25]);
    }

    #[test]
    fn test_dye_color_bands() {
        for i in 0..200 {
            let t = i as f32 * 0.37;
            let [r, g, b, a] = dye_color(t);
            let max = r.max(g).max(b);
            let min = r.min(g).min(b);
            // Value is max channel, saturation is (max - min) / max.
            assert!((0.5 - 1e-5..=0.7 + 1e-5).contains(&max), "t={t} value={max}");
            assert!((max - min) / max >= 0.8 - 1e-4, "t={t}");
            assert_eq!(a, 1.0);
        }
    }

    #[test]
    fn test_erosion_brush_only_when_pressed() {
        let config = SimulationConfig::default();
        let mut brush = BrushInput::idle();
        brush.normalized = Vec2::new(0.25, 0.75);
        let params = TickParams::new(0, 0.0, brush, &config);
        assert_eq!(params.erosion_brush()[3], 0.0);

        brush.pressed = true;
        let params = TickParams::new(0, 0.0, brush, &config);
        let [x, y, r, amount] = params.erosion_brush();
        assert_eq!((x, y), (0.25, 0.75));
        assert_eq!(r, config.erosion.brush_radius);
        assert_eq!(amount, config.erosion.brush_amount);
    }
}
