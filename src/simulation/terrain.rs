//! Fractal Brownian motion terrain used as the starting surface of the erosion scenario.

use serde::{Deserialize, Serialize};
use simdnoise::NoiseBuilder;

use crate::grid::FieldKind;

/// Configuration for fractal terrain generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainNoiseConfig {
    /// Number of noise octaves.
    pub octaves: u8,
    /// Noise features across the grid at the first octave.
    pub frequency: f32,
    /// Frequency multiplier per octave (typically 2.0).
    pub lacunarity: f32,
    /// Amplitude decay per octave (0.4-0.6 typical).
    pub persistence: f32,
    pub seed: i32,
    /// Surface height at the noise maximum; the minimum maps to zero.
    pub height_scale: f32,
}

impl Default for TerrainNoiseConfig {
    fn default() -> Self {
        Self {
            octaves: 5,
            frequency: 4.0,
            lacunarity: 2.0,
            persistence: 0.5,
            seed: 42,
            height_scale: 1.5,
        }
    }
}

/// Generate a surface height for every cell of an `n x n` grid, row-major.
///
/// The raw fBm is normalised to `[0, height_scale]`; a constant field maps to zero.
pub fn generate_heights(config: &TerrainNoiseConfig, resolution: u32) -> Vec<f32> {
    let n = resolution as usize;
    let (noise, min, max) = NoiseBuilder::fbm_2d(n, n)
        .with_seed(config.seed)
        .with_freq(config.frequency / resolution.max(1) as f32)
        .with_octaves(config.octaves)
        .with_gain(config.persistence)
        .with_lacunarity(config.lacunarity)
        .generate();

    let range = max - min;
    if !range.is_finite() || range <= f32::EPSILON {
        return vec![0.0; n * n];
    }
    noise
        .into_iter()
        .take(n * n)
        .map(|v| ((v - min) / range).clamp(0.0, 1.0) * config.height_scale)
        .collect()
}

/// A dry terrain field: surface from noise, no water, no sediment, unit hardness.
pub fn generate_terrain_field(config: &TerrainNoiseConfig, resolution: u32) -> Vec<f32> {
    let comps = FieldKind::Terrain.component_count() as usize;
    let heights = generate_heights(config, resolution);
    let mut field = vec![0.0f32; heights.len() * comps];
    for (cell, h) in field.chunks_mut(comps).zip(heights) {
        cell[0] = h;
        cell[3] = 1.0;
    }
    field
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heights_in_range() {
        let config = TerrainNoiseConfig::default();
        let heights = generate_heights(&config, 64);
        assert_eq!(heights.len(), 64 * 64);
        for &h in &heights {
            assert!((0.0..=config.height_scale).contains(&h), "height {h}");
        }
        let min = heights.iter().cloned().fold(f32::MAX, f32::min);
        let max = heights.iter().cloned().fold(f32::MIN, f32::max);
        assert!(max - min > 0.1, "terrain is flat: {min}..{max}");
    }

    #[test]
    fn test_heights_span_full_scale() {
        let config = TerrainNoiseConfig { height_scale: 2.0, ..Default::default() };
        let heights = generate_heights(&config, 32);
        let min = heights.iter().cloned().fold(f32::MAX, f32::min);
        let max = heights.iter().cloned().fold(f32::MIN, f32::max);
        assert!(min.abs() < 1e-5, "min {min}");
        assert!((max - 2.0).abs() < 1e-4, "max {max}");
    }

    #[test]
    fn test_same_seed_same_terrain() {
        let config = TerrainNoiseConfig::default();
        assert_eq!(generate_heights(&config, 32), generate_heights(&config, 32));

        let other = TerrainNoiseConfig { seed: 7, ..Default::default() };
        assert_ne!(generate_heights(&config, 32), generate_heights(&other, 32));
    }

    #[test]
    fn test_terrain_field_layout() {
        let field = generate_terrain_field(&TerrainNoiseConfig::default(), 8);
        assert_eq!(field.len(), 8 * 8 * 4);
        for cell in field.chunks(4) {
            assert_eq!(cell[1], 0.0);
            assert_eq!(cell[2], 0.0);
            assert_eq!(cell[3], 1.0);
        }
    }

    #[test]
    fn test_noise_is_continuous() {
        let config = TerrainNoiseConfig { octaves: 1, ..Default::default() };
        let heights = generate_heights(&config, 128);
        for y in 0..128 {
            for x in 1..128 {
                let step = (heights[y * 128 + x] - heights[y * 128 + x - 1]).abs();
                assert!(step < 0.2, "jump of {step} at ({x}, {y})");
            }
        }
    }
}
