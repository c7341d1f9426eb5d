//! Simulation configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::Backend;
use crate::grid::{validate_resolution, MAX_RESOLUTION, MIN_RESOLUTION};

use super::terrain::TerrainNoiseConfig;
use super::waves::MAX_WAVES;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read or write config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Dye/velocity solver settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FluidConfig {
    /// Diffusion coefficient shared by dye and velocity.
    pub viscosity: f32,
    /// Jacobi sweeps per diffusion solve.
    pub diffusion_iterations: u32,
    /// Jacobi sweeps per pressure solve.
    pub pressure_iterations: u32,
    /// Fraction of dye kept per advection step.
    pub dye_dissipation: f32,
    /// Fraction of momentum kept per advection step.
    pub velocity_dissipation: f32,
    /// Dye brush radius in cells.
    pub dye_radius: f32,
    /// Exponent of the dye brush edge.
    pub dye_falloff: f32,
    /// Force brush radius in cells.
    pub force_radius: f32,
    /// Impulse per cell of brush travel.
    pub force_strength: f32,
}

impl Default for FluidConfig {
    fn default() -> Self {
        Self {
            viscosity: 0.5,
            diffusion_iterations: 80,
            pressure_iterations: 80,
            dye_dissipation: 0.99,
            velocity_dissipation: 0.999,
            dye_radius: 8.0,
            dye_falloff: 2.0,
            force_radius: 12.0,
            force_strength: 5.0,
        }
    }
}

/// Virtual-pipe shallow water settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErosionConfig {
    /// Multiplier on the tick length.
    pub time_scale: f32,
    /// Water added per second to every cell.
    pub rain_rate: f32,
    pub gravity: f32,
    /// Cross-section of the virtual pipes.
    pub pipe_area: f32,
    pub pipe_length: f32,
    /// World size of one cell along x and y.
    pub cell_size: [f32; 2],
    /// Water level the terrain is flooded to at init.
    pub water_height: f32,
    /// Fraction of water evaporating per second.
    pub evaporation: f32,
    /// Brush radius in normalised coordinates.
    pub brush_radius: f32,
    /// Height added or removed per second at the brush centre.
    pub brush_amount: f32,
}

impl Default for ErosionConfig {
    fn default() -> Self {
        Self {
            time_scale: 1.0,
            rain_rate: 0.012,
            gravity: 9.81,
            pipe_area: 20.0,
            pipe_length: 1.0 / 256.0,
            cell_size: [1.0 / 256.0, 1.0 / 256.0],
            water_height: 1.0,
            evaporation: 0.015,
            brush_radius: 0.05,
            brush_amount: 0.5,
        }
    }
}

/// Gerstner wave spectrum settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveConfig {
    pub count: u32,
    /// Base amplitude; individual waves vary around it.
    pub amplitude: f32,
    /// Base direction in degrees.
    pub direction: f32,
    /// Base wavelength in cells.
    pub wavelength: f32,
    pub seed: u64,
    /// Depth at which waves reach full height.
    pub max_visibility: f32,
    /// Rest height of the water surface.
    pub base_height: f32,
    pub gravity: f32,
}

impl Default for WaveConfig {
    fn default() -> Self {
        Self {
            count: 6,
            amplitude: 1.5,
            direction: 45.0,
            wavelength: 5.0,
            seed: 3234,
            max_visibility: 40.0,
            base_height: 0.0,
            gravity: 9.81,
        }
    }
}

/// Top-level configuration of a simulation session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Grid resolution (power of two).
    pub resolution: u32,
    /// Side length of the display texture.
    pub display_resolution: u32,
    pub backend: Backend,
    /// Seconds per tick.
    pub time_step: f32,
    pub fluid: FluidConfig,
    pub erosion: ErosionConfig,
    pub waves: WaveConfig,
    pub terrain: TerrainNoiseConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            resolution: 256,
            display_resolution: 256,
            backend: Backend::default(),
            time_step: 1.0 / 60.0,
            fluid: FluidConfig::default(),
            erosion: ErosionConfig::default(),
            waves: WaveConfig::default(),
            terrain: TerrainNoiseConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// Defaults at another grid and display resolution, validated.
    pub fn with_resolution(resolution: u32) -> Result<Self, ConfigError> {
        let config = Self {
            resolution,
            display_resolution: resolution,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Check ranges the kernels rely on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(msg: String) -> Result<(), ConfigError> {
            Err(ConfigError::Invalid(msg))
        }

        if validate_resolution(self.resolution).is_err() {
            return invalid(format!(
                "resolution {} must be a power of two in {MIN_RESOLUTION}..={MAX_RESOLUTION}",
                self.resolution
            ));
        }
        if self.display_resolution == 0 || self.display_resolution > 4096 {
            return invalid(format!("display_resolution {} must be in 1..=4096", self.display_resolution));
        }
        if !(self.time_step.is_finite() && self.time_step > 0.0) {
            return invalid(format!("time_step {} must be positive", self.time_step));
        }

        let fluid = &self.fluid;
        if !(fluid.viscosity >= 0.0) {
            return invalid(format!("fluid.viscosity {} must be non-negative", fluid.viscosity));
        }
        for (name, value) in [
            ("fluid.dye_dissipation", fluid.dye_dissipation),
            ("fluid.velocity_dissipation", fluid.velocity_dissipation),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return invalid(format!("{name} {value} must be in [0, 1]"));
            }
        }
        if fluid.dye_radius <= 0.0 || fluid.force_radius <= 0.0 {
            return invalid("fluid brush radii must be positive".to_string());
        }

        let erosion = &self.erosion;
        if erosion.pipe_length <= 0.0 || erosion.cell_size.iter().any(|&c| c <= 0.0) {
            return invalid("erosion.pipe_length and erosion.cell_size must be positive".to_string());
        }
        if erosion.time_scale < 0.0 || erosion.rain_rate < 0.0 || erosion.evaporation < 0.0 {
            return invalid("erosion time_scale, rain_rate and evaporation must be non-negative".to_string());
        }

        let waves = &self.waves;
        if waves.count == 0 || waves.count as usize > MAX_WAVES {
            return invalid(format!("waves.count {} must be in 1..={MAX_WAVES}", waves.count));
        }
        if waves.wavelength <= 0.0 || waves.max_visibility <= 0.0 {
            return invalid("waves.wavelength and waves.max_visibility must be positive".to_string());
        }

        if self.terrain.octaves == 0 {
            return invalid("terrain.octaves must be at least 1".to_string());
        }
        Ok(())
    }

    /// Load and validate a JSON config. Missing fields take their defaults.
    pub fn load_json(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_json(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SimulationConfig::default();
        config.validate().unwrap();
        assert_eq!(config.fluid.diffusion_iterations, 80);
        assert_eq!(config.erosion.rain_rate, 0.012);
        assert_eq!(config.waves.seed, 3234);
    }

    #[test]
    fn test_with_resolution() {
        let config = SimulationConfig::with_resolution(128).unwrap();
        assert_eq!(config.resolution, 128);
        assert_eq!(config.display_resolution, 128);
        for bad in [0, 2, 100, 2048] {
            assert!(
                matches!(SimulationConfig::with_resolution(bad), Err(ConfigError::Invalid(_))),
                "resolution {bad}"
            );
        }
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = SimulationConfig { resolution: 100, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.resolution = 64;
        config.time_step = 0.0;
        assert!(config.validate().is_err());

        config.time_step = 0.1;
        config.waves.count = MAX_WAVES as u32 + 1;
        assert!(config.validate().is_err());

        config.waves.count = 4;
        config.fluid.dye_dissipation = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sim.json");
        let mut config = SimulationConfig::default();
        config.resolution = 64;
        config.backend = Backend::CpuOnly;
        config.save_json(&path).unwrap();

        let loaded = SimulationConfig::load_json(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.json");
        std::fs::write(&path, r#"{ "resolution": 32, "fluid": { "viscosity": 0.1 } }"#).unwrap();

        let loaded = SimulationConfig::load_json(&path).unwrap();
        assert_eq!(loaded.resolution, 32);
        assert_eq!(loaded.fluid.viscosity, 0.1);
        assert_eq!(loaded.fluid.pressure_iterations, 80);
    }

    #[test]
    fn test_load_reports_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(matches!(SimulationConfig::load_json(&missing), Err(ConfigError::Io(_))));

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{ not json").unwrap();
        assert!(matches!(SimulationConfig::load_json(&bad), Err(ConfigError::Json(_))));
    }
}
