//! Per-tick field operations and the settings that drive them.

pub mod config;
mod field_ops;
pub mod params;
pub mod terrain;
pub mod waves;

pub use config::{ConfigError, ErosionConfig, FluidConfig, SimulationConfig, WaveConfig};
pub use field_ops::SimulationField;
pub use params::{dye_color, BrushInput, BrushMode, TickParams, VisualizeMode};
pub use terrain::{generate_heights, generate_terrain_field, TerrainNoiseConfig};
pub use waves::{Wave, WaveSpectrum, MAX_WAVES};
