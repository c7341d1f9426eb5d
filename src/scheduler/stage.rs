//! Scenario data: which fields exist, how they start, and what runs each tick.

use serde::{Deserialize, Serialize};

use crate::grid::FieldKind;
use crate::simulation::{BrushMode, SimulationField, VisualizeMode, WaveSpectrum};
use crate::solver::SolverError;

use super::SchedulerError;

/// One field operation in a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    AddDye,
    AddForce,
    /// Advect `field` through the velocity field `by`.
    Advect { field: FieldKind, by: FieldKind },
    Diffuse(FieldKind),
    Project,
    Boundary(FieldKind),
    Wave,
    InitWaterHeight,
    Brush,
    FluxComputation,
    FluxApply,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::AddDye => "add-dye",
            Stage::AddForce => "add-force",
            Stage::Advect { .. } => "advect",
            Stage::Diffuse(_) => "diffuse",
            Stage::Project => "project",
            Stage::Boundary(_) => "boundary",
            Stage::Wave => "wave",
            Stage::InitWaterHeight => "init-water-height",
            Stage::Brush => "brush",
            Stage::FluxComputation => "flux-computation",
            Stage::FluxApply => "flux-apply",
        }
    }

    /// Fields the stage reads or writes.
    pub fn fields(&self) -> Vec<FieldKind> {
        match *self {
            Stage::AddDye => vec![FieldKind::Dye],
            Stage::AddForce => vec![FieldKind::Velocity],
            Stage::Advect { field, by } => vec![field, by],
            Stage::Diffuse(field) | Stage::Boundary(field) => vec![field],
            Stage::Project => vec![FieldKind::Velocity, FieldKind::Pressure, FieldKind::Divergence],
            Stage::Wave => vec![FieldKind::Depth, FieldKind::Wave],
            Stage::InitWaterHeight | Stage::Brush => vec![FieldKind::Terrain],
            Stage::FluxComputation => vec![FieldKind::Terrain, FieldKind::Flux],
            Stage::FluxApply => vec![FieldKind::Terrain, FieldKind::Flux, FieldKind::Velocity],
        }
    }

    /// Record the stage's dispatches.
    pub fn record(&self, ops: &mut SimulationField<'_>, spectrum: &WaveSpectrum) -> Result<(), SolverError> {
        match *self {
            Stage::AddDye => ops.add_dye(),
            Stage::AddForce => ops.add_force(),
            Stage::Advect { field, by } => ops.advect(field, by),
            Stage::Diffuse(field) => ops.diffuse(field).map(|_| ()),
            Stage::Project => ops.project().map(|_| ()),
            Stage::Boundary(field) => ops.handle_boundary(field).map(|_| ()),
            Stage::Wave => ops.wave(spectrum),
            Stage::InitWaterHeight => ops.init_water_height(),
            Stage::Brush => ops.brush(),
            Stage::FluxComputation => ops.flux_computation(),
            Stage::FluxApply => ops.flux_apply(),
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Advect { field, by } => write!(f, "advect({field} by {by})"),
            Stage::Diffuse(field) => write!(f, "diffuse({field})"),
            Stage::Boundary(field) => write!(f, "boundary({field})"),
            other => f.write_str(other.name()),
        }
    }
}

/// Host data written into a field before the first tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldUpload {
    /// Fractal terrain surface into the terrain field.
    TerrainNoise,
    /// Captured environment depth into the depth field.
    CapturedDepth,
}

impl FieldUpload {
    pub fn field(&self) -> FieldKind {
        match self {
            FieldUpload::TerrainNoise => FieldKind::Terrain,
            FieldUpload::CapturedDepth => FieldKind::Depth,
        }
    }
}

/// How the display texture is produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplaySpec {
    pub field: FieldKind,
    pub mode: VisualizeMode,
    /// Value range mapped to black..white; `None` picks one from the config.
    pub range: Option<[f32; 2]>,
}

/// A complete simulation setup.
#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    pub name: &'static str,
    /// Fields allocated at session start.
    pub fields: Vec<FieldKind>,
    pub uploads: Vec<FieldUpload>,
    /// Stages recorded once after the uploads.
    pub init: Vec<Stage>,
    /// Stages recorded every tick, in order.
    pub stages: Vec<Stage>,
    pub display: DisplaySpec,
    /// Brush mode used by scripted input.
    pub brush_mode: BrushMode,
}

impl Scenario {
    /// Dye painted into still fluid, then advected and diffused.
    pub fn dye() -> Self {
        Self {
            name: "dye",
            fields: vec![FieldKind::Dye, FieldKind::Velocity],
            uploads: Vec::new(),
            init: Vec::new(),
            stages: vec![
                Stage::AddDye,
                Stage::Advect { field: FieldKind::Dye, by: FieldKind::Velocity },
                Stage::Diffuse(FieldKind::Dye),
            ],
            display: DisplaySpec {
                field: FieldKind::Dye,
                mode: VisualizeMode::Color,
                range: Some([0.0, 1.0]),
            },
            brush_mode: BrushMode::default(),
        }
    }

    /// Incompressible fluid stirred by the brush, carrying dye.
    pub fn fluid() -> Self {
        Self {
            name: "fluid",
            fields: vec![
                FieldKind::Dye,
                FieldKind::Velocity,
                FieldKind::Pressure,
                FieldKind::Divergence,
            ],
            uploads: Vec::new(),
            init: Vec::new(),
            stages: vec![
                Stage::AddForce,
                Stage::AddDye,
                Stage::Advect { field: FieldKind::Velocity, by: FieldKind::Velocity },
                Stage::Diffuse(FieldKind::Velocity),
                Stage::Project,
                Stage::Advect { field: FieldKind::Dye, by: FieldKind::Velocity },
                Stage::Diffuse(FieldKind::Dye),
                Stage::Boundary(FieldKind::Velocity),
            ],
            display: DisplaySpec {
                field: FieldKind::Dye,
                mode: VisualizeMode::Color,
                range: Some([0.0, 1.0]),
            },
            brush_mode: BrushMode::default(),
        }
    }

    /// Shallow water flowing over fractal terrain.
    pub fn erosion() -> Self {
        Self {
            name: "erosion",
            fields: vec![FieldKind::Terrain, FieldKind::Flux, FieldKind::Velocity],
            uploads: vec![FieldUpload::TerrainNoise],
            init: vec![Stage::InitWaterHeight],
            stages: vec![Stage::Brush, Stage::FluxComputation, Stage::FluxApply],
            display: DisplaySpec {
                field: FieldKind::Terrain,
                mode: VisualizeMode::Terrain,
                range: None,
            },
            brush_mode: BrushMode::AddWater,
        }
    }

    /// Gerstner waves over the captured seabed.
    pub fn waves() -> Self {
        Self {
            name: "waves",
            fields: vec![FieldKind::Wave, FieldKind::Depth],
            uploads: vec![FieldUpload::CapturedDepth],
            init: Vec::new(),
            stages: vec![Stage::Wave],
            display: DisplaySpec {
                field: FieldKind::Wave,
                mode: VisualizeMode::Wave,
                range: None,
            },
            brush_mode: BrushMode::default(),
        }
    }

    /// Every stage, upload and the display must only touch allocated fields.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        let check = |stage: &str, field: FieldKind| {
            if self.fields.contains(&field) {
                Ok(())
            } else {
                Err(SchedulerError::MissingField {
                    stage: stage.to_string(),
                    field,
                })
            }
        };

        for stage in self.init.iter().chain(&self.stages) {
            for field in stage.fields() {
                check(&stage.to_string(), field)?;
            }
        }
        for upload in &self.uploads {
            check("upload", upload.field())?;
        }
        check("visualize", self.display.field)
    }
}

/// Built-in scenarios selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioKind {
    Dye,
    #[default]
    Fluid,
    Erosion,
    Waves,
}

impl ScenarioKind {
    pub fn scenario(self) -> Scenario {
        match self {
            ScenarioKind::Dye => Scenario::dye(),
            ScenarioKind::Fluid => Scenario::fluid(),
            ScenarioKind::Erosion => Scenario::erosion(),
            ScenarioKind::Waves => Scenario::waves(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_validate() {
        for kind in [ScenarioKind::Dye, ScenarioKind::Fluid, ScenarioKind::Erosion, ScenarioKind::Waves] {
            let scenario = kind.scenario();
            scenario.validate().unwrap();
            assert!(!scenario.stages.is_empty());
        }
    }

    #[test]
    fn test_fluid_pipeline_order() {
        let names: Vec<String> = Scenario::fluid().stages.iter().map(|s| s.to_string()).collect();
        assert_eq!(
            names,
            vec![
                "add-force",
                "add-dye",
                "advect(velocity by velocity)",
                "diffuse(velocity)",
                "project",
                "advect(dye by velocity)",
                "diffuse(dye)",
                "boundary(velocity)",
            ]
        );
    }

    #[test]
    fn test_missing_field_rejected() {
        let mut scenario = Scenario::fluid();
        scenario.fields.retain(|&f| f != FieldKind::Pressure);
        match scenario.validate() {
            Err(SchedulerError::MissingField { stage, field }) => {
                assert_eq!(stage, "project");
                assert_eq!(field, FieldKind::Pressure);
            }
            other => panic!("expected MissingField, got {other:?}"),
        }

        let mut scenario = Scenario::waves();
        scenario.fields = vec![FieldKind::Wave];
        assert!(matches!(
            scenario.validate(),
            Err(SchedulerError::MissingField { field: FieldKind::Depth, .. })
        ));
    }
}
