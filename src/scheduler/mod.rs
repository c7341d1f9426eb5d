//! The per-tick driver: sample input, record a scenario's stages, submit, present.

mod frame;
pub mod io;
mod readback;
pub mod stage;

use thiserror::Error;

use crate::device::DeviceError;
use crate::dispatch::DispatchError;
use crate::grid::{FieldKind, PoolError};
use crate::simulation::ConfigError;
use crate::solver::SolverError;

pub use frame::{FrameScheduler, SessionIo, TickReport};
pub use io::{
    ControlInput, ControlSurface, DepthCapture, DiscardSink, DisplayError, DisplayFrame, DisplaySink,
    FlatSeabed, IdleControl, MemorySink, OrbitingBrush, ShelvingSeabed,
};
pub use readback::ReadbackSlot;
pub use stage::{DisplaySpec, FieldUpload, Scenario, ScenarioKind, Stage};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Solver(#[from] SolverError),
    #[error("Stage '{stage}' needs the {field} field, which the scenario does not allocate")]
    MissingField { stage: String, field: FieldKind },
    #[error("Display sink failed: {0}")]
    Display(#[from] DisplayError),
}
