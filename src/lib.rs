//! Host-side scheduler for grid simulations on a compute device.
//!
//! A session owns a pool of square `f32` grid buffers, records kernel dispatches into a
//! per-tick queue, and drives iterative solvers (Jacobi diffusion and pressure projection),
//! virtual-pipe erosion and Gerstner waves through it. Kernels run on a wgpu device or on
//! the rayon CPU reference backend.

pub mod device;
pub mod dispatch;
pub mod export;
pub mod grid;
pub mod scheduler;
pub mod simulation;
pub mod solver;

pub use device::{create_device, Backend, ComputeDevice, CpuDevice, DeviceError, WgpuDevice};
pub use dispatch::{DispatchError, KernelDispatchQueue, KernelId, ParamValue};
pub use grid::{BoundaryCondition, FieldKind, GridBuffer, GridBufferPool, PoolError};
pub use scheduler::{FrameScheduler, Scenario, ScenarioKind, SchedulerError, SessionIo, Stage, TickReport};
pub use simulation::{SimulationConfig, SimulationField, TickParams, WaveSpectrum};
pub use solver::{IterativeSolver, SolverError};
