//! Iterative solvers recorded onto the dispatch queue.
//!
//! Nothing here touches the device. Every method records dispatches against pool buffers;
//! the frame scheduler submits them once per tick.

mod passes;
pub mod pingpong;
pub mod relaxation;

use thiserror::Error;

use crate::dispatch::{DispatchError, KernelDispatchQueue};
use crate::grid::{GridBufferPool, PoolError};

pub use pingpong::{PingPong, PingPongStep, Role};
pub use relaxation::{JacobiCoefficients, RelaxReport};

#[derive(Debug, Error)]
pub enum SolverError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Records solver passes for one tick.
pub struct IterativeSolver<'a> {
    queue: &'a mut KernelDispatchQueue,
    pool: &'a GridBufferPool,
}

impl<'a> IterativeSolver<'a> {
    pub fn new(queue: &'a mut KernelDispatchQueue, pool: &'a GridBufferPool) -> Self {
        Self { queue, pool }
    }
}
