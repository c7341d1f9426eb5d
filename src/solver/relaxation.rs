//! Jacobi relaxation shared by diffusion and pressure projection.

use crate::dispatch::{param, slot, KernelId};
use crate::grid::{BoundaryCondition, GridBuffer, ScratchSlot};

use super::pingpong::PingPong;
use super::{IterativeSolver, SolverError};

/// Host-side coefficients of `x' = (sum of neighbours + center_factor * b) * r_diagonal`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JacobiCoefficients {
    pub center_factor: f32,
    pub r_diagonal: f32,
}

impl JacobiCoefficients {
    /// Implicit diffusion `(1 + 4a) x - a * neighbours = b` with `a = viscosity * dt`.
    ///
    /// Returns `None` when `a` is too small to divide by; the field is then left untouched.
    pub fn diffusion(viscosity: f32, dt: f32) -> Option<Self> {
        let alpha = viscosity * dt;
        if !(alpha > f32::EPSILON) {
            return None;
        }
        Some(Self {
            center_factor: 1.0 / alpha,
            r_diagonal: alpha / (1.0 + 4.0 * alpha),
        })
    }

    /// Poisson equation for pressure. The divergence pass scales its output by `1 / N^2`,
    /// so `center_factor * b` is the divergence in grid units.
    pub fn pressure(resolution: u32) -> Self {
        let n = resolution as f32;
        Self {
            center_factor: -(n * n),
            r_diagonal: 0.25,
        }
    }
}

/// What a relaxation call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaxReport {
    pub iterations: u32,
    pub copied_back: bool,
}

impl IterativeSolver<'_> {
    /// Record `iterations` Jacobi sweeps of `target` against the constant `rhs`.
    ///
    /// Iterates ping-pong between `target` and the shared scratch buffer, applies
    /// `boundary` to every sweep's output, copies the final iterate back to `target` when
    /// it ends in scratch, and leaves scratch zeroed.
    pub fn relax(
        &mut self,
        target: GridBuffer,
        rhs: GridBuffer,
        coefficients: JacobiCoefficients,
        iterations: u32,
        boundary: BoundaryCondition,
    ) -> Result<RelaxReport, SolverError> {
        let scratch = self.pool.scratch(ScratchSlot::Ping)?;
        let n = target.resolution;

        let mut state = PingPong::new();
        for _ in 0..iterations {
            let step = state.advance();
            let source = step.source.resolve(target, scratch);
            let result = step.result.resolve(target, scratch);

            self.queue.set_param(param::CENTER_FACTOR, coefficients.center_factor);
            self.queue.set_param(param::R_DIAGONAL, coefficients.r_diagonal);
            self.queue.bind(KernelId::JacobiSolve, slot::B_BUFFER, rhs);
            self.queue.bind(KernelId::JacobiSolve, slot::UPDATED_X, source);
            self.queue.bind(KernelId::JacobiSolve, slot::RESULTS, result);
            self.queue.dispatch(KernelId::JacobiSolve, n, n, 1)?;

            self.boundary(result, boundary)?;
        }

        let copied_back = state.needs_copy_back();
        if copied_back {
            log::debug!("Relaxation of {} ended in scratch; copying back", target.label);
            self.copy(scratch, target)?;
        }
        self.clear(scratch, 0.0)?;

        Ok(RelaxReport {
            iterations: state.steps(),
            copied_back,
        })
    }

    /// Implicit diffusion of `target`. Returns `None` when the diffusion is skipped.
    pub fn diffuse(
        &mut self,
        target: GridBuffer,
        viscosity: f32,
        dt: f32,
        iterations: u32,
        boundary: BoundaryCondition,
    ) -> Result<Option<RelaxReport>, SolverError> {
        let Some(coefficients) = JacobiCoefficients::diffusion(viscosity, dt) else {
            log::trace!("Skipping diffusion of {} (viscosity * dt = {})", target.label, viscosity * dt);
            return Ok(None);
        };

        let rhs = self.pool.scratch(ScratchSlot::Rhs)?;
        self.copy(target, rhs)?;
        let report = self.relax(target, rhs, coefficients, iterations, boundary)?;
        self.clear(rhs, 0.0)?;
        Ok(Some(report))
    }
}
