//! Single-dispatch passes: advection, divergence, gradient, boundary, copy and clear.

use crate::dispatch::{param, slot, KernelId};
use crate::grid::{BoundaryCondition, GridBuffer, ScratchSlot};

use super::relaxation::{JacobiCoefficients, RelaxReport};
use super::{IterativeSolver, SolverError};

impl IterativeSolver<'_> {
    /// Semi-Lagrangian advection of `target` through `velocity`.
    ///
    /// The new field is written to scratch, copied back, and scratch is cleared.
    /// `velocity` may be `target` itself.
    pub fn advect(
        &mut self,
        target: GridBuffer,
        velocity: GridBuffer,
        dt: f32,
        dissipation: f32,
    ) -> Result<(), SolverError> {
        let scratch = self.pool.scratch(ScratchSlot::Ping)?;
        let n = target.resolution;

        self.queue.set_param(param::TIME_STEP, dt);
        self.queue.set_param(param::DISSIPATION, dissipation);
        self.queue.bind(KernelId::Advection, slot::VELOCITY_FIELD, velocity);
        self.queue.bind(KernelId::Advection, slot::FIELD_TO_ADVECT, target);
        self.queue.bind(KernelId::Advection, slot::NEW_ADVECTED_FIELD, scratch);
        self.queue.dispatch(KernelId::Advection, n, n, 1)?;

        self.copy(scratch, target)?;
        self.clear(scratch, 0.0)
    }

    /// Write the scaled divergence of `velocity` into `out`.
    pub fn divergence(&mut self, velocity: GridBuffer, out: GridBuffer) -> Result<(), SolverError> {
        let n = velocity.resolution;
        let scale = 1.0 / (n as f32 * n as f32);

        self.queue.set_param(param::DIVERGENCE_SCALE, scale);
        self.queue.bind(KernelId::Divergence, slot::VELOCITY_FIELD, velocity);
        self.queue.bind(KernelId::Divergence, slot::DIVERGENCE_OUT, out);
        self.queue.dispatch(KernelId::Divergence, n, n, 1)?;
        Ok(())
    }

    /// Subtract the pressure gradient from `velocity` in place.
    pub fn subtract_gradient(&mut self, pressure: GridBuffer, velocity: GridBuffer) -> Result<(), SolverError> {
        let n = velocity.resolution;
        self.queue.set_param(param::GRADIENT_SCALE, 1.0f32);
        self.queue.bind(KernelId::SubtractGradient, slot::PRESSURE_BUFFER, pressure);
        self.queue.bind(KernelId::SubtractGradient, slot::VELOCITY_BUFFER, velocity);
        self.queue.dispatch(KernelId::SubtractGradient, n, n, 1)?;
        Ok(())
    }

    /// Make `velocity` divergence free.
    ///
    /// Divergence, cleared pressure, Jacobi with a Neumann edge every sweep, gradient
    /// subtraction and finally a no-slip edge on the velocity.
    pub fn project(
        &mut self,
        velocity: GridBuffer,
        pressure: GridBuffer,
        divergence: GridBuffer,
        iterations: u32,
    ) -> Result<RelaxReport, SolverError> {
        self.divergence(velocity, divergence)?;
        self.clear(pressure, 0.0)?;
        let report = self.relax(
            pressure,
            divergence,
            JacobiCoefficients::pressure(pressure.resolution),
            iterations,
            BoundaryCondition::Neumann,
        )?;
        self.subtract_gradient(pressure, velocity)?;
        self.boundary(velocity, BoundaryCondition::NoSlip)?;
        Ok(report)
    }

    /// Apply an edge condition. Open edges record nothing and return false.
    pub fn boundary(&mut self, field: GridBuffer, condition: BoundaryCondition) -> Result<bool, SolverError> {
        if condition.is_open() {
            return Ok(false);
        }
        let n = field.resolution;
        self.queue.set_param(param::BOUNDARY_SCALE, condition.scale());
        self.queue.bind(KernelId::Boundary, slot::BOUNDARY_FIELD, field);
        self.queue.dispatch(KernelId::Boundary, 4 * n, 1, 1)?;
        Ok(true)
    }

    pub fn copy(&mut self, source: GridBuffer, target: GridBuffer) -> Result<(), SolverError> {
        let cells = source.cell_count() as u32;
        self.queue.bind(KernelId::CopyBuffer, slot::COPY_SOURCE, source);
        self.queue.bind(KernelId::CopyBuffer, slot::COPY_TARGET, target);
        self.queue.dispatch(KernelId::CopyBuffer, cells, 1, 1)?;
        Ok(())
    }

    pub fn clear(&mut self, target: GridBuffer, value: f32) -> Result<(), SolverError> {
        let cells = target.cell_count() as u32;
        self.queue.set_param(param::CLEAR_VALUE, value);
        self.queue.bind(KernelId::ClearBuffer, slot::CLEAR_TARGET, target);
        self.queue.dispatch(KernelId::ClearBuffer, cells, 1, 1)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ComputeDevice, CpuDevice};
    use crate::dispatch::KernelDispatchQueue;
    use crate::grid::{FieldKind, GridBufferPool};

    fn setup(n: u32) -> (CpuDevice, GridBufferPool, KernelDispatchQueue) {
        let mut device = CpuDevice::new();
        let pool = GridBufferPool::new(&mut device, n).unwrap();
        let queue = KernelDispatchQueue::for_device(&device);
        (device, pool, queue)
    }

    fn is_edge(x: usize, y: usize, n: usize) -> bool {
        x == 0 || y == 0 || x == n - 1 || y == n - 1
    }

    #[test]
    fn test_zero_velocity_advection_is_identity() {
        let (mut device, mut pool, mut queue) = setup(16);
        let dye = pool.allocate(&mut device, FieldKind::Dye, 16).unwrap();
        let velocity = pool.allocate(&mut device, FieldKind::Velocity, 16).unwrap();
        let data: Vec<f32> = (0..dye.len()).map(|i| ((i * 13) % 7) as f32 * 0.1).collect();
        device.write_buffer(dye.id, &data).unwrap();

        IterativeSolver::new(&mut queue, &pool)
            .advect(dye, velocity, 0.5, 1.0)
            .unwrap();
        queue.submit(&mut device).unwrap();
        assert_eq!(device.read_buffer(dye.id).unwrap(), data);
        let scratch = pool.scratch(ScratchSlot::Ping).unwrap();
        assert!(device.read_buffer(scratch.id).unwrap().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_uniform_velocity_shifts_field() {
        let n = 16usize;
        let (mut device, mut pool, mut queue) = setup(n as u32);
        let pressure = pool.allocate(&mut device, FieldKind::Pressure, n as u32).unwrap();
        let velocity = pool.allocate(&mut device, FieldKind::Velocity, n as u32).unwrap();
        let field: Vec<f32> = (0..n * n).map(|i| (i % n) as f32).collect();
        device.write_buffer(pressure.id, &field).unwrap();
        let vel: Vec<f32> = (0..n * n).flat_map(|_| [1.0, 0.0]).collect();
        device.write_buffer(velocity.id, &vel).unwrap();

        IterativeSolver::new(&mut queue, &pool)
            .advect(pressure, velocity, 1.0, 1.0)
            .unwrap();
        queue.submit(&mut device).unwrap();

        let out = device.read_buffer(pressure.id).unwrap();
        // Each cell takes the value one cell to its left; the left column clamps.
        assert_eq!(out[3 * n + 5], 4.0);
        assert_eq!(out[3 * n], 0.0);
    }

    #[test]
    fn test_boundary_scales() {
        let n = 8usize;
        let (mut device, mut pool, mut queue) = setup(n as u32);
        let velocity = pool.allocate(&mut device, FieldKind::Velocity, n as u32).unwrap();
        let pressure = pool.allocate(&mut device, FieldKind::Pressure, n as u32).unwrap();
        let dye = pool.allocate(&mut device, FieldKind::Dye, n as u32).unwrap();
        device.write_buffer(velocity.id, &vec![1.0; velocity.len()]).unwrap();
        device.write_buffer(pressure.id, &vec![2.0; pressure.len()]).unwrap();
        device.write_buffer(dye.id, &vec![3.0; dye.len()]).unwrap();

        let mut solver = IterativeSolver::new(&mut queue, &pool);
        assert!(solver.boundary(velocity, FieldKind::Velocity.boundary()).unwrap());
        assert!(solver.boundary(pressure, FieldKind::Pressure.boundary()).unwrap());
        assert!(!solver.boundary(dye, FieldKind::Dye.boundary()).unwrap());
        assert_eq!(queue.pending().len(), 2);
        queue.submit(&mut device).unwrap();

        let vel = device.read_buffer(velocity.id).unwrap();
        let pre = device.read_buffer(pressure.id).unwrap();
        for y in 0..n {
            for x in 0..n {
                let i = y * n + x;
                let (ev, ep) = if is_edge(x, y, n) { (-1.0, 2.0) } else { (1.0, 2.0) };
                assert_eq!(vel[2 * i], ev, "velocity ({x}, {y})");
                assert_eq!(vel[2 * i + 1], ev);
                assert_eq!(pre[i], ep);
            }
        }
        assert!(device.read_buffer(dye.id).unwrap().iter().all(|&v| v == 3.0));
    }

    #[test]
    fn test_boundary_corner_uses_diagonal() {
        let n = 8usize;
        let (mut device, mut pool, mut queue) = setup(n as u32);
        let pressure = pool.allocate(&mut device, FieldKind::Pressure, n as u32).unwrap();
        let data: Vec<f32> = (0..n * n).map(|i| i as f32).collect();
        device.write_buffer(pressure.id, &data).unwrap();

        IterativeSolver::new(&mut queue, &pool)
            .boundary(pressure, BoundaryCondition::Neumann)
            .unwrap();
        queue.submit(&mut device).unwrap();

        let out = device.read_buffer(pressure.id).unwrap();
        assert_eq!(out[0], data[n + 1]);
        assert_eq!(out[n - 1], data[n + n - 2]);
        assert_eq!(out[(n - 1) * n], data[(n - 2) * n + 1]);
        assert_eq!(out[n * n - 1], data[(n - 2) * n + n - 2]);
        assert_eq!(out[3 * n], data[3 * n + 1]);
    }

    #[test]
    fn test_projection_reduces_divergence() {
        let n = 16usize;
        let (mut device, mut pool, mut queue) = setup(n as u32);
        let velocity = pool.allocate(&mut device, FieldKind::Velocity, n as u32).unwrap();
        let pressure = pool.allocate(&mut device, FieldKind::Pressure, n as u32).unwrap();
        let divergence = pool.allocate(&mut device, FieldKind::Divergence, n as u32).unwrap();

        let mut vel = vec![0.0f32; velocity.len()];
        for y in 0..n {
            for x in 0..n {
                let phase = std::f32::consts::TAU * x as f32 / 8.0;
                vel[2 * (y * n + x)] = phase.sin();
            }
        }
        device.write_buffer(velocity.id, &vel).unwrap();

        let interior_divergence = |v: &[f32]| -> f32 {
            let mut total = 0.0;
            for y in 3..n - 3 {
                for x in 3..n - 3 {
                    let du = v[2 * (y * n + x + 1)] - v[2 * (y * n + x - 1)];
                    let dv = v[2 * ((y + 1) * n + x) + 1] - v[2 * ((y - 1) * n + x) + 1];
                    total += (0.5 * (du + dv)).powi(2);
                }
            }
            total
        };
        let before = interior_divergence(&vel);

        let report = IterativeSolver::new(&mut queue, &pool)
            .project(velocity, pressure, divergence, 80)
            .unwrap();
        assert_eq!(report.iterations, 80);
        queue.submit(&mut device).unwrap();

        let after = interior_divergence(&device.read_buffer(velocity.id).unwrap());
        assert!(after < 0.5 * before, "divergence {before} -> {after}");
        for slot in ScratchSlot::ALL {
            let scratch = pool.scratch(slot).unwrap();
            assert!(device.read_buffer(scratch.id).unwrap().iter().all(|&v| v == 0.0));
        }
    }

    #[test]
    fn test_clear_and_copy() {
        let (mut device, mut pool, mut queue) = setup(8);
        let velocity = pool.allocate(&mut device, FieldKind::Velocity, 8).unwrap();
        let ping = pool.scratch(ScratchSlot::Ping).unwrap();

        let mut solver = IterativeSolver::new(&mut queue, &pool);
        solver.clear(ping, 4.0).unwrap();
        solver.copy(ping, velocity).unwrap();
        queue.submit(&mut device).unwrap();

        assert!(device.read_buffer(velocity.id).unwrap().iter().all(|&v| v == 4.0));
    }
}
