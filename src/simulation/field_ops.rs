//! Per-field operations of one tick.
//!
//! Every operation sets each parameter its kernels read right before it dispatches, so
//! the order operations run in never leaks state from one into the next.

use crate::dispatch::{param, slot, KernelDispatchQueue, KernelId};
use crate::grid::{FieldKind, GridBuffer, GridBufferPool};
use crate::solver::{IterativeSolver, RelaxReport, SolverError};

use super::params::{TickParams, VisualizeMode};
use super::waves::WaveSpectrum;

/// Records the operations of one tick against the pool's fields.
pub struct SimulationField<'a> {
    queue: &'a mut KernelDispatchQueue,
    pool: &'a GridBufferPool,
    params: &'a TickParams,
}

impl<'a> SimulationField<'a> {
    pub fn new(queue: &'a mut KernelDispatchQueue, pool: &'a GridBufferPool, params: &'a TickParams) -> Self {
        Self { queue, pool, params }
    }

    fn solver(&mut self) -> IterativeSolver<'_> {
        IterativeSolver::new(&mut *self.queue, self.pool)
    }

    fn field(&self, kind: FieldKind) -> Result<GridBuffer, SolverError> {
        Ok(self.pool.field(kind)?)
    }

    fn set_brush_params(&mut self) {
        let brush = &self.params.brush;
        self.queue.set_param(param::MOUSE_POSITION, brush.position);
        self.queue.set_param(param::MOUSE_POSITION_PREV, brush.previous);
        self.queue.set_param(param::MOUSE_PRESSED, brush.pressed_flag());
    }

    /// Paint the tick's dye colour under the brush.
    pub fn add_dye(&mut self) -> Result<(), SolverError> {
        let dye = self.field(FieldKind::Dye)?;
        let fluid = &self.params.fluid;
        let (radius, falloff) = (fluid.dye_radius, fluid.dye_falloff);

        self.set_brush_params();
        self.queue.set_param(param::DYE_COLOR, self.params.dye_color);
        self.queue.set_param(param::DYE_RADIUS, radius);
        self.queue.set_param(param::DYE_FALLOFF, falloff);
        self.queue.bind(KernelId::AddDye, slot::DYE_BUFFER, dye);
        self.queue.dispatch(KernelId::AddDye, dye.resolution, dye.resolution, 1)?;
        Ok(())
    }

    /// Push the velocity field along the brush's motion.
    pub fn add_force(&mut self) -> Result<(), SolverError> {
        let velocity = self.field(FieldKind::Velocity)?;
        let fluid = &self.params.fluid;
        let (radius, strength) = (fluid.force_radius, fluid.force_strength);

        self.set_brush_params();
        self.queue.set_param(param::FORCE_RADIUS, radius);
        self.queue.set_param(param::FORCE_STRENGTH, strength);
        self.queue.bind(KernelId::AddForce, slot::VELOCITY_BUFFER, velocity);
        self.queue.dispatch(KernelId::AddForce, velocity.resolution, velocity.resolution, 1)?;
        Ok(())
    }

    /// Advect `kind` through the velocity field `by`.
    pub fn advect(&mut self, kind: FieldKind, by: FieldKind) -> Result<(), SolverError> {
        let target = self.field(kind)?;
        let velocity = self.field(by)?;
        let dissipation = match kind {
            FieldKind::Dye => self.params.fluid.dye_dissipation,
            FieldKind::Velocity => self.params.fluid.velocity_dissipation,
            _ => 1.0,
        };
        let dt = self.params.dt;
        self.solver().advect(target, velocity, dt, dissipation)
    }

    /// Implicit viscous diffusion. Returns `None` when skipped for zero viscosity.
    pub fn diffuse(&mut self, kind: FieldKind) -> Result<Option<RelaxReport>, SolverError> {
        let target = self.field(kind)?;
        let fluid = &self.params.fluid;
        let (viscosity, iterations) = (fluid.viscosity, fluid.diffusion_iterations);
        let dt = self.params.dt;
        self.solver().diffuse(target, viscosity, dt, iterations, kind.boundary())
    }

    /// Pressure projection of the velocity field.
    pub fn project(&mut self) -> Result<RelaxReport, SolverError> {
        let velocity = self.field(FieldKind::Velocity)?;
        let pressure = self.field(FieldKind::Pressure)?;
        let divergence = self.field(FieldKind::Divergence)?;
        let iterations = self.params.fluid.pressure_iterations;
        self.solver().project(velocity, pressure, divergence, iterations)
    }

    /// Apply the edge condition of `kind`. Returns false for open edges.
    pub fn handle_boundary(&mut self, kind: FieldKind) -> Result<bool, SolverError> {
        let field = self.field(kind)?;
        self.solver().boundary(field, kind.boundary())
    }

    /// Sum the wave spectrum into the wave field, attenuated by the captured depth.
    pub fn wave(&mut self, spectrum: &WaveSpectrum) -> Result<(), SolverError> {
        let depth = self.field(FieldKind::Depth)?;
        let wave = self.field(FieldKind::Wave)?;
        let waves = &self.params.waves;

        self.queue.set_param(param::TIME, self.params.time);
        self.queue.set_param(param::WAVE_COUNT, spectrum.len() as u32);
        self.queue.set_param(param::WAVES, spectrum.as_param());
        self.queue.set_param(param::WAVE_HEIGHT, waves.base_height);
        self.queue.set_param(param::MAX_DEPTH, waves.max_visibility);
        self.queue.set_param(param::GRAVITY, waves.gravity);
        self.queue.bind(KernelId::WaveOperation, slot::WATER_DEPTH_MAP, depth);
        self.queue.bind(KernelId::WaveOperation, slot::WAVE_BUFFER, wave);
        self.queue.dispatch(KernelId::WaveOperation, wave.resolution, wave.resolution, 1)?;
        Ok(())
    }

    /// Flood the terrain up to the configured water level.
    pub fn init_water_height(&mut self) -> Result<(), SolverError> {
        let terrain = self.field(FieldKind::Terrain)?;
        self.queue.set_param(param::WATER_HEIGHT, self.params.erosion.water_height);
        self.queue.bind(KernelId::InitWaterHeight, slot::HEIGHT_MAP, terrain);
        self.queue.dispatch(KernelId::InitWaterHeight, terrain.resolution, terrain.resolution, 1)?;
        Ok(())
    }

    /// Add or remove water or terrain under the brush.
    pub fn brush(&mut self) -> Result<(), SolverError> {
        let terrain = self.field(FieldKind::Terrain)?;
        self.queue.set_param(param::BRUSH, self.params.erosion_brush());
        self.queue.set_param(param::BRUSH_MODE, self.params.brush.mode.index());
        self.queue.set_param(param::TIME_STEP, self.params.erosion_dt());
        self.queue.bind(KernelId::PressureControl, slot::HEIGHT_MAP, terrain);
        self.queue.dispatch(KernelId::PressureControl, terrain.resolution, terrain.resolution, 1)?;
        Ok(())
    }

    /// Update the outflow of every virtual pipe from the height differences.
    pub fn flux_computation(&mut self) -> Result<(), SolverError> {
        let terrain = self.field(FieldKind::Terrain)?;
        let flux = self.field(FieldKind::Flux)?;
        let erosion = &self.params.erosion;
        let (gravity, area, length, cell) =
            (erosion.gravity, erosion.pipe_area, erosion.pipe_length, erosion.cell_size);

        self.queue.set_param(param::TIME_STEP, self.params.erosion_dt());
        self.queue.set_param(param::GRAVITY, gravity);
        self.queue.set_param(param::PIPE_AREA, area);
        self.queue.set_param(param::PIPE_LENGTH, length);
        self.queue.set_param(param::CELL_SIZE, cell);
        self.queue.bind(KernelId::FluxComputation, slot::HEIGHT_MAP, terrain);
        self.queue.bind(KernelId::FluxComputation, slot::FLUX_MAP, flux);
        self.queue.dispatch(KernelId::FluxComputation, flux.resolution, flux.resolution, 1)?;
        Ok(())
    }

    /// Move water along the pipes, add rain, evaporate, and derive the water velocity.
    pub fn flux_apply(&mut self) -> Result<(), SolverError> {
        let terrain = self.field(FieldKind::Terrain)?;
        let flux = self.field(FieldKind::Flux)?;
        let velocity = self.field(FieldKind::Velocity)?;
        let erosion = &self.params.erosion;
        let (cell, rain, evaporation) = (erosion.cell_size, erosion.rain_rate, erosion.evaporation);

        self.queue.set_param(param::TIME_STEP, self.params.erosion_dt());
        self.queue.set_param(param::CELL_SIZE, cell);
        self.queue.set_param(param::RAIN_RATE, rain);
        self.queue.set_param(param::EVAPORATION, evaporation);
        self.queue.bind(KernelId::FluxApply, slot::HEIGHT_MAP, terrain);
        self.queue.bind(KernelId::FluxApply, slot::FLUX_MAP, flux);
        self.queue.bind(KernelId::FluxApply, slot::VELOCITY_MAP, velocity);
        self.queue.dispatch(KernelId::FluxApply, terrain.resolution, terrain.resolution, 1)?;
        Ok(())
    }

    /// Map `kind` into the display texture.
    pub fn visualize(&mut self, kind: FieldKind, mode: VisualizeMode, range: [f32; 2]) -> Result<(), SolverError> {
        let source = self.field(kind)?;
        let display = self.pool.display()?;

        self.queue.set_param(param::VISUALIZE_MODE, mode.index());
        self.queue.set_param(param::VALUE_RANGE, range);
        self.queue.bind(KernelId::Visualize, slot::VISUALIZE_SOURCE, source);
        self.queue.bind(KernelId::Visualize, slot::DISPLAY_TEXTURE, display);
        self.queue.dispatch(KernelId::Visualize, display.resolution, display.resolution, 1)?;
        Ok(())
    }
}
