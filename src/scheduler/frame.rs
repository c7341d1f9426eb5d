//! Frame scheduler: one submit per tick.

use glam::Vec2;

use crate::device::ComputeDevice;
use crate::dispatch::KernelDispatchQueue;
use crate::grid::{FieldKind, GridBufferPool};
use crate::simulation::{
    generate_terrain_field, BrushInput, SimulationConfig, SimulationField, TickParams, VisualizeMode,
    WaveSpectrum,
};

use super::io::{ControlSurface, DepthCapture, DiscardSink, DisplayFrame, DisplaySink, FlatSeabed, IdleControl};
use super::readback::ReadbackSlot;
use super::stage::{FieldUpload, Scenario};
use super::SchedulerError;

/// Host-side collaborators of a session.
pub struct SessionIo {
    pub control: Box<dyn ControlSurface>,
    pub depth: Box<dyn DepthCapture>,
    pub sink: Box<dyn DisplaySink>,
}

impl SessionIo {
    /// No input, a flat seabed at full wave visibility, frames dropped.
    pub fn headless(config: &SimulationConfig) -> Self {
        Self {
            control: Box::new(IdleControl),
            depth: Box::new(FlatSeabed {
                depth: config.waves.max_visibility,
            }),
            sink: Box::new(DiscardSink),
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    pub tick: u64,
    pub time: f32,
    /// Dispatches submitted to the device this tick.
    pub dispatches: usize,
    pub frame_presented: bool,
}

/// Owns the device and every per-session resource, and runs the tick loop.
pub struct FrameScheduler {
    device: Box<dyn ComputeDevice>,
    pool: GridBufferPool,
    queue: KernelDispatchQueue,
    config: SimulationConfig,
    scenario: Scenario,
    spectrum: WaveSpectrum,
    display_range: [f32; 2],
    control: Box<dyn ControlSurface>,
    sink: Box<dyn DisplaySink>,
    readback: ReadbackSlot,
    tick: u64,
    previous_brush: Option<Vec2>,
    frames_presented: u64,
}

impl FrameScheduler {
    /// Validate, allocate the scenario's fields, upload initial data and record the
    /// scenario's init stages.
    pub fn new(
        mut device: Box<dyn ComputeDevice>,
        config: SimulationConfig,
        scenario: Scenario,
        io: SessionIo,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;
        scenario.validate()?;
        let SessionIo { control, mut depth, sink } = io;

        let n = config.resolution;
        let mut pool = GridBufferPool::new(device.as_mut(), n)?;
        for &kind in &scenario.fields {
            pool.allocate(device.as_mut(), kind, n)?;
        }
        let display = pool.allocate_display(device.as_mut(), config.display_resolution)?;
        let mut queue = KernelDispatchQueue::for_device(device.as_ref());

        for upload in &scenario.uploads {
            let field = pool.field(upload.field())?;
            let data = match upload {
                FieldUpload::TerrainNoise => generate_terrain_field(&config.terrain, n),
                FieldUpload::CapturedDepth => depth.capture(n),
            };
            device.write_buffer(field.id, &data)?;
        }

        let spectrum = WaveSpectrum::generate(&config.waves);
        let display_range = scenario.display.range.unwrap_or_else(|| match scenario.display.mode {
            VisualizeMode::Terrain => [0.0, config.terrain.height_scale],
            VisualizeMode::Wave => {
                let crest = spectrum.max_wave_height();
                [config.waves.base_height - crest, config.waves.base_height + crest]
            }
            VisualizeMode::Color | VisualizeMode::Scalar => [0.0, 1.0],
        });

        if !scenario.init.is_empty() {
            let params = TickParams::new(0, 0.0, BrushInput::idle(), &config);
            let mut ops = SimulationField::new(&mut queue, &pool, &params);
            for stage in &scenario.init {
                stage.record(&mut ops, &spectrum)?;
            }
            queue.submit(device.as_mut())?;
        }

        log::info!(
            "Started '{}' session: {n}x{n} grid, {} fields, {} bytes on {}",
            scenario.name,
            scenario.fields.len(),
            pool.memory_bytes(),
            device.backend_name()
        );

        Ok(Self {
            device,
            pool,
            queue,
            config,
            scenario,
            spectrum,
            display_range,
            control,
            sink,
            readback: ReadbackSlot::new(display.id),
            tick: 0,
            previous_brush: None,
            frames_presented: 0,
        })
    }

    fn brush_input(&mut self, time: f32) -> BrushInput {
        let input = self.control.sample(self.tick, time);
        let position = input.position * self.config.resolution as f32;
        let previous = self.previous_brush.unwrap_or(position);
        self.previous_brush = Some(position);
        BrushInput {
            position,
            previous,
            normalized: input.position,
            pressed: input.pressed,
            mode: input.mode,
        }
    }

    fn record_tick(&mut self, params: &TickParams) -> Result<(), SchedulerError> {
        let mut ops = SimulationField::new(&mut self.queue, &self.pool, params);
        for stage in &self.scenario.stages {
            stage.record(&mut ops, &self.spectrum)?;
        }
        let display = self.scenario.display;
        ops.visualize(display.field, display.mode, self.display_range)?;
        Ok(())
    }

    /// Record and submit one tick, then poll the display readback.
    pub fn tick(&mut self) -> Result<TickReport, SchedulerError> {
        let time = self.tick as f32 * self.config.time_step;
        let brush = self.brush_input(time);
        let params = TickParams::new(self.tick, time, brush, &self.config);

        if let Err(e) = self.record_tick(&params) {
            self.queue.discard();
            return Err(e);
        }
        let dispatches = self.queue.submit(self.device.as_mut())?;

        let mut frame_presented = false;
        if let Some(pixels) = self.readback.poll(self.device.as_mut()) {
            let frame = DisplayFrame::from_rgba_f32(self.tick, self.config.display_resolution, &pixels);
            self.sink.present(&frame)?;
            self.frames_presented += 1;
            frame_presented = true;
        }

        let report = TickReport {
            tick: self.tick,
            time,
            dispatches,
            frame_presented,
        };
        self.tick += 1;
        Ok(report)
    }

    /// Run `ticks` ticks, calling `on_tick` after each.
    pub fn run_with_callbacks<F>(&mut self, ticks: u64, mut on_tick: F) -> Result<(), SchedulerError>
    where
        F: FnMut(&TickReport),
    {
        for _ in 0..ticks {
            let report = self.tick()?;
            on_tick(&report);
        }
        Ok(())
    }

    pub fn run(&mut self, ticks: u64) -> Result<(), SchedulerError> {
        self.run_with_callbacks(ticks, |_| {})
    }

    /// Blocking copy of a field's current contents.
    pub fn field_snapshot(&mut self, kind: FieldKind) -> Result<Vec<f32>, SchedulerError> {
        let field = self.pool.field(kind)?;
        Ok(self.device.read_buffer(field.id)?)
    }

    /// Overwrite a field from the host between ticks.
    pub fn upload_field(&mut self, kind: FieldKind, data: &[f32]) -> Result<(), SchedulerError> {
        let field = self.pool.field(kind)?;
        self.device.write_buffer(field.id, data)?;
        Ok(())
    }

    pub fn ticks(&self) -> u64 {
        self.tick
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    pub fn pool(&self) -> &GridBufferPool {
        &self.pool
    }

    pub fn queue(&self) -> &KernelDispatchQueue {
        &self.queue
    }

    pub fn spectrum(&self) -> &WaveSpectrum {
        &self.spectrum
    }

    pub fn display_range(&self) -> [f32; 2] {
        self.display_range
    }

    pub fn readback(&self) -> &ReadbackSlot {
        &self.readback
    }

    /// Abandon the in-flight readback and free every buffer.
    pub fn teardown(mut self) {
        self.readback.abandon();
        self.pool.release_all(self.device.as_mut());
        log::info!(
            "Tore down '{}' session after {} ticks, {} frames presented",
            self.scenario.name,
            self.tick,
            self.frames_presented
        );
    }
}
