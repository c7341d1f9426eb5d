//! Host-side seams of a session: control input, depth capture and display output.

use std::cell::RefCell;
use std::f32::consts::TAU;
use std::rc::Rc;

use glam::Vec2;
use thiserror::Error;

use crate::simulation::BrushMode;

/// User input sampled once per tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlInput {
    /// Brush position in the unit square, origin at the bottom-left corner.
    pub position: Vec2,
    pub pressed: bool,
    pub mode: BrushMode,
}

impl ControlInput {
    pub fn released() -> Self {
        Self {
            position: Vec2::splat(0.5),
            pressed: false,
            mode: BrushMode::default(),
        }
    }
}

/// Source of per-tick control input.
pub trait ControlSurface {
    fn sample(&mut self, tick: u64, time: f32) -> ControlInput;
}

/// Never touches the simulation.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdleControl;

impl ControlSurface for IdleControl {
    fn sample(&mut self, _tick: u64, _time: f32) -> ControlInput {
        ControlInput::released()
    }
}

/// Scripted brush circling the centre of the grid, for headless runs.
#[derive(Debug, Clone, Copy)]
pub struct OrbitingBrush {
    pub center: Vec2,
    pub radius: f32,
    /// Revolutions per second.
    pub speed: f32,
    pub mode: BrushMode,
}

impl OrbitingBrush {
    pub fn new(mode: BrushMode) -> Self {
        Self {
            center: Vec2::splat(0.5),
            radius: 0.25,
            speed: 0.2,
            mode,
        }
    }
}

impl ControlSurface for OrbitingBrush {
    fn sample(&mut self, _tick: u64, time: f32) -> ControlInput {
        let angle = TAU * self.speed * time;
        let position = self.center + self.radius * Vec2::new(angle.cos(), angle.sin());
        ControlInput {
            position: position.clamp(Vec2::ZERO, Vec2::ONE),
            pressed: true,
            mode: self.mode,
        }
    }
}

/// Provides the environment depth under the water surface, one value per cell.
pub trait DepthCapture {
    fn capture(&mut self, resolution: u32) -> Vec<f32>;
}

/// Constant depth everywhere.
#[derive(Debug, Clone, Copy)]
pub struct FlatSeabed {
    pub depth: f32,
}

impl DepthCapture for FlatSeabed {
    fn capture(&mut self, resolution: u32) -> Vec<f32> {
        vec![self.depth; (resolution as usize) * (resolution as usize)]
    }
}

/// Depth growing linearly from a beach at x = 0 to open water at x = 1.
#[derive(Debug, Clone, Copy)]
pub struct ShelvingSeabed {
    pub shore_depth: f32,
    pub deep_depth: f32,
}

impl DepthCapture for ShelvingSeabed {
    fn capture(&mut self, resolution: u32) -> Vec<f32> {
        let n = resolution as usize;
        (0..n * n)
            .map(|i| {
                let t = ((i % n) as f32 + 0.5) / n as f32;
                self.shore_depth + (self.deep_depth - self.shore_depth) * t
            })
            .collect()
    }
}

/// One presented display image, RGBA8, rows bottom to top as the grid stores them.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayFrame {
    pub tick: u64,
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl DisplayFrame {
    /// Quantise a square RGBA float texture.
    pub fn from_rgba_f32(tick: u64, resolution: u32, data: &[f32]) -> Self {
        let rgba = data
            .iter()
            .map(|&v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
            .collect();
        Self {
            tick,
            width: resolution,
            height: resolution,
            rgba,
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = ((y * self.width + x) * 4) as usize;
        [self.rgba[i], self.rgba[i + 1], self.rgba[i + 2], self.rgba[i + 3]]
    }
}

#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to encode frame {tick}: {reason}")]
    Encode { tick: u64, reason: String },
}

/// Receives display frames as readbacks complete.
pub trait DisplaySink {
    fn present(&mut self, frame: &DisplayFrame) -> Result<(), DisplayError>;
}

/// Keeps every presented frame in memory.
///
/// Clones share the same frame list, so a handle kept outside the session sees what the
/// session presented.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    frames: Rc<RefCell<Vec<DisplayFrame>>>,
}

impl MemorySink {
    pub fn len(&self) -> usize {
        self.frames.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.borrow().is_empty()
    }

    pub fn frames(&self) -> Vec<DisplayFrame> {
        self.frames.borrow().clone()
    }

    pub fn last(&self) -> Option<DisplayFrame> {
        self.frames.borrow().last().cloned()
    }
}

impl DisplaySink for MemorySink {
    fn present(&mut self, frame: &DisplayFrame) -> Result<(), DisplayError> {
        self.frames.borrow_mut().push(frame.clone());
        Ok(())
    }
}

/// Drops every frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardSink;

impl DisplaySink for DiscardSink {
    fn present(&mut self, _frame: &DisplayFrame) -> Result<(), DisplayError> {
        Ok(())
    }
}
