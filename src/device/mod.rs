//! Compute devices that own buffer memory and execute recorded dispatches.
//!
//! Two backends sit behind [`ComputeDevice`]: a rayon CPU reference backend and a headless
//! wgpu backend running WGSL kernels. The scheduler only ever talks to the trait.

pub mod cpu;
pub mod gpu;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dispatch::{DispatchRecord, KernelId};

pub use self::cpu::CpuDevice;
pub use self::gpu::WgpuDevice;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Device could not allocate {bytes} bytes for '{label}': {reason}")]
    Allocation { label: String, bytes: u64, reason: String },
    #[error("No suitable GPU adapter found")]
    NoAdapter,
    #[error("Failed to request device: {0}")]
    RequestDevice(String),
    #[error("Unknown buffer {0:?}")]
    UnknownBuffer(BufferId),
    #[error("Buffer {id:?} holds {expected} floats, got {found}")]
    SizeMismatch { id: BufferId, expected: usize, found: usize },
    #[error("Kernel '{kernel}' failed: {reason}")]
    Execution { kernel: KernelId, reason: String },
    #[error("Readback failed: {0}")]
    Readback(String),
}

/// Opaque handle to a device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

/// Handle to an in-flight asynchronous readback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReadbackTicket(pub u64);

/// Result of polling a readback ticket.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadbackStatus {
    Pending,
    Ready(Vec<f32>),
    Failed(String),
}

/// Which compute backend to run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Prefer the GPU, fall back to the CPU when no adapter exists.
    Auto,
    GpuOnly,
    CpuOnly,
}

impl Default for Backend {
    fn default() -> Self {
        Self::Auto
    }
}

/// A device that owns flat `f32` buffers and executes dispatch batches.
///
/// Buffers are zero-initialised on creation. `execute` runs every record in order; it is
/// only ever called from `KernelDispatchQueue::submit`.
pub trait ComputeDevice {
    fn backend_name(&self) -> &'static str;

    /// Thread-group size the kernel was compiled with.
    fn thread_group_size(&self, kernel: KernelId) -> [u32; 3];

    fn create_buffer(&mut self, label: &str, len: usize) -> Result<BufferId, DeviceError>;

    fn release_buffer(&mut self, id: BufferId);

    fn write_buffer(&mut self, id: BufferId, data: &[f32]) -> Result<(), DeviceError>;

    /// Blocking read of the whole buffer.
    fn read_buffer(&mut self, id: BufferId) -> Result<Vec<f32>, DeviceError>;

    fn execute(&mut self, batch: &[DispatchRecord]) -> Result<(), DeviceError>;

    /// Start a non-blocking copy of the buffer back to the host.
    fn request_readback(&mut self, id: BufferId) -> Result<ReadbackTicket, DeviceError>;

    /// Check on a readback. `Ready` and `Failed` consume the ticket.
    fn poll_readback(&mut self, ticket: ReadbackTicket) -> ReadbackStatus;
}

/// Thread-group sizes shared by both backends: 8x8 tiles for grid kernels, 64 lanes for
/// flat kernels.
pub fn default_group_size(kernel: KernelId) -> [u32; 3] {
    if kernel.is_linear() {
        [64, 1, 1]
    } else {
        [8, 8, 1]
    }
}

/// Create a device for the requested backend.
pub fn create_device(backend: Backend) -> Result<Box<dyn ComputeDevice>, DeviceError> {
    match backend {
        Backend::CpuOnly => {
            log::info!("Using CPU compute backend");
            Ok(Box::new(CpuDevice::new()))
        }
        Backend::GpuOnly => {
            let device = pollster::block_on(WgpuDevice::new())?;
            log::info!("Using GPU compute backend ({})", device.adapter_name());
            Ok(Box::new(device))
        }
        Backend::Auto => match pollster::block_on(WgpuDevice::new()) {
            Ok(device) => {
                log::info!("Using GPU compute backend ({})", device.adapter_name());
                Ok(Box::new(device))
            }
            Err(e) => {
                log::warn!("GPU backend unavailable ({e}); falling back to CPU");
                Ok(Box::new(CpuDevice::new()))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_default_is_auto() {
        assert_eq!(Backend::default(), Backend::Auto);
    }

    #[test]
    fn test_backend_serde_names() {
        let json = serde_json::to_string(&Backend::GpuOnly).unwrap();
        assert_eq!(json, "\"gpu_only\"");
        let back: Backend = serde_json::from_str("\"cpu_only\"").unwrap();
        assert_eq!(back, Backend::CpuOnly);
    }

    #[test]
    fn test_cpu_backend_creation() {
        let device = create_device(Backend::CpuOnly).unwrap();
        assert_eq!(device.backend_name(), "cpu");
        assert_eq!(device.thread_group_size(KernelId::Advection), [8, 8, 1]);
        assert_eq!(device.thread_group_size(KernelId::ClearBuffer), [64, 1, 1]);
    }
}
