//! Owner of every device buffer a simulation session uses.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::device::{ComputeDevice, DeviceError};

use super::field::{BufferLabel, FieldKind, GridBuffer, ScratchSlot};

pub const MIN_RESOLUTION: u32 = 4;
pub const MAX_RESOLUTION: u32 = 1024;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Resolution {0} must be a power of two between {MIN_RESOLUTION} and {MAX_RESOLUTION}")]
    InvalidResolution(u32),
    #[error("Field '{kind}' requested at resolution {found}, pool resolution is {expected}")]
    ResolutionMismatch { kind: FieldKind, expected: u32, found: u32 },
    #[error("Field '{0}' is not allocated")]
    NotAllocated(FieldKind),
    #[error("Scratch buffers were released")]
    ScratchReleased,
    #[error("Display texture is not allocated")]
    DisplayNotAllocated,
    #[error(transparent)]
    Device(#[from] DeviceError),
}

pub fn validate_resolution(resolution: u32) -> Result<(), PoolError> {
    if resolution.is_power_of_two() && (MIN_RESOLUTION..=MAX_RESOLUTION).contains(&resolution) {
        Ok(())
    } else {
        Err(PoolError::InvalidResolution(resolution))
    }
}

/// Fixed-resolution pool of field buffers, scratch buffers and the display texture.
#[derive(Debug)]
pub struct GridBufferPool {
    resolution: u32,
    fields: BTreeMap<FieldKind, GridBuffer>,
    scratch: BTreeMap<ScratchSlot, GridBuffer>,
    display: Option<GridBuffer>,
}

impl GridBufferPool {
    /// Create a pool and its scratch buffers.
    pub fn new(device: &mut dyn ComputeDevice, resolution: u32) -> Result<Self, PoolError> {
        validate_resolution(resolution)?;

        let mut pool = Self {
            resolution,
            fields: BTreeMap::new(),
            scratch: BTreeMap::new(),
            display: None,
        };
        for slot in ScratchSlot::ALL {
            match pool.create(device, BufferLabel::Scratch(slot), resolution, ScratchSlot::COMPONENTS) {
                Ok(buffer) => {
                    pool.scratch.insert(slot, buffer);
                }
                Err(e) => {
                    pool.release_all(device);
                    return Err(e);
                }
            }
        }
        Ok(pool)
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    fn create(
        &self,
        device: &mut dyn ComputeDevice,
        label: BufferLabel,
        resolution: u32,
        components: u32,
    ) -> Result<GridBuffer, PoolError> {
        let len = (resolution as usize) * (resolution as usize) * components as usize;
        let id = device.create_buffer(&label.to_string(), len)?;
        let buffer = GridBuffer { id, label, resolution, components };
        log::debug!(
            "Allocated {label} ({resolution}x{resolution}x{components}, {} bytes) as {:?}",
            buffer.byte_size(),
            id
        );
        Ok(buffer)
    }

    /// Allocate a zero-initialised field. Allocating an existing kind returns it unchanged.
    pub fn allocate(
        &mut self,
        device: &mut dyn ComputeDevice,
        kind: FieldKind,
        resolution: u32,
    ) -> Result<GridBuffer, PoolError> {
        if resolution != self.resolution {
            return Err(PoolError::ResolutionMismatch {
                kind,
                expected: self.resolution,
                found: resolution,
            });
        }
        if let Some(existing) = self.fields.get(&kind) {
            return Ok(*existing);
        }

        let buffer = self.create(device, BufferLabel::Field(kind), resolution, kind.component_count())?;
        self.fields.insert(kind, buffer);
        Ok(buffer)
    }

    /// Allocate the RGBA display texture. It may differ from the grid resolution.
    pub fn allocate_display(
        &mut self,
        device: &mut dyn ComputeDevice,
        resolution: u32,
    ) -> Result<GridBuffer, PoolError> {
        if resolution == 0 {
            return Err(PoolError::InvalidResolution(resolution));
        }
        if let Some(existing) = self.display {
            if existing.resolution == resolution {
                return Ok(existing);
            }
            device.release_buffer(existing.id);
        }
        let buffer = self.create(device, BufferLabel::Display, resolution, 4)?;
        self.display = Some(buffer);
        Ok(buffer)
    }

    pub fn field(&self, kind: FieldKind) -> Result<GridBuffer, PoolError> {
        self.fields.get(&kind).copied().ok_or(PoolError::NotAllocated(kind))
    }

    pub fn is_allocated(&self, kind: FieldKind) -> bool {
        self.fields.contains_key(&kind)
    }

    pub fn scratch(&self, slot: ScratchSlot) -> Result<GridBuffer, PoolError> {
        self.scratch.get(&slot).copied().ok_or(PoolError::ScratchReleased)
    }

    pub fn display(&self) -> Result<GridBuffer, PoolError> {
        self.display.ok_or(PoolError::DisplayNotAllocated)
    }

    /// Free a field's device memory. Returns false when the kind was not allocated.
    pub fn release(&mut self, device: &mut dyn ComputeDevice, kind: FieldKind) -> bool {
        match self.fields.remove(&kind) {
            Some(buffer) => {
                device.release_buffer(buffer.id);
                log::debug!("Released {}", buffer.label);
                true
            }
            None => false,
        }
    }

    /// Free everything, scratch and display included. The pool is empty afterwards.
    pub fn release_all(&mut self, device: &mut dyn ComputeDevice) {
        for (_, buffer) in std::mem::take(&mut self.fields) {
            device.release_buffer(buffer.id);
        }
        for (_, buffer) in std::mem::take(&mut self.scratch) {
            device.release_buffer(buffer.id);
        }
        if let Some(display) = self.display.take() {
            device.release_buffer(display.id);
        }
        log::debug!("Released all grid buffers");
    }

    /// Bytes currently held on the device by this pool.
    pub fn memory_bytes(&self) -> u64 {
        self.fields
            .values()
            .chain(self.scratch.values())
            .chain(self.display.iter())
            .map(GridBuffer::byte_size)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::CpuDevice;

    #[test]
    fn test_rejects_invalid_resolutions() {
        let mut device = CpuDevice::new();
        for res in [0, 2, 3, 48, 2048] {
            assert!(matches!(
                GridBufferPool::new(&mut device, res),
                Err(PoolError::InvalidResolution(_))
            ));
        }
        assert!(GridBufferPool::new(&mut device, 4).is_ok());
    }

    #[test]
    fn test_allocate_zero_initialised() {
        let mut device = CpuDevice::new();
        let mut pool = GridBufferPool::new(&mut device, 16).unwrap();
        let dye = pool.allocate(&mut device, FieldKind::Dye, 16).unwrap();
        assert_eq!(dye.len(), 16 * 16 * 4);
        let data = device.read_buffer(dye.id).unwrap();
        assert_eq!(data.len(), 1024);
        assert!(data.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_allocate_twice_returns_same_buffer() {
        let mut device = CpuDevice::new();
        let mut pool = GridBufferPool::new(&mut device, 8).unwrap();
        let a = pool.allocate(&mut device, FieldKind::Pressure, 8).unwrap();
        let b = pool.allocate(&mut device, FieldKind::Pressure, 8).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_resolution_mismatch() {
        let mut device = CpuDevice::new();
        let mut pool = GridBufferPool::new(&mut device, 8).unwrap();
        let err = pool.allocate(&mut device, FieldKind::Dye, 16).unwrap_err();
        assert!(matches!(
            err,
            PoolError::ResolutionMismatch { expected: 8, found: 16, .. }
        ));
    }

    #[test]
    fn test_allocation_error_when_device_is_full() {
        // Two 4-component scratch buffers at 8x8 take 2 KiB.
        let mut device = CpuDevice::with_memory_limit(2048 + 100);
        let mut pool = GridBufferPool::new(&mut device, 8).unwrap();
        let err = pool.allocate(&mut device, FieldKind::Dye, 8).unwrap_err();
        assert!(matches!(err, PoolError::Device(DeviceError::Allocation { .. })));
    }

    #[test]
    fn test_failed_init_releases_scratch() {
        // Room for one 8x8 scratch buffer (1 KiB) but not the second.
        let mut device = CpuDevice::with_memory_limit(1024 + 100);
        let err = GridBufferPool::new(&mut device, 8).unwrap_err();
        assert!(matches!(err, PoolError::Device(DeviceError::Allocation { .. })));
        assert_eq!(device.live_bytes(), 0);
    }

    #[test]
    fn test_lookup_and_release() {
        let mut device = CpuDevice::new();
        let mut pool = GridBufferPool::new(&mut device, 8).unwrap();
        assert!(matches!(pool.field(FieldKind::Velocity), Err(PoolError::NotAllocated(_))));
        pool.allocate(&mut device, FieldKind::Velocity, 8).unwrap();
        assert!(pool.field(FieldKind::Velocity).is_ok());
        assert!(pool.release(&mut device, FieldKind::Velocity));
        assert!(!pool.release(&mut device, FieldKind::Velocity));
        assert!(!pool.is_allocated(FieldKind::Velocity));
    }

    #[test]
    fn test_memory_accounting_and_release_all() {
        let mut device = CpuDevice::new();
        let mut pool = GridBufferPool::new(&mut device, 8).unwrap();
        let scratch_bytes = 2 * 8 * 8 * 4 * 4;
        assert_eq!(pool.memory_bytes(), scratch_bytes);
        pool.allocate(&mut device, FieldKind::Velocity, 8).unwrap();
        pool.allocate_display(&mut device, 32).unwrap();
        assert_eq!(pool.memory_bytes(), scratch_bytes + 8 * 8 * 2 * 4 + 32 * 32 * 4 * 4);
        assert_eq!(device.live_bytes(), pool.memory_bytes());

        pool.release_all(&mut device);
        assert_eq!(pool.memory_bytes(), 0);
        assert_eq!(device.live_bytes(), 0);
    }
}
