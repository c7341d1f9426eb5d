//! Ordered per-tick command list with binding and parameter validation.

use std::collections::HashMap;

use thiserror::Error;

use crate::device::{ComputeDevice, DeviceError};
use crate::grid::GridBuffer;

use super::group::{DispatchGroupCount, GroupCountCache};
use super::kernel::{KernelId, KernelTable, ParamValue, SlotAccess};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Kernel '{kernel}' dispatched without a buffer bound to '{slot}'")]
    MissingBinding { kernel: KernelId, slot: &'static str },
    #[error("Kernel '{kernel}' dispatched without parameter '{param}'")]
    MissingParameter { kernel: KernelId, param: &'static str },
    #[error("Kernel '{kernel}' slot '{slot}' has resolution {found}, expected {expected}")]
    ResolutionMismatch {
        kernel: KernelId,
        slot: &'static str,
        expected: u32,
        found: u32,
    },
    #[error("Kernel '{kernel}' writes '{slot}' through the same buffer as '{other}'")]
    AliasedOutput {
        kernel: KernelId,
        slot: &'static str,
        other: &'static str,
    },
    #[error("Kernel '{0}' has no thread-group size on this device")]
    UnknownKernel(KernelId),
}

/// A buffer bound to one slot of a recorded dispatch.
#[derive(Debug, Clone, Copy)]
pub struct BoundSlot {
    pub name: &'static str,
    pub access: SlotAccess,
    pub buffer: GridBuffer,
}

/// A validated dispatch with its bindings and parameters frozen at record time.
#[derive(Debug, Clone)]
pub struct DispatchRecord {
    pub kernel: KernelId,
    pub threads: [u32; 3],
    pub group_size: [u32; 3],
    pub groups: DispatchGroupCount,
    /// Bound slots in signature order.
    pub slots: Vec<BoundSlot>,
    /// Parameters in signature order.
    pub params: Vec<(&'static str, ParamValue)>,
}

impl DispatchRecord {
    fn execution_error(&self, reason: String) -> DeviceError {
        DeviceError::Execution {
            kernel: self.kernel,
            reason,
        }
    }

    pub fn slot(&self, name: &str) -> Result<&BoundSlot, DeviceError> {
        self.slots
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| self.execution_error(format!("slot '{name}' not recorded")))
    }

    pub fn param(&self, name: &str) -> Result<&ParamValue, DeviceError> {
        self.params
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
            .ok_or_else(|| self.execution_error(format!("parameter '{name}' not recorded")))
    }

    pub fn f32_param(&self, name: &str) -> Result<f32, DeviceError> {
        self.param(name)?
            .as_f32()
            .ok_or_else(|| self.execution_error(format!("parameter '{name}' is not a scalar")))
    }

    pub fn u32_param(&self, name: &str) -> Result<u32, DeviceError> {
        self.param(name)?
            .as_u32()
            .ok_or_else(|| self.execution_error(format!("parameter '{name}' is not an integer")))
    }

    pub fn vec2_param(&self, name: &str) -> Result<[f32; 2], DeviceError> {
        self.param(name)?
            .as_vec2()
            .ok_or_else(|| self.execution_error(format!("parameter '{name}' is not a vec2")))
    }

    pub fn vec4_param(&self, name: &str) -> Result<[f32; 4], DeviceError> {
        self.param(name)?
            .as_vec4()
            .ok_or_else(|| self.execution_error(format!("parameter '{name}' is not a vec4")))
    }

    pub fn vec4_array_param(&self, name: &str) -> Result<&[[f32; 4]], DeviceError> {
        self.param(name)?
            .as_vec4_array()
            .ok_or_else(|| self.execution_error(format!("parameter '{name}' is not a vec4 array")))
    }

    /// Threads actually launched per axis.
    pub fn launched_threads(&self) -> [u32; 3] {
        let g = self.groups.as_array();
        [
            g[0].saturating_mul(self.group_size[0]),
            g[1].saturating_mul(self.group_size[1]),
            g[2].saturating_mul(self.group_size[2]),
        ]
    }
}

/// Records dispatches for one tick and hands them to the device in a single submit.
#[derive(Debug)]
pub struct KernelDispatchQueue {
    table: KernelTable,
    cache: GroupCountCache,
    bindings: HashMap<(KernelId, &'static str), GridBuffer>,
    params: HashMap<&'static str, ParamValue>,
    commands: Vec<DispatchRecord>,
    submitted_batches: u64,
    submitted_dispatches: u64,
}

impl KernelDispatchQueue {
    pub fn new(table: KernelTable) -> Self {
        Self {
            table,
            cache: GroupCountCache::new(),
            bindings: HashMap::new(),
            params: HashMap::new(),
            commands: Vec::new(),
            submitted_batches: 0,
            submitted_dispatches: 0,
        }
    }

    /// Build a queue whose group sizes come from the device.
    pub fn for_device(device: &dyn ComputeDevice) -> Self {
        Self::new(KernelTable::from_device(device))
    }

    /// Bind a buffer to a kernel slot. Bindings last until the next submit.
    pub fn bind(&mut self, kernel: KernelId, slot: &'static str, buffer: GridBuffer) {
        self.bindings.insert((kernel, slot), buffer);
    }

    /// Set a queue-wide parameter. Parameters persist across submits until overwritten.
    pub fn set_param(&mut self, name: &'static str, value: impl Into<ParamValue>) {
        self.params.insert(name, value.into());
    }

    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }

    /// Validate the kernel's bindings and parameters and append it to the command list.
    pub fn dispatch(
        &mut self,
        kernel: KernelId,
        threads_x: u32,
        threads_y: u32,
        threads_z: u32,
    ) -> Result<DispatchGroupCount, DispatchError> {
        let signature = kernel.signature();
        let group_size = self
            .table
            .group_size(kernel)
            .ok_or(DispatchError::UnknownKernel(kernel))?;

        let mut slots = Vec::with_capacity(signature.slots.len());
        for spec in signature.slots {
            let buffer = self
                .bindings
                .get(&(kernel, spec.name))
                .copied()
                .ok_or(DispatchError::MissingBinding { kernel, slot: spec.name })?;
            slots.push(BoundSlot {
                name: spec.name,
                access: spec.access,
                buffer,
            });
        }

        let mut grid = signature
            .slots
            .iter()
            .zip(slots.iter())
            .filter(|(spec, _)| spec.grid_sized)
            .map(|(_, bound)| bound);
        if let Some(first) = grid.next() {
            let expected = first.buffer.resolution;
            if let Some(bad) = grid.find(|b| b.buffer.resolution != expected) {
                return Err(DispatchError::ResolutionMismatch {
                    kernel,
                    slot: bad.name,
                    expected,
                    found: bad.buffer.resolution,
                });
            }
        }

        for (i, a) in slots.iter().enumerate() {
            for b in &slots[i + 1..] {
                if a.buffer.id == b.buffer.id && (a.access.writes() || b.access.writes()) {
                    let (slot, other) = if a.access.writes() { (a.name, b.name) } else { (b.name, a.name) };
                    return Err(DispatchError::AliasedOutput { kernel, slot, other });
                }
            }
        }

        let mut params = Vec::with_capacity(signature.params.len());
        for &name in signature.params {
            let value = self
                .params
                .get(name)
                .cloned()
                .ok_or(DispatchError::MissingParameter { kernel, param: name })?;
            params.push((name, value));
        }

        let threads = [threads_x, threads_y, threads_z];
        let groups = self.cache.get_or_compute(kernel, threads, group_size);
        log::trace!("Recorded {kernel} over {threads:?} threads in {groups} groups");

        self.commands.push(DispatchRecord {
            kernel,
            threads,
            group_size,
            groups,
            slots,
            params,
        });
        Ok(groups)
    }

    /// Hand every recorded dispatch to the device in FIFO order, then clear the command
    /// list and all bindings. Returns the number of dispatches executed.
    pub fn submit(&mut self, device: &mut dyn ComputeDevice) -> Result<usize, DeviceError> {
        let batch = std::mem::take(&mut self.commands);
        self.bindings.clear();
        if batch.is_empty() {
            return Ok(0);
        }

        self.submitted_batches += 1;
        self.submitted_dispatches += batch.len() as u64;
        log::debug!(
            "Submitting batch {} with {} dispatches to {}",
            self.submitted_batches,
            batch.len(),
            device.backend_name()
        );
        device.execute(&batch)?;
        Ok(batch.len())
    }

    /// Drop recorded dispatches and bindings without submitting them.
    pub fn discard(&mut self) -> usize {
        let dropped = self.commands.len();
        self.commands.clear();
        self.bindings.clear();
        if dropped > 0 {
            log::debug!("Discarded {} recorded dispatches", dropped);
        }
        dropped
    }

    /// Recorded dispatches not yet submitted.
    pub fn pending(&self) -> &[DispatchRecord] {
        &self.commands
    }

    pub fn submitted_batches(&self) -> u64 {
        self.submitted_batches
    }

    pub fn submitted_dispatches(&self) -> u64 {
        self.submitted_dispatches
    }

    pub fn group_cache(&self) -> &GroupCountCache {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::CpuDevice;
    use crate::dispatch::kernel::{param, slot};
    use crate::grid::{FieldKind, GridBufferPool, ScratchSlot};

    fn setup(resolution: u32) -> (CpuDevice, GridBufferPool, KernelDispatchQueue) {
        let mut device = CpuDevice::new();
        let pool = GridBufferPool::new(&mut device, resolution).unwrap();
        let queue = KernelDispatchQueue::for_device(&device);
        (device, pool, queue)
    }

    #[test]
    fn test_missing_binding() {
        let (mut device, mut pool, mut queue) = setup(8);
        let dye = pool.allocate(&mut device, FieldKind::Dye, 8).unwrap();
        queue.bind(KernelId::CopyBuffer, slot::COPY_SOURCE, dye);
        let err = queue.dispatch(KernelId::CopyBuffer, 64, 1, 1).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::MissingBinding { slot: "copy_target", .. }
        ));
        assert!(queue.pending().is_empty());
    }

    #[test]
    fn test_discard_drops_commands_and_bindings() {
        let (mut device, mut pool, mut queue) = setup(8);
        let dye = pool.allocate(&mut device, FieldKind::Dye, 8).unwrap();
        queue.bind(KernelId::ClearBuffer, slot::CLEAR_TARGET, dye);
        queue.set_param(param::CLEAR_VALUE, 0.0f32);
        queue.dispatch(KernelId::ClearBuffer, 64, 1, 1).unwrap();

        assert_eq!(queue.discard(), 1);
        assert!(queue.pending().is_empty());
        let err = queue.dispatch(KernelId::ClearBuffer, 64, 1, 1).unwrap_err();
        assert!(matches!(err, DispatchError::MissingBinding { .. }));
        assert_eq!(queue.submit(&mut device).unwrap(), 0);
        assert_eq!(queue.submitted_batches(), 0);
    }

    #[test]
    fn test_bindings_are_per_kernel() {
        let (mut device, mut pool, mut queue) = setup(8);
        let dye = pool.allocate(&mut device, FieldKind::Dye, 8).unwrap();
        queue.bind(KernelId::ClearBuffer, slot::CLEAR_TARGET, dye);
        queue.bind(KernelId::CopyBuffer, slot::COPY_SOURCE, dye);
        let err = queue.dispatch(KernelId::CopyBuffer, 64, 1, 1).unwrap_err();
        assert!(matches!(err, DispatchError::MissingBinding { .. }));
    }

    #[test]
    fn test_missing_parameter() {
        let (mut device, mut pool, mut queue) = setup(8);
        let dye = pool.allocate(&mut device, FieldKind::Dye, 8).unwrap();
        queue.bind(KernelId::ClearBuffer, slot::CLEAR_TARGET, dye);
        let err = queue.dispatch(KernelId::ClearBuffer, 64, 1, 1).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::MissingParameter { param: "clear_value", .. }
        ));
        queue.set_param(param::CLEAR_VALUE, 0.0f32);
        assert!(queue.dispatch(KernelId::ClearBuffer, 64, 1, 1).is_ok());
    }

    #[test]
    fn test_resolution_mismatch_between_slots() {
        let (mut device, pool, mut queue) = setup(8);
        let mut other = GridBufferPool::new(&mut device, 16).unwrap();
        let small = pool.scratch(ScratchSlot::Ping).unwrap();
        let large = other.allocate(&mut device, FieldKind::Dye, 16).unwrap();
        queue.bind(KernelId::CopyBuffer, slot::COPY_SOURCE, small);
        queue.bind(KernelId::CopyBuffer, slot::COPY_TARGET, large);
        let err = queue.dispatch(KernelId::CopyBuffer, 64, 1, 1).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::ResolutionMismatch { expected: 8, found: 16, .. }
        ));
    }

    #[test]
    fn test_display_slot_exempt_from_resolution_check() {
        let (mut device, mut pool, mut queue) = setup(8);
        let dye = pool.allocate(&mut device, FieldKind::Dye, 8).unwrap();
        let display = pool.allocate_display(&mut device, 32).unwrap();
        queue.bind(KernelId::Visualize, slot::VISUALIZE_SOURCE, dye);
        queue.bind(KernelId::Visualize, slot::DISPLAY_TEXTURE, display);
        queue.set_param(param::VISUALIZE_MODE, 0u32);
        queue.set_param(param::VALUE_RANGE, [0.0, 1.0]);
        assert!(queue.dispatch(KernelId::Visualize, 32, 32, 1).is_ok());
    }

    #[test]
    fn test_aliased_output_rejected() {
        let (_device, pool, mut queue) = setup(8);
        let ping = pool.scratch(ScratchSlot::Ping).unwrap();
        queue.bind(KernelId::CopyBuffer, slot::COPY_SOURCE, ping);
        queue.bind(KernelId::CopyBuffer, slot::COPY_TARGET, ping);
        let err = queue.dispatch(KernelId::CopyBuffer, 64, 1, 1).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::AliasedOutput { slot: "copy_target", other: "copy_source", .. }
        ));
    }

    #[test]
    fn test_read_only_slots_may_alias() {
        let (mut device, mut pool, mut queue) = setup(8);
        let velocity = pool.allocate(&mut device, FieldKind::Velocity, 8).unwrap();
        let ping = pool.scratch(ScratchSlot::Ping).unwrap();
        queue.bind(KernelId::Advection, slot::VELOCITY_FIELD, velocity);
        queue.bind(KernelId::Advection, slot::FIELD_TO_ADVECT, velocity);
        queue.bind(KernelId::Advection, slot::NEW_ADVECTED_FIELD, ping);
        queue.set_param(param::TIME_STEP, 0.1f32);
        queue.set_param(param::DISSIPATION, 1.0f32);
        assert!(queue.dispatch(KernelId::Advection, 8, 8, 1).is_ok());
    }

    #[test]
    fn test_submit_runs_fifo_once_and_clears() {
        let (mut device, mut pool, mut queue) = setup(8);
        let dye = pool.allocate(&mut device, FieldKind::Dye, 8).unwrap();

        // Clear to 1 then to 2; FIFO order leaves 2.
        queue.bind(KernelId::ClearBuffer, slot::CLEAR_TARGET, dye);
        queue.set_param(param::CLEAR_VALUE, 1.0f32);
        queue.dispatch(KernelId::ClearBuffer, 64, 1, 1).unwrap();
        queue.set_param(param::CLEAR_VALUE, 2.0f32);
        queue.dispatch(KernelId::ClearBuffer, 64, 1, 1).unwrap();
        assert_eq!(queue.pending().len(), 2);

        assert_eq!(queue.submit(&mut device).unwrap(), 2);
        assert!(queue.pending().is_empty());
        assert_eq!(device.batches_executed(), 1);
        assert_eq!(device.dispatches_executed(), 2);
        let data = device.read_buffer(dye.id).unwrap();
        assert!(data.iter().all(|&v| v == 2.0));

        // Nothing left to run; bindings are gone but parameters persist.
        assert_eq!(queue.submit(&mut device).unwrap(), 0);
        assert_eq!(device.batches_executed(), 1);
        assert!(matches!(
            queue.dispatch(KernelId::ClearBuffer, 64, 1, 1),
            Err(DispatchError::MissingBinding { .. })
        ));
        assert_eq!(queue.param(param::CLEAR_VALUE), Some(&ParamValue::Float(2.0)));
    }

    #[test]
    fn test_record_snapshots_parameters() {
        let (mut device, mut pool, mut queue) = setup(8);
        let dye = pool.allocate(&mut device, FieldKind::Dye, 8).unwrap();
        queue.bind(KernelId::ClearBuffer, slot::CLEAR_TARGET, dye);
        queue.set_param(param::CLEAR_VALUE, 1.0f32);
        queue.dispatch(KernelId::ClearBuffer, 64, 1, 1).unwrap();
        queue.set_param(param::CLEAR_VALUE, 5.0f32);
        assert_eq!(queue.pending()[0].f32_param(param::CLEAR_VALUE).unwrap(), 1.0);
    }

    #[test]
    fn test_group_counts_from_device_table() {
        let (mut device, mut pool, mut queue) = setup(64);
        let pressure = pool.allocate(&mut device, FieldKind::Pressure, 64).unwrap();
        queue.bind(KernelId::Boundary, slot::BOUNDARY_FIELD, pressure);
        queue.set_param(param::BOUNDARY_SCALE, 1.0f32);
        let groups = queue.dispatch(KernelId::Boundary, 4 * 64, 1, 1).unwrap();
        assert_eq!(groups.as_array(), [4, 1, 1]);
        queue.bind(KernelId::Boundary, slot::BOUNDARY_FIELD, pressure);
        queue.dispatch(KernelId::Boundary, 4 * 64, 1, 1).unwrap();
        assert_eq!(queue.group_cache().hits(), 1);
    }
}
