//! CPU reference backend.
//!
//! Buffers live in host memory. Each dispatch runs its kernel over the launched work domain
//! with rayon; dispatches inside a batch run strictly one after another.

mod kernels;

use std::collections::HashMap;

use crate::dispatch::{DispatchRecord, KernelId};

use super::{
    default_group_size, BufferId, ComputeDevice, DeviceError, ReadbackStatus, ReadbackTicket,
};

pub(crate) use kernels::boundary_pair;

struct CpuBuffer {
    label: String,
    data: Vec<f32>,
}

struct PendingReadback {
    buffer: BufferId,
    polls_left: u32,
}

pub struct CpuDevice {
    buffers: HashMap<BufferId, CpuBuffer>,
    next_buffer: u64,
    memory_limit: Option<u64>,
    live_bytes: u64,
    readback_latency: u32,
    readbacks: HashMap<ReadbackTicket, PendingReadback>,
    next_ticket: u64,
    batches_executed: u64,
    dispatches_executed: u64,
}

impl Default for CpuDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuDevice {
    pub fn new() -> Self {
        Self {
            buffers: HashMap::new(),
            next_buffer: 1,
            memory_limit: None,
            live_bytes: 0,
            readback_latency: 1,
            readbacks: HashMap::new(),
            next_ticket: 1,
            batches_executed: 0,
            dispatches_executed: 0,
        }
    }

    /// Device that refuses allocations beyond `bytes` in total.
    pub fn with_memory_limit(bytes: u64) -> Self {
        Self {
            memory_limit: Some(bytes),
            ..Self::new()
        }
    }

    /// Number of polls a readback stays pending before its data is ready.
    pub fn with_readback_latency(mut self, polls: u32) -> Self {
        self.readback_latency = polls;
        self
    }

    pub fn live_bytes(&self) -> u64 {
        self.live_bytes
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn batches_executed(&self) -> u64 {
        self.batches_executed
    }

    pub fn dispatches_executed(&self) -> u64 {
        self.dispatches_executed
    }

    pub fn pending_readbacks(&self) -> usize {
        self.readbacks.len()
    }
}

impl ComputeDevice for CpuDevice {
    fn backend_name(&self) -> &'static str {
        "cpu"
    }

    fn thread_group_size(&self, kernel: KernelId) -> [u32; 3] {
        default_group_size(kernel)
    }

    fn create_buffer(&mut self, label: &str, len: usize) -> Result<BufferId, DeviceError> {
        let bytes = (len * std::mem::size_of::<f32>()) as u64;
        if let Some(limit) = self.memory_limit {
            if self.live_bytes + bytes > limit {
                return Err(DeviceError::Allocation {
                    label: label.to_string(),
                    bytes,
                    reason: format!("{} of {limit} bytes already in use", self.live_bytes),
                });
            }
        }

        let id = BufferId(self.next_buffer);
        self.next_buffer += 1;
        self.buffers.insert(
            id,
            CpuBuffer {
                label: label.to_string(),
                data: vec![0.0; len],
            },
        );
        self.live_bytes += bytes;
        Ok(id)
    }

    fn release_buffer(&mut self, id: BufferId) {
        if let Some(buffer) = self.buffers.remove(&id) {
            self.live_bytes -= (buffer.data.len() * std::mem::size_of::<f32>()) as u64;
            log::trace!("Released CPU buffer '{}'", buffer.label);
        }
    }

    fn write_buffer(&mut self, id: BufferId, data: &[f32]) -> Result<(), DeviceError> {
        let buffer = self.buffers.get_mut(&id).ok_or(DeviceError::UnknownBuffer(id))?;
        if buffer.data.len() != data.len() {
            return Err(DeviceError::SizeMismatch {
                id,
                expected: buffer.data.len(),
                found: data.len(),
            });
        }
        buffer.data.copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&mut self, id: BufferId) -> Result<Vec<f32>, DeviceError> {
        self.buffers
            .get(&id)
            .map(|b| b.data.clone())
            .ok_or(DeviceError::UnknownBuffer(id))
    }

    fn execute(&mut self, batch: &[DispatchRecord]) -> Result<(), DeviceError> {
        let mut storage: HashMap<BufferId, Vec<f32>> = self
            .buffers
            .iter_mut()
            .map(|(id, b)| (*id, std::mem::take(&mut b.data)))
            .collect();

        let mut result = Ok(());
        for record in batch {
            result = kernels::run(record, &mut storage);
            if result.is_err() {
                break;
            }
            self.dispatches_executed += 1;
        }

        for (id, data) in storage {
            if let Some(buffer) = self.buffers.get_mut(&id) {
                buffer.data = data;
            }
        }
        self.batches_executed += 1;
        result
    }

    fn request_readback(&mut self, id: BufferId) -> Result<ReadbackTicket, DeviceError> {
        if !self.buffers.contains_key(&id) {
            return Err(DeviceError::UnknownBuffer(id));
        }
        let ticket = ReadbackTicket(self.next_ticket);
        self.next_ticket += 1;
        self.readbacks.insert(
            ticket,
            PendingReadback {
                buffer: id,
                polls_left: self.readback_latency,
            },
        );
        Ok(ticket)
    }

    fn poll_readback(&mut self, ticket: ReadbackTicket) -> ReadbackStatus {
        let Some(pending) = self.readbacks.get_mut(&ticket) else {
            return ReadbackStatus::Failed(format!("unknown readback ticket {}", ticket.0));
        };
        if pending.polls_left > 0 {
            pending.polls_left -= 1;
            return ReadbackStatus::Pending;
        }

        let buffer = pending.buffer;
        self.readbacks.remove(&ticket);
        // Data is copied when the transfer completes, so a buffer released while the
        // readback was in flight fails the readback.
        match self.buffers.get(&buffer) {
            Some(b) => ReadbackStatus::Ready(b.data.clone()),
            None => ReadbackStatus::Failed(format!("buffer {buffer:?} released before readback completed")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffers_zero_initialised_and_writable() {
        let mut device = CpuDevice::new();
        let id = device.create_buffer("test", 8).unwrap();
        assert_eq!(device.read_buffer(id).unwrap(), vec![0.0; 8]);
        device.write_buffer(id, &[1.0; 8]).unwrap();
        assert_eq!(device.read_buffer(id).unwrap(), vec![1.0; 8]);
        assert!(matches!(
            device.write_buffer(id, &[1.0; 4]),
            Err(DeviceError::SizeMismatch { expected: 8, found: 4, .. })
        ));
    }

    #[test]
    fn test_memory_limit() {
        let mut device = CpuDevice::with_memory_limit(64);
        let a = device.create_buffer("a", 16).unwrap();
        assert!(matches!(
            device.create_buffer("b", 1),
            Err(DeviceError::Allocation { .. })
        ));
        device.release_buffer(a);
        assert!(device.create_buffer("b", 16).is_ok());
    }

    #[test]
    fn test_readback_latency() {
        let mut device = CpuDevice::new().with_readback_latency(2);
        let id = device.create_buffer("rb", 4).unwrap();
        device.write_buffer(id, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let ticket = device.request_readback(id).unwrap();
        assert_eq!(device.poll_readback(ticket), ReadbackStatus::Pending);
        assert_eq!(device.poll_readback(ticket), ReadbackStatus::Pending);
        assert_eq!(
            device.poll_readback(ticket),
            ReadbackStatus::Ready(vec![1.0, 2.0, 3.0, 4.0])
        );
        assert!(matches!(device.poll_readback(ticket), ReadbackStatus::Failed(_)));
    }

    #[test]
    fn test_readback_fails_when_buffer_released() {
        let mut device = CpuDevice::new().with_readback_latency(0);
        let id = device.create_buffer("rb", 4).unwrap();
        let ticket = device.request_readback(id).unwrap();
        device.release_buffer(id);
        assert!(matches!(device.poll_readback(ticket), ReadbackStatus::Failed(_)));
        assert_eq!(device.pending_readbacks(), 0);
    }
}
