//! Headless wgpu backend.
//!
//! Every grid buffer is a flat `array<f32>` storage buffer. A batch becomes one command
//! encoder with one compute pass per dispatch; per-dispatch uniforms share a single buffer
//! at an aligned stride. Readbacks copy into a staging buffer and are mapped asynchronously.

mod context;
mod pipelines;

use std::collections::HashMap;
use std::sync::mpsc;

use crate::dispatch::{DispatchRecord, KernelId};

use self::context::GpuContext;
use self::pipelines::{align_to, DispatchUniform, KernelPipelines};
use super::{default_group_size, BufferId, ComputeDevice, DeviceError, ReadbackStatus, ReadbackTicket};

const F32_BYTES: u64 = std::mem::size_of::<f32>() as u64;

struct GpuBuffer {
    label: String,
    buffer: wgpu::Buffer,
    len: usize,
}

struct PendingReadback {
    staging: wgpu::Buffer,
    len: usize,
    rx: mpsc::Receiver<Result<(), wgpu::BufferAsyncError>>,
}

pub struct WgpuDevice {
    ctx: GpuContext,
    pipelines: KernelPipelines,
    buffers: HashMap<BufferId, GpuBuffer>,
    next_buffer: u64,
    readbacks: HashMap<ReadbackTicket, PendingReadback>,
    next_ticket: u64,
    uniform_stride: u64,
}

impl WgpuDevice {
    pub async fn new() -> Result<Self, DeviceError> {
        let ctx = GpuContext::new().await?;
        let pipelines = KernelPipelines::new(&ctx.device);
        let alignment = ctx.device.limits().min_uniform_buffer_offset_alignment as u64;
        let uniform_stride = align_to(std::mem::size_of::<DispatchUniform>() as u64, alignment);
        log::debug!(
            "Built {} kernel pipelines on {:?}",
            KernelId::ALL.len(),
            ctx.adapter_info.backend
        );

        Ok(Self {
            ctx,
            pipelines,
            buffers: HashMap::new(),
            next_buffer: 1,
            readbacks: HashMap::new(),
            next_ticket: 1,
            uniform_stride,
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.ctx.adapter_info.name
    }

    fn buffer(&self, id: BufferId) -> Result<&GpuBuffer, DeviceError> {
        self.buffers.get(&id).ok_or(DeviceError::UnknownBuffer(id))
    }

    /// Queue a copy of `id` into a fresh mappable buffer.
    fn stage_copy(&self, id: BufferId) -> Result<wgpu::Buffer, DeviceError> {
        let source = self.buffer(id)?;
        let size = source.buffer.size();
        let staging = self.ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("{}-staging", source.label)),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self.ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(&format!("{}-readback-encoder", source.label)),
        });
        encoder.copy_buffer_to_buffer(&source.buffer, 0, &staging, 0, size);
        self.ctx.queue.submit(Some(encoder.finish()));
        Ok(staging)
    }

    fn start_map(staging: &wgpu::Buffer) -> mpsc::Receiver<Result<(), wgpu::BufferAsyncError>> {
        let (tx, rx) = mpsc::channel();
        staging.slice(..).map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        rx
    }

    fn read_mapped(staging: &wgpu::Buffer, len: usize) -> Vec<f32> {
        let data = staging.slice(..).get_mapped_range();
        let floats: &[f32] = bytemuck::cast_slice(&data);
        let mut out = floats.to_vec();
        drop(data);
        staging.unmap();
        out.truncate(len);
        out
    }

    fn check_bindings(&self, record: &DispatchRecord) -> Result<(), DeviceError> {
        for bound in &record.slots {
            let buffer = self.buffer(bound.buffer.id)?;
            if buffer.len != bound.buffer.len() {
                return Err(DeviceError::SizeMismatch {
                    id: bound.buffer.id,
                    expected: bound.buffer.len(),
                    found: buffer.len,
                });
            }
        }
        Ok(())
    }
}

impl ComputeDevice for WgpuDevice {
    fn backend_name(&self) -> &'static str {
        "wgpu"
    }

    fn thread_group_size(&self, kernel: KernelId) -> [u32; 3] {
        // The WGSL sources hard-code the same sizes.
        default_group_size(kernel)
    }

    fn create_buffer(&mut self, label: &str, len: usize) -> Result<BufferId, DeviceError> {
        let bytes = (len as u64 * F32_BYTES).max(F32_BYTES);
        let max = self.ctx.device.limits().max_storage_buffer_binding_size as u64;
        if bytes > max {
            return Err(DeviceError::Allocation {
                label: label.to_string(),
                bytes,
                reason: format!("exceeds the {max}-byte storage binding limit"),
            });
        }

        self.ctx.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = self.ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        if let Some(err) = pollster::block_on(self.ctx.device.pop_error_scope()) {
            return Err(DeviceError::Allocation {
                label: label.to_string(),
                bytes,
                reason: err.to_string(),
            });
        }

        let id = BufferId(self.next_buffer);
        self.next_buffer += 1;
        self.buffers.insert(
            id,
            GpuBuffer {
                label: label.to_string(),
                buffer,
                len,
            },
        );
        Ok(id)
    }

    fn release_buffer(&mut self, id: BufferId) {
        if let Some(b) = self.buffers.remove(&id) {
            b.buffer.destroy();
            log::trace!("Released GPU buffer '{}'", b.label);
        }
    }

    fn write_buffer(&mut self, id: BufferId, data: &[f32]) -> Result<(), DeviceError> {
        let buffer = self.buffer(id)?;
        if buffer.len != data.len() {
            return Err(DeviceError::SizeMismatch {
                id,
                expected: buffer.len,
                found: data.len(),
            });
        }
        if !data.is_empty() {
            self.ctx.queue.write_buffer(&buffer.buffer, 0, bytemuck::cast_slice(data));
        }
        Ok(())
    }

    fn read_buffer(&mut self, id: BufferId) -> Result<Vec<f32>, DeviceError> {
        let len = self.buffer(id)?.len;
        let staging = self.stage_copy(id)?;
        let rx = Self::start_map(&staging);
        // Block until the mapping is ready.
        self.ctx.device.poll(wgpu::Maintain::Wait);
        match rx.recv() {
            Ok(Ok(())) => Ok(Self::read_mapped(&staging, len)),
            Ok(Err(e)) => Err(DeviceError::Readback(e.to_string())),
            Err(e) => Err(DeviceError::Readback(e.to_string())),
        }
    }

    fn execute(&mut self, batch: &[DispatchRecord]) -> Result<(), DeviceError> {
        if batch.is_empty() {
            return Ok(());
        }

        let stride = self.uniform_stride as usize;
        let mut uniform_bytes = vec![0u8; stride * batch.len()];
        for (i, record) in batch.iter().enumerate() {
            self.check_bindings(record)?;
            let uniform = DispatchUniform::pack(record)?;
            let bytes = bytemuck::bytes_of(&uniform);
            uniform_bytes[i * stride..i * stride + bytes.len()].copy_from_slice(bytes);
        }

        let uniforms = self.ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("gridflow-dispatch-uniforms"),
            size: uniform_bytes.len() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.ctx.queue.write_buffer(&uniforms, 0, &uniform_bytes);

        let mut encoder = self.ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("gridflow-batch-encoder"),
        });
        for (i, record) in batch.iter().enumerate() {
            let kernel = self.pipelines.get(record.kernel).ok_or_else(|| DeviceError::Execution {
                kernel: record.kernel,
                reason: "no pipeline built".to_string(),
            })?;

            let mut entries = vec![wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &uniforms,
                    offset: (i * stride) as u64,
                    size: wgpu::BufferSize::new(std::mem::size_of::<DispatchUniform>() as u64),
                }),
            }];
            for (s, bound) in record.slots.iter().enumerate() {
                entries.push(wgpu::BindGroupEntry {
                    binding: s as u32 + 1,
                    resource: self.buffer(bound.buffer.id)?.buffer.as_entire_binding(),
                });
            }
            let bind_group = self.ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(record.kernel.name()),
                layout: &kernel.bgl,
                entries: &entries,
            });

            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(record.kernel.name()),
                timestamp_writes: None,
            });
            cpass.set_pipeline(&kernel.pipeline);
            cpass.set_bind_group(0, &bind_group, &[]);
            cpass.dispatch_workgroups(record.groups.x, record.groups.y, record.groups.z);
        }
        self.ctx.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn request_readback(&mut self, id: BufferId) -> Result<ReadbackTicket, DeviceError> {
        let len = self.buffer(id)?.len;
        let staging = self.stage_copy(id)?;
        let rx = Self::start_map(&staging);
        let ticket = ReadbackTicket(self.next_ticket);
        self.next_ticket += 1;
        self.readbacks.insert(ticket, PendingReadback { staging, len, rx });
        Ok(ticket)
    }

    fn poll_readback(&mut self, ticket: ReadbackTicket) -> ReadbackStatus {
        self.ctx.device.poll(wgpu::Maintain::Poll);
        let Some(pending) = self.readbacks.get(&ticket) else {
            return ReadbackStatus::Failed(format!("unknown readback ticket {}", ticket.0));
        };
        let status = match pending.rx.try_recv() {
            Ok(Ok(())) => ReadbackStatus::Ready(Self::read_mapped(&pending.staging, pending.len)),
            Ok(Err(e)) => ReadbackStatus::Failed(e.to_string()),
            Err(mpsc::TryRecvError::Empty) => return ReadbackStatus::Pending,
            Err(mpsc::TryRecvError::Disconnected) => {
                ReadbackStatus::Failed("map callback dropped".to_string())
            }
        };
        self.readbacks.remove(&ticket);
        status
    }
}
