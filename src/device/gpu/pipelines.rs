//! Compute pipelines for every kernel, plus the per-dispatch uniform block.

use std::borrow::Cow;
use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};

use crate::device::DeviceError;
use crate::dispatch::{DispatchRecord, KernelId, ParamValue, SlotAccess};
use crate::simulation::MAX_WAVES;

pub(super) const MAX_SLOTS: usize = 4;
pub(super) const MAX_PARAMS: usize = 8;

/// Uniform block shared by every kernel.
///
/// Slot `i` of the signature reports its resolution and component count in lane `i`;
/// parameter `i` sits in `p[i]` (scalars in `.x`, vec2 in `.xy`). A `Vec4Array`
/// parameter goes into `waves` and leaves its `p` entry empty.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub(super) struct DispatchUniform {
    resolution: [u32; 4],
    components: [u32; 4],
    p: [[f32; 4]; MAX_PARAMS],
    waves: [[f32; 4]; MAX_WAVES],
}

impl DispatchUniform {
    pub(super) fn pack(record: &DispatchRecord) -> Result<Self, DeviceError> {
        let too_many = |what: &str, n: usize, max: usize| DeviceError::Execution {
            kernel: record.kernel,
            reason: format!("{n} {what} exceed the {max} the uniform block holds"),
        };
        if record.slots.len() > MAX_SLOTS {
            return Err(too_many("slots", record.slots.len(), MAX_SLOTS));
        }
        if record.params.len() > MAX_PARAMS {
            return Err(too_many("parameters", record.params.len(), MAX_PARAMS));
        }

        let mut uniform = Self::zeroed();
        for (i, bound) in record.slots.iter().enumerate() {
            uniform.resolution[i] = bound.buffer.resolution;
            uniform.components[i] = bound.buffer.components;
        }
        for (i, (_, value)) in record.params.iter().enumerate() {
            match value {
                ParamValue::Float(v) => uniform.p[i][0] = *v,
                ParamValue::UInt(v) => uniform.p[i][0] = *v as f32,
                ParamValue::Vec2([x, y]) => {
                    uniform.p[i][0] = *x;
                    uniform.p[i][1] = *y;
                }
                ParamValue::Vec4(v) => uniform.p[i] = *v,
                ParamValue::Vec4Array(values) => {
                    if values.len() > MAX_WAVES {
                        return Err(too_many("array entries", values.len(), MAX_WAVES));
                    }
                    uniform.waves[..values.len()].copy_from_slice(values);
                }
            }
        }
        Ok(uniform)
    }
}

pub(super) fn align_to(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

fn kernel_source(kernel: KernelId) -> &'static str {
    match kernel {
        KernelId::AddDye => include_str!("shaders/add_dye.wgsl"),
        KernelId::AddForce => include_str!("shaders/add_force.wgsl"),
        KernelId::Advection => include_str!("shaders/advection.wgsl"),
        KernelId::JacobiSolve => include_str!("shaders/jacobi_solve.wgsl"),
        KernelId::Divergence => include_str!("shaders/divergence.wgsl"),
        KernelId::SubtractGradient => include_str!("shaders/subtract_gradient.wgsl"),
        KernelId::Boundary => include_str!("shaders/boundary.wgsl"),
        KernelId::CopyBuffer => include_str!("shaders/copy_buffer.wgsl"),
        KernelId::ClearBuffer => include_str!("shaders/clear_buffer.wgsl"),
        KernelId::WaveOperation => include_str!("shaders/wave_operation.wgsl"),
        KernelId::InitWaterHeight => include_str!("shaders/init_water_height.wgsl"),
        KernelId::PressureControl => include_str!("shaders/pressure_control.wgsl"),
        KernelId::FluxComputation => include_str!("shaders/flux_computation.wgsl"),
        KernelId::FluxApply => include_str!("shaders/flux_apply.wgsl"),
        KernelId::Visualize => include_str!("shaders/visualize.wgsl"),
    }
}

pub(super) struct KernelPipeline {
    pub bgl: wgpu::BindGroupLayout,
    pub pipeline: wgpu::ComputePipeline,
}

/// One pipeline per kernel. Binding 0 is the uniform block; bindings `1..=n` are the
/// signature's slots in declaration order.
pub(super) struct KernelPipelines {
    pipelines: HashMap<KernelId, KernelPipeline>,
}

impl KernelPipelines {
    pub fn new(device: &wgpu::Device) -> Self {
        let common = include_str!("shaders/common.wgsl");
        let pipelines = KernelId::ALL
            .iter()
            .map(|&kernel| (kernel, Self::build(device, common, kernel)))
            .collect();
        Self { pipelines }
    }

    fn build(device: &wgpu::Device, common: &str, kernel: KernelId) -> KernelPipeline {
        let name = kernel.name();
        let shader_src = format!("{common}\n{}", kernel_source(kernel));
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&format!("gridflow-{name}-wgsl")),
            source: wgpu::ShaderSource::Wgsl(Cow::Owned(shader_src)),
        });

        let mut entries = vec![wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: wgpu::BufferSize::new(std::mem::size_of::<DispatchUniform>() as u64),
            },
            count: None,
        }];
        for (i, spec) in kernel.signature().slots.iter().enumerate() {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: i as u32 + 1,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage {
                        read_only: spec.access == SlotAccess::Read,
                    },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            });
        }

        let bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&format!("gridflow-{name}-bgl")),
            entries: &entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&format!("gridflow-{name}-pipeline-layout")),
            bind_group_layouts: &[&bgl],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(name),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some("main"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

        KernelPipeline { bgl, pipeline }
    }

    pub fn get(&self, kernel: KernelId) -> Option<&KernelPipeline> {
        self.pipelines.get(&kernel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{BoundSlot, DispatchGroupCount};
    use crate::grid::{BufferLabel, FieldKind, GridBuffer};
    use crate::device::BufferId;

    fn record(params: Vec<(&'static str, ParamValue)>) -> DispatchRecord {
        DispatchRecord {
            kernel: KernelId::WaveOperation,
            threads: [16, 16, 1],
            group_size: [8, 8, 1],
            groups: DispatchGroupCount::compute([16, 16, 1], [8, 8, 1]),
            slots: vec![BoundSlot {
                name: "wave_buffer",
                access: SlotAccess::Write,
                buffer: GridBuffer {
                    id: BufferId(1),
                    label: BufferLabel::Field(FieldKind::Wave),
                    resolution: 16,
                    components: 4,
                },
            }],
            params,
        }
    }

    #[test]
    fn test_uniform_layout_matches_wgsl() {
        // 2 vec4<u32> + 8 vec4<f32> + 16 vec4<f32>
        assert_eq!(std::mem::size_of::<DispatchUniform>(), 16 * (2 + MAX_PARAMS + MAX_WAVES));
    }

    #[test]
    fn test_pack_places_params_in_order() {
        let r = record(vec![
            ("time", ParamValue::Float(2.0)),
            ("wave_count", ParamValue::UInt(2)),
            ("waves", ParamValue::Vec4Array(vec![[1.0, 45.0, 5.0, 0.0], [0.5, 90.0, 3.0, 0.0]])),
            ("cell_size", ParamValue::Vec2([0.25, 0.5])),
        ]);
        let u = DispatchUniform::pack(&r).unwrap();
        assert_eq!(u.resolution[0], 16);
        assert_eq!(u.components[0], 4);
        assert_eq!(u.p[0][0], 2.0);
        assert_eq!(u.p[1][0], 2.0);
        assert_eq!(u.p[2], [0.0; 4]);
        assert_eq!(u.p[3], [0.25, 0.5, 0.0, 0.0]);
        assert_eq!(u.waves[1], [0.5, 90.0, 3.0, 0.0]);
        assert_eq!(u.waves[2], [0.0; 4]);
    }

    #[test]
    fn test_pack_rejects_oversized_array() {
        let r = record(vec![("waves", ParamValue::Vec4Array(vec![[0.0; 4]; MAX_WAVES + 1]))]);
        assert!(matches!(DispatchUniform::pack(&r), Err(DeviceError::Execution { .. })));
    }

    #[test]
    fn test_align_to() {
        assert_eq!(align_to(416, 256), 512);
        assert_eq!(align_to(512, 256), 512);
    }
}
