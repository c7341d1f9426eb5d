//! Kernel identifiers, slot/parameter signatures and parameter values.

use std::collections::HashMap;

use crate::device::ComputeDevice;

/// Buffer slot names shared by the host and the kernels.
pub mod slot {
    pub const DYE_BUFFER: &str = "dye_buffer";
    pub const VELOCITY_BUFFER: &str = "velocity_buffer";
    pub const VELOCITY_FIELD: &str = "velocity_field_buffer";
    pub const FIELD_TO_ADVECT: &str = "field_to_advect_buffer";
    pub const NEW_ADVECTED_FIELD: &str = "new_advected_field";
    pub const B_BUFFER: &str = "b_buffer";
    pub const UPDATED_X: &str = "updated_x_buffer";
    pub const RESULTS: &str = "results";
    pub const DIVERGENCE_OUT: &str = "divergence_out";
    pub const PRESSURE_BUFFER: &str = "pressure_buffer";
    pub const BOUNDARY_FIELD: &str = "boundary_field";
    pub const COPY_SOURCE: &str = "copy_source";
    pub const COPY_TARGET: &str = "copy_target";
    pub const CLEAR_TARGET: &str = "clear_target";
    pub const WAVE_BUFFER: &str = "wave_buffer";
    pub const WATER_DEPTH_MAP: &str = "water_depth_map";
    pub const HEIGHT_MAP: &str = "height_map";
    pub const FLUX_MAP: &str = "flux_map";
    pub const VELOCITY_MAP: &str = "velocity_map";
    pub const VISUALIZE_SOURCE: &str = "visualize_source";
    pub const DISPLAY_TEXTURE: &str = "display_texture";
}

/// Parameter names shared by the host and the kernels.
pub mod param {
    pub const TIME_STEP: &str = "time_step";
    pub const TIME: &str = "time";
    pub const DISSIPATION: &str = "dissipation";
    pub const CENTER_FACTOR: &str = "center_factor";
    pub const R_DIAGONAL: &str = "r_diagonal";
    pub const BOUNDARY_SCALE: &str = "boundary_scale";
    pub const DIVERGENCE_SCALE: &str = "divergence_scale";
    pub const GRADIENT_SCALE: &str = "gradient_scale";
    pub const CLEAR_VALUE: &str = "clear_value";
    pub const MOUSE_POSITION: &str = "mouse_position";
    pub const MOUSE_POSITION_PREV: &str = "mouse_position_prev";
    pub const MOUSE_PRESSED: &str = "mouse_pressed";
    pub const DYE_COLOR: &str = "dye_color";
    pub const DYE_RADIUS: &str = "dye_radius";
    pub const DYE_FALLOFF: &str = "dye_falloff";
    pub const FORCE_RADIUS: &str = "force_radius";
    pub const FORCE_STRENGTH: &str = "force_strength";
    pub const WAVE_COUNT: &str = "wave_count";
    pub const WAVES: &str = "waves";
    pub const WAVE_HEIGHT: &str = "wave_height";
    pub const MAX_DEPTH: &str = "max_depth";
    pub const GRAVITY: &str = "gravity";
    pub const BRUSH: &str = "brush";
    pub const BRUSH_MODE: &str = "brush_mode";
    pub const RAIN_RATE: &str = "rain_rate";
    pub const EVAPORATION: &str = "evaporation";
    pub const PIPE_AREA: &str = "pipe_area";
    pub const PIPE_LENGTH: &str = "pipe_length";
    pub const CELL_SIZE: &str = "cell_size";
    pub const WATER_HEIGHT: &str = "water_height";
    pub const VISUALIZE_MODE: &str = "visualize_mode";
    pub const VALUE_RANGE: &str = "value_range";
}

/// Every compute kernel the scheduler knows how to dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KernelId {
    AddDye,
    AddForce,
    Advection,
    JacobiSolve,
    Divergence,
    SubtractGradient,
    Boundary,
    CopyBuffer,
    ClearBuffer,
    WaveOperation,
    InitWaterHeight,
    PressureControl,
    FluxComputation,
    FluxApply,
    Visualize,
}

impl KernelId {
    pub const ALL: [KernelId; 15] = [
        KernelId::AddDye,
        KernelId::AddForce,
        KernelId::Advection,
        KernelId::JacobiSolve,
        KernelId::Divergence,
        KernelId::SubtractGradient,
        KernelId::Boundary,
        KernelId::CopyBuffer,
        KernelId::ClearBuffer,
        KernelId::WaveOperation,
        KernelId::InitWaterHeight,
        KernelId::PressureControl,
        KernelId::FluxComputation,
        KernelId::FluxApply,
        KernelId::Visualize,
    ];

    /// Entry-point style name of the kernel.
    pub fn name(&self) -> &'static str {
        match self {
            KernelId::AddDye => "add_dye",
            KernelId::AddForce => "add_force",
            KernelId::Advection => "advection",
            KernelId::JacobiSolve => "jacobi_solve",
            KernelId::Divergence => "divergence",
            KernelId::SubtractGradient => "subtract_gradient",
            KernelId::Boundary => "boundary",
            KernelId::CopyBuffer => "copy_buffer",
            KernelId::ClearBuffer => "clear_buffer",
            KernelId::WaveOperation => "wave_operation",
            KernelId::InitWaterHeight => "init_water_height",
            KernelId::PressureControl => "pressure_control",
            KernelId::FluxComputation => "flux_computation",
            KernelId::FluxApply => "flux_apply",
            KernelId::Visualize => "visualize",
        }
    }

    /// True for kernels dispatched over a flat 1D range instead of the 2D grid.
    pub fn is_linear(&self) -> bool {
        matches!(self, KernelId::Boundary | KernelId::CopyBuffer | KernelId::ClearBuffer)
    }

    /// Slots and parameters the kernel reads or writes.
    pub fn signature(&self) -> KernelSignature {
        use param::*;
        use slot::*;
        use SlotAccess::*;

        match self {
            KernelId::AddDye => KernelSignature {
                slots: const { &[SlotSpec::grid(DYE_BUFFER, ReadWrite)] },
                params: &[
                    MOUSE_POSITION,
                    MOUSE_POSITION_PREV,
                    MOUSE_PRESSED,
                    DYE_COLOR,
                    DYE_RADIUS,
                    DYE_FALLOFF,
                ],
            },
            KernelId::AddForce => KernelSignature {
                slots: const { &[SlotSpec::grid(VELOCITY_BUFFER, ReadWrite)] },
                params: &[
                    MOUSE_POSITION,
                    MOUSE_POSITION_PREV,
                    MOUSE_PRESSED,
                    FORCE_RADIUS,
                    FORCE_STRENGTH,
                ],
            },
            KernelId::Advection => KernelSignature {
                slots: const { &[
                    SlotSpec::grid(VELOCITY_FIELD, Read),
                    SlotSpec::grid(FIELD_TO_ADVECT, Read),
                    SlotSpec::grid(NEW_ADVECTED_FIELD, Write),
                ] },
                params: &[TIME_STEP, DISSIPATION],
            },
            KernelId::JacobiSolve => KernelSignature {
                slots: const { &[
                    SlotSpec::grid(B_BUFFER, Read),
                    SlotSpec::grid(UPDATED_X, Read),
                    SlotSpec::grid(RESULTS, Write),
                ] },
                params: &[CENTER_FACTOR, R_DIAGONAL],
            },
            KernelId::Divergence => KernelSignature {
                slots: const { &[
                    SlotSpec::grid(VELOCITY_FIELD, Read),
                    SlotSpec::grid(DIVERGENCE_OUT, Write),
                ] },
                params: &[DIVERGENCE_SCALE],
            },
            KernelId::SubtractGradient => KernelSignature {
                slots: const { &[
                    SlotSpec::grid(PRESSURE_BUFFER, Read),
                    SlotSpec::grid(VELOCITY_BUFFER, ReadWrite),
                ] },
                params: &[GRADIENT_SCALE],
            },
            KernelId::Boundary => KernelSignature {
                slots: const { &[SlotSpec::grid(BOUNDARY_FIELD, ReadWrite)] },
                params: &[BOUNDARY_SCALE],
            },
            KernelId::CopyBuffer => KernelSignature {
                slots: const { &[
                    SlotSpec::grid(COPY_SOURCE, Read),
                    SlotSpec::grid(COPY_TARGET, Write),
                ] },
                params: &[],
            },
            KernelId::ClearBuffer => KernelSignature {
                slots: const { &[SlotSpec::grid(CLEAR_TARGET, Write)] },
                params: &[CLEAR_VALUE],
            },
            KernelId::WaveOperation => KernelSignature {
                slots: const { &[
                    SlotSpec::grid(WATER_DEPTH_MAP, Read),
                    SlotSpec::grid(WAVE_BUFFER, Write),
                ] },
                params: &[TIME, WAVE_COUNT, WAVES, WAVE_HEIGHT, MAX_DEPTH, GRAVITY],
            },
            KernelId::InitWaterHeight => KernelSignature {
                slots: const { &[SlotSpec::grid(HEIGHT_MAP, ReadWrite)] },
                params: &[WATER_HEIGHT],
            },
            KernelId::PressureControl => KernelSignature {
                slots: const { &[SlotSpec::grid(HEIGHT_MAP, ReadWrite)] },
                params: &[BRUSH, BRUSH_MODE, TIME_STEP],
            },
            KernelId::FluxComputation => KernelSignature {
                slots: const { &[
                    SlotSpec::grid(HEIGHT_MAP, Read),
                    SlotSpec::grid(FLUX_MAP, ReadWrite),
                ] },
                params: &[TIME_STEP, GRAVITY, PIPE_AREA, PIPE_LENGTH, CELL_SIZE],
            },
            KernelId::FluxApply => KernelSignature {
                slots: const { &[
                    SlotSpec::grid(HEIGHT_MAP, ReadWrite),
                    SlotSpec::grid(FLUX_MAP, Read),
                    SlotSpec::grid(VELOCITY_MAP, Write),
                ] },
                params: &[TIME_STEP, CELL_SIZE, RAIN_RATE, EVAPORATION],
            },
            KernelId::Visualize => KernelSignature {
                slots: const { &[
                    SlotSpec::grid(VISUALIZE_SOURCE, Read),
                    SlotSpec::texture(DISPLAY_TEXTURE, Write),
                ] },
                params: &[VISUALIZE_MODE, VALUE_RANGE],
            },
        }
    }
}

impl std::fmt::Display for KernelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// How a kernel touches a bound buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotAccess {
    /// Read anywhere in the buffer.
    Read,
    /// Written without reading; must not alias any other slot of the dispatch.
    Write,
    /// Each work item reads and writes only its own cell.
    ReadWrite,
}

impl SlotAccess {
    pub fn writes(&self) -> bool {
        !matches!(self, SlotAccess::Read)
    }
}

/// One named buffer slot of a kernel.
#[derive(Debug, Clone, Copy)]
pub struct SlotSpec {
    pub name: &'static str,
    pub access: SlotAccess,
    /// Grid-sized slots must all share one resolution within a dispatch.
    pub grid_sized: bool,
}

impl SlotSpec {
    const fn grid(name: &'static str, access: SlotAccess) -> Self {
        Self { name, access, grid_sized: true }
    }

    const fn texture(name: &'static str, access: SlotAccess) -> Self {
        Self { name, access, grid_sized: false }
    }
}

/// Everything a kernel expects to be bound and set before it is dispatched.
#[derive(Debug, Clone, Copy)]
pub struct KernelSignature {
    pub slots: &'static [SlotSpec],
    pub params: &'static [&'static str],
}

impl KernelSignature {
    /// Index of a slot in declaration order.
    pub fn slot_index(&self, name: &str) -> Option<usize> {
        self.slots.iter().position(|s| s.name == name)
    }
}

/// A scalar or vector kernel parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Float(f32),
    UInt(u32),
    Vec2([f32; 2]),
    Vec4([f32; 4]),
    Vec4Array(Vec<[f32; 4]>),
}

impl ParamValue {
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            ParamValue::Float(v) => Some(*v),
            ParamValue::UInt(v) => Some(*v as f32),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            ParamValue::UInt(v) => Some(*v),
            ParamValue::Float(v) if *v >= 0.0 => Some(*v as u32),
            _ => None,
        }
    }

    pub fn as_vec2(&self) -> Option<[f32; 2]> {
        match self {
            ParamValue::Vec2(v) => Some(*v),
            ParamValue::Vec4(v) => Some([v[0], v[1]]),
            _ => None,
        }
    }

    pub fn as_vec4(&self) -> Option<[f32; 4]> {
        match self {
            ParamValue::Vec4(v) => Some(*v),
            ParamValue::Vec2(v) => Some([v[0], v[1], 0.0, 0.0]),
            _ => None,
        }
    }

    pub fn as_vec4_array(&self) -> Option<&[[f32; 4]]> {
        match self {
            ParamValue::Vec4Array(v) => Some(v),
            _ => None,
        }
    }
}

impl From<f32> for ParamValue {
    fn from(v: f32) -> Self {
        ParamValue::Float(v)
    }
}

impl From<u32> for ParamValue {
    fn from(v: u32) -> Self {
        ParamValue::UInt(v)
    }
}

impl From<[f32; 2]> for ParamValue {
    fn from(v: [f32; 2]) -> Self {
        ParamValue::Vec2(v)
    }
}

impl From<[f32; 4]> for ParamValue {
    fn from(v: [f32; 4]) -> Self {
        ParamValue::Vec4(v)
    }
}

impl From<glam::Vec2> for ParamValue {
    fn from(v: glam::Vec2) -> Self {
        ParamValue::Vec2(v.to_array())
    }
}

impl From<Vec<[f32; 4]>> for ParamValue {
    fn from(v: Vec<[f32; 4]>) -> Self {
        ParamValue::Vec4Array(v)
    }
}

/// Thread-group sizes looked up from the device once, at kernel-lookup time.
#[derive(Debug, Clone)]
pub struct KernelTable {
    group_sizes: HashMap<KernelId, [u32; 3]>,
}

impl KernelTable {
    /// Query every kernel's declared thread-group size from the device.
    pub fn from_device(device: &dyn ComputeDevice) -> Self {
        let group_sizes = KernelId::ALL
            .iter()
            .map(|&k| (k, device.thread_group_size(k)))
            .collect();
        Self { group_sizes }
    }

    /// Build a table where every kernel reports the same group size.
    pub fn uniform(group_2d: [u32; 3], group_1d: [u32; 3]) -> Self {
        let group_sizes = KernelId::ALL
            .iter()
            .map(|&k| (k, if k.is_linear() { group_1d } else { group_2d }))
            .collect();
        Self { group_sizes }
    }

    pub fn group_size(&self, kernel: KernelId) -> Option<[u32; 3]> {
        self.group_sizes.get(&kernel).copied()
    }
}
