//! Field identities and the buffer handles the pool hands out.

use serde::{Deserialize, Serialize};

use crate::device::BufferId;

/// Identity of a simulation field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// RGBA dye concentration.
    Dye,
    Velocity,
    Pressure,
    Divergence,
    /// Surface height, water height, suspended sediment, hardness.
    Terrain,
    /// Displacement x, height, displacement z, depth attenuation.
    Wave,
    /// Pipe outflow towards the left, right, top and bottom neighbour.
    Flux,
    /// Captured environment depth.
    Depth,
}

impl FieldKind {
    pub const ALL: [FieldKind; 8] = [
        FieldKind::Dye,
        FieldKind::Velocity,
        FieldKind::Pressure,
        FieldKind::Divergence,
        FieldKind::Terrain,
        FieldKind::Wave,
        FieldKind::Flux,
        FieldKind::Depth,
    ];

    /// Floats stored per cell.
    pub fn component_count(&self) -> u32 {
        match self {
            FieldKind::Dye | FieldKind::Terrain | FieldKind::Wave | FieldKind::Flux => 4,
            FieldKind::Velocity => 2,
            FieldKind::Pressure | FieldKind::Divergence | FieldKind::Depth => 1,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::Dye => "dye",
            FieldKind::Velocity => "velocity",
            FieldKind::Pressure => "pressure",
            FieldKind::Divergence => "divergence",
            FieldKind::Terrain => "terrain",
            FieldKind::Wave => "wave",
            FieldKind::Flux => "flux",
            FieldKind::Depth => "depth",
        }
    }

    /// Edge treatment used when the field is passed to `HandleBoundary`.
    pub fn boundary(&self) -> BoundaryCondition {
        match self {
            FieldKind::Velocity => BoundaryCondition::NoSlip,
            FieldKind::Pressure => BoundaryCondition::Neumann,
            _ => BoundaryCondition::Open,
        }
    }
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// How edge cells relate to their inward neighbour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryCondition {
    /// Edges are left alone.
    Open,
    /// Edges mirror the inward neighbour negated.
    NoSlip,
    /// Edges copy the inward neighbour.
    Neumann,
}

impl BoundaryCondition {
    /// Multiplier applied to the inward neighbour.
    pub fn scale(&self) -> f32 {
        match self {
            BoundaryCondition::Open => 0.0,
            BoundaryCondition::NoSlip => -1.0,
            BoundaryCondition::Neumann => 1.0,
        }
    }

    /// Open boundaries dispatch nothing.
    pub fn is_open(&self) -> bool {
        matches!(self, BoundaryCondition::Open)
    }
}

/// Shared transient buffers owned by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScratchSlot {
    /// Ping-pong partner of every solver call.
    Ping,
    /// Frozen right-hand side of a diffusion solve.
    Rhs,
}

impl ScratchSlot {
    pub const ALL: [ScratchSlot; 2] = [ScratchSlot::Ping, ScratchSlot::Rhs];

    /// Scratch buffers are wide enough for any field.
    pub const COMPONENTS: u32 = 4;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferLabel {
    Field(FieldKind),
    Scratch(ScratchSlot),
    Display,
}

impl std::fmt::Display for BufferLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BufferLabel::Field(kind) => write!(f, "field-{kind}"),
            BufferLabel::Scratch(ScratchSlot::Ping) => f.write_str("scratch-ping"),
            BufferLabel::Scratch(ScratchSlot::Rhs) => f.write_str("scratch-rhs"),
            BufferLabel::Display => f.write_str("display"),
        }
    }
}

/// A square grid buffer living on the device.
///
/// Handles are cheap to copy; the pool remains the owner of the memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridBuffer {
    pub id: BufferId,
    pub label: BufferLabel,
    pub resolution: u32,
    pub components: u32,
}

impl GridBuffer {
    pub fn cell_count(&self) -> usize {
        (self.resolution as usize) * (self.resolution as usize)
    }

    /// Number of floats in the buffer.
    pub fn len(&self) -> usize {
        self.cell_count() * self.components as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn byte_size(&self) -> u64 {
        (self.len() * std::mem::size_of::<f32>()) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_counts() {
        assert_eq!(FieldKind::Dye.component_count(), 4);
        assert_eq!(FieldKind::Velocity.component_count(), 2);
        assert_eq!(FieldKind::Pressure.component_count(), 1);
        assert_eq!(FieldKind::Divergence.component_count(), 1);
        assert_eq!(FieldKind::Terrain.component_count(), 4);
        assert_eq!(FieldKind::Wave.component_count(), 4);
    }

    #[test]
    fn test_boundary_scale_table() {
        assert_eq!(FieldKind::Dye.boundary().scale(), 0.0);
        assert_eq!(FieldKind::Velocity.boundary().scale(), -1.0);
        assert_eq!(FieldKind::Pressure.boundary().scale(), 1.0);
        assert!(FieldKind::Dye.boundary().is_open());
    }

    #[test]
    fn test_grid_buffer_sizes() {
        let buf = GridBuffer {
            id: BufferId(1),
            label: BufferLabel::Field(FieldKind::Velocity),
            resolution: 16,
            components: 2,
        };
        assert_eq!(buf.cell_count(), 256);
        assert_eq!(buf.len(), 512);
        assert_eq!(buf.byte_size(), 2048);
        assert_eq!(buf.label.to_string(), "field-velocity");
    }
}
