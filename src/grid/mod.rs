//! Grid field buffers and the pool that owns them.

pub mod field;
pub mod pool;

pub use field::{BoundaryCondition, BufferLabel, FieldKind, GridBuffer, ScratchSlot};
pub use pool::{validate_resolution, GridBufferPool, PoolError, MAX_RESOLUTION, MIN_RESOLUTION};
