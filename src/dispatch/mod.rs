//! Kernel signatures, group-count computation and the per-tick dispatch queue.

pub mod group;
pub mod kernel;
pub mod queue;

pub use group::{DispatchGroupCount, GroupCountCache};
pub use kernel::{param, slot, KernelId, KernelSignature, KernelTable, ParamValue, SlotAccess, SlotSpec};
pub use queue::{BoundSlot, DispatchError, DispatchRecord, KernelDispatchQueue};
