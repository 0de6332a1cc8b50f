//! Dependents: per-particle data owned outside the store.
//!
//! Neighbor lists, bonded topology, integrator state and the like keep their
//! own slot-indexed arrays. They implement [`Dependent`] and register for the
//! notifications they care about.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// Notification lists a dependent can join.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallbackKind {
    /// Capacity growth, slot relocation and reorder.
    Grow,
    /// Migration and border exchange records.
    Migrate,
    /// Checkpoint records.
    Checkpoint,
}

/// Registry-assigned identity of a dependent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DependentId(pub(crate) u32);

impl fmt::Display for DependentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dependent#{}", self.0)
    }
}

/// Direction of a record notification.
pub enum Payload<'a> {
    /// Append this dependent's data for a slot.
    Pack(&'a mut Vec<u8>),
    /// Read this dependent's data for a slot from the front of the bytes.
    Unpack(&'a [u8]),
}

/// Shared handle the registry drives.
pub type DependentHandle = Arc<Mutex<dyn Dependent>>;

/// Wraps a dependent in a registry handle.
pub fn handle<D: Dependent + 'static>(dependent: D) -> DependentHandle {
    Arc::new(Mutex::new(dependent))
}

/// Per-particle data owned by another subsystem.
///
/// Only the growth methods are required. Record methods default to carrying
/// nothing, so a dependent only implements the lists it registers for.
/// Unpack methods return the number of bytes consumed, or `None` if the
/// record is too short.
pub trait Dependent: Send {
    /// Name used in diagnostics.
    fn name(&self) -> &str;

    /// Slots currently allocated by this dependent.
    fn capacity(&self) -> usize;

    /// Grows every array to at least `capacity` slots, keeping values.
    fn grow(&mut self, capacity: usize);

    /// Copies the data of slot `from` over slot `to`.
    fn relocate(&mut self, _from: usize, _to: usize) {}

    /// Called after a spatial reorder with the old to new slot map of the
    /// owned range, once every array has been permuted.
    fn reordered(&mut self, _old_to_new: &[usize]) {}

    /// Appends migration data for `slot`.
    fn pack_exchange(&self, _slot: usize, _out: &mut Vec<u8>) {}

    /// Reads migration data into `slot`.
    fn unpack_exchange(&mut self, _slot: usize, _bytes: &[u8]) -> Option<usize> {
        Some(0)
    }

    /// Appends ghost data for `slot`.
    fn pack_border(&self, _slot: usize, _out: &mut Vec<u8>) {}

    /// Reads ghost data into `slot`.
    fn unpack_border(&mut self, _slot: usize, _bytes: &[u8]) -> Option<usize> {
        Some(0)
    }

    /// Appends checkpoint data for `slot`.
    fn pack_checkpoint(&self, _slot: usize, _out: &mut Vec<u8>) {}

    /// Reads checkpoint data into `slot`.
    fn unpack_checkpoint(&mut self, _slot: usize, _bytes: &[u8]) -> Option<usize> {
        Some(0)
    }

    /// Bytes held by this dependent.
    fn memory_usage(&self) -> usize {
        0
    }
}
