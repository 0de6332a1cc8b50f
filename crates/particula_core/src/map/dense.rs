//! Direct-addressed identifier index.
//!
//! `slots[id]` holds the slot of `id`. Memory is O(max identifier), so this
//! is only chosen when identifiers are compact.

use super::NIL;

/// Identifier index backed by an array indexed by identifier.
#[derive(Clone, Debug, Default)]
pub struct DenseIndex {
    slots: Vec<usize>,
}

impl DenseIndex {
    /// Creates an index addressing identifiers `0..=max_id`.
    #[must_use]
    pub fn new(max_id: usize) -> Self {
        Self {
            slots: vec![NIL; max_id + 1],
        }
    }

    /// Slot of `id`.
    #[inline]
    #[must_use]
    pub fn get(&self, id: usize) -> Option<usize> {
        self.slots.get(id).copied().filter(|&slot| slot != NIL)
    }

    /// Maps `id` to `slot`, extending the array when `id` is new territory.
    #[inline]
    pub fn set(&mut self, id: usize, slot: usize) {
        if id >= self.slots.len() {
            self.slots.resize(id + 1, NIL);
        }
        self.slots[id] = slot;
    }

    /// Forgets `id`, returning its slot.
    #[inline]
    pub fn unset(&mut self, id: usize) -> Option<usize> {
        let entry = self.slots.get_mut(id)?;
        let slot = std::mem::replace(entry, NIL);
        (slot != NIL).then_some(slot)
    }

    /// Forgets every identifier.
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Largest identifier currently addressable without growth.
    #[inline]
    #[must_use]
    pub fn extent(&self) -> usize {
        self.slots.len()
    }

    /// Bytes held by the slot array.
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        self.slots.capacity() * std::mem::size_of::<usize>()
    }
}
