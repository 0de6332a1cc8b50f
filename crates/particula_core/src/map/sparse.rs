//! Chained hash identifier index.
//!
//! Entries live in one arena. Unused entries form a free list threaded
//! through `next`, so inserts and removals never allocate per entry.
//!
//! ```text
//! buckets: [  2 | NIL |  0 | ... ]        id % nbucket -> head entry
//! entries: [ {id, slot, next: NIL}, {.., next: 3}, {.., next: NIL}, ... ]
//! free ----------------------------^
//! ```

use super::NIL;

#[derive(Clone, Copy, Debug)]
struct HashEntry {
    global: u64,
    local: usize,
    next: usize,
}

/// Identifier index backed by a prime-sized chained hash table.
#[derive(Clone, Debug)]
pub struct SparseIndex {
    buckets: Vec<usize>,
    entries: Vec<HashEntry>,
    free: usize,
    used: usize,
}

impl SparseIndex {
    /// Creates an empty table with `nbucket` buckets and room for
    /// `reserve` entries.
    #[must_use]
    pub fn new(nbucket: usize, reserve: usize) -> Self {
        let mut index = Self {
            buckets: vec![NIL; nbucket.max(1)],
            entries: Vec::with_capacity(reserve),
            free: NIL,
            used: 0,
        };
        index.entries.resize(
            reserve,
            HashEntry {
                global: 0,
                local: NIL,
                next: NIL,
            },
        );
        index.chain_free();
        index
    }

    fn chain_free(&mut self) {
        let count = self.entries.len();
        for (i, entry) in self.entries.iter_mut().enumerate() {
            entry.next = if i + 1 < count { i + 1 } else { NIL };
        }
        self.free = if count > 0 { 0 } else { NIL };
    }

    #[inline]
    fn bucket(&self, id: u64) -> usize {
        // The remainder is below the bucket count, which is a usize.
        (id % self.buckets.len() as u64) as usize
    }

    /// Slot of `id`.
    #[inline]
    #[must_use]
    pub fn get(&self, id: u64) -> Option<usize> {
        let mut cursor = self.buckets[self.bucket(id)];
        while cursor != NIL {
            let entry = &self.entries[cursor];
            if entry.global == id {
                return Some(entry.local);
            }
            cursor = entry.next;
        }
        None
    }

    /// Maps `id` to `slot`, updating the entry if `id` is present.
    pub fn set(&mut self, id: u64, slot: usize) {
        let bucket = self.bucket(id);
        let mut cursor = self.buckets[bucket];
        while cursor != NIL {
            let entry = &mut self.entries[cursor];
            if entry.global == id {
                entry.local = slot;
                return;
            }
            cursor = entry.next;
        }

        let head = self.buckets[bucket];
        let fresh = HashEntry {
            global: id,
            local: slot,
            next: head,
        };
        let index = if self.free == NIL {
            self.entries.push(fresh);
            self.entries.len() - 1
        } else {
            let index = self.free;
            self.free = self.entries[index].next;
            self.entries[index] = fresh;
            index
        };
        self.buckets[bucket] = index;
        self.used += 1;
    }

    /// Forgets `id`, returning its slot.
    ///
    /// The predecessor in the bucket chain is relinked to the successor and
    /// the entry goes back on the free list.
    pub fn unset(&mut self, id: u64) -> Option<usize> {
        let bucket = self.bucket(id);
        let mut previous = NIL;
        let mut cursor = self.buckets[bucket];
        while cursor != NIL {
            let HashEntry { global, local, next } = self.entries[cursor];
            if global == id {
                if previous == NIL {
                    self.buckets[bucket] = next;
                } else {
                    self.entries[previous].next = next;
                }
                self.entries[cursor].next = self.free;
                self.free = cursor;
                self.used -= 1;
                return Some(local);
            }
            previous = cursor;
            cursor = next;
        }
        None
    }

    /// Forgets every identifier, keeping the bucket table.
    pub fn clear(&mut self) {
        self.buckets.fill(NIL);
        self.chain_free();
        self.used = 0;
    }

    /// Number of identifiers held.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.used
    }

    /// Checks if no identifier is held.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// Number of buckets.
    #[inline]
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Bytes held by the bucket table and the entry arena.
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        self.buckets.capacity() * std::mem::size_of::<usize>()
            + self.entries.capacity() * std::mem::size_of::<HashEntry>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collisions_share_a_bucket() {
        let mut index = SparseIndex::new(7, 2);
        // 3, 10 and 17 all hash to bucket 3.
        index.set(3, 0);
        index.set(10, 1);
        index.set(17, 2);
        assert_eq!(index.len(), 3);
        assert_eq!(index.get(10), Some(1));

        // Removing the middle of the chain keeps both neighbours reachable.
        assert_eq!(index.unset(10), Some(1));
        assert_eq!(index.get(3), Some(0));
        assert_eq!(index.get(17), Some(2));
        assert_eq!(index.get(10), None);
        assert_eq!(index.unset(10), None);
    }

    #[test]
    fn test_free_entries_are_reused() {
        let mut index = SparseIndex::new(53, 4);
        for id in 1..=4 {
            index.set(id, id as usize);
        }
        let footprint = index.memory_usage();
        index.unset(2);
        index.unset(3);
        index.set(100, 7);
        index.set(200, 8);
        assert_eq!(index.memory_usage(), footprint);
        assert_eq!(index.get(200), Some(8));
    }

    #[test]
    fn test_update_in_place() {
        let mut index = SparseIndex::new(53, 0);
        index.set(99, 1);
        index.set(99, 5);
        assert_eq!(index.len(), 1);
        assert_eq!(index.get(99), Some(5));

        index.clear();
        assert!(index.is_empty());
        assert_eq!(index.get(99), None);
        index.set(99, 2);
        assert_eq!(index.get(99), Some(2));
    }
}
