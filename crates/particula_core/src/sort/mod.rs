//! # Spatial Reorderer
//!
//! Periodically permutes owned slots so particles close in space sit close
//! in memory.
//!
//! ## Algorithm
//!
//! 1. Plan a uniform [`BinGrid`] over the owned bounding box
//! 2. Chain every owned slot into its bin (`binhead` + `next`, no per-bin
//!    allocation); walking slots in reverse keeps each chain ascending
//! 3. Visit bins in row-major order, chains in order; the visit order is
//!    the new slot order
//! 4. Apply the permutation in place, one cycle at a time, through a spare
//!    slot past the ghosts
//!
//! Ghost slots are never touched.

pub mod bins;

pub use bins::BinGrid;

use crate::arrays::Vec3;
use crate::error::{StorageError, StorageResult};
use crate::map::NIL;

/// Outcome of one reorder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reordering {
    /// `old_to_new[old]` is the new slot of the particle formerly at `old`.
    pub old_to_new: Vec<usize>,
    /// Bins in the grid used.
    pub bins: usize,
    /// Slots whose content changed.
    pub moved: usize,
}

impl Reordering {
    /// The reordering that leaves `n` slots in place.
    #[must_use]
    pub fn identity(n: usize, bins: usize) -> Self {
        Self {
            old_to_new: (0..n).collect(),
            bins,
            moved: 0,
        }
    }

    /// Checks if no slot moved.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.moved == 0
    }
}

/// Reorder scheduling plus the scratch buffers reused across reorders.
#[derive(Clone, Debug, Default)]
pub struct SpatialSorter {
    binhead: Vec<usize>,
    next: Vec<usize>,
    permute: Vec<usize>,
    current: Vec<usize>,
    next_step: u64,
    last_step: Option<u64>,
}

impl SpatialSorter {
    /// Creates a sorter due at step 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Step of the next automatic reorder.
    #[must_use]
    pub const fn next_step(&self) -> u64 {
        self.next_step
    }

    /// Whether a reorder should run at `step`.
    ///
    /// Forced reorders always run. Otherwise a reorder runs once the
    /// scheduled step is reached, at most once per step, and never with a
    /// zero interval.
    #[must_use]
    pub fn due(&self, step: u64, interval: u64, force: bool) -> bool {
        if force {
            return true;
        }
        interval > 0 && self.last_step != Some(step) && step >= self.next_step
    }

    /// Records a reorder at `step` and schedules the next one.
    pub fn mark(&mut self, step: u64, interval: u64) {
        self.last_step = Some(step);
        self.reschedule(step, interval);
    }

    /// Schedules the next reorder at the first multiple of `interval`
    /// after `step`.
    pub fn reschedule(&mut self, step: u64, interval: u64) {
        self.next_step = if interval == 0 {
            u64::MAX
        } else {
            (step / interval)
                .saturating_mul(interval)
                .saturating_add(interval)
        };
    }

    /// Computes the bin-order permutation of `positions`.
    ///
    /// Returns `old_to_new`. The new to old map is kept for
    /// [`Self::apply_in_place`].
    pub fn compute(&mut self, grid: &BinGrid, positions: &[Vec3]) -> Vec<usize> {
        let n = positions.len();
        self.binhead.clear();
        self.binhead.resize(grid.bin_count(), NIL);
        self.next.clear();
        self.next.resize(n, NIL);

        for slot in (0..n).rev() {
            let bin = grid.bin_of(&positions[slot]);
            self.next[slot] = self.binhead[bin];
            self.binhead[bin] = slot;
        }

        self.permute.clear();
        for &head in &self.binhead {
            let mut slot = head;
            while slot != NIL {
                self.permute.push(slot);
                slot = self.next[slot];
            }
        }

        let mut old_to_new = vec![0; n];
        for (new, &old) in self.permute.iter().enumerate() {
            old_to_new[old] = new;
        }
        old_to_new
    }

    /// Applies the last computed permutation.
    ///
    /// `relocate(from, to)` must copy every array from one slot to another;
    /// `spare` is a free slot outside the permuted range. Returns the number
    /// of slots whose content changed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ReorderMismatch`] if the realised arrangement
    /// differs from the computed one.
    pub fn apply_in_place(
        &mut self,
        spare: usize,
        mut relocate: impl FnMut(usize, usize),
    ) -> StorageResult<usize> {
        let n = self.permute.len();
        self.current.clear();
        self.current.extend(0..n);

        let mut moved = 0;
        for slot in 0..n {
            if self.current[slot] == self.permute[slot] {
                continue;
            }
            relocate(slot, spare);
            let mut empty = slot;
            while self.permute[empty] != slot {
                let source = self.permute[empty];
                relocate(source, empty);
                self.current[empty] = source;
                moved += 1;
                empty = source;
            }
            relocate(spare, empty);
            self.current[empty] = self.permute[empty];
            moved += 1;
        }

        match (0..n).find(|&slot| self.current[slot] != self.permute[slot]) {
            Some(slot) => Err(StorageError::ReorderMismatch { slot }),
            None => Ok(moved),
        }
    }

    /// Bytes held by the scratch buffers.
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        (self.binhead.capacity()
            + self.next.capacity()
            + self.permute.capacity()
            + self.current.capacity())
            * std::mem::size_of::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SortConfig;

    #[test]
    fn test_schedule() {
        let mut sorter = SpatialSorter::new();
        assert!(sorter.due(0, 100, false));
        sorter.mark(0, 100);
        assert_eq!(sorter.next_step(), 100);
        assert!(!sorter.due(50, 100, false));
        assert!(sorter.due(50, 100, true));
        assert!(sorter.due(100, 100, false));

        sorter.mark(137, 100);
        assert_eq!(sorter.next_step(), 200);
        // Never twice in one step unless forced.
        assert!(!sorter.due(137, 1, false));
        assert!(!sorter.due(500, 0, false));
    }

    #[test]
    fn test_compute_orders_by_bin() {
        let positions = [[3.5, 0.5, 0.5], [0.5, 0.5, 0.5], [2.5, 0.5, 0.5], [0.7, 0.5, 0.5]];
        let config = SortConfig {
            bin_size: Some(1.0),
            ..SortConfig::default()
        };
        let grid = BinGrid::plan(&positions, &config).unwrap();
        let mut sorter = SpatialSorter::new();
        let old_to_new = sorter.compute(&grid, &positions);
        // Slots 1 and 3 share the first bin, slots 0 and 2 the last; each
        // pair keeps its relative order.
        assert_eq!(old_to_new, vec![2, 0, 3, 1]);
    }

    #[test]
    fn test_apply_in_place() {
        let positions = [[3.5, 0.5, 0.5], [0.5, 0.5, 0.5], [2.5, 0.5, 0.5], [0.7, 0.5, 0.5]];
        let config = SortConfig {
            bin_size: Some(1.0),
            ..SortConfig::default()
        };
        let grid = BinGrid::plan(&positions, &config).unwrap();
        let mut sorter = SpatialSorter::new();
        let old_to_new = sorter.compute(&grid, &positions);

        let mut values = vec!['a', 'b', 'c', 'd', '_'];
        let moved = sorter
            .apply_in_place(4, |from, to| values[to] = values[from])
            .unwrap();
        for (old, &new) in old_to_new.iter().enumerate() {
            assert_eq!(values[new], ['a', 'b', 'c', 'd'][old]);
        }
        assert_eq!(moved, 4);
        assert_eq!(&values[..4], &['b', 'd', 'a', 'c']);
    }
}
