//! Identifier bookkeeping: validation, assignment and same-identifier
//! chain queries.

use tracing::debug;

use super::ParticleStore;
use crate::arrays::Vec3;
use crate::error::{StorageError, StorageResult};
use crate::id::{ParticleId, IDENTIFIER_MAX};

/// Summary of the owned identifiers on one rank.
///
/// The communication layer reduces these across ranks with
/// [`IdentifierStats::merge`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IdentifierStats {
    /// Owned particles.
    pub count: u64,
    /// Owned particles with identifier 0.
    pub zeros: u64,
    /// Smallest non-zero identifier.
    pub min: Option<u64>,
    /// Largest identifier, 0 if none.
    pub max: u64,
}

impl IdentifierStats {
    /// Combines the stats of two ranks.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self {
            count: self.count + other.count,
            zeros: self.zeros + other.zeros,
            min: match (self.min, other.min) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            },
            max: self.max.max(other.max),
        }
    }

    /// Whether identifiers are exactly `1..=count`, given the stats of
    /// every rank merged and no duplicates.
    #[must_use]
    pub fn is_consecutive(&self) -> bool {
        self.zeros == 0 && self.count > 0 && self.min == Some(1) && self.max == self.count
    }
}

/// Iterator over the slots sharing one identifier.
pub struct SameIdentifier<'a> {
    store: &'a ParticleStore,
    next: Option<usize>,
    remaining: usize,
}

impl Iterator for SameIdentifier<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        let slot = self.next?;
        self.remaining -= 1;
        self.next = self.store.index.next_same(slot);
        Some(slot)
    }
}

impl ParticleStore {
    /// Summarizes the owned identifiers.
    #[must_use]
    pub fn identifier_stats(&self) -> IdentifierStats {
        let owned = &self.arrays.tags()[..self.nlocal];
        let mut stats = IdentifierStats {
            count: owned.len() as u64,
            ..IdentifierStats::default()
        };
        for id in owned {
            if id.is_untracked() {
                stats.zeros += 1;
            } else {
                stats.min = Some(stats.min.map_or(id.get(), |min| min.min(id.get())));
                stats.max = stats.max.max(id.get());
            }
        }
        stats
    }

    /// Checks the owned identifiers are usable.
    ///
    /// # Errors
    ///
    /// - [`StorageError::MixedIdentifiers`] if some but not all are 0
    /// - [`StorageError::IdentifierRange`] if one exceeds [`IDENTIFIER_MAX`]
    pub fn check_identifiers(&self) -> StorageResult<IdentifierStats> {
        let stats = self.identifier_stats();
        if stats.zeros > 0 && stats.zeros < stats.count {
            return Err(StorageError::MixedIdentifiers {
                zeros: stats.zeros as usize,
                count: stats.count as usize,
            });
        }
        if stats.max > IDENTIFIER_MAX {
            return Err(StorageError::IdentifierRange {
                id: stats.max,
                limit: IDENTIFIER_MAX,
            });
        }
        Ok(stats)
    }

    /// Gives every owned particle with identifier 0 a fresh identifier and
    /// rebuilds the index. Returns how many were assigned.
    ///
    /// `global_max` is the largest identifier on any rank and `rank_offset`
    /// the number of untracked particles on lower ranks, so the k-th
    /// untracked slot here gets `global_max + rank_offset + k + 1`.
    ///
    /// # Errors
    ///
    /// - [`StorageError::IdentifierRange`] if the new identifiers would
    ///   exceed [`IDENTIFIER_MAX`]; nothing is assigned
    /// - rebuild errors from [`Self::map_init`]
    pub fn extend_identifiers(&mut self, global_max: u64, rank_offset: u64) -> StorageResult<usize> {
        self.fault_checkpoint()?;
        let zeros = self.identifier_stats().zeros;
        let last = global_max
            .checked_add(rank_offset)
            .and_then(|base| base.checked_add(zeros))
            .filter(|&last| last <= IDENTIFIER_MAX)
            .ok_or(StorageError::IdentifierRange {
                id: global_max.saturating_add(rank_offset).saturating_add(zeros),
                limit: IDENTIFIER_MAX,
            })?;

        let mut next = last - zeros;
        let mut assigned = 0;
        for slot in 0..self.nlocal {
            if self.arrays.tags()[slot].is_untracked() {
                next += 1;
                self.arrays.set_tag(slot, ParticleId::new(next));
                assigned += 1;
            }
        }
        if assigned > 0 {
            debug!(assigned, first = last - zeros + 1, last, "identifiers assigned");
            self.rebuild_index()?;
        }
        Ok(assigned)
    }

    /// Slots sharing the identifier of `slot`, starting at `slot`.
    ///
    /// Starting from [`Self::lookup`] visits every copy on this rank.
    #[must_use]
    pub fn same_identifier(&self, slot: usize) -> SameIdentifier<'_> {
        SameIdentifier {
            store: self,
            next: (slot < self.nall()).then_some(slot),
            remaining: self.nall(),
        }
    }

    /// Walks every same-identifier chain and checks each tracked slot is
    /// reached exactly once from the slot the index maps its identifier to.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ChainCorrupted`] at the first broken chain.
    pub fn verify_chains(&self) -> StorageResult<()> {
        let tracked = self.tracked();
        let tags = &self.arrays.tags()[..tracked];
        let mut seen = vec![false; tracked];

        for (slot, &id) in tags.iter().enumerate() {
            if id.is_untracked() || self.index.lookup(id) != Some(slot) {
                continue;
            }
            let mut cursor = Some(slot);
            let mut steps = 0;
            while let Some(current) = cursor {
                let corrupted = current >= tracked || tags[current] != id || seen[current];
                steps += 1;
                if corrupted || steps > tracked {
                    return Err(self.escalate(StorageError::ChainCorrupted {
                        id: id.get(),
                        slot: current,
                    }));
                }
                seen[current] = true;
                cursor = self.index.next_same(current);
            }
        }

        match tags
            .iter()
            .enumerate()
            .find(|(slot, id)| !id.is_untracked() && !seen[*slot])
        {
            Some((slot, id)) => Err(self.escalate(StorageError::ChainCorrupted {
                id: id.get(),
                slot,
            })),
            None => Ok(()),
        }
    }

    /// Slot of the copy of `id` closest to `reference`, owned or ghost.
    #[must_use]
    pub fn closest_copy(&self, id: ParticleId, reference: &Vec3) -> Option<usize> {
        let positions = self.arrays.positions();
        let distance = |slot: usize| {
            let x = positions[slot];
            (0..3).map(|d| (x[d] - reference[d]).powi(2)).sum::<f64>()
        };
        self.same_identifier(self.lookup(id)?)
            .min_by(|&a, &b| distance(a).total_cmp(&distance(b)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::exchange::ExchangeBuffer;
    use crate::style::Atomic;

    fn store_with(ids: &[u64]) -> ParticleStore {
        let mut store = ParticleStore::new(StorageConfig::default(), &Atomic).unwrap();
        for &raw in ids {
            store.insert_owned(ParticleId::new(raw)).unwrap();
        }
        store
    }

    #[test]
    fn test_stats_and_merge() {
        let a = store_with(&[4, 2, 3]).identifier_stats();
        assert_eq!(a, IdentifierStats { count: 3, zeros: 0, min: Some(2), max: 4 });
        assert!(!a.is_consecutive());

        let b = store_with(&[1]).identifier_stats();
        let merged = a.merge(b);
        assert_eq!(merged.min, Some(1));
        assert!(merged.is_consecutive());
        assert!(!IdentifierStats::default().is_consecutive());
    }

    #[test]
    fn test_check_identifiers() {
        assert!(store_with(&[0, 0]).check_identifiers().is_ok());
        assert_eq!(
            store_with(&[0, 3]).check_identifiers(),
            Err(StorageError::MixedIdentifiers { zeros: 1, count: 2 })
        );
    }

    #[test]
    fn test_extend_identifiers() {
        let mut store = store_with(&[0, 0, 0]);
        // Largest identifier anywhere is 100, lower ranks hold 5 untracked.
        assert_eq!(store.extend_identifiers(100, 5), Ok(3));
        let ids: Vec<u64> = store.tags().iter().map(|id| id.get()).collect();
        assert_eq!(ids, vec![106, 107, 108]);
        assert_eq!(store.lookup(ParticleId::new(107)), Some(1));
        assert_eq!(store.extend_identifiers(200, 0), Ok(0));

        let mut full = store_with(&[0]);
        assert!(matches!(
            full.extend_identifiers(IDENTIFIER_MAX, 0),
            Err(StorageError::IdentifierRange { .. })
        ));
        assert!(full.tags()[0].is_untracked());
    }

    #[test]
    fn test_chains_and_closest_copy() {
        let mut store = store_with(&[1, 2]);
        store.positions_mut()[0] = [0.0, 0.0, 0.0];

        let mut ghosts = ExchangeBuffer::new();
        let mut source = store_with(&[1, 1 + 1]);
        source.positions_mut()[0] = [10.0, 0.0, 0.0];
        source.positions_mut()[1] = [3.0, 0.0, 0.0];
        source.pack_border(0, &mut ghosts).unwrap();
        source.pack_border(0, &mut ghosts).unwrap();
        source.pack_border(1, &mut ghosts).unwrap();
        store.replace_ghosts(&ghosts).unwrap();
        store.positions_mut()[3] = [-4.0, 0.0, 0.0];

        assert!(store.verify_chains().is_ok());
        assert_eq!(store.same_identifier(0).collect::<Vec<_>>(), vec![0, 2, 3]);
        assert_eq!(store.same_identifier(1).collect::<Vec<_>>(), vec![1, 4]);
        assert_eq!(store.same_identifier(9).count(), 0);

        assert_eq!(store.closest_copy(ParticleId::new(1), &[9.0, 0.0, 0.0]), Some(2));
        assert_eq!(store.closest_copy(ParticleId::new(1), &[-3.0, 0.0, 0.0]), Some(3));
        assert_eq!(store.closest_copy(ParticleId::new(2), &[2.9, 0.0, 0.0]), Some(4));
        assert_eq!(store.closest_copy(ParticleId::new(77), &[0.0; 3]), None);
    }

    #[test]
    fn test_verify_chains_detects_stale_index() {
        let mut store = store_with(&[1, 2, 3]);
        store.map_clear();
        assert!(matches!(
            store.verify_chains(),
            Err(StorageError::ChainCorrupted { .. })
        ));
        store.map_init().unwrap();
        assert!(store.verify_chains().is_ok());
    }
}
