//! # Identifier Index
//!
//! Maps a global particle identifier to its current local slot.
//!
//! Two strategies sit behind one lookup interface:
//!
//! - [`DenseIndex`]: identifier used directly as an array position
//! - [`SparseIndex`]: prime-sized chained hash table with a free list
//!
//! The strategy is chosen on every full rebuild ([`IdentifierIndex::init`])
//! and never changes between rebuilds.
//!
//! The index also owns the same-identifier chain: for every tracked slot,
//! the next higher slot holding the same identifier. A rebuild walks the
//! slots from the top down, so the index ends on the lowest slot, which is
//! the owned copy when this rank owns the particle.

pub mod dense;
pub mod prime;
pub mod sparse;

pub use dense::DenseIndex;
pub use sparse::SparseIndex;

use tracing::{debug, info, warn};

use crate::config::{MapConfig, MapStrategy};
use crate::error::{StorageError, StorageResult};
use crate::id::ParticleId;

/// Terminator for slot chains.
pub const NIL: usize = usize::MAX;

#[derive(Clone, Debug)]
enum Strategy {
    Dense(DenseIndex),
    Sparse(SparseIndex),
}

impl Strategy {
    #[inline]
    fn get(&self, id: u64) -> Option<usize> {
        match self {
            Self::Dense(dense) => usize::try_from(id).ok().and_then(|id| dense.get(id)),
            Self::Sparse(sparse) => sparse.get(id),
        }
    }

    const fn kind(&self) -> MapStrategy {
        match self {
            Self::Dense(_) => MapStrategy::Dense,
            Self::Sparse(_) => MapStrategy::Sparse,
        }
    }
}

/// Identifier to slot directory with same-identifier chains.
#[derive(Clone, Debug)]
pub struct IdentifierIndex {
    strategy: Strategy,
    same: Vec<usize>,
    policy: MapConfig,
}

impl IdentifierIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new(policy: MapConfig) -> Self {
        let strategy = match policy.strategy {
            MapStrategy::Sparse => Strategy::Sparse(SparseIndex::new(prime::MIN_BUCKETS, 0)),
            MapStrategy::Auto | MapStrategy::Dense => Strategy::Dense(DenseIndex::default()),
        };
        Self {
            strategy,
            same: Vec::new(),
            policy,
        }
    }

    /// Current policy.
    #[must_use]
    pub const fn policy(&self) -> &MapConfig {
        &self.policy
    }

    /// Replaces the policy. Takes effect on the next [`Self::init`].
    pub fn set_policy(&mut self, policy: MapConfig) {
        self.policy = policy;
    }

    /// Strategy currently in use, [`MapStrategy::Dense`] or
    /// [`MapStrategy::Sparse`].
    #[must_use]
    pub const fn active(&self) -> MapStrategy {
        self.strategy.kind()
    }

    /// Slot of `id`, or `None` if it is not tracked on this rank.
    ///
    /// With ghosts tracked, this is the owned slot when one exists.
    #[inline]
    #[must_use]
    pub fn lookup(&self, id: ParticleId) -> Option<usize> {
        if id.is_untracked() {
            return None;
        }
        self.strategy.get(id.get())
    }

    /// Next slot after `slot` holding the same identifier.
    #[inline]
    #[must_use]
    pub fn next_same(&self, slot: usize) -> Option<usize> {
        self.same.get(slot).copied().filter(|&next| next != NIL)
    }

    /// Rebuilds the index from `tags`, the identifiers of every tracked slot.
    ///
    /// The first `nowned` entries are owned slots; the rest are ghosts.
    /// `capacity` sizes the sparse table. Identifier 0 is skipped.
    /// On error the previous index is left in place.
    ///
    /// # Errors
    ///
    /// - [`StorageError::DuplicateIdentifier`] if two owned slots share an
    ///   identifier
    /// - [`StorageError::TooManyBuckets`] if the sparse table would be too big
    pub fn init(&mut self, tags: &[ParticleId], nowned: usize, capacity: usize) -> StorageResult<()> {
        let tracked = tags.iter().filter(|id| !id.is_untracked()).count();
        let max_id = tags.iter().map(|id| id.get()).max().unwrap_or(0);

        let mut strategy = match self.choose(max_id, tracked) {
            MapStrategy::Dense => {
                // choose() only returns Dense for ids within dense_limit.
                let extent = usize::try_from(max_id).map_err(|_| StorageError::IdentifierRange {
                    id: max_id,
                    limit: self.policy.dense_limit,
                })?;
                Strategy::Dense(DenseIndex::new(extent))
            }
            _ => {
                let target = tracked.max(capacity).saturating_mul(2);
                let nbucket = prime::bucket_count(target, self.policy.max_buckets)?;
                Strategy::Sparse(SparseIndex::new(nbucket, tracked))
            }
        };

        let mut same = vec![NIL; tags.len()];
        for slot in (0..tags.len()).rev() {
            let id = tags[slot];
            if id.is_untracked() {
                continue;
            }
            let previous = strategy.get(id.get());
            if let Some(previous) = previous {
                if previous < nowned && slot < nowned {
                    return Err(StorageError::DuplicateIdentifier {
                        id: id.get(),
                        first: slot,
                        second: previous,
                    });
                }
                same[slot] = previous;
            }
            match &mut strategy {
                // Dense is sized to max_id, which fits in usize.
                Strategy::Dense(dense) => dense.set(id.get() as usize, slot),
                Strategy::Sparse(sparse) => sparse.set(id.get(), slot),
            }
        }

        if strategy.kind() != self.strategy.kind() {
            info!(
                from = ?self.strategy.kind(),
                to = ?strategy.kind(),
                max_id,
                tracked,
                "identifier index switched strategy"
            );
        }
        debug!(strategy = ?strategy.kind(), tracked, max_id, nowned, "identifier index rebuilt");

        self.strategy = strategy;
        self.same = same;
        Ok(())
    }

    fn choose(&self, max_id: u64, tracked: usize) -> MapStrategy {
        let policy = &self.policy;
        let within_limit = max_id <= policy.dense_limit;
        match policy.strategy {
            MapStrategy::Sparse => MapStrategy::Sparse,
            MapStrategy::Dense if within_limit => MapStrategy::Dense,
            MapStrategy::Dense => {
                warn!(
                    max_id,
                    dense_limit = policy.dense_limit,
                    "dense identifier index requested beyond its limit, using sparse"
                );
                MapStrategy::Sparse
            }
            MapStrategy::Auto => {
                let compact =
                    max_id <= policy.dense_factor.saturating_mul(tracked.max(1) as u64);
                if compact && within_limit {
                    MapStrategy::Dense
                } else {
                    MapStrategy::Sparse
                }
            }
        }
    }

    /// Maps `id` to `slot` without a rebuild.
    ///
    /// The slot starts a chain of its own.
    ///
    /// # Errors
    ///
    /// - [`StorageError::ReservedIdentifier`] for identifier 0
    /// - [`StorageError::IdentifierRange`] if the dense strategy cannot
    ///   address `id`; a rebuild picks a strategy that can
    pub fn insert(&mut self, id: ParticleId, slot: usize) -> StorageResult<()> {
        if id.is_untracked() {
            return Err(StorageError::ReservedIdentifier);
        }
        match &mut self.strategy {
            Strategy::Dense(dense) => {
                let limit = self.policy.dense_limit;
                let index = usize::try_from(id.get())
                    .ok()
                    .filter(|_| id.get() <= limit)
                    .ok_or(StorageError::IdentifierRange { id: id.get(), limit })?;
                dense.set(index, slot);
            }
            Strategy::Sparse(sparse) => sparse.set(id.get(), slot),
        }
        if slot >= self.same.len() {
            self.same.resize(slot + 1, NIL);
        }
        self.same[slot] = NIL;
        Ok(())
    }

    /// Forgets `id`, returning the slot it mapped to.
    pub fn remove(&mut self, id: ParticleId) -> Option<usize> {
        if id.is_untracked() {
            return None;
        }
        let slot = match &mut self.strategy {
            Strategy::Dense(dense) => usize::try_from(id.get()).ok().and_then(|id| dense.unset(id)),
            Strategy::Sparse(sparse) => sparse.unset(id.get()),
        }?;
        if let Some(link) = self.same.get_mut(slot) {
            *link = NIL;
        }
        Some(slot)
    }

    /// Forgets every identifier and chain. The strategy stays as it is.
    pub fn clear(&mut self) {
        match &mut self.strategy {
            Strategy::Dense(dense) => dense.clear(),
            Strategy::Sparse(sparse) => sparse.clear(),
        }
        self.same.clear();
    }

    /// Number of slots covered by the same-identifier chain array.
    #[must_use]
    pub fn chain_len(&self) -> usize {
        self.same.len()
    }

    /// Bytes held by the index structures.
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        let table = match &self.strategy {
            Strategy::Dense(dense) => dense.memory_usage(),
            Strategy::Sparse(sparse) => sparse.memory_usage(),
        };
        table + self.same.capacity() * std::mem::size_of::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[u64]) -> Vec<ParticleId> {
        raw.iter().copied().map(ParticleId::new).collect()
    }

    fn index_with(strategy: MapStrategy) -> IdentifierIndex {
        IdentifierIndex::new(MapConfig {
            strategy,
            ..MapConfig::default()
        })
    }

    #[test]
    fn test_auto_strategy_choice() {
        let mut index = index_with(MapStrategy::Auto);
        index.init(&ids(&[1, 2, 3, 4]), 4, 4).unwrap();
        assert_eq!(index.active(), MapStrategy::Dense);

        index.init(&ids(&[1, 2, 3, 4_000_000_000]), 4, 4).unwrap();
        assert_eq!(index.active(), MapStrategy::Sparse);
        assert_eq!(index.lookup(ParticleId::new(4_000_000_000)), Some(3));
    }

    #[test]
    fn test_dense_override_falls_back() {
        let mut index = index_with(MapStrategy::Dense);
        index.init(&ids(&[5, 2_000_000]), 2, 2).unwrap();
        assert_eq!(index.active(), MapStrategy::Sparse);

        index.init(&ids(&[5, 900]), 2, 2).unwrap();
        assert_eq!(index.active(), MapStrategy::Dense);
    }

    #[test]
    fn test_duplicate_owned_is_fatal() {
        let mut index = index_with(MapStrategy::Auto);
        index.init(&ids(&[7, 8]), 2, 2).unwrap();

        let err = index.init(&ids(&[7, 3, 7]), 3, 3).unwrap_err();
        assert_eq!(err, StorageError::DuplicateIdentifier { id: 7, first: 0, second: 2 });
        // Previous contents survive.
        assert_eq!(index.lookup(ParticleId::new(8)), Some(1));
    }

    #[test]
    fn test_ghost_chains() {
        for strategy in [MapStrategy::Dense, MapStrategy::Sparse] {
            let mut index = index_with(strategy);
            // Owned 4 and 9; ghosts of 4 at slots 2 and 4, ghost of 6 at 3.
            index.init(&ids(&[4, 9, 4, 6, 4]), 2, 8).unwrap();
            assert_eq!(index.lookup(ParticleId::new(4)), Some(0));
            assert_eq!(index.next_same(0), Some(2));
            assert_eq!(index.next_same(2), Some(4));
            assert_eq!(index.next_same(4), None);
            assert_eq!(index.lookup(ParticleId::new(6)), Some(3));
            assert_eq!(index.next_same(3), None);
        }
    }

    #[test]
    fn test_untracked_skipped() {
        let mut index = index_with(MapStrategy::Auto);
        index.init(&ids(&[0, 0, 3]), 3, 3).unwrap();
        assert_eq!(index.lookup(ParticleId::UNTRACKED), None);
        assert_eq!(index.lookup(ParticleId::new(3)), Some(2));
        assert_eq!(index.insert(ParticleId::UNTRACKED, 0), Err(StorageError::ReservedIdentifier));
    }

    #[test]
    fn test_incremental_maintenance() {
        let mut index = index_with(MapStrategy::Auto);
        index.init(&ids(&[1, 2, 3]), 3, 3).unwrap();
        index.insert(ParticleId::new(4), 3).unwrap();
        assert_eq!(index.remove(ParticleId::new(2)), Some(1));
        assert_eq!(index.remove(ParticleId::new(2)), None);
        assert_eq!(index.lookup(ParticleId::new(4)), Some(3));

        // Dense cannot reach beyond its limit without a rebuild.
        assert_eq!(index.active(), MapStrategy::Dense);
        assert!(matches!(
            index.insert(ParticleId::new(5_000_000), 4),
            Err(StorageError::IdentifierRange { .. })
        ));

        index.clear();
        assert_eq!(index.lookup(ParticleId::new(1)), None);
        assert_eq!(index.chain_len(), 0);
    }

    #[test]
    fn test_bucket_limit() {
        let mut index = IdentifierIndex::new(MapConfig {
            strategy: MapStrategy::Sparse,
            max_buckets: 100,
            ..MapConfig::default()
        });
        let err = index.init(&ids(&[1, 2]), 2, 1_000).unwrap_err();
        assert!(matches!(err, StorageError::TooManyBuckets { .. }));
        assert!(err.is_fatal());
    }
}
