//! # Particle Store
//!
//! The per-rank storage directory. Owns the particle counts and every
//! per-particle array, and keeps the identifier index, the dependents and
//! the reorderer consistent through every slot-changing event.
//!
//! ## Slot layout
//!
//! ```text
//! 0          nlocal          nlocal+nghost        capacity
//! [  owned   |     ghosts     |  spare / unused   ]
//! ```
//!
//! Slots are not stable; identifiers are. Ghosts are replaced wholesale by
//! [`ParticleStore::replace_ghosts`] and dropped whenever the owned range
//! changes.
//!
//! ## Fatal errors
//!
//! Corruption and resource exhaustion are raised on the attached
//! [`CollectiveFault`] before they are returned, and every collective
//! operation refuses to run once any rank has faulted.

mod exchange;
mod identifiers;

pub use identifiers::{IdentifierStats, SameIdentifier};

use tracing::{debug, error, info, trace, warn};

use crate::arrays::{CustomKind, ParticleArrays, Vec3};
use crate::config::{self, MapConfig, MapStrategy, StorageConfig};
use crate::error::{StorageError, StorageResult};
use crate::fault::CollectiveFault;
use crate::id::{ParticleId, IDENTIFIER_MAX};
use crate::map::IdentifierIndex;
use crate::registry::{ArrayRegistry, CallbackKind, DependentHandle, DependentId};
use crate::sort::{BinGrid, Reordering, SpatialSorter};
use crate::style::ParticleStyle;

/// Per-rank particle storage directory.
pub struct ParticleStore {
    config: StorageConfig,
    style: String,
    nlocal: usize,
    nghost: usize,
    arrays: ParticleArrays,
    index: IdentifierIndex,
    registry: ArrayRegistry,
    sorter: SpatialSorter,
    timestep: u64,
    fault: Option<(usize, CollectiveFault)>,
}

impl ParticleStore {
    /// Creates an empty store for `style`.
    ///
    /// No memory is allocated until the first growth.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidConfig`] if `config` fails validation.
    pub fn new(config: StorageConfig, style: &dyn ParticleStyle) -> StorageResult<Self> {
        config.validate()?;
        info!(
            style = style.name(),
            fields = style.fields().len(),
            strategy = ?config.map.strategy,
            "particle store created"
        );
        Ok(Self {
            index: IdentifierIndex::new(config.map.clone()),
            arrays: ParticleArrays::new(style.fields()),
            style: style.name().to_string(),
            config,
            nlocal: 0,
            nghost: 0,
            registry: ArrayRegistry::new(),
            sorter: SpatialSorter::new(),
            timestep: 0,
            fault: None,
        })
    }

    // ------------------------------------------------------------------
    // Counts and configuration
    // ------------------------------------------------------------------

    /// Owned particles.
    #[inline]
    #[must_use]
    pub const fn nlocal(&self) -> usize {
        self.nlocal
    }

    /// Ghost particles.
    #[inline]
    #[must_use]
    pub const fn nghost(&self) -> usize {
        self.nghost
    }

    /// Owned plus ghost particles.
    #[inline]
    #[must_use]
    pub const fn nall(&self) -> usize {
        self.nlocal + self.nghost
    }

    /// Slots allocated in every array.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.arrays.capacity()
    }

    /// Current configuration.
    #[must_use]
    pub const fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Name of the particle style.
    #[must_use]
    pub fn style_name(&self) -> &str {
        &self.style
    }

    /// Current timestep, used to schedule reorders.
    #[must_use]
    pub const fn timestep(&self) -> u64 {
        self.timestep
    }

    /// Sets the current timestep.
    pub fn set_timestep(&mut self, step: u64) {
        self.timestep = step;
    }

    /// Step of the next automatic reorder.
    #[must_use]
    pub const fn next_reorder_step(&self) -> u64 {
        self.sorter.next_step()
    }

    /// Strategy the identifier index currently uses.
    #[must_use]
    pub const fn index_strategy(&self) -> MapStrategy {
        self.index.active()
    }

    /// Changes the identifier index strategy and rebuilds the index.
    ///
    /// # Errors
    ///
    /// Fails like [`Self::map_init`]; the configuration and the index
    /// keep the previous strategy.
    pub fn set_map_strategy(&mut self, strategy: MapStrategy) -> StorageResult<()> {
        self.fault_checkpoint()?;
        let policy = MapConfig {
            strategy,
            ..self.config.map.clone()
        };
        self.index.set_policy(policy.clone());
        if let Err(err) = self.rebuild_index() {
            self.index.set_policy(self.config.map.clone());
            return Err(err);
        }
        self.config.map = policy;
        Ok(())
    }

    /// Changes the reorder interval. 0 disables automatic reorders.
    pub fn set_sort_interval(&mut self, interval: u64) {
        self.config.sort.interval = interval;
        self.sorter.reschedule(self.timestep, interval);
    }

    /// Sets an explicit bin edge length, or `None` for automatic sizing.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidConfig`] for a non-positive size.
    pub fn set_bin_size(&mut self, size: Option<f64>) -> StorageResult<()> {
        if let Some(size) = size {
            config::validate_bin_size(size)?;
        }
        self.config.sort.bin_size = size;
        Ok(())
    }

    /// Changes the capacity growth factor.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidConfig`] unless `factor > 1`.
    pub fn set_growth_factor(&mut self, factor: f64) -> StorageResult<()> {
        config::validate_growth_factor(factor)?;
        self.config.growth_factor = factor;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Fault escalation
    // ------------------------------------------------------------------

    /// Wires this store, running as `rank`, to a job-wide fault flag.
    pub fn attach_fault(&mut self, rank: usize, fault: CollectiveFault) {
        self.fault = Some((rank, fault));
    }

    /// Fails if any rank has raised a fatal fault.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::PeerFault`] naming the first faulting rank.
    pub fn fault_checkpoint(&self) -> StorageResult<()> {
        match self.fault.as_ref().and_then(|(_, fault)| fault.check()) {
            Some(peer) => Err(peer),
            None => Ok(()),
        }
    }

    /// Raises fatal errors on the fault flag, then hands the error back.
    fn escalate(&self, err: StorageError) -> StorageError {
        if err.is_fatal() {
            match &self.fault {
                Some((rank, fault)) => {
                    fault.raise(*rank, &err);
                }
                None => error!(%err, "fatal storage fault"),
            }
        }
        err
    }

    // ------------------------------------------------------------------
    // Identifier index
    // ------------------------------------------------------------------

    /// Slot of `id`, or `None` when it is not tracked on this rank.
    ///
    /// Prefers the owned copy when ghosts are tracked too.
    #[inline]
    #[must_use]
    pub fn lookup(&self, id: ParticleId) -> Option<usize> {
        self.index.lookup(id)
    }

    /// Rebuilds the identifier index from the current slots, choosing the
    /// strategy afresh.
    ///
    /// # Errors
    ///
    /// - [`StorageError::DuplicateIdentifier`] if two owned slots share an
    ///   identifier
    /// - [`StorageError::TooManyBuckets`] if the sparse table is too big
    /// - [`StorageError::PeerFault`] if another rank faulted
    pub fn map_init(&mut self) -> StorageResult<()> {
        self.fault_checkpoint()?;
        self.rebuild_index()
    }

    /// Forgets every identifier. Arrays and registrations are untouched.
    pub fn map_clear(&mut self) {
        self.index.clear();
    }

    fn tracked(&self) -> usize {
        if self.config.map.ghosts {
            self.nall()
        } else {
            self.nlocal
        }
    }

    fn rebuild_index(&mut self) -> StorageResult<()> {
        let tracked = self.tracked();
        let capacity = self.capacity();
        let result = self
            .index
            .init(&self.arrays.tags()[..tracked], self.nlocal, capacity);
        result.map_err(|err| self.escalate(err))
    }

    fn drop_ghosts(&mut self) -> StorageResult<()> {
        if self.nghost == 0 {
            return Ok(());
        }
        warn!(nghost = self.nghost, "owned range changed, dropping ghost layer");
        self.nghost = 0;
        self.rebuild_index()
    }

    // ------------------------------------------------------------------
    // Dependents and custom arrays
    // ------------------------------------------------------------------

    /// Registers a dependent for `kind` notifications.
    ///
    /// Registering again is a no-op. Joining the grow list grows the
    /// dependent to the current capacity.
    pub fn register(&mut self, dependent: &DependentHandle, kind: CallbackKind) -> DependentId {
        let capacity = self.capacity();
        self.registry.register(dependent, kind, capacity)
    }

    /// Removes a dependent from the `kind` list.
    pub fn unregister(&mut self, id: DependentId, kind: CallbackKind) -> bool {
        self.registry.unregister(id, kind)
    }

    /// Removes a dependent from every list.
    pub fn unregister_all(&mut self, id: DependentId) {
        self.registry.unregister_all(id);
    }

    /// The registry, for inspection.
    #[must_use]
    pub const fn registry(&self) -> &ArrayRegistry {
        &self.registry
    }

    /// Adds a named custom array. See [`ParticleArrays::add_custom`].
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::DuplicateCustom`] if the name is taken.
    pub fn add_custom(&mut self, name: &str, kind: CustomKind) -> StorageResult<usize> {
        let index = self.arrays.add_custom(name, kind)?;
        debug!(name, index, ?kind, "custom array added");
        Ok(index)
    }

    /// Finds a custom array by name.
    #[must_use]
    pub fn find_custom(&self, name: &str) -> Option<(usize, CustomKind)> {
        self.arrays.find_custom(name)
    }

    /// Removes a custom array.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UnknownCustom`] if no array lives at `index`.
    pub fn remove_custom(&mut self, index: usize) -> StorageResult<()> {
        self.arrays.remove_custom(index)
    }

    // ------------------------------------------------------------------
    // Array access
    // ------------------------------------------------------------------

    /// Every per-particle array.
    #[must_use]
    pub const fn arrays(&self) -> &ParticleArrays {
        &self.arrays
    }

    /// Every per-particle array, mutable. Identifiers stay read-only.
    pub fn arrays_mut(&mut self) -> &mut ParticleArrays {
        &mut self.arrays
    }

    /// Identifiers of owned and ghost slots.
    #[must_use]
    pub fn tags(&self) -> &[ParticleId] {
        &self.arrays.tags()[..self.nall()]
    }

    /// Positions of owned and ghost slots.
    #[must_use]
    pub fn positions(&self) -> &[Vec3] {
        &self.arrays.positions()[..self.nall()]
    }

    /// Positions of owned and ghost slots, mutable.
    pub fn positions_mut(&mut self) -> &mut [Vec3] {
        let nall = self.nall();
        &mut self.arrays.positions_mut()[..nall]
    }

    /// Velocities of owned and ghost slots.
    #[must_use]
    pub fn velocities(&self) -> &[Vec3] {
        &self.arrays.velocities()[..self.nall()]
    }

    /// Velocities of owned and ghost slots, mutable.
    pub fn velocities_mut(&mut self) -> &mut [Vec3] {
        let nall = self.nall();
        &mut self.arrays.velocities_mut()[..nall]
    }

    /// Forces of owned and ghost slots.
    #[must_use]
    pub fn forces(&self) -> &[Vec3] {
        &self.arrays.forces()[..self.nall()]
    }

    /// Forces of owned and ghost slots, mutable.
    pub fn forces_mut(&mut self) -> &mut [Vec3] {
        let nall = self.nall();
        &mut self.arrays.forces_mut()[..nall]
    }

    /// Types of owned and ghost slots.
    #[must_use]
    pub fn types(&self) -> &[i32] {
        &self.arrays.types()[..self.nall()]
    }

    /// Types of owned and ghost slots, mutable.
    pub fn types_mut(&mut self) -> &mut [i32] {
        let nall = self.nall();
        &mut self.arrays.types_mut()[..nall]
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Ensures capacity for at least `min_capacity` particles.
    ///
    /// Capacity grows by the configured factor, so repeated small requests
    /// cost O(1) amortized. Built-in arrays grow first, then grow-registered
    /// dependents in registration order.
    ///
    /// # Errors
    ///
    /// - [`StorageError::CapacityOverflow`] if the new capacity overflows
    /// - [`StorageError::LengthMismatch`] if an array stayed short
    /// - [`StorageError::PeerFault`] if another rank faulted
    pub fn request_growth(&mut self, min_capacity: usize) -> StorageResult<()> {
        self.fault_checkpoint()?;
        self.reserve(min_capacity)
    }

    fn reserve(&mut self, min_capacity: usize) -> StorageResult<()> {
        let current = self.capacity();
        if min_capacity <= current {
            return Ok(());
        }
        let scaled = (current as f64 * self.config.growth_factor).ceil();
        if !scaled.is_finite() || scaled >= usize::MAX as f64 {
            return Err(self.escalate(StorageError::CapacityOverflow {
                requested: min_capacity,
            }));
        }
        let capacity = (scaled as usize)
            .max(min_capacity)
            .max(self.config.min_capacity);

        debug!(from = current, to = capacity, "growing per-particle arrays");
        let result = self.registry.notify_grow(&mut self.arrays, capacity);
        result.map_err(|err| self.escalate(err))
    }

    /// Appends a new owned particle and returns its slot.
    ///
    /// Identifier 0 is stored but not indexed. Every other array at the new
    /// slot starts from defaults. Existing ghosts are dropped.
    ///
    /// # Errors
    ///
    /// - [`StorageError::DuplicateIdentifier`] if `id` is already owned here
    /// - [`StorageError::IdentifierRange`] if `id` exceeds [`IDENTIFIER_MAX`]
    /// - growth errors from [`Self::request_growth`]
    pub fn insert_owned(&mut self, id: ParticleId) -> StorageResult<usize> {
        self.fault_checkpoint()?;
        if id.get() > IDENTIFIER_MAX {
            return Err(StorageError::IdentifierRange {
                id: id.get(),
                limit: IDENTIFIER_MAX,
            });
        }
        self.drop_ghosts()?;
        if let Some(existing) = self.index.lookup(id) {
            return Err(self.escalate(StorageError::DuplicateIdentifier {
                id: id.get(),
                first: existing,
                second: self.nlocal,
            }));
        }

        self.reserve(self.nlocal + 1)?;
        let slot = self.nlocal;
        self.arrays.reset_slot(slot);
        self.arrays.set_tag(slot, id);
        self.nlocal += 1;
        self.index_owned(id, slot)?;
        Ok(slot)
    }

    /// Enters an owned slot into the index, rebuilding when the current
    /// strategy cannot address the identifier.
    fn index_owned(&mut self, id: ParticleId, slot: usize) -> StorageResult<()> {
        if id.is_untracked() {
            return Ok(());
        }
        match self.index.insert(id, slot) {
            Err(StorageError::IdentifierRange { .. }) => {
                debug!(%id, "identifier outside dense range, rebuilding index");
                self.rebuild_index()
            }
            other => other,
        }
    }

    /// Removes the owned particle at `slot` by moving the last owned
    /// particle into it. Returns the removed identifier.
    ///
    /// Existing ghosts are dropped.
    ///
    /// # Errors
    ///
    /// - [`StorageError::InvalidSlot`] if `slot` is not owned
    /// - [`StorageError::PeerFault`] if another rank faulted
    pub fn remove_owned(&mut self, slot: usize) -> StorageResult<ParticleId> {
        self.fault_checkpoint()?;
        if slot >= self.nlocal {
            return Err(StorageError::InvalidSlot {
                slot,
                limit: self.nlocal,
            });
        }
        self.drop_ghosts()?;

        let removed = self.arrays.tags()[slot];
        self.index.remove(removed);
        let last = self.nlocal - 1;
        self.nlocal = last;
        if slot != last {
            let moved = self.arrays.tags()[last];
            self.registry.notify_relocate(&mut self.arrays, last, slot);
            self.index_owned(moved, slot)?;
        }
        Ok(removed)
    }

    /// Empties the store for a redefined box. Arrays, custom arrays and
    /// registrations are kept.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::PeerFault`] if another rank faulted.
    pub fn reset(&mut self) -> StorageResult<()> {
        self.fault_checkpoint()?;
        self.nlocal = 0;
        self.nghost = 0;
        self.index.clear();
        self.rebuild_index()
    }

    /// Permutes owned slots into spatial bin order if a reorder is due at
    /// the current timestep, or unconditionally when `force` is set.
    ///
    /// Returns `None` when nothing ran. Afterwards every array, built-in and
    /// grow-registered, holds each particle's values at its new slot, and
    /// the index points at the new slots.
    ///
    /// # Errors
    ///
    /// - [`StorageError::TooManyBins`] if the bin grid is too big
    /// - [`StorageError::ReorderMismatch`] if the permutation went wrong
    /// - [`StorageError::PeerFault`] if another rank faulted
    pub fn reorder(&mut self, force: bool) -> StorageResult<Option<Reordering>> {
        self.fault_checkpoint()?;
        let interval = self.config.sort.interval;
        if !self.sorter.due(self.timestep, interval, force) {
            return Ok(None);
        }
        self.sorter.mark(self.timestep, interval);
        if self.nlocal == 0 {
            return Ok(None);
        }

        let owned = &self.arrays.positions()[..self.nlocal];
        let grid = match BinGrid::plan(owned, &self.config.sort) {
            Ok(grid) => grid,
            Err(err) => return Err(self.escalate(err)),
        };
        let bins = grid.bin_count();
        if bins == 1 {
            return Ok(Some(Reordering::identity(self.nlocal, bins)));
        }

        let spare = self.nall();
        self.reserve(spare + 1)?;

        let old_to_new = self
            .sorter
            .compute(&grid, &self.arrays.positions()[..self.nlocal]);
        let registry = &self.registry;
        let arrays = &mut self.arrays;
        let applied = self.sorter.apply_in_place(spare, |from, to| {
            registry.notify_relocate(arrays, from, to);
        });
        let moved = applied.map_err(|err| self.escalate(err))?;

        self.rebuild_index()?;
        self.registry.notify_reorder(&old_to_new);
        trace!(
            step = self.timestep,
            bins,
            dims = ?grid.dims(),
            moved,
            nlocal = self.nlocal,
            "owned slots reordered"
        );
        Ok(Some(Reordering {
            old_to_new,
            bins,
            moved,
        }))
    }

    /// Bytes held by arrays, index, reorder buffers and dependents.
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        self.arrays.memory_usage()
            + self.index.memory_usage()
            + self.sorter.memory_usage()
            + self.registry.memory_usage()
    }
}
