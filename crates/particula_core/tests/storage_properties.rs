//! Property tests for the identifier index and the spatial reorderer.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use particula_core::style::Charge;
use particula_core::{
    CallbackKind, Column, CustomKind, Dependent, DependentHandle, Field, MapStrategy, ParticleId,
    ParticleStore, StorageConfig,
};
use proptest::prelude::*;

fn charged_store() -> ParticleStore {
    ParticleStore::new(StorageConfig::default(), &Charge).unwrap()
}

fn lookups(store: &ParticleStore, ids: &[u64]) -> Vec<Option<usize>> {
    ids.iter().map(|&raw| store.lookup(ParticleId::new(raw))).collect()
}

/// One `f64` per slot, moved by relocation like any built-in array.
struct Shadow {
    values: Vec<f64>,
}

impl Dependent for Shadow {
    fn name(&self) -> &str {
        "shadow"
    }

    fn capacity(&self) -> usize {
        self.values.len()
    }

    fn grow(&mut self, capacity: usize) {
        if capacity > self.values.len() {
            self.values.resize(capacity, 0.0);
        }
    }

    fn relocate(&mut self, from: usize, to: usize) {
        self.values[to] = self.values[from];
    }
}

proptest! {
    #[test]
    fn lookup_tracks_inserts_and_removals(
        ops in proptest::collection::vec((any::<bool>(), 1u64..40), 0..200)
    ) {
        let mut store = charged_store();
        let mut live = HashSet::new();

        for (insert, raw) in ops {
            let id = ParticleId::new(raw);
            if insert {
                if live.insert(raw) {
                    store.insert_owned(id).unwrap();
                }
            } else if live.remove(&raw) {
                let slot = store.lookup(id).unwrap();
                prop_assert_eq!(store.remove_owned(slot).unwrap(), id);
            }
        }

        prop_assert_eq!(store.nlocal(), live.len());
        for raw in 1u64..40 {
            let found = store.lookup(ParticleId::new(raw));
            if live.contains(&raw) {
                let slot = found.unwrap();
                prop_assert_eq!(store.tags()[slot].get(), raw);
            } else {
                prop_assert_eq!(found, None);
            }
        }
    }

    #[test]
    fn rebuild_is_idempotent(
        ids in proptest::collection::hash_set(1u64..1_000_000_000, 1..150)
    ) {
        let ids: Vec<u64> = ids.into_iter().collect();
        let mut store = charged_store();
        for &raw in &ids {
            store.insert_owned(ParticleId::new(raw)).unwrap();
        }

        store.map_init().unwrap();
        let first = lookups(&store, &ids);
        store.map_init().unwrap();
        prop_assert_eq!(lookups(&store, &ids), first);
    }

    #[test]
    fn strategies_agree(
        ids in proptest::collection::hash_set(1u64..50_000, 1..150),
        probes in proptest::collection::vec(0u64..60_000, 0..50)
    ) {
        let ids: Vec<u64> = ids.into_iter().collect();
        let mut store = charged_store();
        for &raw in &ids {
            store.insert_owned(ParticleId::new(raw)).unwrap();
        }
        let mut everything = ids.clone();
        everything.extend(probes);

        store.set_map_strategy(MapStrategy::Dense).unwrap();
        prop_assert_eq!(store.index_strategy(), MapStrategy::Dense);
        let dense = lookups(&store, &everything);

        store.set_map_strategy(MapStrategy::Sparse).unwrap();
        prop_assert_eq!(store.index_strategy(), MapStrategy::Sparse);
        prop_assert_eq!(lookups(&store, &everything), dense);
    }

    #[test]
    fn reorder_preserves_particle_values(
        points in proptest::collection::vec(
            (0.0f64..20.0, 0.0f64..20.0, 0.0f64..20.0),
            1..80
        )
    ) {
        let mut store = charged_store();
        let weight = store.add_custom("weight", CustomKind::Double).unwrap();
        let shadow = Arc::new(Mutex::new(Shadow { values: Vec::new() }));
        let handle: DependentHandle = shadow.clone();
        store.register(&handle, CallbackKind::Grow);

        for (i, &(x, y, z)) in points.iter().enumerate() {
            let slot = store.insert_owned(ParticleId::new(i as u64 + 1)).unwrap();
            store.positions_mut()[slot] = [x, y, z];
            let arrays = store.arrays_mut();
            arrays.scalar_mut(Field::Charge).unwrap()[slot] = -(i as f64);
            if let Some(Column::Scalar(column)) = arrays.custom_mut(weight) {
                column.set(slot, 2.0 * i as f64);
            }
            shadow.lock().values[slot] = 3.0 * i as f64;
        }

        let before: Vec<_> = (0..points.len()).map(|slot| {
            (store.tags()[slot], store.positions()[slot], shadow.lock().values[slot])
        }).collect();

        let reordering = store.reorder(true).unwrap().unwrap();
        prop_assert_eq!(reordering.old_to_new.len(), points.len());

        let charges = store.arrays().scalar(Field::Charge).unwrap();
        let weights = match store.arrays().custom(weight) {
            Some(Column::Scalar(column)) => column.as_slice(),
            _ => unreachable!("custom array is a double column"),
        };
        for (old, (tag, x, shadowed)) in before.into_iter().enumerate() {
            let new = reordering.old_to_new[old];
            prop_assert_eq!(store.tags()[new], tag);
            prop_assert_eq!(store.positions()[new], x);
            prop_assert_eq!(charges[new], -(old as f64));
            prop_assert_eq!(weights[new], 2.0 * old as f64);
            prop_assert_eq!(shadow.lock().values[new], shadowed);
            prop_assert_eq!(store.lookup(tag), Some(new));
        }
    }
}
