//! # Array Registry
//!
//! Keeps the ordered notification lists of dependents and drives every
//! per-particle array, built-in or dependent, through growth, relocation,
//! reorder and record packing.
//!
//! Ordering rules:
//! - Built-in arrays are always handled before dependents
//! - Dependents are notified in registration order
//! - Pack and unpack walk the same list in the same order, so records
//!   written on one rank decode on another with the same registrations

pub mod dependent;

pub use dependent::{handle, CallbackKind, Dependent, DependentHandle, DependentId, Payload};

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::arrays::ParticleArrays;
use crate::error::{StorageError, StorageResult};

#[derive(Clone, Copy)]
enum Channel {
    Migrate,
    Border,
    Checkpoint,
}

/// Ordered notification lists over registered dependents.
#[derive(Default)]
pub struct ArrayRegistry {
    handles: HashMap<DependentId, DependentHandle>,
    grow: Vec<DependentId>,
    migrate: Vec<DependentId>,
    checkpoint: Vec<DependentId>,
    next_id: u32,
}

impl ArrayRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity of an already known handle.
    fn identify(&self, dependent: &DependentHandle) -> Option<DependentId> {
        self.handles
            .iter()
            .find(|(_, known)| Arc::as_ptr(known).cast::<()>() == Arc::as_ptr(dependent).cast::<()>())
            .map(|(id, _)| *id)
    }

    /// Adds `dependent` to the `kind` list.
    ///
    /// Registering the same handle again for the same kind is a no-op. The
    /// same handle always gets the same identity. Joining the grow list
    /// grows the dependent to `capacity` at once.
    pub fn register(
        &mut self,
        dependent: &DependentHandle,
        kind: CallbackKind,
        capacity: usize,
    ) -> DependentId {
        let id = self.identify(dependent).unwrap_or_else(|| {
            let id = DependentId(self.next_id);
            self.next_id += 1;
            self.handles.insert(id, Arc::clone(dependent));
            id
        });

        let list = self.list_mut(kind);
        if list.contains(&id) {
            return id;
        }
        list.push(id);

        if kind == CallbackKind::Grow {
            let mut guard = dependent.lock();
            if guard.capacity() < capacity {
                guard.grow(capacity);
            }
        }
        debug!(%id, ?kind, "dependent registered");
        id
    }

    /// Removes `id` from the `kind` list.
    ///
    /// Returns whether it was registered there.
    pub fn unregister(&mut self, id: DependentId, kind: CallbackKind) -> bool {
        let list = self.list_mut(kind);
        let Some(position) = list.iter().position(|known| *known == id) else {
            return false;
        };
        list.remove(position);
        if !self.grow.contains(&id) && !self.migrate.contains(&id) && !self.checkpoint.contains(&id) {
            self.handles.remove(&id);
        }
        true
    }

    /// Removes `id` from every list.
    pub fn unregister_all(&mut self, id: DependentId) {
        for kind in [CallbackKind::Grow, CallbackKind::Migrate, CallbackKind::Checkpoint] {
            self.list_mut(kind).retain(|known| *known != id);
        }
        self.handles.remove(&id);
    }

    /// Dependents on the `kind` list, in notification order.
    #[must_use]
    pub fn registered(&self, kind: CallbackKind) -> &[DependentId] {
        match kind {
            CallbackKind::Grow => &self.grow,
            CallbackKind::Migrate => &self.migrate,
            CallbackKind::Checkpoint => &self.checkpoint,
        }
    }

    fn list_mut(&mut self, kind: CallbackKind) -> &mut Vec<DependentId> {
        match kind {
            CallbackKind::Grow => &mut self.grow,
            CallbackKind::Migrate => &mut self.migrate,
            CallbackKind::Checkpoint => &mut self.checkpoint,
        }
    }

    fn each(&self, kind: CallbackKind) -> impl Iterator<Item = &DependentHandle> {
        self.registered(kind)
            .iter()
            .filter_map(|id| self.handles.get(id))
    }

    /// Grows built-in arrays then every grow-registered dependent to
    /// `capacity`, and checks they all made it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::LengthMismatch`] naming the first array left
    /// short.
    pub fn notify_grow(&self, arrays: &mut ParticleArrays, capacity: usize) -> StorageResult<()> {
        arrays.grow_to(capacity);
        for dependent in self.each(CallbackKind::Grow) {
            dependent.lock().grow(capacity);
        }

        arrays.verify_capacity(capacity)?;
        for dependent in self.each(CallbackKind::Grow) {
            let guard = dependent.lock();
            if guard.capacity() < capacity {
                return Err(StorageError::LengthMismatch {
                    array: guard.name().to_string(),
                    len: guard.capacity(),
                    capacity,
                });
            }
        }
        Ok(())
    }

    /// Copies slot `from` over slot `to` in every array.
    pub fn notify_relocate(&self, arrays: &mut ParticleArrays, from: usize, to: usize) {
        arrays.relocate(from, to);
        for dependent in self.each(CallbackKind::Grow) {
            dependent.lock().relocate(from, to);
        }
    }

    /// Tells grow-registered dependents that the owned range was permuted.
    pub fn notify_reorder(&self, old_to_new: &[usize]) {
        for dependent in self.each(CallbackKind::Grow) {
            dependent.lock().reordered(old_to_new);
        }
    }

    /// Packs or unpacks the migration data of every migrate-registered
    /// dependent for `slot`.
    ///
    /// Returns the bytes written or consumed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::MalformedRecord`] when unpacking runs out of
    /// bytes.
    pub fn notify_migrate(&self, slot: usize, payload: Payload<'_>) -> StorageResult<usize> {
        self.dispatch(CallbackKind::Migrate, Channel::Migrate, slot, payload)
    }

    /// Like [`Self::notify_migrate`] for ghost records.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::MalformedRecord`] when unpacking runs out of
    /// bytes.
    pub fn notify_border(&self, slot: usize, payload: Payload<'_>) -> StorageResult<usize> {
        self.dispatch(CallbackKind::Migrate, Channel::Border, slot, payload)
    }

    /// Like [`Self::notify_migrate`] for checkpoint records, over the
    /// checkpoint list.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::MalformedRecord`] when unpacking runs out of
    /// bytes.
    pub fn notify_checkpoint(&self, slot: usize, payload: Payload<'_>) -> StorageResult<usize> {
        self.dispatch(CallbackKind::Checkpoint, Channel::Checkpoint, slot, payload)
    }

    fn dispatch(
        &self,
        kind: CallbackKind,
        channel: Channel,
        slot: usize,
        payload: Payload<'_>,
    ) -> StorageResult<usize> {
        match payload {
            Payload::Pack(out) => {
                let start = out.len();
                for dependent in self.each(kind) {
                    let guard = dependent.lock();
                    match channel {
                        Channel::Migrate => guard.pack_exchange(slot, out),
                        Channel::Border => guard.pack_border(slot, out),
                        Channel::Checkpoint => guard.pack_checkpoint(slot, out),
                    }
                }
                Ok(out.len() - start)
            }
            Payload::Unpack(bytes) => {
                let mut offset = 0;
                for dependent in self.each(kind) {
                    let mut guard = dependent.lock();
                    let rest = bytes.get(offset..).unwrap_or_default();
                    let used = match channel {
                        Channel::Migrate => guard.unpack_exchange(slot, rest),
                        Channel::Border => guard.unpack_border(slot, rest),
                        Channel::Checkpoint => guard.unpack_checkpoint(slot, rest),
                    }
                    .ok_or_else(|| {
                        StorageError::MalformedRecord(format!(
                            "record ends before dependent `{}`",
                            guard.name()
                        ))
                    })?;
                    offset += used;
                }
                Ok(offset)
            }
        }
    }

    /// Bytes held by every registered dependent.
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        self.handles
            .values()
            .map(|dependent| dependent.lock().memory_usage())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arrays::FieldSet;
    use parking_lot::Mutex;

    /// One `f64` per slot plus a log of grow calls.
    struct Shadow {
        name: String,
        values: Vec<f64>,
        grown: Arc<Mutex<Vec<(String, usize)>>>,
    }

    impl Dependent for Shadow {
        fn name(&self) -> &str {
            &self.name
        }

        fn capacity(&self) -> usize {
            self.values.len()
        }

        fn grow(&mut self, capacity: usize) {
            self.grown.lock().push((self.name.clone(), capacity));
            if capacity > self.values.len() {
                self.values.resize(capacity, 0.0);
            }
        }

        fn relocate(&mut self, from: usize, to: usize) {
            self.values[to] = self.values[from];
        }

        fn pack_exchange(&self, slot: usize, out: &mut Vec<u8>) {
            out.extend_from_slice(&self.values[slot].to_le_bytes());
        }

        fn unpack_exchange(&mut self, slot: usize, bytes: &[u8]) -> Option<usize> {
            let raw: [u8; 8] = bytes.get(..8)?.try_into().ok()?;
            self.values[slot] = f64::from_le_bytes(raw);
            Some(8)
        }
    }

    fn shadow(name: &str, log: &Arc<Mutex<Vec<(String, usize)>>>) -> DependentHandle {
        handle(Shadow {
            name: name.to_string(),
            values: Vec::new(),
            grown: Arc::clone(log),
        })
    }

    #[test]
    fn test_registration_is_idempotent() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = shadow("a", &log);
        let mut registry = ArrayRegistry::new();

        let first = registry.register(&a, CallbackKind::Grow, 0);
        let again = registry.register(&a, CallbackKind::Grow, 0);
        let migrate = registry.register(&a, CallbackKind::Migrate, 0);
        assert_eq!(first, again);
        assert_eq!(first, migrate);
        assert_eq!(registry.registered(CallbackKind::Grow), &[first]);

        assert!(registry.unregister(first, CallbackKind::Grow));
        assert!(!registry.unregister(first, CallbackKind::Grow));
        assert!(registry.registered(CallbackKind::Grow).is_empty());
        assert_eq!(registry.registered(CallbackKind::Migrate), &[first]);

        registry.unregister_all(first);
        assert!(registry.registered(CallbackKind::Migrate).is_empty());
    }

    #[test]
    fn test_grow_registration_catches_up() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = shadow("a", &log);
        let mut registry = ArrayRegistry::new();
        registry.register(&a, CallbackKind::Grow, 12);
        assert_eq!(a.lock().capacity(), 12);
    }

    #[test]
    fn test_grow_order_and_verification() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ArrayRegistry::new();
        for name in ["first", "second", "third"] {
            registry.register(&shadow(name, &log), CallbackKind::Grow, 0);
        }
        let mut arrays = ParticleArrays::new(FieldSet::EMPTY);

        registry.notify_grow(&mut arrays, 25).unwrap();
        assert_eq!(arrays.capacity(), 25);
        let names: Vec<_> = log.lock().iter().map(|(name, cap)| (name.clone(), *cap)).collect();
        assert_eq!(
            names,
            vec![
                ("first".to_string(), 25),
                ("second".to_string(), 25),
                ("third".to_string(), 25)
            ]
        );
    }

    #[test]
    fn test_lazy_dependent_is_reported() {
        struct Lazy;
        impl Dependent for Lazy {
            fn name(&self) -> &str {
                "lazy"
            }
            fn capacity(&self) -> usize {
                0
            }
            fn grow(&mut self, _capacity: usize) {}
        }

        let mut registry = ArrayRegistry::new();
        registry.register(&handle(Lazy), CallbackKind::Grow, 0);
        let mut arrays = ParticleArrays::new(FieldSet::EMPTY);
        let err = registry.notify_grow(&mut arrays, 8).unwrap_err();
        assert_eq!(
            err,
            StorageError::LengthMismatch { array: "lazy".to_string(), len: 0, capacity: 8 }
        );
        assert!(err.is_fatal());
    }

    #[test]
    fn test_migrate_records_follow_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let typed = |name: &str, values: Vec<f64>| {
            Arc::new(Mutex::new(Shadow {
                name: name.to_string(),
                values,
                grown: Arc::clone(&log),
            }))
        };
        let (a, b) = (typed("a", vec![1.0, 2.0]), typed("b", vec![10.0, 20.0]));
        let (c, d) = (typed("c", vec![0.0; 4]), typed("d", vec![0.0; 4]));

        let mut sender = ArrayRegistry::new();
        let mut receiver = ArrayRegistry::new();
        for dependent in [&a, &b] {
            let dependent: DependentHandle = dependent.clone();
            sender.register(&dependent, CallbackKind::Migrate, 2);
        }
        for dependent in [&c, &d] {
            let dependent: DependentHandle = dependent.clone();
            receiver.register(&dependent, CallbackKind::Migrate, 4);
        }

        let mut bytes = Vec::new();
        assert_eq!(sender.notify_migrate(1, Payload::Pack(&mut bytes)), Ok(16));
        assert_eq!(receiver.notify_migrate(3, Payload::Unpack(&bytes)), Ok(16));
        assert_eq!(c.lock().values[3], 2.0);
        assert_eq!(d.lock().values[3], 20.0);

        let err = receiver.notify_migrate(0, Payload::Unpack(&bytes[..12])).unwrap_err();
        assert!(matches!(err, StorageError::MalformedRecord(_)));

        // Border and checkpoint channels carry nothing for this dependent.
        let mut border = Vec::new();
        assert_eq!(sender.notify_border(0, Payload::Pack(&mut border)), Ok(0));
        assert_eq!(sender.notify_checkpoint(0, Payload::Pack(&mut border)), Ok(0));
    }

    #[test]
    fn test_relocate_reaches_dependents() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = Arc::new(Mutex::new(Shadow {
            name: "a".to_string(),
            values: vec![5.0, 6.0, 7.0],
            grown: Arc::clone(&log),
        }));
        let mut registry = ArrayRegistry::new();
        let dependent: DependentHandle = a.clone();
        registry.register(&dependent, CallbackKind::Grow, 3);

        let mut arrays = ParticleArrays::new(FieldSet::EMPTY);
        registry.notify_grow(&mut arrays, 3).unwrap();
        registry.notify_relocate(&mut arrays, 2, 0);
        assert_eq!(a.lock().values, vec![7.0, 6.0, 7.0]);
    }
}
