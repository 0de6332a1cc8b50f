//! # Attribute Storage
//!
//! One parallel per-particle array, indexed by slot.
//!
//! - Slot access is O(1)
//! - Growth only ever extends; existing values are never touched
//! - Elements are plain old data so they can be packed into exchange and
//!   checkpoint records byte for byte

use bytemuck::{Pod, Zeroable};

use crate::id::{ImageFlags, ParticleId};

/// Three-component vector element (position, velocity, force, ...).
pub type Vec3 = [f64; 3];

/// Four-component tuple element (dipole with magnitude, quaternion, ...).
pub type Vec4 = [f64; 4];

/// Marker trait for per-particle attribute elements.
///
/// Elements must be:
/// - `Copy`: bitwise copyable, relocation is a plain store
/// - `Pod`: safe to view as bytes for packing
/// - `Zeroable`: safe to zero-fill
/// - `Default`: value given to freshly grown slots
pub trait Attribute: Copy + Pod + Zeroable + Default + Send + Sync + 'static {
    /// Short element kind name used in diagnostics.
    const KIND: &'static str;
}

impl Attribute for i32 {
    const KIND: &'static str = "int";
}

impl Attribute for i64 {
    const KIND: &'static str = "bigint";
}

impl Attribute for f64 {
    const KIND: &'static str = "double";
}

impl Attribute for Vec3 {
    const KIND: &'static str = "double[3]";
}

impl Attribute for Vec4 {
    const KIND: &'static str = "double[4]";
}

impl Attribute for ParticleId {
    const KIND: &'static str = "id";
}

impl Attribute for ImageFlags {
    const KIND: &'static str = "image";
}

/// Type-erased view of a per-particle array.
///
/// This is what the array registry drives when it grows, relocates or packs
/// every array without knowing element types.
pub trait PerParticle {
    /// Number of slots currently allocated.
    fn capacity(&self) -> usize;

    /// Extends the array to at least `capacity` slots.
    fn grow_to(&mut self, capacity: usize);

    /// Copies the element at `from` over the element at `to`.
    fn relocate(&mut self, from: usize, to: usize);

    /// Resets a slot to the default element.
    fn reset(&mut self, slot: usize);

    /// Appends the bytes of the element at `slot`.
    fn pack(&self, slot: usize, out: &mut Vec<u8>);

    /// Reads one element from the front of `bytes` into `slot`.
    ///
    /// Returns the number of bytes consumed, or `None` when `bytes` is too
    /// short to hold an element.
    fn unpack(&mut self, slot: usize, bytes: &[u8]) -> Option<usize>;

    /// Packed size of one element.
    fn bytes_per_particle(&self) -> usize;

    /// Bytes held by this array.
    fn memory_usage(&self) -> usize {
        self.capacity() * self.bytes_per_particle()
    }
}

/// Storage for a single per-particle attribute.
///
/// # Example
///
/// ```rust,ignore
/// let mut charges: AttributeArray<f64> = AttributeArray::new(1000);
/// charges.set(50, -1.0);
/// charges.grow_to(4000); // slot 50 still holds -1.0
/// ```
#[derive(Clone, Debug, Default)]
pub struct AttributeArray<T: Attribute> {
    data: Vec<T>,
}

impl<T: Attribute> AttributeArray<T> {
    /// Creates an array with `capacity` default-initialized slots.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![T::default(); capacity],
        }
    }

    /// Gets the element at `slot`.
    #[inline]
    #[must_use]
    pub fn get(&self, slot: usize) -> Option<&T> {
        self.data.get(slot)
    }

    /// Gets the element at `slot` mutably.
    #[inline]
    pub fn get_mut(&mut self, slot: usize) -> Option<&mut T> {
        self.data.get_mut(slot)
    }

    /// Sets the element at `slot`.
    ///
    /// Returns `false` if `slot` is beyond the capacity.
    #[inline]
    pub fn set(&mut self, slot: usize, value: T) -> bool {
        if let Some(element) = self.data.get_mut(slot) {
            *element = value;
            true
        } else {
            false
        }
    }

    /// Returns every allocated slot.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Returns every allocated slot mutably.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }
}

impl<T: Attribute> PerParticle for AttributeArray<T> {
    #[inline]
    fn capacity(&self) -> usize {
        self.data.len()
    }

    fn grow_to(&mut self, capacity: usize) {
        if capacity > self.data.len() {
            self.data.resize(capacity, T::default());
        }
    }

    #[inline]
    fn relocate(&mut self, from: usize, to: usize) {
        self.data[to] = self.data[from];
    }

    #[inline]
    fn reset(&mut self, slot: usize) {
        self.data[slot] = T::default();
    }

    fn pack(&self, slot: usize, out: &mut Vec<u8>) {
        out.extend_from_slice(bytemuck::bytes_of(&self.data[slot]));
    }

    fn unpack(&mut self, slot: usize, bytes: &[u8]) -> Option<usize> {
        let size = std::mem::size_of::<T>();
        let head = bytes.get(..size)?;
        self.data[slot] = bytemuck::pod_read_unaligned(head);
        Some(size)
    }

    #[inline]
    fn bytes_per_particle(&self) -> usize {
        std::mem::size_of::<T>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_creation() {
        let array: AttributeArray<Vec3> = AttributeArray::new(100);
        assert_eq!(array.capacity(), 100);
        assert_eq!(array.get(99), Some(&[0.0; 3]));
        assert!(array.get(100).is_none());
    }

    #[test]
    fn test_grow_keeps_values() {
        let mut array: AttributeArray<f64> = AttributeArray::new(4);
        assert!(array.set(3, 2.5));
        array.grow_to(16);
        assert_eq!(array.capacity(), 16);
        assert_eq!(array.get(3), Some(&2.5));
        assert_eq!(array.get(15), Some(&0.0));

        // Never shrinks.
        array.grow_to(2);
        assert_eq!(array.capacity(), 16);
    }

    #[test]
    fn test_pack_unpack_slot() {
        let mut source: AttributeArray<Vec3> = AttributeArray::new(2);
        source.set(1, [1.0, -2.0, 3.5]);

        let mut bytes = Vec::new();
        source.pack(1, &mut bytes);
        assert_eq!(bytes.len(), 24);

        let mut target: AttributeArray<Vec3> = AttributeArray::new(8);
        assert_eq!(target.unpack(6, &bytes), Some(24));
        assert_eq!(target.get(6), Some(&[1.0, -2.0, 3.5]));

        assert_eq!(target.unpack(0, &bytes[..10]), None);
    }

    #[test]
    fn test_relocate_and_reset() {
        let mut array: AttributeArray<i32> = AttributeArray::new(4);
        array.set(0, 7);
        array.relocate(0, 3);
        assert_eq!(array.as_slice(), &[7, 0, 0, 7]);
        array.reset(0);
        assert_eq!(array.as_slice(), &[0, 0, 0, 7]);
    }
}
