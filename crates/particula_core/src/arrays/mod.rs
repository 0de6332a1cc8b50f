//! # Per-Particle Arrays
//!
//! Structure-of-arrays storage for every particle attribute on a rank:
//!
//! - Built-in arrays every style carries (identifier, type, group mask,
//!   image flags, position, velocity, force)
//! - Optional arrays requested by the particle style ([`Field`])
//! - Named custom arrays added at run time
//!
//! All arrays are indexed by slot and grown in lockstep.

pub mod attribute;
pub mod column;

pub use attribute::{Attribute, AttributeArray, PerParticle, Vec3, Vec4};
pub use column::{Column, Field, FieldSet, FieldShape};

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};
use crate::id::{ImageFlags, ParticleId};

/// Element kind of a custom array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CustomKind {
    /// One `i32` per particle.
    Int,
    /// One `f64` per particle.
    Double,
}

impl CustomKind {
    fn column(self, capacity: usize) -> Column {
        match self {
            Self::Int => Column::Int(AttributeArray::new(capacity)),
            Self::Double => Column::Scalar(AttributeArray::new(capacity)),
        }
    }
}

/// A named array added at run time.
#[derive(Clone, Debug)]
struct CustomArray {
    name: String,
    kind: CustomKind,
    column: Column,
}

/// Which arrays a pass touches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    /// Every array, force included. Used for growth and relocation.
    All,
    /// Everything a migrating or checkpointed particle carries: all arrays
    /// except force.
    Exchange,
    /// What a ghost copy needs: identifier, type, mask, position and the
    /// border-enabled optional fields.
    Border,
}

/// All per-particle arrays of one rank.
#[derive(Clone, Debug)]
pub struct ParticleArrays {
    tag: AttributeArray<ParticleId>,
    kind: AttributeArray<i32>,
    mask: AttributeArray<i32>,
    image: AttributeArray<ImageFlags>,
    x: AttributeArray<Vec3>,
    v: AttributeArray<Vec3>,
    f: AttributeArray<Vec3>,
    fields: FieldSet,
    optional: Vec<(Field, Column)>,
    custom: Vec<Option<CustomArray>>,
    capacity: usize,
}

impl ParticleArrays {
    /// Creates empty arrays carrying the given optional fields.
    #[must_use]
    pub fn new(fields: FieldSet) -> Self {
        Self {
            tag: AttributeArray::new(0),
            kind: AttributeArray::new(0),
            mask: AttributeArray::new(0),
            image: AttributeArray::new(0),
            x: AttributeArray::new(0),
            v: AttributeArray::new(0),
            f: AttributeArray::new(0),
            fields,
            optional: fields
                .iter()
                .map(|field| (field, Column::for_shape(field.shape(), 0)))
                .collect(),
            custom: Vec::new(),
            capacity: 0,
        }
    }

    /// Number of slots every array holds.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Optional fields carried by these arrays.
    #[inline]
    #[must_use]
    pub const fn fields(&self) -> FieldSet {
        self.fields
    }

    /// Grows every array to at least `capacity` slots.
    ///
    /// Existing values are untouched and new slots hold defaults.
    pub fn grow_to(&mut self, capacity: usize) {
        if capacity <= self.capacity {
            return;
        }
        self.for_each_mut(Scope::All, |_, array| array.grow_to(capacity));
        self.capacity = capacity;
    }

    /// Checks that every array holds at least `capacity` slots.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::LengthMismatch`] naming the first short array.
    pub fn verify_capacity(&self, capacity: usize) -> StorageResult<()> {
        let mut short = None;
        self.for_each(Scope::All, |name, array| {
            if short.is_none() && array.capacity() < capacity {
                short = Some(StorageError::LengthMismatch {
                    array: name.to_string(),
                    len: array.capacity(),
                    capacity,
                });
            }
        });
        short.map_or(Ok(()), Err)
    }

    /// Copies every array element at `from` over `to`.
    pub fn relocate(&mut self, from: usize, to: usize) {
        self.for_each_mut(Scope::All, |_, array| array.relocate(from, to));
    }

    /// Resets every array element at `slot` to its default.
    pub fn reset_slot(&mut self, slot: usize) {
        self.for_each_mut(Scope::All, |_, array| array.reset(slot));
    }

    /// Appends the elements at `slot` of every array in `scope`.
    pub fn pack(&self, slot: usize, scope: Scope, out: &mut Vec<u8>) {
        self.for_each(scope, |_, array| array.pack(slot, out));
    }

    /// Reads the elements of every array in `scope` from `bytes` into `slot`.
    ///
    /// Returns the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::MalformedRecord`] when `bytes` ends early.
    pub fn unpack(&mut self, slot: usize, scope: Scope, bytes: &[u8]) -> StorageResult<usize> {
        let mut offset = 0;
        let mut truncated = None;
        self.for_each_mut(scope, |name, array| {
            if truncated.is_some() {
                return;
            }
            match bytes.get(offset..).and_then(|rest| array.unpack(slot, rest)) {
                Some(used) => offset += used,
                None => truncated = Some(name.to_string()),
            }
        });
        match truncated {
            Some(name) => Err(StorageError::MalformedRecord(format!(
                "record ends before array `{name}`"
            ))),
            None => Ok(offset),
        }
    }

    /// Bytes one particle occupies in a record of `scope`.
    #[must_use]
    pub fn record_size(&self, scope: Scope) -> usize {
        let mut size = 0;
        self.for_each(scope, |_, array| size += array.bytes_per_particle());
        size
    }

    /// Bytes held by every array.
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        let mut bytes = 0;
        self.for_each(Scope::All, |_, array| bytes += array.memory_usage());
        bytes
    }

    fn for_each(&self, scope: Scope, mut visit: impl FnMut(&str, &dyn PerParticle)) {
        visit("tag", &self.tag);
        visit("type", &self.kind);
        visit("mask", &self.mask);
        if scope != Scope::Border {
            visit("image", &self.image);
        }
        visit("x", &self.x);
        if scope != Scope::Border {
            visit("v", &self.v);
        }
        if scope == Scope::All {
            visit("f", &self.f);
        }
        for (field, column) in &self.optional {
            if scope != Scope::Border || field.in_border() {
                visit(field.name(), column.as_dyn());
            }
        }
        if scope != Scope::Border {
            for custom in self.custom.iter().flatten() {
                visit(&custom.name, custom.column.as_dyn());
            }
        }
    }

    fn for_each_mut(&mut self, scope: Scope, mut visit: impl FnMut(&str, &mut dyn PerParticle)) {
        visit("tag", &mut self.tag);
        visit("type", &mut self.kind);
        visit("mask", &mut self.mask);
        if scope != Scope::Border {
            visit("image", &mut self.image);
        }
        visit("x", &mut self.x);
        if scope != Scope::Border {
            visit("v", &mut self.v);
        }
        if scope == Scope::All {
            visit("f", &mut self.f);
        }
        for (field, column) in &mut self.optional {
            if scope != Scope::Border || field.in_border() {
                visit(field.name(), column.as_dyn_mut());
            }
        }
        if scope != Scope::Border {
            for custom in self.custom.iter_mut().flatten() {
                visit(&custom.name, custom.column.as_dyn_mut());
            }
        }
    }

    // ------------------------------------------------------------------
    // Built-in arrays
    // ------------------------------------------------------------------

    /// Identifiers of every allocated slot.
    #[inline]
    #[must_use]
    pub fn tags(&self) -> &[ParticleId] {
        self.tag.as_slice()
    }

    /// Identifier at `slot`, `None` beyond capacity.
    #[inline]
    #[must_use]
    pub fn tag(&self, slot: usize) -> Option<ParticleId> {
        self.tag.get(slot).copied()
    }

    /// Identifiers are only written by the store, which keeps the index in sync.
    #[inline]
    pub(crate) fn set_tag(&mut self, slot: usize, id: ParticleId) {
        self.tag.set(slot, id);
    }

    /// Particle types.
    #[inline]
    #[must_use]
    pub fn types(&self) -> &[i32] {
        self.kind.as_slice()
    }

    /// Particle types, mutable.
    #[inline]
    pub fn types_mut(&mut self) -> &mut [i32] {
        self.kind.as_mut_slice()
    }

    /// Group membership bitmasks.
    #[inline]
    #[must_use]
    pub fn masks(&self) -> &[i32] {
        self.mask.as_slice()
    }

    /// Group membership bitmasks, mutable.
    #[inline]
    pub fn masks_mut(&mut self) -> &mut [i32] {
        self.mask.as_mut_slice()
    }

    /// Periodic image flags.
    #[inline]
    #[must_use]
    pub fn images(&self) -> &[ImageFlags] {
        self.image.as_slice()
    }

    /// Periodic image flags, mutable.
    #[inline]
    pub fn images_mut(&mut self) -> &mut [ImageFlags] {
        self.image.as_mut_slice()
    }

    /// Positions.
    #[inline]
    #[must_use]
    pub fn positions(&self) -> &[Vec3] {
        self.x.as_slice()
    }

    /// Positions, mutable.
    #[inline]
    pub fn positions_mut(&mut self) -> &mut [Vec3] {
        self.x.as_mut_slice()
    }

    /// Velocities.
    #[inline]
    #[must_use]
    pub fn velocities(&self) -> &[Vec3] {
        self.v.as_slice()
    }

    /// Velocities, mutable.
    #[inline]
    pub fn velocities_mut(&mut self) -> &mut [Vec3] {
        self.v.as_mut_slice()
    }

    /// Forces.
    #[inline]
    #[must_use]
    pub fn forces(&self) -> &[Vec3] {
        self.f.as_slice()
    }

    /// Forces, mutable.
    #[inline]
    pub fn forces_mut(&mut self) -> &mut [Vec3] {
        self.f.as_mut_slice()
    }

    // ------------------------------------------------------------------
    // Optional fields
    // ------------------------------------------------------------------

    /// Column of an optional field, `None` if the style does not carry it.
    #[must_use]
    pub fn field(&self, field: Field) -> Option<&Column> {
        self.optional
            .iter()
            .find(|(candidate, _)| *candidate == field)
            .map(|(_, column)| column)
    }

    /// Mutable column of an optional field.
    pub fn field_mut(&mut self, field: Field) -> Option<&mut Column> {
        self.optional
            .iter_mut()
            .find(|(candidate, _)| *candidate == field)
            .map(|(_, column)| column)
    }

    /// Scalar values of an optional field such as [`Field::Charge`].
    #[must_use]
    pub fn scalar(&self, field: Field) -> Option<&[f64]> {
        match self.field(field)? {
            Column::Scalar(array) => Some(array.as_slice()),
            _ => None,
        }
    }

    /// Mutable scalar values of an optional field.
    pub fn scalar_mut(&mut self, field: Field) -> Option<&mut [f64]> {
        match self.field_mut(field)? {
            Column::Scalar(array) => Some(array.as_mut_slice()),
            _ => None,
        }
    }

    /// Vector values of an optional field such as [`Field::Omega`].
    #[must_use]
    pub fn vector(&self, field: Field) -> Option<&[Vec3]> {
        match self.field(field)? {
            Column::Vector(array) => Some(array.as_slice()),
            _ => None,
        }
    }

    /// Mutable vector values of an optional field.
    pub fn vector_mut(&mut self, field: Field) -> Option<&mut [Vec3]> {
        match self.field_mut(field)? {
            Column::Vector(array) => Some(array.as_mut_slice()),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Custom arrays
    // ------------------------------------------------------------------

    /// Adds a named custom array sized to the current capacity.
    ///
    /// Returns its index. Indices of removed arrays are reused.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::DuplicateCustom`] if the name is taken.
    pub fn add_custom(&mut self, name: &str, kind: CustomKind) -> StorageResult<usize> {
        if self.find_custom(name).is_some() {
            return Err(StorageError::DuplicateCustom(name.to_string()));
        }
        let array = CustomArray {
            name: name.to_string(),
            kind,
            column: kind.column(self.capacity),
        };
        if let Some(index) = self.custom.iter().position(Option::is_none) {
            self.custom[index] = Some(array);
            Ok(index)
        } else {
            self.custom.push(Some(array));
            Ok(self.custom.len() - 1)
        }
    }

    /// Finds a custom array by name.
    #[must_use]
    pub fn find_custom(&self, name: &str) -> Option<(usize, CustomKind)> {
        self.custom.iter().enumerate().find_map(|(index, custom)| {
            custom
                .as_ref()
                .filter(|custom| custom.name == name)
                .map(|custom| (index, custom.kind))
        })
    }

    /// Removes the custom array at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UnknownCustom`] if no array lives there.
    pub fn remove_custom(&mut self, index: usize) -> StorageResult<()> {
        match self.custom.get_mut(index).and_then(Option::take) {
            Some(_) => Ok(()),
            None => Err(StorageError::UnknownCustom(format!("#{index}"))),
        }
    }

    /// Column of the custom array at `index`.
    #[must_use]
    pub fn custom(&self, index: usize) -> Option<&Column> {
        self.custom
            .get(index)
            .and_then(Option::as_ref)
            .map(|custom| &custom.column)
    }

    /// Mutable column of the custom array at `index`.
    pub fn custom_mut(&mut self, index: usize) -> Option<&mut Column> {
        self.custom
            .get_mut(index)
            .and_then(Option::as_mut)
            .map(|custom| &mut custom.column)
    }
}
