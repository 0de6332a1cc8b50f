//! # Optional Fields and Columns
//!
//! Particle styles declare which optional per-particle arrays they need as a
//! [`FieldSet`] bitmask. Each declared field is materialized as a [`Column`],
//! whose element shape is fixed by the field.

use super::attribute::{Attribute, AttributeArray, PerParticle, Vec3, Vec4};

/// Element shape of a per-particle array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldShape {
    /// One 64-bit integer.
    Int,
    /// One double.
    Scalar,
    /// Three doubles.
    Vector3,
    /// Four doubles.
    Tuple4,
}

/// Optional built-in per-particle arrays a particle style may request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Field {
    /// Per-particle charge `q`.
    Charge = 0,
    /// Finite-size radius.
    Radius = 1,
    /// Per-particle mass.
    Mass = 2,
    /// Angular velocity.
    Omega = 3,
    /// Angular momentum.
    AngularMomentum = 4,
    /// Torque.
    Torque = 5,
    /// Point dipole `(x, y, z, |mu|)`.
    Dipole = 6,
    /// Molecule identifier.
    Molecule = 7,
    /// Orientation quaternion.
    Quaternion = 8,
    /// Smoothed-particle density.
    Density = 9,
    /// Smoothed-particle internal energy.
    Energy = 10,
}

impl Field {
    /// Every optional field in declaration order.
    pub const ALL: [Self; 11] = [
        Self::Charge,
        Self::Radius,
        Self::Mass,
        Self::Omega,
        Self::AngularMomentum,
        Self::Torque,
        Self::Dipole,
        Self::Molecule,
        Self::Quaternion,
        Self::Density,
        Self::Energy,
    ];

    /// Element shape of this field.
    #[must_use]
    pub const fn shape(self) -> FieldShape {
        match self {
            Self::Molecule => FieldShape::Int,
            Self::Charge | Self::Radius | Self::Mass | Self::Density | Self::Energy => {
                FieldShape::Scalar
            }
            Self::Omega | Self::AngularMomentum | Self::Torque => FieldShape::Vector3,
            Self::Dipole | Self::Quaternion => FieldShape::Tuple4,
        }
    }

    /// Name used in diagnostics and memory reports.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Charge => "q",
            Self::Radius => "radius",
            Self::Mass => "rmass",
            Self::Omega => "omega",
            Self::AngularMomentum => "angmom",
            Self::Torque => "torque",
            Self::Dipole => "mu",
            Self::Molecule => "molecule",
            Self::Quaternion => "quat",
            Self::Density => "rho",
            Self::Energy => "e",
        }
    }

    /// Whether ghost copies need this field.
    ///
    /// Torque and angular momentum are accumulated or integrated on the owner
    /// only, so they stay out of border records.
    #[must_use]
    pub const fn in_border(self) -> bool {
        !matches!(self, Self::Torque | Self::AngularMomentum)
    }

    const fn bit(self) -> u32 {
        1 << (self as u8)
    }
}

/// Bitmask of optional fields.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct FieldSet(u32);

impl FieldSet {
    /// No optional fields.
    pub const EMPTY: Self = Self(0);

    /// Returns this set with `field` added.
    #[inline]
    #[must_use]
    pub const fn with(self, field: Field) -> Self {
        Self(self.0 | field.bit())
    }

    /// Checks if `field` is in the set.
    #[inline]
    #[must_use]
    pub const fn contains(self, field: Field) -> bool {
        self.0 & field.bit() != 0
    }

    /// Number of fields in the set.
    #[inline]
    #[must_use]
    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Checks if the set is empty.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterates the fields in declaration order.
    pub fn iter(self) -> impl Iterator<Item = Field> {
        Field::ALL.into_iter().filter(move |field| self.contains(*field))
    }
}

impl FromIterator<Field> for FieldSet {
    fn from_iter<I: IntoIterator<Item = Field>>(iter: I) -> Self {
        iter.into_iter().fold(Self::EMPTY, Self::with)
    }
}

/// A per-particle array of one of the supported element shapes.
#[derive(Clone, Debug)]
pub enum Column {
    /// 32-bit integers (custom integer arrays).
    Int(AttributeArray<i32>),
    /// 64-bit integers.
    BigInt(AttributeArray<i64>),
    /// Doubles.
    Scalar(AttributeArray<f64>),
    /// Three-vectors.
    Vector(AttributeArray<Vec3>),
    /// Four-tuples.
    Tuple(AttributeArray<Vec4>),
}

impl Column {
    /// Creates a column for a field shape.
    #[must_use]
    pub fn for_shape(shape: FieldShape, capacity: usize) -> Self {
        match shape {
            FieldShape::Int => Self::BigInt(AttributeArray::new(capacity)),
            FieldShape::Scalar => Self::Scalar(AttributeArray::new(capacity)),
            FieldShape::Vector3 => Self::Vector(AttributeArray::new(capacity)),
            FieldShape::Tuple4 => Self::Tuple(AttributeArray::new(capacity)),
        }
    }

    /// Element kind name.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Int(_) => <i32 as Attribute>::KIND,
            Self::BigInt(_) => <i64 as Attribute>::KIND,
            Self::Scalar(_) => <f64 as Attribute>::KIND,
            Self::Vector(_) => <Vec3 as Attribute>::KIND,
            Self::Tuple(_) => <Vec4 as Attribute>::KIND,
        }
    }

    /// Type-erased view.
    #[must_use]
    pub fn as_dyn(&self) -> &dyn PerParticle {
        match self {
            Self::Int(array) => array,
            Self::BigInt(array) => array,
            Self::Scalar(array) => array,
            Self::Vector(array) => array,
            Self::Tuple(array) => array,
        }
    }

    /// Mutable type-erased view.
    pub fn as_dyn_mut(&mut self) -> &mut dyn PerParticle {
        match self {
            Self::Int(array) => array,
            Self::BigInt(array) => array,
            Self::Scalar(array) => array,
            Self::Vector(array) => array,
            Self::Tuple(array) => array,
        }
    }
}
