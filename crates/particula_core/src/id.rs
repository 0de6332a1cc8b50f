//! # Particle Identifiers
//!
//! Particles are named by an application-assigned global identifier that
//! survives every slot-changing event. Slots are just the current position
//! in the parallel attribute arrays.

use std::fmt;

use bytemuck::{Pod, Zeroable};

/// Largest identifier the directory accepts.
///
/// Kept well below `u64::MAX` so `max_id + 1` and identifier extension
/// arithmetic can never overflow.
pub const IDENTIFIER_MAX: u64 = (1 << 62) - 1;

/// Global particle identifier.
///
/// Identifier 0 is reserved: it marks an untracked particle that is never
/// entered into the identifier index.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub struct ParticleId(u64);

impl ParticleId {
    /// The reserved "untracked" identifier.
    pub const UNTRACKED: Self = Self(0);

    /// Creates an identifier from its raw value.
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Checks if this is the reserved untracked identifier.
    #[inline]
    #[must_use]
    pub const fn is_untracked(self) -> bool {
        self.0 == 0
    }
}

impl From<u64> for ParticleId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ParticleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bits per axis in packed image flags.
const IMAGE_BITS: i32 = 10;
/// Mask for one axis.
const IMAGE_MASK: i32 = (1 << IMAGE_BITS) - 1;
/// Offset that makes negative image counts representable.
const IMAGE_OFFSET: i32 = 1 << (IMAGE_BITS - 1);

/// Periodic image counters of a particle, three axes packed in one `i32`.
///
/// Each axis stores `count + 512` in 10 bits, so counts in `[-512, 511]`
/// round-trip exactly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub struct ImageFlags(i32);

impl ImageFlags {
    /// Image flags for a particle inside the primary box.
    pub const ORIGIN: Self = Self::new(0, 0, 0);

    /// Packs three per-axis image counts.
    #[inline]
    #[must_use]
    pub const fn new(ix: i32, iy: i32, iz: i32) -> Self {
        Self(
            (((iz + IMAGE_OFFSET) & IMAGE_MASK) << (2 * IMAGE_BITS))
                | (((iy + IMAGE_OFFSET) & IMAGE_MASK) << IMAGE_BITS)
                | ((ix + IMAGE_OFFSET) & IMAGE_MASK),
        )
    }

    /// Unpacks the per-axis image counts.
    #[inline]
    #[must_use]
    pub const fn unpack(self) -> [i32; 3] {
        [
            (self.0 & IMAGE_MASK) - IMAGE_OFFSET,
            ((self.0 >> IMAGE_BITS) & IMAGE_MASK) - IMAGE_OFFSET,
            ((self.0 >> (2 * IMAGE_BITS)) & IMAGE_MASK) - IMAGE_OFFSET,
        ]
    }

    /// Returns the packed representation.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> i32 {
        self.0
    }
}

impl Default for ImageFlags {
    fn default() -> Self {
        Self::ORIGIN
    }
}
