//! # Storage Error Types
//!
//! All errors that can occur in the particle storage directory.
//!
//! Errors fall into four classes. Corruption and resource exhaustion are
//! fatal: the run must stop on every rank, so they are raised on the
//! [`CollectiveFault`](crate::fault::CollectiveFault) before being returned.
//! Usage errors are rejected requests that leave the directory untouched.
//! A missing identifier is not an error at all: lookups return `None`.

use thiserror::Error;

/// Severity class of a [`StorageError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Internal invariants are broken (duplicate owned identifier, short array,
    /// broken same-identifier chain, failed permutation).
    Corruption,
    /// A computed size exceeds its configured sane bound.
    ResourceExhaustion,
    /// The request was invalid; nothing was modified.
    Usage,
    /// Another rank faulted; this rank must stop too.
    PeerFault,
}

/// Errors that can occur in the particle storage directory.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    /// Two distinct owned slots claim the same identifier.
    #[error("duplicate owned identifier {id} at slots {first} and {second}")]
    DuplicateIdentifier {
        /// The duplicated identifier.
        id: u64,
        /// The lower of the two slots.
        first: usize,
        /// The higher of the two slots.
        second: usize,
    },

    /// A per-particle array is shorter than the directory capacity after growth.
    #[error("array `{array}` has length {len}, below capacity {capacity}")]
    LengthMismatch {
        /// Name of the short array (built-in column or dependent).
        array: String,
        /// Its length after growth.
        len: usize,
        /// The capacity it was asked to reach.
        capacity: usize,
    },

    /// A same-identifier chain does not terminate, links a foreign identifier,
    /// or misses one of the identifier's slots.
    #[error("same-identifier chain for identifier {id} is corrupted at slot {slot}")]
    ChainCorrupted {
        /// Identifier whose chain is broken.
        id: u64,
        /// Slot where the walk went wrong.
        slot: usize,
    },

    /// Applying a spatial permutation left the arrays in a different order
    /// than the one computed.
    #[error("spatial reorder did not operate correctly at slot {slot}")]
    ReorderMismatch {
        /// First slot whose content disagrees with the permutation.
        slot: usize,
    },

    /// The reorder bin grid is too large, usually a blown-up sub-domain.
    #[error("too many reorder bins: {requested} exceeds limit {limit}")]
    TooManyBins {
        /// Computed bin count (saturated).
        requested: u64,
        /// Configured ceiling.
        limit: u64,
    },

    /// The sparse identifier index needs more buckets than allowed.
    #[error("too many hash buckets: {requested} exceeds limit {limit}")]
    TooManyBuckets {
        /// Computed bucket count.
        requested: usize,
        /// Configured ceiling.
        limit: usize,
    },

    /// Capacity growth overflowed the address space.
    #[error("capacity overflow while growing to hold {requested} particles")]
    CapacityOverflow {
        /// The capacity that was requested.
        requested: usize,
    },

    /// Identifier 0 was used where a tracked identifier is required.
    #[error("identifier 0 is reserved for untracked particles")]
    ReservedIdentifier,

    /// An identifier lies outside the range the index can address.
    #[error("identifier {id} exceeds the addressable limit {limit}")]
    IdentifierRange {
        /// Offending identifier.
        id: u64,
        /// Largest identifier accepted.
        limit: u64,
    },

    /// Some owned particles carry identifier 0 while others do not.
    #[error("{zeros} of {count} owned particles have identifier 0; either all or none may")]
    MixedIdentifiers {
        /// Number of owned particles with identifier 0.
        zeros: usize,
        /// Number of owned particles.
        count: usize,
    },

    /// A slot outside the valid range was addressed.
    #[error("slot {slot} is out of range (limit {limit})")]
    InvalidSlot {
        /// Offending slot.
        slot: usize,
        /// Exclusive upper bound for this operation.
        limit: usize,
    },

    /// Invalid configuration value or file.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A packed particle record is truncated or has trailing bytes.
    #[error("malformed particle record: {0}")]
    MalformedRecord(String),

    /// No custom array with this name or index.
    #[error("unknown custom array `{0}`")]
    UnknownCustom(String),

    /// A custom array with this name already exists.
    #[error("custom array `{0}` already exists")]
    DuplicateCustom(String),

    /// Another rank raised a fatal fault.
    #[error("rank {rank} raised a fatal fault: {reason}")]
    PeerFault {
        /// Rank that raised the fault first.
        rank: usize,
        /// Display text of the original error.
        reason: String,
    },
}

impl StorageError {
    /// Returns the severity class of this error.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::DuplicateIdentifier { .. }
            | Self::LengthMismatch { .. }
            | Self::ChainCorrupted { .. }
            | Self::ReorderMismatch { .. } => ErrorClass::Corruption,
            Self::TooManyBins { .. }
            | Self::TooManyBuckets { .. }
            | Self::CapacityOverflow { .. } => ErrorClass::ResourceExhaustion,
            Self::PeerFault { .. } => ErrorClass::PeerFault,
            Self::ReservedIdentifier
            | Self::IdentifierRange { .. }
            | Self::MixedIdentifiers { .. }
            | Self::InvalidSlot { .. }
            | Self::InvalidConfig(_)
            | Self::MalformedRecord(_)
            | Self::UnknownCustom(_)
            | Self::DuplicateCustom(_) => ErrorClass::Usage,
        }
    }

    /// Whether the run must terminate on every rank.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self.class(), ErrorClass::Usage)
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
