//! # PARTICULA Core
//!
//! Per-rank particle storage directory for distributed particle simulations:
//! - Global identifier to local slot lookup in O(1)
//! - Structure-of-arrays per-particle storage, grown in lockstep with every
//!   registered dependent
//! - Periodic spatial reordering of owned slots for cache locality
//!
//! ## Architecture Rules
//!
//! 1. **Identifiers are stable, slots are not** - every slot-changing event
//!    keeps the index and every array consistent before returning
//! 2. **Ghosts are disposable** - replaced wholesale each exchange, never patched
//! 3. **Fatal means collective** - corruption is raised on the shared fault
//!    flag so no rank runs on alone
//!
//! ## Example
//!
//! ```rust,ignore
//! use particula_core::{ParticleId, ParticleStore, StorageConfig, style::Atomic};
//!
//! let mut store = ParticleStore::new(StorageConfig::default(), &Atomic)?;
//! let slot = store.insert_owned(ParticleId::new(42))?;
//! assert_eq!(store.lookup(ParticleId::new(42)), Some(slot));
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod arrays;
pub mod config;
pub mod error;
pub mod exchange;
pub mod fault;
pub mod id;
pub mod map;
pub mod registry;
pub mod sort;
pub mod store;
pub mod style;

pub use arrays::{Column, CustomKind, Field, FieldSet, FieldShape, ParticleArrays, Vec3, Vec4};
pub use config::{MapConfig, MapStrategy, SortConfig, StorageConfig};
pub use error::{ErrorClass, StorageError, StorageResult};
pub use exchange::ExchangeBuffer;
pub use fault::{CollectiveFault, FaultReport};
pub use id::{ImageFlags, ParticleId, IDENTIFIER_MAX};
pub use map::IdentifierIndex;
pub use registry::{ArrayRegistry, CallbackKind, Dependent, DependentHandle, DependentId, Payload};
pub use sort::{BinGrid, Reordering, SpatialSorter};
pub use store::{IdentifierStats, ParticleStore, SameIdentifier};
pub use style::{style_from_name, ParticleStyle};
