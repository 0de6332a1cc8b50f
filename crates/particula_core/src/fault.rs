//! # Collective Fault Flag
//!
//! Every rank runs the same control flow in lockstep. If one rank hits a
//! fatal condition and stops alone, its peers block forever in the next
//! exchange. The fault flag closes that gap:
//!
//! ```text
//!   rank 0 ──raise(DuplicateIdentifier)──► [ CollectiveFault ] ◄── check ── rank 1
//!                                                 │                          │
//!                                                 └──── PeerFault ──────────►┘
//! ```
//!
//! The communication layer shares one flag among all ranks (or mirrors it
//! across processes). Stores raise fatal errors on it and check it before
//! every collective operation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::error::StorageError;

/// First fatal fault raised by any rank.
#[derive(Clone, Debug, PartialEq)]
pub struct FaultReport {
    /// Rank that raised the fault.
    pub rank: usize,
    /// The fatal error.
    pub error: StorageError,
}

#[derive(Debug, Default)]
struct Shared {
    raised: AtomicBool,
    report: Mutex<Option<FaultReport>>,
}

/// Cloneable handle to a fault flag shared by all ranks of a job.
#[derive(Clone, Debug, Default)]
pub struct CollectiveFault {
    shared: Arc<Shared>,
}

impl CollectiveFault {
    /// Creates a clear flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a fatal fault from `rank`.
    ///
    /// Only the first fault is kept. Returns whether this call recorded it.
    pub fn raise(&self, rank: usize, error: &StorageError) -> bool {
        let mut report = self.shared.report.lock();
        if let Some(first) = report.as_ref() {
            debug!(rank, first_rank = first.rank, %error, "fault already raised, ignoring");
            return false;
        }
        error!(rank, %error, "fatal storage fault raised");
        *report = Some(FaultReport {
            rank,
            error: error.clone(),
        });
        self.shared.raised.store(true, Ordering::Release);
        true
    }

    /// Checks if any rank raised a fault.
    #[inline]
    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.shared.raised.load(Ordering::Acquire)
    }

    /// First fault raised, if any.
    #[must_use]
    pub fn report(&self) -> Option<FaultReport> {
        if !self.is_raised() {
            return None;
        }
        self.shared.report.lock().clone()
    }

    /// Returns the peer fault every rank must stop on, if any.
    #[must_use]
    pub fn check(&self) -> Option<StorageError> {
        self.report().map(|report| StorageError::PeerFault {
            rank: report.rank,
            reason: report.error.to_string(),
        })
    }
}
