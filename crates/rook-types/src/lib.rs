//! # rook-types: Core types for RookDB
//!
//! This crate contains shared types used across the RookDB storage stack:
//! - Write recency stamps ([`WriteStamp`])
//! - Secondary-index identifiers ([`SindexId`])
//! - Cooperative cancellation ([`Interruptor`])

use std::fmt::{self, Debug, Display};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Write Stamps
// ============================================================================

/// Replication recency stamp attached to every leaf entry.
///
/// Stamps order writes for backfill purposes: a replica that has seen
/// everything up to stamp `s` asks for changes newer than `s`. Stamps are
/// assigned by the layer above this crate; within one tree they must be
/// non-decreasing across writes to the same key.
///
/// Secondary-index entries are written at [`WriteStamp::DISTANT_PAST`] since
/// they are derived state and never backfilled directly.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct WriteStamp(u64);

impl WriteStamp {
    /// The stamp used for derived writes (secondary-index entries).
    pub const DISTANT_PAST: WriteStamp = WriteStamp(0);

    pub fn new(stamp: u64) -> Self {
        Self(stamp)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for WriteStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for WriteStamp {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<WriteStamp> for u64 {
    fn from(stamp: WriteStamp) -> Self {
        stamp.0
    }
}

// ============================================================================
// Secondary Index IDs
// ============================================================================

/// Unique identifier for a secondary index.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SindexId(Uuid);

impl SindexId {
    /// Creates a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Returns the identifier as raw bytes, usable as a catalogue key.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Display for SindexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Cancellation
// ============================================================================

/// Error returned when an operation observes a triggered [`Interruptor`].
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("operation interrupted")]
pub struct Interrupted;

/// Shared cancellation signal for long-running traversals.
///
/// Backfill and secondary-index post-construction check the signal at every
/// chunk boundary and unwind cleanly with [`Interrupted`] once it fires.
/// Point operations are short enough to run to completion and do not take
/// one.
///
/// Cloning yields a handle to the same signal.
#[derive(Debug, Clone, Default)]
pub struct Interruptor {
    triggered: Arc<AtomicBool>,
}

impl Interruptor {
    /// Creates a new, untriggered signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the signal. Idempotent.
    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::SeqCst);
    }

    /// Returns true once the signal has fired.
    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Returns `Err(Interrupted)` once the signal has fired.
    pub fn check(&self) -> Result<(), Interrupted> {
        if self.is_triggered() {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod types_tests {
    use super::*;

    #[test]
    fn write_stamp_ordering() {
        assert!(WriteStamp::DISTANT_PAST < WriteStamp::new(1));
        assert!(WriteStamp::new(5) < WriteStamp::new(6));
        assert_eq!(WriteStamp::new(7).as_u64(), 7);
    }

    #[test]
    fn sindex_ids_are_unique() {
        let a = SindexId::generate();
        let b = SindexId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn interruptor_fires_once_and_stays() {
        let signal = Interruptor::new();
        assert!(signal.check().is_ok());

        let handle = signal.clone();
        handle.trigger();

        assert!(signal.is_triggered());
        assert_eq!(signal.check(), Err(Interrupted));
        // Triggering again is a no-op.
        signal.trigger();
        assert!(signal.is_triggered());
    }
}
