//! Drop counters.
//!
//! Rejected frames never reach application code; they are counted here so
//! the owner can still see them.

use std::sync::atomic::{AtomicU64, Ordering};

use super::validator::Rejection;

/// Live counters shared between the channel task and its handles.
#[derive(Debug, Default)]
pub struct Diagnostics {
    origin_rejected: AtomicU64,
    malformed: AtomicU64,
    replayed: AtomicU64,
    unmatched_responses: AtomicU64,
    handshakes_refused: AtomicU64,
    handler_failures: AtomicU64,
}

/// Point-in-time copy of [`Diagnostics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    /// Frames from an unexpected origin.
    pub origin_rejected: u64,
    /// Frames failing envelope, payload or signature checks.
    pub malformed: u64,
    /// Frames with a non-increasing sequence.
    pub replayed: u64,
    /// Responses with no pending request (unknown or duplicate).
    pub unmatched_responses: u64,
    /// Handshakes this side refused.
    pub handshakes_refused: u64,
    /// Handlers that returned an error or panicked.
    pub handler_failures: u64,
}

impl Diagnostics {
    /// Counts a rejected frame.
    pub fn record(&self, rejection: &Rejection) {
        let counter = match rejection {
            Rejection::OriginRejected { .. } => &self.origin_rejected,
            Rejection::Malformed(_) => &self.malformed,
            Rejection::Replayed { .. } => &self.replayed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn unmatched_response(&self) {
        self.unmatched_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn handshake_refused(&self) {
        self.handshakes_refused.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn handler_failed(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the current counts.
    #[must_use]
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            origin_rejected: self.origin_rejected.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            replayed: self.replayed.load(Ordering::Relaxed),
            unmatched_responses: self.unmatched_responses.load(Ordering::Relaxed),
            handshakes_refused: self.handshakes_refused.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
        }
    }
}
