//! Request/response correlation.
//!
//! The correlator maps request ids to the continuation waiting for the
//! answer. Each pending entry ends in exactly one of three ways:
//!
//! - a RESPONSE with the same id resolves it;
//! - its deadline passes and it is rejected with [`Error::RequestTimeout`];
//! - the channel closes and it is rejected with [`Error::ChannelClosed`].
//!
//! Entries are removed when they complete, so a duplicate RESPONSE finds
//! nothing and is ignored.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::MessageId;
use crate::protocol::ResponsePayload;

use super::monitor::deadline_after;

// ============================================================================
// Types
// ============================================================================

/// Continuation of a pending request.
pub(crate) type Reply = oneshot::Sender<Result<Value>>;

/// A single in-flight request.
#[derive(Debug)]
struct PendingRequest {
    reply: Reply,
    kind: String,
    deadline: Instant,
    timeout: Duration,
}

// ============================================================================
// Correlator
// ============================================================================

/// Owner of all pending requests of one channel.
#[derive(Debug)]
pub struct Correlator {
    pending: FxHashMap<MessageId, PendingRequest>,
    max_pending: usize,
}

impl Correlator {
    /// Creates an empty correlator accepting up to `max_pending` requests.
    #[must_use]
    pub fn new(max_pending: usize) -> Self {
        Self {
            pending: FxHashMap::default(),
            max_pending,
        }
    }

    /// Returns the number of pending requests.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns `true` if nothing is pending.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Records a pending request. On error the reply is handed back
    /// untouched.
    pub(crate) fn register(
        &mut self,
        id: MessageId,
        kind: impl Into<String>,
        timeout: Duration,
        reply: Reply,
    ) -> std::result::Result<(), (Reply, Error)> {
        if self.pending.len() >= self.max_pending {
            let err = Error::TooManyPendingRequests {
                pending: self.pending.len(),
                max: self.max_pending,
            };
            return Err((reply, err));
        }

        let entry = PendingRequest {
            reply,
            kind: kind.into(),
            deadline: deadline_after(Instant::now(), timeout),
            timeout,
        };
        trace!(request_id = %id, kind = %entry.kind, ?timeout, "Request registered");
        self.pending.insert(id, entry);
        Ok(())
    }

    /// Resolves the request `id` with `response`.
    ///
    /// Returns `false` if no request with that id is pending.
    pub fn resolve(&mut self, id: &MessageId, response: ResponsePayload) -> bool {
        let Some(entry) = self.pending.remove(id) else {
            return false;
        };
        trace!(request_id = %id, kind = %entry.kind, "Request resolved");
        let _ = entry.reply.send(response.into_result());
        true
    }

    /// Rejects the request `id` with `error`.
    ///
    /// Returns `false` if no request with that id is pending.
    pub fn fail(&mut self, id: &MessageId, error: Error) -> bool {
        match self.pending.remove(id) {
            Some(entry) => {
                let _ = entry.reply.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Rejects every request whose deadline is at or before `now`.
    ///
    /// Returns how many expired.
    pub fn expire(&mut self, now: Instant) -> usize {
        let expired: Vec<MessageId> = self
            .pending
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            if let Some(entry) = self.pending.remove(id) {
                debug!(request_id = %id, kind = %entry.kind, "Request timed out");
                let err = Error::request_timeout(id.clone(), entry.timeout.as_millis() as u64);
                let _ = entry.reply.send(Err(err));
            }
        }

        expired.len()
    }

    /// Earliest pending deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|entry| entry.deadline).min()
    }

    /// Rejects every pending request with [`Error::ChannelClosed`].
    ///
    /// Returns how many were rejected.
    pub fn reject_all(&mut self) -> usize {
        let pending: Vec<_> = self.pending.drain().collect();
        let count = pending.len();

        for (_, entry) in pending {
            let _ = entry.reply.send(Err(Error::ChannelClosed));
        }

        if count > 0 {
            debug!(count, "Failed pending requests on close");
        }
        count
    }
}

// ============================================================================
// Tests
// ============================================================================
