//! Inbound frame validation.
//!
//! Every inbound frame passes through [`InboundValidator::validate`] before
//! the channel looks at it. Checks run in this order:
//!
//! 1. origin equals the pinned peer origin, or the expected origin before
//!    the handshake pinned one;
//! 2. envelope decodes (type, sequence, timestamp, id where required);
//! 3. signature verifies, when a signer is configured;
//! 4. payload matches its type;
//! 5. sequence is strictly greater than the last accepted one.
//!
//! A rejected frame changes nothing: no sequence advance, no liveness
//! update.

// ============================================================================
// Imports
// ============================================================================

use thiserror::Error;
use tokio::time::Instant;

use crate::protocol::{DecodeError, Message, MessageSigner, Payload};
use crate::transport::InboundFrame;

use super::origin::Origin;

// ============================================================================
// Rejection
// ============================================================================

/// Why an inbound frame was dropped.
///
/// Handled inside the channel; never surfaced to handlers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Sender origin is not the trusted one.
    #[error("origin rejected: {origin}")]
    OriginRejected {
        /// Origin the transport reported.
        origin: String,
    },

    /// Envelope, payload or signature invalid.
    #[error("malformed message: {0}")]
    Malformed(#[from] DecodeError),

    /// Sequence did not increase.
    #[error("replayed or reordered message: sequence {sequence} <= {last}")]
    Replayed {
        /// Sequence carried by the frame.
        sequence: u64,
        /// Last accepted sequence.
        last: u64,
    },
}

// ============================================================================
// InboundValidator
// ============================================================================

/// Stateful gate for frames from one peer.
#[derive(Debug)]
pub struct InboundValidator {
    expected: Origin,
    pinned: Option<Origin>,
    last_sequence: Option<u64>,
    last_inbound_at: Option<Instant>,
    signer: Option<MessageSigner>,
}

impl InboundValidator {
    /// Creates a validator trusting `expected` until an origin is pinned.
    #[must_use]
    pub fn new(expected: Origin, signer: Option<MessageSigner>) -> Self {
        Self {
            expected,
            pinned: None,
            last_sequence: None,
            last_inbound_at: None,
            signer,
        }
    }

    /// Validates a frame and narrows its payload.
    ///
    /// # Errors
    ///
    /// Returns the [`Rejection`] for the first failed check.
    pub fn validate(&mut self, frame: &InboundFrame) -> Result<(Message, Payload), Rejection> {
        if !self.trusted().matches(&frame.origin) {
            return Err(Rejection::OriginRejected {
                origin: frame.origin.clone(),
            });
        }

        let message = Message::decode(&frame.data)?;

        if let Some(signer) = &self.signer
            && !signer.verify(&message)
        {
            return Err(DecodeError::BadSignature.into());
        }

        let payload = Payload::decode(&message.kind, message.payload.as_ref())?;

        if let Some(last) = self.last_sequence
            && message.sequence <= last
        {
            return Err(Rejection::Replayed {
                sequence: message.sequence,
                last,
            });
        }

        self.last_sequence = Some(message.sequence);
        self.last_inbound_at = Some(Instant::now());
        Ok((message, payload))
    }

    /// Origin currently trusted.
    #[inline]
    #[must_use]
    pub fn trusted(&self) -> &Origin {
        self.pinned.as_ref().unwrap_or(&self.expected)
    }

    /// Pins the peer origin learned from an accepted handshake.
    pub fn pin(&mut self, origin: Origin) {
        self.pinned = Some(origin);
    }

    /// Forgets the pinned origin before a new handshake attempt.
    ///
    /// The sequence floor is kept: the peer behind this transport keeps its
    /// counter across sessions.
    pub fn unpin(&mut self) {
        self.pinned = None;
    }

    /// Returns the pinned origin, if any.
    #[inline]
    #[must_use]
    pub fn pinned(&self) -> Option<&Origin> {
        self.pinned.as_ref()
    }

    /// Time of the last accepted frame.
    #[inline]
    #[must_use]
    pub fn last_inbound_at(&self) -> Option<Instant> {
        self.last_inbound_at
    }

    /// Last accepted sequence.
    #[inline]
    #[must_use]
    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }
}

// ============================================================================
// Tests
// ============================================================================
