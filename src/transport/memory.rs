//! In-process transport pair.
//!
//! [`MemoryTransport::pair`] returns two connected ends, each bound to its
//! own origin. It behaves like cross-document messaging between a page and
//! an embedded frame: frames arrive in order, tagged with the sender's
//! origin, and a frame addressed to the wrong origin is dropped.
//!
//! [`FrameInjector`] posts frames into an end with any origin, which is how
//! tests play a hostile third frame.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::{Error, Result};

use super::{InboundFrame, OutboundFrame, Transport};

// ============================================================================
// MemoryTransport
// ============================================================================

/// One end of an in-process transport pair.
#[derive(Debug)]
pub struct MemoryTransport {
    /// Origin this end sends as.
    local_origin: String,
    /// Origin of the other end.
    peer_origin: String,
    /// Delivers into the peer's inbox.
    outbox: Option<mpsc::UnboundedSender<InboundFrame>>,
    /// This end's inbox.
    inbox: mpsc::UnboundedReceiver<InboundFrame>,
    /// Weak handle to our own inbox, for injectors.
    inbox_handle: mpsc::WeakUnboundedSender<InboundFrame>,
}

impl MemoryTransport {
    /// Creates a connected pair; the first end has `a_origin`, the second
    /// `b_origin`.
    #[must_use]
    pub fn pair(a_origin: impl Into<String>, b_origin: impl Into<String>) -> (Self, Self) {
        let a_origin = a_origin.into();
        let b_origin = b_origin.into();
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();

        let a_handle = a_tx.downgrade();
        let b_handle = b_tx.downgrade();

        let a = Self {
            local_origin: a_origin.clone(),
            peer_origin: b_origin.clone(),
            outbox: Some(b_tx),
            inbox: a_rx,
            inbox_handle: a_handle,
        };
        let b = Self {
            local_origin: b_origin,
            peer_origin: a_origin,
            outbox: Some(a_tx),
            inbox: b_rx,
            inbox_handle: b_handle,
        };
        (a, b)
    }

    /// Returns the origin this end sends as.
    #[inline]
    #[must_use]
    pub fn local_origin(&self) -> &str {
        &self.local_origin
    }

    /// Returns the origin of the other end.
    #[inline]
    #[must_use]
    pub fn peer_origin(&self) -> &str {
        &self.peer_origin
    }

    /// Returns an injector that posts into this end's inbox.
    ///
    /// The injector does not keep the inbox alive.
    #[must_use]
    pub fn injector(&self) -> FrameInjector {
        FrameInjector {
            inbox: self.inbox_handle.clone(),
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&mut self, frame: OutboundFrame) -> Result<()> {
        let Some(outbox) = &self.outbox else {
            return Err(Error::ChannelClosed);
        };

        if frame.target_origin != self.peer_origin {
            trace!(
                target_origin = %frame.target_origin,
                peer_origin = %self.peer_origin,
                "Dropping frame for non-matching target origin"
            );
            return Ok(());
        }

        outbox
            .send(InboundFrame::new(self.local_origin.clone(), frame.data))
            .map_err(|_| Error::connection("peer end is gone"))
    }

    async fn recv(&mut self) -> Option<InboundFrame> {
        self.inbox.recv().await
    }

    async fn close(&mut self) {
        self.outbox = None;
        self.inbox.close();
    }
}

// ============================================================================
// FrameInjector
// ============================================================================

/// Posts frames into a [`MemoryTransport`] inbox with an arbitrary origin.
#[derive(Debug, Clone)]
pub struct FrameInjector {
    inbox: mpsc::WeakUnboundedSender<InboundFrame>,
}

impl FrameInjector {
    /// Posts `data` as if sent from `origin`.
    ///
    /// Returns `false` if the target end is gone.
    pub fn post(&self, origin: impl Into<String>, data: impl Into<String>) -> bool {
        match self.inbox.upgrade() {
            Some(tx) => tx.send(InboundFrame::new(origin, data)).is_ok(),
            None => false,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
