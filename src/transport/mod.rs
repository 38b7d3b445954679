//! Transport layer.
//!
//! A [`Transport`] moves raw frames between the two peers and tags every
//! inbound frame with the origin the platform vouches for. The channel never
//! trusts an origin claimed inside a message body.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Host           │       Transport frames       │  Client         │
//! │                 │◄────────────────────────────►│  (sandboxed)    │
//! │  ChannelCore    │  target_origin / origin tag  │  ChannelCore    │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! Outbound frames name an exact target origin. A transport drops a frame
//! whose target does not match the receiving side, as the cross-document
//! messaging primitive does.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `memory` | In-process pair emulating cross-document messaging |
//! | `websocket` | WebSocket transport with `Origin` header capture |

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;

use crate::error::Result;

// ============================================================================
// Submodules
// ============================================================================

/// In-process transport pair.
pub mod memory;

/// WebSocket transport.
pub mod websocket;

// ============================================================================
// Re-exports
// ============================================================================

pub use memory::{FrameInjector, MemoryTransport};
pub use websocket::{PendingServer, WebSocketTransport};

// ============================================================================
// Frames
// ============================================================================

/// A frame received from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    /// Origin of the sender as reported by the transport.
    pub origin: String,
    /// Raw frame body (JSON text).
    pub data: String,
}

impl InboundFrame {
    /// Creates an inbound frame.
    #[inline]
    #[must_use]
    pub fn new(origin: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            data: data.into(),
        }
    }
}

/// A frame to deliver to the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    /// Exact origin the receiver must have. Never `*`.
    pub target_origin: String,
    /// Raw frame body (JSON text).
    pub data: String,
}

impl OutboundFrame {
    /// Creates an outbound frame.
    #[inline]
    #[must_use]
    pub fn new(target_origin: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            target_origin: target_origin.into(),
            data: data.into(),
        }
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Ordered, origin-tagged frame transport.
///
/// Implementations must deliver frames from one sender in order, and
/// [`recv`](Transport::recv) must be cancel safe: the channel polls it inside
/// `select!` alongside its timers.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Sends a frame. A frame whose target origin does not match the peer is
    /// dropped silently.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying connection is gone.
    async fn send(&mut self, frame: OutboundFrame) -> Result<()>;

    /// Receives the next frame, or `None` once the peer is gone.
    async fn recv(&mut self) -> Option<InboundFrame>;

    /// Closes the transport. Further `recv` calls return `None`.
    async fn close(&mut self) {}
}
