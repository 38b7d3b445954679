//! Frame Channel - Cross-origin messaging between a host page and an
//! embedded frame.
//!
//! This library implements a small protocol over a cross-document messaging
//! primitive: a Host embeds a sandboxed Client, the two authenticate with a
//! credential handshake, then exchange correlated requests, events and
//! heartbeats over a single origin-pinned channel.
//!
//! # Architecture
//!
//! The channel follows a host-initiated model:
//!
//! - **Host**: Embeds the frame, sends HANDSHAKE and HEARTBEAT, decides
//!   whether to re-establish
//! - **Client**: Validates the credential, answers READY and HEARTBEAT_ACK,
//!   mirrors liveness passively
//!
//! Key design principles:
//!
//! - Each channel is one tokio task that owns transport, timers and state
//! - Every inbound frame passes origin, envelope, signature and replay checks
//! - Every pending request settles exactly once
//! - Event-driven: handlers subscribe to topics, nothing polls
//!
//! # Quick Start
//!
//! ```no_run
//! use frame_channel::{Host, HostConfig, PendingServer, Result};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let server = PendingServer::bind("127.0.0.1".parse().unwrap(), 0).await?;
//!     println!("Frame connects to {}", server.ws_url());
//!     let transport = server.accept().await?;
//!
//!     let config = HostConfig::builder()
//!         .credential("pk_live_abc123")
//!         .expected_origin("https://intel.example.com")
//!         .build()?;
//!     let host = Host::init(config, transport).await?;
//!
//!     let status = host.request("terminal.status", json!({})).await?;
//!     println!("Status: {status}");
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`host`] | [`Host`] facade |
//! | [`client`] | [`Client`] facade |
//! | [`channel`] | State machine, validation, correlation, liveness |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Envelope and payload types |
//! | [`transport`] | Memory and WebSocket transports |

// ============================================================================
// Modules
// ============================================================================

/// Channel internals.
///
/// - [`ChannelHandle`] - Cloneable handle to a running channel
/// - [`HostConfig`] / [`ClientConfig`] - Validated configuration
pub mod channel;

/// Client facade.
pub mod client;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Host facade.
pub mod host;

/// Type-safe identifiers.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Wire protocol types.
pub mod protocol;

/// Transport layer.
///
/// Moves raw frames and reports the sender's origin.
pub mod transport;

#[cfg(test)]
mod test_support;

// ============================================================================
// Re-exports
// ============================================================================

// Facades
pub use client::Client;
pub use host::Host;

// Channel types
pub use channel::{
    ChannelHandle, ChannelState, ClientConfig, ClientConfigBuilder, CloseReason,
    DiagnosticsSnapshot, HeartbeatConfig, HostConfig, HostConfigBuilder, Origin, RequestClass,
};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{MessageId, Nonce, SubscriptionId};

// Protocol types
pub use protocol::{
    ChannelEvent, Credential, Features, InboundRequest, MessageSigner, PROTOCOL_VERSION,
    ResponseError, TOPIC_ANY, TOPIC_CHANNEL_CLOSED, TOPIC_CONNECTION_LOST,
    TOPIC_CONNECTION_RESTORED, TOPIC_ERROR,
};

// Transport types
pub use transport::{FrameInjector, MemoryTransport, PendingServer, Transport, WebSocketTransport};
