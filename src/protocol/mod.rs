//! Wire protocol types.
//!
//! This module defines the envelope exchanged between Host and Client and
//! the typed payloads each message type carries.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `HANDSHAKE` | Host → Client | Credential, version, nonce, features |
//! | `READY` | Client → Host | Nonce echo, accepted features |
//! | `REQUEST` | either | Correlated request |
//! | `RESPONSE` | either | Answer matched by `id` |
//! | `EVENT` | either | Application notification |
//! | `ERROR` | either | Uncorrelated error, handshake rejection |
//! | `HEARTBEAT` | Host → Client | Liveness probe |
//! | `HEARTBEAT_ACK` | Client → Host | Liveness answer |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `message` | Envelope and decoding |
//! | `payload` | Typed payload union |
//! | `request` | Request and Response bodies |
//! | `event` | Events delivered to handlers |
//! | `signature` | Optional HMAC signing |

// ============================================================================
// Submodules
// ============================================================================

/// Events delivered to dispatcher handlers.
pub mod event;

/// Message envelope.
pub mod message;

/// Typed payloads keyed by message type.
pub mod payload;

/// Request and Response bodies.
pub mod request;

/// Optional HMAC signing.
pub mod signature;

// ============================================================================
// Re-exports
// ============================================================================

pub use event::{
    ChannelEvent, InboundRequest, TOPIC_ANY, TOPIC_CHANNEL_CLOSED, TOPIC_CONNECTION_LOST,
    TOPIC_CONNECTION_RESTORED, TOPIC_ERROR,
};
pub use message::{DecodeError, Message, MessageType, now_millis};
pub use payload::{
    Credential, ErrorPayload, EventPayload, Features, HandshakePayload, PROTOCOL_VERSION, Payload,
    ReadyPayload,
};
pub use request::{RequestPayload, ResponseError, ResponsePayload, ResponseStatus};
pub use signature::MessageSigner;
