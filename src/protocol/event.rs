//! Events delivered to dispatcher handlers.
//!
//! Inbound EVENT, REQUEST, uncorrelated ERROR and unrecognized messages, as
//! well as local connection notifications, reach handlers as a
//! [`ChannelEvent`]. Each variant maps to a dispatcher topic.
//!
//! # Topics
//!
//! | Variant | Topic |
//! |---------|-------|
//! | `Event` | event `name` |
//! | `Request` | request `kind` |
//! | `Error` | `error` |
//! | `Unknown` | raw message type |
//! | `ConnectionLost` | `connection:lost` |
//! | `ConnectionRestored` | `connection:restored` |
//! | `Closed` | `channel:closed` |

// ============================================================================
// Imports
// ============================================================================

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::channel::CloseReason;
use crate::identifiers::MessageId;

// ============================================================================
// Topics
// ============================================================================

/// Topic fired when heartbeats go unanswered.
pub const TOPIC_CONNECTION_LOST: &str = "connection:lost";

/// Topic fired when a degraded channel recovers.
pub const TOPIC_CONNECTION_RESTORED: &str = "connection:restored";

/// Topic fired when the channel closes for any reason.
pub const TOPIC_CHANNEL_CLOSED: &str = "channel:closed";

/// Topic for uncorrelated ERROR messages.
pub const TOPIC_ERROR: &str = "error";

/// Subscribes to every topic.
pub const TOPIC_ANY: &str = "*";

// ============================================================================
// InboundRequest
// ============================================================================

/// A REQUEST from the peer awaiting `respond`.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundRequest {
    /// Id to pass to `respond`.
    pub id: MessageId,
    /// Request type.
    pub kind: String,
    /// Request data.
    pub body: Value,
}

impl InboundRequest {
    /// Deserializes the body into `T`.
    #[must_use]
    pub fn body_as<T: DeserializeOwned>(&self) -> Option<T> {
        serde_json::from_value(self.body.clone()).ok()
    }
}

// ============================================================================
// ChannelEvent
// ============================================================================

/// Event handed to dispatcher handlers.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Application event from the peer.
    Event {
        /// Event name.
        name: String,
        /// Event data.
        data: Value,
    },

    /// Request from the peer.
    Request(InboundRequest),

    /// Uncorrelated error notification from the peer.
    Error {
        /// Error code.
        code: String,
        /// Error message.
        message: String,
    },

    /// Message with an unrecognized type.
    Unknown {
        /// Raw type tag.
        kind: String,
        /// Raw payload.
        payload: Option<Value>,
    },

    /// Heartbeats went unanswered; channel is DEGRADED.
    ConnectionLost {
        /// Consecutive unanswered heartbeats.
        missed_heartbeats: u32,
    },

    /// A degraded channel is CONNECTED again.
    ConnectionRestored,

    /// Channel reached CLOSED.
    Closed {
        /// Why it closed.
        reason: CloseReason,
    },
}

impl ChannelEvent {
    /// Returns the dispatcher topic for this event.
    #[must_use]
    pub fn topic(&self) -> &str {
        match self {
            Self::Event { name, .. } => name,
            Self::Request(request) => &request.kind,
            Self::Error { .. } => TOPIC_ERROR,
            Self::Unknown { kind, .. } => kind,
            Self::ConnectionLost { .. } => TOPIC_CONNECTION_LOST,
            Self::ConnectionRestored => TOPIC_CONNECTION_RESTORED,
            Self::Closed { .. } => TOPIC_CHANNEL_CLOSED,
        }
    }

    /// Deserializes the event data into `T`.
    ///
    /// Returns `None` for non-`Event` variants or on shape mismatch.
    #[must_use]
    pub fn data_as<T: DeserializeOwned>(&self) -> Option<T> {
        match self {
            Self::Event { data, .. } => serde_json::from_value(data.clone()).ok(),
            _ => None,
        }
    }

    /// Returns `true` for locally generated connection notifications.
    #[inline]
    #[must_use]
    pub fn is_notification(&self) -> bool {
        matches!(
            self,
            Self::ConnectionLost { .. } | Self::ConnectionRestored | Self::Closed { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
