//! Message envelope.
//!
//! Every frame exchanged between Host and Client carries one [`Message`].
//!
//! # Format
//!
//! ```json
//! {
//!   "type": "REQUEST",
//!   "id": "uuid",
//!   "sequence": 7,
//!   "timestamp": 1760000000000,
//!   "payload": { ... },
//!   "signature": null
//! }
//! ```
//!
//! Decoding is strict about the envelope and lenient about unknown types:
//! an unrecognized `type` decodes to [`MessageType::Other`] so it can reach
//! the dispatcher.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::identifiers::MessageId;

// ============================================================================
// MessageType
// ============================================================================

/// Envelope `type` tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Host → Client credentialed session offer.
    Handshake,
    /// Client → Host handshake acceptance.
    Ready,
    /// Correlated request.
    Request,
    /// Answer to a request, matched by `id`.
    Response,
    /// Uncorrelated application notification.
    Event,
    /// Uncorrelated error notification (also used for handshake rejection).
    Error,
    /// Liveness probe.
    Heartbeat,
    /// Liveness probe answer.
    HeartbeatAck,
    /// Any other tag; routed to the dispatcher under its raw name.
    Other(String),
}

impl MessageType {
    /// Returns the wire tag.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Handshake => "HANDSHAKE",
            Self::Ready => "READY",
            Self::Request => "REQUEST",
            Self::Response => "RESPONSE",
            Self::Event => "EVENT",
            Self::Error => "ERROR",
            Self::Heartbeat => "HEARTBEAT",
            Self::HeartbeatAck => "HEARTBEAT_ACK",
            Self::Other(tag) => tag,
        }
    }

    /// Parses a wire tag. Never fails.
    #[must_use]
    pub fn parse(tag: &str) -> Self {
        match tag {
            "HANDSHAKE" => Self::Handshake,
            "READY" => Self::Ready,
            "REQUEST" => Self::Request,
            "RESPONSE" => Self::Response,
            "EVENT" => Self::Event,
            "ERROR" => Self::Error,
            "HEARTBEAT" => Self::Heartbeat,
            "HEARTBEAT_ACK" => Self::HeartbeatAck,
            other => Self::Other(other.to_string()),
        }
    }

    /// Returns `true` if messages of this type must carry an `id`.
    #[inline]
    #[must_use]
    pub fn requires_id(&self) -> bool {
        matches!(self, Self::Request | Self::Response)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for MessageType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(Self::parse(&tag))
    }
}

// ============================================================================
// DecodeError
// ============================================================================

/// Why a frame failed envelope decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Frame body is not JSON.
    #[error("not valid JSON: {0}")]
    NotJson(String),

    /// Frame body is JSON but not an object.
    #[error("envelope is not an object")]
    NotObject,

    /// `type` missing or not a string.
    #[error("missing or non-string 'type'")]
    MissingType,

    /// `sequence` missing or not a non-negative integer.
    #[error("missing or non-integer 'sequence'")]
    InvalidSequence,

    /// `timestamp` missing or non-numeric.
    #[error("missing or non-numeric 'timestamp'")]
    InvalidTimestamp,

    /// `id` missing on a type that requires it.
    #[error("missing 'id' on {0}")]
    MissingId(String),

    /// A field has the wrong JSON type.
    #[error("field '{0}' has the wrong type")]
    InvalidField(&'static str),

    /// Payload does not match the shape required by its type.
    #[error("invalid {kind} payload: {reason}")]
    InvalidPayload {
        /// Message type whose payload failed.
        kind: String,
        /// Decoder message.
        reason: String,
    },

    /// Signature missing or not matching the shared key.
    #[error("signature verification failed")]
    BadSignature,
}

// ============================================================================
// Message
// ============================================================================

/// The unit of exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Type tag.
    #[serde(rename = "type")]
    pub kind: MessageType,

    /// Sender-generated identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,

    /// Per-sender strictly increasing counter.
    pub sequence: u64,

    /// Sender creation time in epoch milliseconds.
    pub timestamp: u64,

    /// Type-specific body.
    #[serde(default)]
    pub payload: Option<Value>,

    /// Optional integrity token.
    #[serde(default)]
    pub signature: Option<String>,
}

impl Message {
    /// Creates a message with a generated id and the current timestamp.
    #[must_use]
    pub fn new(kind: MessageType, sequence: u64, payload: Option<Value>) -> Self {
        Self::with_id(kind, MessageId::generate(), sequence, payload)
    }

    /// Creates a message with a specific id.
    #[must_use]
    pub fn with_id(
        kind: MessageType,
        id: MessageId,
        sequence: u64,
        payload: Option<Value>,
    ) -> Self {
        Self {
            kind,
            id: Some(id),
            sequence,
            timestamp: now_millis(),
            payload,
            signature: None,
        }
    }

    /// Serializes the envelope to a JSON string.
    ///
    /// # Errors
    ///
    /// Returns a serde error if the payload cannot be serialized.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decodes and structurally validates an envelope.
    ///
    /// Payload shape is checked separately by
    /// [`Payload::decode`](super::Payload::decode).
    ///
    /// # Errors
    ///
    /// Returns the first [`DecodeError`] found.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| DecodeError::NotJson(e.to_string()))?;
        let Value::Object(fields) = value else {
            return Err(DecodeError::NotObject);
        };

        let kind = fields
            .get("type")
            .and_then(Value::as_str)
            .map(MessageType::parse)
            .ok_or(DecodeError::MissingType)?;

        let sequence = fields
            .get("sequence")
            .and_then(Value::as_u64)
            .ok_or(DecodeError::InvalidSequence)?;

        let timestamp = read_timestamp(&fields)?;

        let id = match fields.get("id") {
            None | Some(Value::Null) => None,
            Some(Value::String(id)) => Some(MessageId::from(id.as_str())),
            Some(_) => return Err(DecodeError::InvalidField("id")),
        };
        if id.is_none() && kind.requires_id() {
            return Err(DecodeError::MissingId(kind.to_string()));
        }

        let payload = match fields.get("payload") {
            None | Some(Value::Null) => None,
            Some(value @ Value::Object(_)) => Some(value.clone()),
            Some(_) => return Err(DecodeError::InvalidField("payload")),
        };

        let signature = match fields.get("signature") {
            None | Some(Value::Null) => None,
            Some(Value::String(sig)) => Some(sig.clone()),
            Some(_) => return Err(DecodeError::InvalidField("signature")),
        };

        Ok(Self {
            kind,
            id,
            sequence,
            timestamp,
            payload,
            signature,
        })
    }
}

/// Reads `timestamp`, accepting integral or fractional non-negative numbers.
fn read_timestamp(fields: &Map<String, Value>) -> Result<u64, DecodeError> {
    let raw = fields.get("timestamp").ok_or(DecodeError::InvalidTimestamp)?;
    if let Some(ms) = raw.as_u64() {
        return Ok(ms);
    }
    match raw.as_f64() {
        Some(ms) if ms.is_finite() && ms >= 0.0 => Ok(ms as u64),
        _ => Err(DecodeError::InvalidTimestamp),
    }
}

/// Current wall-clock time in epoch milliseconds.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

// ============================================================================
// Tests
// ============================================================================
