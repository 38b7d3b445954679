//! Typed payloads keyed by message type.
//!
//! [`Payload::decode`] narrows the envelope's untyped `payload` into the
//! shape its `type` requires, so handlers never inspect a raw blob.
//!
//! | Type | Payload |
//! |------|---------|
//! | HANDSHAKE | [`HandshakePayload`] |
//! | READY | [`ReadyPayload`] |
//! | REQUEST | [`RequestPayload`] |
//! | RESPONSE | [`ResponsePayload`] |
//! | EVENT | [`EventPayload`] |
//! | ERROR | [`ErrorPayload`] |
//! | HEARTBEAT, HEARTBEAT_ACK | none |
//! | other | raw value |

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identifiers::Nonce;

use super::message::{DecodeError, MessageType};
use super::request::{RequestPayload, ResponsePayload};

// ============================================================================
// Constants
// ============================================================================

/// Protocol version both peers must agree on.
pub const PROTOCOL_VERSION: u32 = 1;

/// Feature flags requested by the Host and accepted by the Client.
pub type Features = BTreeMap<String, bool>;

// ============================================================================
// Credential
// ============================================================================

/// API key or session token carried in the handshake.
///
/// `Debug` and `Display` redact the secret part so a credential never lands
/// in logs in cleartext.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    /// Wraps a credential string.
    #[inline]
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the raw credential. Do not log the result.
    #[inline]
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the credential is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keeps the prefix up to the last `_` and masks the rest.
    #[must_use]
    pub fn redacted(&self) -> String {
        match self.0.rfind('_') {
            Some(idx) => format!("{}***", &self.0[..=idx]),
            None => "***".to_string(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({})", self.redacted())
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

// ============================================================================
// Handshake / Ready
// ============================================================================

/// Body of the HANDSHAKE message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakePayload {
    /// API key or session token.
    pub credential: Credential,

    /// Protocol version offered.
    pub version: u32,

    /// Fresh per attempt; echoed in READY.
    pub nonce: Nonce,

    /// Requested feature flags.
    #[serde(default)]
    pub features: Features,

    /// Host heartbeat interval, lets the Client mirror liveness.
    #[serde(default)]
    pub heartbeat_interval_ms: u64,
}

/// Body of the READY message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyPayload {
    /// Echo of the handshake nonce.
    #[serde(default)]
    pub nonce: Option<Nonce>,

    /// Protocol version accepted.
    #[serde(default = "default_version")]
    pub version: u32,

    /// Features the Client enabled (subset of those requested).
    #[serde(default)]
    pub features: Features,
}

fn default_version() -> u32 {
    PROTOCOL_VERSION
}

// ============================================================================
// Event / Error
// ============================================================================

/// Body of an EVENT message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    /// Event name, used as the dispatcher topic (`alert`, `state:update`, ...).
    pub name: String,

    /// Event-specific data.
    #[serde(default)]
    pub data: Value,
}

/// Body of an ERROR message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Machine-readable code.
    pub code: String,

    /// Human-readable message.
    #[serde(default)]
    pub message: String,

    /// Handshake nonce when the error rejects a handshake.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<Nonce>,
}

impl ErrorPayload {
    /// Error code used to reject a handshake.
    pub const HANDSHAKE_REJECTED: &'static str = "handshake_rejected";

    /// Creates a handshake rejection bound to `nonce`.
    #[must_use]
    pub fn handshake_rejected(nonce: Nonce, message: impl Into<String>) -> Self {
        Self {
            code: Self::HANDSHAKE_REJECTED.to_string(),
            message: message.into(),
            nonce: Some(nonce),
        }
    }
}

// ============================================================================
// Payload
// ============================================================================

/// Payload narrowed by message type.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// HANDSHAKE body.
    Handshake(HandshakePayload),
    /// READY body.
    Ready(ReadyPayload),
    /// REQUEST body.
    Request(RequestPayload),
    /// RESPONSE body.
    Response(ResponsePayload),
    /// EVENT body.
    Event(EventPayload),
    /// ERROR body.
    Error(ErrorPayload),
    /// HEARTBEAT (no body).
    Heartbeat,
    /// HEARTBEAT_ACK (no body).
    HeartbeatAck,
    /// Unrecognized type; body passed through untouched.
    Other {
        /// Raw type tag.
        kind: String,
        /// Raw body.
        payload: Option<Value>,
    },
}

impl Payload {
    /// Decodes `payload` according to `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::InvalidPayload`] if the body does not match the
    /// shape required by its type.
    pub fn decode(kind: &MessageType, payload: Option<&Value>) -> Result<Self, DecodeError> {
        let body = payload.cloned().unwrap_or(Value::Null);
        let invalid = |e: serde_json::Error| DecodeError::InvalidPayload {
            kind: kind.to_string(),
            reason: e.to_string(),
        };

        Ok(match kind {
            MessageType::Handshake => Self::Handshake(serde_json::from_value(body).map_err(invalid)?),
            MessageType::Ready => Self::Ready(serde_json::from_value(body).map_err(invalid)?),
            MessageType::Request => Self::Request(serde_json::from_value(body).map_err(invalid)?),
            MessageType::Response => Self::Response(serde_json::from_value(body).map_err(invalid)?),
            MessageType::Event => Self::Event(serde_json::from_value(body).map_err(invalid)?),
            MessageType::Error => Self::Error(serde_json::from_value(body).map_err(invalid)?),
            MessageType::Heartbeat => Self::Heartbeat,
            MessageType::HeartbeatAck => Self::HeartbeatAck,
            MessageType::Other(tag) => Self::Other {
                kind: tag.clone(),
                payload: payload.cloned(),
            },
        })
    }

    /// Returns the message type this payload belongs to.
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Handshake(_) => MessageType::Handshake,
            Self::Ready(_) => MessageType::Ready,
            Self::Request(_) => MessageType::Request,
            Self::Response(_) => MessageType::Response,
            Self::Event(_) => MessageType::Event,
            Self::Error(_) => MessageType::Error,
            Self::Heartbeat => MessageType::Heartbeat,
            Self::HeartbeatAck => MessageType::HeartbeatAck,
            Self::Other { kind, .. } => MessageType::Other(kind.clone()),
        }
    }

    /// Encodes the body for the envelope.
    ///
    /// # Errors
    ///
    /// Returns a serde error if a body value fails to serialize.
    pub fn to_value(&self) -> serde_json::Result<Option<Value>> {
        Ok(match self {
            Self::Handshake(p) => Some(serde_json::to_value(p)?),
            Self::Ready(p) => Some(serde_json::to_value(p)?),
            Self::Request(p) => Some(serde_json::to_value(p)?),
            Self::Response(p) => Some(serde_json::to_value(p)?),
            Self::Event(p) => Some(serde_json::to_value(p)?),
            Self::Error(p) => Some(serde_json::to_value(p)?),
            Self::Heartbeat | Self::HeartbeatAck => None,
            Self::Other { payload, .. } => payload.clone(),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_credential_redaction() {
        let credential = Credential::new("pk_live_abc123");
        assert_eq!(credential.redacted(), "pk_live_***");
        assert_eq!(format!("{credential:?}"), "Credential(pk_live_***)");
        assert_eq!(credential.to_string(), "pk_live_***");
        assert_eq!(Credential::new("opaque").redacted(), "***");
    }

    #[test]
    fn test_handshake_wire_shape() {
        let payload = HandshakePayload {
            credential: Credential::new("pk_live_abc"),
            version: PROTOCOL_VERSION,
            nonce: Nonce::from("n1"),
            features: Features::from([("alerts".to_string(), true)]),
            heartbeat_interval_ms: 10_000,
        };
        let value = serde_json::to_value(&payload).expect("serialize");

        assert_eq!(value["credential"], "pk_live_abc");
        assert_eq!(value["nonce"], "n1");
        assert_eq!(value["features"]["alerts"], true);
        assert_eq!(value["heartbeatIntervalMs"], 10_000);
    }

    #[test]
    fn test_decode_ready_without_nonce() {
        let payload = Payload::decode(&MessageType::Ready, Some(&json!({}))).expect("decode");
        match payload {
            Payload::Ready(ready) => {
                assert!(ready.nonce.is_none());
                assert_eq!(ready.version, PROTOCOL_VERSION);
            }
            other => panic!("expected ready, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_event() {
        let payload = Payload::decode(
            &MessageType::Event,
            Some(&json!({"name": "alert", "data": {"severity": "high"}})),
        )
        .expect("decode");
        assert!(matches!(payload, Payload::Event(ref e) if e.name == "alert"));
        assert_eq!(payload.message_type(), MessageType::Event);
    }

    #[test]
    fn test_decode_handshake_missing_credential_fails() {
        let err = Payload::decode(&MessageType::Handshake, Some(&json!({"nonce": "n1"})))
            .unwrap_err();
        assert!(matches!(err, DecodeError::InvalidPayload { .. }));
    }

    #[test]
    fn test_decode_request_without_payload_fails() {
        let err = Payload::decode(&MessageType::Request, None).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidPayload { .. }));
    }

    #[test]
    fn test_decode_other_passes_through() {
        let raw = json!({"terminal": 4});
        let payload =
            Payload::decode(&MessageType::Other("TERMINAL_READY".into()), Some(&raw)).expect("decode");
        assert_eq!(payload.to_value().expect("encode"), Some(raw));
    }

    #[test]
    fn test_heartbeat_has_no_body() {
        assert_eq!(Payload::Heartbeat.to_value().expect("encode"), None);
        assert_eq!(
            Payload::decode(&MessageType::HeartbeatAck, None).expect("decode"),
            Payload::HeartbeatAck
        );
    }

    #[test]
    fn test_handshake_rejection_payload() {
        let payload = ErrorPayload::handshake_rejected(Nonce::from("n9"), "bad credential");
        let value = serde_json::to_value(&payload).expect("serialize");
        assert_eq!(value["code"], "handshake_rejected");
        assert_eq!(value["nonce"], "n9");
    }
}
