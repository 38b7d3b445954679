//! Optional HMAC-SHA256 message signing.
//!
//! When both peers share a key, every outbound envelope carries a base64
//! signature over its type, id, sequence, timestamp and payload, and inbound
//! envelopes without a valid one are dropped as malformed.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

use crate::error::{Error, Result};

use super::message::Message;

type HmacSha256 = Hmac<Sha256>;

/// Signs and verifies envelopes with a shared key.
#[derive(Clone)]
pub struct MessageSigner {
    mac: HmacSha256,
}

impl std::fmt::Debug for MessageSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MessageSigner(..)")
    }
}

impl MessageSigner {
    /// Creates a signer from a shared key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the key is empty.
    pub fn new(key: impl AsRef<[u8]>) -> Result<Self> {
        let key = key.as_ref();
        if key.is_empty() {
            return Err(Error::config("Signing key must not be empty"));
        }
        let mac = HmacSha256::new_from_slice(key)
            .map_err(|e| Error::config(format!("Invalid signing key: {e}")))?;
        Ok(Self { mac })
    }

    /// Computes the signature for `message`, ignoring any existing one.
    #[must_use]
    pub fn sign(&self, message: &Message) -> String {
        let mut mac = self.mac.clone();
        mac.update(&signing_input(message));
        STANDARD.encode(mac.finalize().into_bytes())
    }

    /// Sets `message.signature`.
    pub fn apply(&self, message: &mut Message) {
        message.signature = Some(self.sign(message));
    }

    /// Verifies `message.signature` in constant time.
    #[must_use]
    pub fn verify(&self, message: &Message) -> bool {
        let Some(signature) = message.signature.as_deref() else {
            return false;
        };
        let Ok(expected) = STANDARD.decode(signature) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(&signing_input(message));
        mac.verify_slice(&expected).is_ok()
    }
}

/// Canonical bytes covered by the signature: a JSON array of the signed
/// fields, so no field value can shift a boundary between fields.
///
/// `serde_json` maps are key-ordered, so the payload encoding is stable.
fn signing_input(message: &Message) -> Vec<u8> {
    Value::Array(vec![
        Value::from(message.kind.as_str()),
        message
            .id
            .as_ref()
            .map_or(Value::Null, |id| Value::from(id.as_str())),
        Value::from(message.sequence),
        Value::from(message.timestamp),
        message.payload.clone().unwrap_or(Value::Null),
    ])
    .to_string()
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifiers::MessageId;
    use crate::protocol::MessageType;
    use serde_json::json;

    fn sample() -> Message {
        Message::new(
            MessageType::Event,
            4,
            Some(json!({"name": "alert", "data": {"b": 2, "a": 1}})),
        )
    }

    #[test]
    fn test_sign_and_verify() {
        let signer = MessageSigner::new(b"shared-secret").expect("signer");
        let mut message = sample();
        signer.apply(&mut message);
        assert!(signer.verify(&message));
    }

    #[test]
    fn test_tampered_payload_fails() {
        let signer = MessageSigner::new(b"shared-secret").expect("signer");
        let mut message = sample();
        signer.apply(&mut message);
        message.payload = Some(json!({"name": "alert", "data": {"a": 9}}));
        assert!(!signer.verify(&message));
    }

    #[test]
    fn test_tampered_sequence_fails() {
        let signer = MessageSigner::new(b"shared-secret").expect("signer");
        let mut message = sample();
        signer.apply(&mut message);
        message.sequence += 1;
        assert!(!signer.verify(&message));
    }

    #[test]
    fn test_missing_or_garbage_signature_fails() {
        let signer = MessageSigner::new(b"shared-secret").expect("signer");
        let mut message = sample();
        assert!(!signer.verify(&message));
        message.signature = Some("%%%".into());
        assert!(!signer.verify(&message));
    }

    #[test]
    fn test_different_keys_disagree() {
        let a = MessageSigner::new(b"key-a").expect("signer");
        let b = MessageSigner::new(b"key-b").expect("signer");
        let mut message = sample();
        a.apply(&mut message);
        assert!(!b.verify(&message));
    }

    #[test]
    fn test_field_boundaries_are_signed() {
        let signer = MessageSigner::new(b"shared-secret").expect("signer");
        let mut first = sample();
        first.kind = MessageType::Other("NOTICE\nx".into());
        first.id = Some(MessageId::from("y"));
        let mut second = first.clone();
        second.kind = MessageType::Other("NOTICE".into());
        second.id = Some(MessageId::from("x\ny"));

        assert_ne!(signer.sign(&first), signer.sign(&second));
        signer.apply(&mut first);
        second.signature = first.signature.clone();
        assert!(!signer.verify(&second));
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(MessageSigner::new(b"").is_err());
    }
}
