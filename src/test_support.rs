//! Shared test fixtures.
//!
//! [`FakePeer`] drives the raw end of a [`MemoryTransport`] pair so tests
//! can script exactly which envelopes the channel under test sees.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::channel::ChannelHandle;
use crate::identifiers::MessageId;
use crate::protocol::{
    HandshakePayload, Message, MessageSigner, PROTOCOL_VERSION, Payload, ReadyPayload,
};
use crate::transport::{MemoryTransport, OutboundFrame, Transport};

pub(crate) const HOST_ORIGIN: &str = "https://pos.example.com";
pub(crate) const CLIENT_ORIGIN: &str = "https://intel.example.com";
pub(crate) const CREDENTIAL: &str = "pk_live_abc";

/// Scripted counterpart of a channel.
pub(crate) struct FakePeer {
    transport: MemoryTransport,
    sequence: u64,
    signer: Option<MessageSigner>,
}

impl FakePeer {
    pub(crate) fn new(transport: MemoryTransport) -> Self {
        Self {
            transport,
            sequence: 0,
            signer: None,
        }
    }

    pub(crate) fn with_signer(mut self, signer: MessageSigner) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Next frame of any type; `None` once the channel closed its end.
    pub(crate) async fn try_next(&mut self) -> Option<(Message, Payload)> {
        let frame = self.transport.recv().await?;
        let message = Message::decode(&frame.data).expect("valid envelope");
        let payload =
            Payload::decode(&message.kind, message.payload.as_ref()).expect("valid payload");
        Some((message, payload))
    }

    /// Next frame of any type.
    pub(crate) async fn next(&mut self) -> (Message, Payload) {
        self.try_next().await.expect("channel end open")
    }

    /// Next frame that is not heartbeat traffic.
    pub(crate) async fn recv(&mut self) -> (Message, Payload) {
        loop {
            let (message, payload) = self.next().await;
            if !matches!(payload, Payload::Heartbeat | Payload::HeartbeatAck) {
                return (message, payload);
            }
        }
    }

    /// Builds the next envelope without sending it.
    pub(crate) fn envelope(&mut self, payload: &Payload, id: Option<MessageId>) -> Message {
        self.sequence += 1;
        let mut message = Message::with_id(
            payload.message_type(),
            id.unwrap_or_else(MessageId::generate),
            self.sequence,
            payload.to_value().expect("encode payload"),
        );
        if let Some(signer) = &self.signer {
            signer.apply(&mut message);
        }
        message
    }

    /// Sends `payload` in a fresh envelope.
    pub(crate) async fn send(&mut self, payload: Payload, id: Option<MessageId>) -> Message {
        let message = self.envelope(&payload, id);
        self.send_message(&message).await;
        message
    }

    /// Sends an already built envelope.
    pub(crate) async fn send_message(&mut self, message: &Message) {
        self.send_raw(message.to_json().expect("encode")).await;
    }

    /// Sends raw text.
    pub(crate) async fn send_raw(&mut self, data: impl Into<String>) {
        let target = self.transport.peer_origin().to_string();
        self.transport
            .send(OutboundFrame::new(target, data))
            .await
            .expect("send");
    }

    /// Waits for the Host's HANDSHAKE and accepts it.
    pub(crate) async fn accept_handshake(&mut self) -> HandshakePayload {
        let (_, payload) = self.recv().await;
        let Payload::Handshake(handshake) = payload else {
            panic!("expected HANDSHAKE, got {payload:?}");
        };
        let ready = ReadyPayload {
            nonce: Some(handshake.nonce.clone()),
            version: PROTOCOL_VERSION,
            features: handshake.features.clone(),
        };
        self.send(Payload::Ready(ready), None).await;
        handshake
    }
}

/// Subscribes a counting handler to `topic`.
pub(crate) fn count_topic(channel: &ChannelHandle, topic: &str) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);
    channel.on(topic, move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    count
}

/// Reads a counter.
pub(crate) fn load(count: &AtomicUsize) -> usize {
    count.load(Ordering::SeqCst)
}
