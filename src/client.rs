//! Client side of a frame channel.
//!
//! The Client runs inside the embedded frame. It waits for the Host's
//! HANDSHAKE, validates the credential, answers READY and from then on
//! mirrors liveness passively: silence longer than the announced heartbeat
//! window marks the channel DEGRADED until traffic resumes.
//!
//! ```no_run
//! use frame_channel::{Client, ClientConfig, MemoryTransport, Result};
//! use serde_json::json;
//!
//! # async fn example() -> Result<()> {
//! let (_host, transport) =
//!     MemoryTransport::pair("https://pos.example.com", "https://intel.example.com");
//! let config = ClientConfig::builder()
//!     .host_origin("https://pos.example.com")
//!     .supported_feature("alerts")
//!     .build()?;
//!
//! let client = Client::accept(config, transport).await?;
//! let handle = client.handle();
//! client.on("insights.sentiment", move |event| {
//!     if let frame_channel::ChannelEvent::Request(request) = event {
//!         handle.respond(&request.id, Ok(json!({"score": 0.82})))?;
//!     }
//!     Ok(())
//! });
//! client.emit("alert", json!({"severity": "high"})).await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tracing::debug;

use crate::channel::core::ChannelCore;
use crate::channel::{
    ChannelHandle, ChannelState, ClientConfig, DiagnosticsSnapshot, Origin, RequestClass,
};
use crate::error::{Error, Result};
use crate::identifiers::{MessageId, SubscriptionId};
use crate::protocol::{ChannelEvent, Features, ResponseError};
use crate::transport::Transport;

// ============================================================================
// Client
// ============================================================================

/// The embedded frame's end of a channel.
///
/// Dropping the Client closes the channel.
#[derive(Debug)]
pub struct Client {
    channel: ChannelHandle,
    accepted: Mutex<Option<oneshot::Receiver<Result<()>>>>,
}

impl Client {
    /// Listens on `transport` and waits for a valid handshake.
    ///
    /// # Errors
    ///
    /// - [`Error::HandshakeTimeout`] if no acceptable HANDSHAKE arrives
    ///   within the configured timeout
    /// - [`Error::ChannelClosed`] if the transport ends first
    pub async fn accept(config: ClientConfig, transport: impl Transport) -> Result<Self> {
        let client = Self::new(config, transport);
        client.accepted().await?;
        Ok(client)
    }

    /// Starts listening without waiting for the handshake.
    ///
    /// Handlers registered before the Host connects see every message of the
    /// session. Must be called inside a tokio runtime.
    #[must_use]
    pub fn new(config: ClientConfig, transport: impl Transport) -> Self {
        debug!(host_origin = %config.host_origin(), "Waiting for host handshake");
        let (channel, accepted) = ChannelCore::spawn_client(config, Box::new(transport));
        Self {
            channel,
            accepted: Mutex::new(Some(accepted)),
        }
    }

    /// Waits for the first handshake to complete.
    ///
    /// Only the first call observes the outcome of the handshake; later
    /// calls report the current state.
    ///
    /// # Errors
    ///
    /// See [`accept`](Self::accept).
    pub async fn accepted(&self) -> Result<()> {
        let receiver = self.accepted.lock().take();
        match receiver {
            Some(receiver) => receiver.await.map_err(|_| Error::ChannelClosed)?,
            None => {
                let state = self.state();
                if state.accepts_traffic() {
                    Ok(())
                } else {
                    Err(Error::not_connected(state))
                }
            }
        }
    }

    // ========================================================================
    // Traffic
    // ========================================================================

    /// Sends a REQUEST to the Host with the default timeout.
    ///
    /// # Errors
    ///
    /// See [`ChannelHandle::request`].
    pub async fn request(&self, kind: impl Into<String>, body: Value) -> Result<Value> {
        self.channel.request(kind, body).await
    }

    /// Sends a REQUEST with an explicit timeout.
    ///
    /// # Errors
    ///
    /// See [`ChannelHandle::request`].
    pub async fn request_with_timeout(
        &self,
        kind: impl Into<String>,
        body: Value,
        timeout: Duration,
    ) -> Result<Value> {
        self.channel.request_with_timeout(kind, body, timeout).await
    }

    /// Sends a REQUEST with the timeout of `class`.
    ///
    /// # Errors
    ///
    /// See [`ChannelHandle::request`].
    pub async fn request_with_class(
        &self,
        kind: impl Into<String>,
        body: Value,
        class: RequestClass,
    ) -> Result<Value> {
        self.channel.request_with_class(kind, body, class).await
    }

    /// Answers a REQUEST from the Host.
    ///
    /// # Errors
    ///
    /// See [`ChannelHandle::respond`].
    pub fn respond(
        &self,
        request_id: &MessageId,
        result: std::result::Result<Value, ResponseError>,
    ) -> Result<()> {
        self.channel.respond(request_id, result)
    }

    /// Sends an EVENT to the Host.
    ///
    /// # Errors
    ///
    /// See [`ChannelHandle::emit`].
    pub async fn emit(&self, name: impl Into<String>, data: Value) -> Result<()> {
        self.channel.emit(name, data).await
    }

    // ========================================================================
    // Handlers
    // ========================================================================

    /// Subscribes `handler` to `topic`.
    pub fn on<F>(&self, topic: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&ChannelEvent) -> Result<()> + Send + Sync + 'static,
    {
        self.channel.on(topic, handler)
    }

    /// Removes a subscription.
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.channel.off(id)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Current channel state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.channel.state()
    }

    /// Receiver notified on every state change.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.channel.subscribe_state()
    }

    /// Waits until the channel reaches `target`.
    ///
    /// # Errors
    ///
    /// See [`ChannelHandle::wait_for_state`].
    pub async fn wait_for_state(&self, target: ChannelState) -> Result<()> {
        self.channel.wait_for_state(target).await
    }

    /// Origin of the Host page, once the handshake succeeded.
    #[must_use]
    pub fn host_origin(&self) -> Option<Origin> {
        self.channel.peer_origin()
    }

    /// Features enabled for this session.
    #[must_use]
    pub fn features(&self) -> Features {
        self.channel.features()
    }

    /// Drop counters.
    #[must_use]
    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.channel.diagnostics()
    }

    /// Cloneable handle for use inside handlers.
    #[must_use]
    pub fn handle(&self) -> ChannelHandle {
        self.channel.clone()
    }

    /// Closes the channel.
    pub fn close(&self) {
        self.channel.close();
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.channel.close();
    }
}

// ============================================================================
// Tests
// ============================================================================
