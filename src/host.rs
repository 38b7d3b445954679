//! Host side of a frame channel.
//!
//! The Host embeds the Client frame, initiates the handshake, sends
//! heartbeats and decides whether to re-establish after the channel closes.
//!
//! # Example
//!
//! ```no_run
//! use frame_channel::{Host, HostConfig, MemoryTransport, Result};
//! use serde_json::json;
//!
//! # async fn example() -> Result<()> {
//! let (transport, _frame) =
//!     MemoryTransport::pair("https://pos.example.com", "https://intel.example.com");
//! let config = HostConfig::builder()
//!     .container_target("#intel-panel")
//!     .credential("pk_live_abc123")
//!     .expected_origin("https://intel.example.com")
//!     .build()?;
//!
//! let host = Host::init(config, transport).await?;
//! host.on("alert", |event| {
//!     println!("alert: {event:?}");
//!     Ok(())
//! });
//! let status = host.request("terminal.status", json!({})).await?;
//! println!("{status}");
//! host.destroy();
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;

use crate::channel::core::ChannelCore;
use crate::channel::{
    ChannelHandle, ChannelState, DiagnosticsSnapshot, HostConfig, Origin, RequestClass,
};
use crate::error::Result;
use crate::identifiers::{MessageId, SubscriptionId};
use crate::protocol::{ChannelEvent, Features, ResponseError};
use crate::transport::Transport;

// ============================================================================
// Host
// ============================================================================

/// Owner of a channel to an embedded Client frame.
///
/// Dropping the Host destroys the channel.
#[derive(Debug)]
pub struct Host {
    channel: ChannelHandle,
    expected_origin: Origin,
    container_target: Option<String>,
}

impl Host {
    /// Attaches to `transport` and runs the handshake.
    ///
    /// # Errors
    ///
    /// - [`Error::HandshakeRejected`](crate::Error::HandshakeRejected) if the
    ///   Client refused the credential or capabilities mismatched
    /// - [`Error::HandshakeTimeout`](crate::Error::HandshakeTimeout) if no
    ///   valid READY arrived in time
    pub async fn init(config: HostConfig, transport: impl Transport) -> Result<Self> {
        let host = Self::attach(config, transport);
        host.establish().await?;
        Ok(host)
    }

    /// Attaches to `transport` without starting the handshake.
    ///
    /// Lets handlers be registered before any traffic flows. Must be called
    /// inside a tokio runtime.
    #[must_use]
    pub fn attach(config: HostConfig, transport: impl Transport) -> Self {
        let expected_origin = config.expected_origin().clone();
        let container_target = config.container_target().map(str::to_string);
        debug!(
            expected_origin = %expected_origin,
            container = container_target.as_deref().unwrap_or("-"),
            "Attaching host"
        );

        Self {
            channel: ChannelCore::spawn_host(config, Box::new(transport)),
            expected_origin,
            container_target,
        }
    }

    /// Runs the handshake.
    ///
    /// From UNINITIALIZED this is the initial handshake; from CLOSED it
    /// re-establishes the session on the same transport. Returns at once if
    /// already connected.
    ///
    /// # Errors
    ///
    /// - [`Error::HandshakeRejected`](crate::Error::HandshakeRejected) or
    ///   [`Error::HandshakeTimeout`](crate::Error::HandshakeTimeout) as for
    ///   [`init`](Self::init)
    /// - [`Error::Protocol`](crate::Error::Protocol) if a handshake is
    ///   already in flight
    /// - [`Error::ChannelClosed`](crate::Error::ChannelClosed) after
    ///   [`destroy`](Self::destroy) or once the transport ended
    pub async fn establish(&self) -> Result<()> {
        self.channel.establish().await
    }

    // ========================================================================
    // Traffic
    // ========================================================================

    /// Sends a REQUEST with the default timeout.
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

    /// Answers a REQUEST from the Client.
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

    /// Sends an EVENT.
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

    /// Origin of the connected Client frame.
    #[must_use]
    pub fn peer_origin(&self) -> Option<Origin> {
        self.channel.peer_origin()
    }

    /// Configured Client origin.
    #[inline]
    #[must_use]
    pub fn expected_origin(&self) -> &Origin {
        &self.expected_origin
    }

    /// Embedding surface label, if configured.
    #[inline]
    #[must_use]
    pub fn container_target(&self) -> Option<&str> {
        self.container_target.as_deref()
    }

    /// Features the Client accepted.
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

    /// Tears the channel down.
    ///
    /// Pending requests fail with
    /// [`Error::ChannelClosed`](crate::Error::ChannelClosed) and timers stop.
    /// The channel cannot be re-established afterwards.
    pub fn destroy(&self) {
        self.channel.close();
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        self.channel.close();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use parking_lot::Mutex;
    use serde_json::json;

    use crate::channel::{CloseReason, HeartbeatConfig, HostConfigBuilder};
    use crate::error::Error;
    use crate::identifiers::Nonce;
    use crate::protocol::{
        ErrorPayload, EventPayload, MessageSigner, MessageType, PROTOCOL_VERSION, Payload,
        ReadyPayload, RequestPayload, ResponsePayload, TOPIC_CHANNEL_CLOSED,
        TOPIC_CONNECTION_LOST, TOPIC_CONNECTION_RESTORED,
    };
    use crate::test_support::{
        CLIENT_ORIGIN, CREDENTIAL, FakePeer, HOST_ORIGIN, count_topic, load,
    };
    use crate::transport::{FrameInjector, MemoryTransport};

    fn config() -> HostConfigBuilder {
        HostConfig::builder()
            .credential(CREDENTIAL)
            .expected_origin(CLIENT_ORIGIN)
            .feature("alerts", true)
    }

    fn attached(builder: HostConfigBuilder) -> (Host, FakePeer, FrameInjector) {
        let (host_end, peer_end) = MemoryTransport::pair(HOST_ORIGIN, CLIENT_ORIGIN);
        let injector = host_end.injector();
        let host = Host::attach(builder.build().expect("config"), host_end);
        (host, FakePeer::new(peer_end), injector)
    }

    async fn connected(builder: HostConfigBuilder) -> (Host, FakePeer, FrameInjector) {
        let (host, mut peer, injector) = attached(builder);
        let (result, _) = tokio::join!(host.establish(), peer.accept_handshake());
        result.expect("handshake");
        (host, peer, injector)
    }

    /// Round-trips an unhandled request so every earlier frame has been
    /// processed by the host.
    async fn sync(peer: &mut FakePeer) {
        let request = Payload::Request(RequestPayload::new("test.sync", json!({})));
        let sent = peer.send(request, None).await;
        loop {
            let (message, _) = peer.recv().await;
            if message.kind == MessageType::Response && message.id == sent.id {
                return;
            }
        }
    }

    fn event(name: &str) -> Payload {
        Payload::Event(EventPayload {
            name: name.into(),
            data: json!({"severity": "high"}),
        })
    }

    // ------------------------------------------------------------------------
    // Handshake
    // ------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_handshake_connects_and_pins_origin() {
        let (host, mut peer, _) = attached(config());
        assert_eq!(host.state(), ChannelState::Uninitialized);

        let (result, handshake) = tokio::join!(host.establish(), peer.accept_handshake());
        result.expect("handshake");

        assert_eq!(handshake.credential.expose(), CREDENTIAL);
        assert_eq!(handshake.version, PROTOCOL_VERSION);
        assert_eq!(handshake.heartbeat_interval_ms, 10_000);
        assert_eq!(host.state(), ChannelState::Connected);
        assert_eq!(
            host.peer_origin().map(|o| o.to_string()).as_deref(),
            Some(CLIENT_ORIGIN)
        );
        assert_eq!(host.features().get("alerts"), Some(&true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_establish_is_idempotent_when_connected() {
        let (host, _peer, _) = connected(config()).await;
        host.establish().await.expect("already connected");
        assert_eq!(host.state(), ChannelState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mismatched_nonce_times_out() {
        let (host, mut peer, _) = attached(config().handshake_timeout(Duration::from_secs(5)));
        let channel = host.handle();
        let attempt = tokio::spawn(async move { channel.establish().await });

        let (_, payload) = peer.recv().await;
        assert!(matches!(payload, Payload::Handshake(_)));
        assert_eq!(host.state(), ChannelState::Handshaking);

        for nonce in [Some(Nonce::from("n-wrong")), None] {
            let ready = ReadyPayload {
                nonce,
                version: PROTOCOL_VERSION,
                features: Default::default(),
            };
            peer.send(Payload::Ready(ready), None).await;
        }

        let result = attempt.await.expect("join");
        assert!(matches!(result, Err(Error::HandshakeTimeout { timeout_ms: 5000 })));
        assert_eq!(host.state(), ChannelState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_with_nonce_fails_handshake() {
        let (host, mut peer, _) = attached(config());
        let closed = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&closed);
        host.on(TOPIC_CHANNEL_CLOSED, move |event| {
            if let ChannelEvent::Closed { reason } = event {
                seen.lock().push(*reason);
            }
            Ok(())
        });

        let script = async {
            let (_, payload) = peer.recv().await;
            let Payload::Handshake(handshake) = payload else {
                panic!("expected HANDSHAKE");
            };
            let error = ErrorPayload::handshake_rejected(handshake.nonce, "invalid credential format");
            peer.send(Payload::Error(error), None).await;
        };
        let (result, ()) = tokio::join!(host.establish(), script);

        match result {
            Err(Error::HandshakeRejected { reason }) => {
                assert_eq!(reason, "invalid credential format");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        assert_eq!(host.state(), ChannelState::Closed);
        assert_eq!(*closed.lock(), vec![CloseReason::HandshakeRejected]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_version_mismatch_rejected() {
        let (host, mut peer, _) = attached(config());
        let script = async {
            let (_, payload) = peer.recv().await;
            let Payload::Handshake(handshake) = payload else {
                panic!("expected HANDSHAKE");
            };
            let ready = ReadyPayload {
                nonce: Some(handshake.nonce),
                version: PROTOCOL_VERSION + 1,
                features: Default::default(),
            };
            peer.send(Payload::Ready(ready), None).await;
        };
        let (result, ()) = tokio::join!(host.establish(), script);
        assert!(matches!(result, Err(Error::HandshakeRejected { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_before_connect_refused() {
        let (host, _peer, _) = attached(config());
        let result = host.request("terminal.status", json!({})).await;
        assert!(matches!(
            result,
            Err(Error::NotConnected {
                state: ChannelState::Uninitialized
            })
        ));
    }

    // ------------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_request_resolves_with_result() {
        let (host, mut peer, _) = connected(config()).await;

        let script = async {
            let (message, payload) = peer.recv().await;
            let Payload::Request(request) = payload else {
                panic!("expected REQUEST");
            };
            assert_eq!(request.kind, "insights.sentiment");
            assert_eq!(request.body, json!({"window": "24h"}));
            peer.send(
                Payload::Response(ResponsePayload::success(json!({"score": 0.82}))),
                message.id,
            )
            .await;
        };
        let (result, ()) = tokio::join!(
            host.request("insights.sentiment", json!({"window": "24h"})),
            script
        );

        assert_eq!(result.expect("response"), json!({"score": 0.82}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_error_surfaces() {
        let (host, mut peer, _) = connected(config()).await;

        let script = async {
            let (message, _) = peer.recv().await;
            let failure = ResponsePayload::failure(ResponseError::new("not_found", "no report"));
            peer.send(Payload::Response(failure), message.id).await;
        };
        let (result, ()) = tokio::join!(host.request("reports.get", json!({})), script);

        match result {
            Err(Error::Remote { code, message }) => {
                assert_eq!(code, "not_found");
                assert_eq!(message, "no report");
            }
            other => panic!("expected remote error, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_affects_only_that_request() {
        let (host, mut peer, _) = connected(config()).await;

        let script = async {
            let (slow, _) = peer.recv().await;
            let (fast, _) = peer.recv().await;
            peer.send(Payload::Response(ResponsePayload::success(json!("fast"))), fast.id)
                .await;
            slow.id
        };
        let (slow, fast, slow_id) = tokio::join!(
            host.request_with_timeout("slow", json!({}), Duration::from_millis(500)),
            host.request_with_timeout("fast", json!({}), Duration::from_secs(5)),
            script
        );

        match slow {
            Err(Error::RequestTimeout { request_id, timeout_ms }) => {
                assert_eq!(Some(request_id), slow_id);
                assert_eq!(timeout_ms, 500);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(fast.expect("fast"), json!("fast"));
        assert_eq!(host.state(), ChannelState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_timeout_keeps_channel_running() {
        let (host, mut peer, _) = connected(config()).await;
        let channel = host.handle();
        let forever = tokio::spawn(async move {
            channel
                .request_with_timeout("reports.export", json!({}), Duration::MAX)
                .await
        });
        let (export, _) = peer.recv().await;

        let script = async {
            let (message, _) = peer.recv().await;
            peer.send(Payload::Response(ResponsePayload::success(json!("ok"))), message.id)
                .await;
        };
        let (status, ()) = tokio::join!(host.request("terminal.status", json!({})), script);
        assert_eq!(status.expect("response"), json!("ok"));
        assert_eq!(host.state(), ChannelState::Connected);

        peer.send(Payload::Response(ResponsePayload::success(json!("done"))), export.id)
            .await;
        let result = forever.await.expect("join");
        assert_eq!(result.expect("response"), json!("done"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_class_timeout() {
        let (host, mut peer, _) = connected(config()).await;
        let start = tokio::time::Instant::now();

        let (result, _) = tokio::join!(
            host.request_with_class("terminal.status", json!({}), RequestClass::Status),
            peer.recv()
        );

        assert!(result.expect_err("timeout").is_timeout());
        assert_eq!(start.elapsed(), RequestClass::Status.timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_response_resolves_once() {
        let (host, mut peer, _) = connected(config()).await;

        let script = async {
            let (request, _) = peer.recv().await;
            let response = Payload::Response(ResponsePayload::success(json!(1)));
            let first = peer.send(response.clone(), request.id.clone()).await;
            // Same frame delivered twice.
            peer.send_message(&first).await;
            // Same id, fresh sequence.
            peer.send(Payload::Response(ResponsePayload::success(json!(2))), request.id)
                .await;
        };
        let (result, ()) = tokio::join!(host.request("q", json!({})), script);
        assert_eq!(result.expect("response"), json!(1));

        sync(&mut peer).await;
        let diagnostics = host.diagnostics();
        assert_eq!(diagnostics.replayed, 1);
        assert_eq!(diagnostics.unmatched_responses, 1);
        assert_eq!(host.state(), ChannelState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_response_ignored() {
        let (host, mut peer, _) = connected(config()).await;
        peer.send(
            Payload::Response(ResponsePayload::success(json!(null))),
            Some(MessageId::from("never-sent")),
        )
        .await;

        sync(&mut peer).await;
        assert_eq!(host.diagnostics().unmatched_responses, 1);
        assert_eq!(host.state(), ChannelState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_limit() {
        let (host, mut peer, _) = connected(config().max_pending_requests(1)).await;
        let channel = host.handle();
        let first = tokio::spawn(async move { channel.request("first", json!({})).await });
        peer.recv().await;

        let second = host.request("second", json!({})).await;
        assert!(matches!(
            second,
            Err(Error::TooManyPendingRequests { pending: 1, max: 1 })
        ));

        host.destroy();
        assert!(matches!(first.await.expect("join"), Err(Error::ChannelClosed)));
    }

    // ------------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_destroy_rejects_all_pending_and_stops_timers() {
        let (host, mut peer, _) = connected(config()).await;

        let tasks: Vec<_> = (0..3)
            .map(|i| {
                let channel = host.handle();
                tokio::spawn(async move { channel.request(format!("q{i}"), json!({})).await })
            })
            .collect();
        for _ in 0..3 {
            let (_, payload) = peer.recv().await;
            assert!(matches!(payload, Payload::Request(_)));
        }

        host.destroy();
        for task in tasks {
            assert!(matches!(task.await.expect("join"), Err(Error::ChannelClosed)));
        }
        assert_eq!(host.state(), ChannelState::Closed);

        tokio::time::advance(Duration::from_secs(300)).await;
        assert!(peer.try_next().await.is_none());
        assert!(matches!(host.establish().await, Err(Error::ChannelClosed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_closes_transport() {
        let (host, mut peer, _) = connected(config()).await;
        drop(host);
        assert!(peer.try_next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_end_closes_channel() {
        let (host, peer, _) = connected(config()).await;
        let outstanding = host.handle();
        let pending = tokio::spawn(async move { outstanding.request("q", json!({})).await });
        tokio::task::yield_now().await;

        drop(peer);
        host.wait_for_state(ChannelState::Closed).await.expect("closed");
        assert!(matches!(pending.await.expect("join"), Err(Error::ChannelClosed)));
    }

    // ------------------------------------------------------------------------
    // Inbound filtering and routing
    // ------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_foreign_origin_never_dispatched() {
        let (host, mut peer, injector) = connected(config()).await;
        let alerts = count_topic(&host.handle(), "alert");

        let mut forged = peer.envelope(&event("alert"), None);
        forged.sequence = 10_000;
        injector.post("https://evil.example.com", forged.to_json().expect("encode"));
        injector.post("*", forged.to_json().expect("encode"));

        peer.send(event("alert"), None).await;
        sync(&mut peer).await;

        assert_eq!(load(&alerts), 1);
        assert_eq!(host.diagnostics().origin_rejected, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replayed_event_dropped() {
        let (host, mut peer, _) = connected(config()).await;
        let alerts = count_topic(&host.handle(), "alert");

        let first = peer.send(event("alert"), None).await;
        peer.send_message(&first).await;
        sync(&mut peer).await;

        assert_eq!(load(&alerts), 1);
        assert_eq!(host.diagnostics().replayed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_frames_counted() {
        let (host, mut peer, _) = connected(config()).await;

        peer.send_raw("not json").await;
        peer.send_raw(r#"["array"]"#).await;
        peer.send_raw(r#"{"type":"REQUEST","sequence":99,"timestamp":1}"#).await;
        sync(&mut peer).await;

        assert_eq!(host.diagnostics().malformed, 3);
        assert_eq!(host.state(), ChannelState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_and_unknown_types_routed() {
        let (host, mut peer, _) = connected(config()).await;
        let alerts = count_topic(&host.handle(), "alert");
        let terminal = count_topic(&host.handle(), "TERMINAL_READY");
        let errors = count_topic(&host.handle(), "error");

        peer.send(event("alert"), None).await;
        peer.send(
            Payload::Other {
                kind: "TERMINAL_READY".into(),
                payload: None,
            },
            None,
        )
        .await;
        peer.send(
            Payload::Error(ErrorPayload {
                code: "quota".into(),
                message: "slow down".into(),
                nonce: None,
            }),
            None,
        )
        .await;
        sync(&mut peer).await;

        assert_eq!(load(&alerts), 1);
        assert_eq!(load(&terminal), 1);
        assert_eq!(load(&errors), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_off_stops_delivery() {
        let (host, mut peer, _) = connected(config()).await;
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let id = host.on("alert", move |_| {
            seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        });

        peer.send(event("alert"), None).await;
        sync(&mut peer).await;
        assert!(host.off(id));
        peer.send(event("alert"), None).await;
        sync(&mut peer).await;

        assert_eq!(load(&count), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unhandled_request_answered_with_error() {
        let (_host, mut peer, _) = connected(config()).await;

        let request = Payload::Request(RequestPayload::new("unknown.kind", json!({})));
        let sent = peer.send(request, None).await;
        let (message, payload) = peer.recv().await;

        assert_eq!(message.id, sent.id);
        let Payload::Response(response) = payload else {
            panic!("expected RESPONSE");
        };
        assert_eq!(
            response.error.map(|e| e.code).as_deref(),
            Some(ResponseError::UNHANDLED_REQUEST)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_answers_client_request() {
        let (host, mut peer, _) = connected(config()).await;
        let channel = host.handle();
        host.on("pos.cart", move |event| {
            if let ChannelEvent::Request(request) = event {
                channel.respond(&request.id, Ok(json!({"items": 3})))?;
            }
            Ok(())
        });

        let request = Payload::Request(RequestPayload::new("pos.cart", json!({})));
        let sent = peer.send(request, None).await;
        let (message, payload) = peer.recv().await;

        assert_eq!(message.id, sent.id);
        assert_eq!(
            payload,
            Payload::Response(ResponsePayload::success(json!({"items": 3})))
        );
        assert!(matches!(
            host.respond(&message.id.expect("id"), Ok(json!(null))),
            Err(Error::UnknownRequest { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_inbound_request_not_answerable() {
        let heartbeat = HeartbeatConfig::new(Duration::from_secs(3600));
        let (host, mut peer, _) = connected(config().heartbeat(heartbeat)).await;
        host.on("reports.export", |_| Ok(()));

        let request = Payload::Request(RequestPayload::new("reports.export", json!({})));
        let stale = peer.send(request.clone(), None).await;
        sync(&mut peer).await;

        tokio::time::advance(Duration::from_secs(121)).await;
        let fresh = peer.send(request, None).await;
        sync(&mut peer).await;

        assert!(matches!(
            host.respond(&stale.id.expect("id"), Ok(json!(null))),
            Err(Error::UnknownRequest { .. })
        ));
        host.respond(&fresh.id.clone().expect("id"), Ok(json!({"rows": 0})))
            .expect("fresh request answerable");

        let (message, payload) = peer.recv().await;
        assert_eq!(message.id, fresh.id);
        assert_eq!(
            payload,
            Payload::Response(ResponsePayload::success(json!({"rows": 0})))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_emit_reaches_peer() {
        let (host, mut peer, _) = connected(config()).await;
        host.emit("state:update", json!({"cart": 2})).await.expect("emit");

        let (_, payload) = peer.recv().await;
        assert_eq!(
            payload,
            Payload::Event(EventPayload {
                name: "state:update".into(),
                data: json!({"cart": 2}),
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_outbound_sequences_increase() {
        let (host, mut peer, _) = connected(config()).await;
        host.emit("a", json!({})).await.expect("emit");
        host.emit("b", json!({})).await.expect("emit");

        let (a, _) = peer.recv().await;
        let (b, _) = peer.recv().await;
        assert!(b.sequence > a.sequence);
        assert!(a.sequence > 1);
    }

    // ------------------------------------------------------------------------
    // Liveness
    // ------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_missed_heartbeats_degrade_then_ack_restores() {
        let heartbeat = HeartbeatConfig::new(Duration::from_secs(10));
        let (host, mut peer, _) = connected(config().heartbeat(heartbeat)).await;
        let lost = count_topic(&host.handle(), TOPIC_CONNECTION_LOST);
        let restored = count_topic(&host.handle(), TOPIC_CONNECTION_RESTORED);

        for _ in 0..3 {
            let (_, payload) = peer.next().await;
            assert_eq!(payload, Payload::Heartbeat);
            assert_eq!(host.state(), ChannelState::Connected);
        }

        // Fourth tick counts the third miss.
        let (_, payload) = peer.next().await;
        assert_eq!(payload, Payload::Heartbeat);
        assert_eq!(host.state(), ChannelState::Degraded);
        assert_eq!(load(&lost), 1);

        let (beat, _) = peer.next().await;
        assert_eq!(load(&lost), 1);

        peer.send(Payload::HeartbeatAck, beat.id.clone()).await;
        host.wait_for_state(ChannelState::Connected).await.expect("restored");
        assert_eq!(load(&restored), 1);

        peer.send(Payload::HeartbeatAck, beat.id).await;
        sync(&mut peer).await;
        assert_eq!(load(&restored), 1);
        assert_eq!(load(&lost), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_allowed_while_degraded() {
        let heartbeat = HeartbeatConfig::new(Duration::from_secs(1)).with_missed_threshold(1);
        let (host, mut peer, _) = connected(config().heartbeat(heartbeat)).await;

        peer.next().await;
        peer.next().await;
        assert_eq!(host.state(), ChannelState::Degraded);

        host.emit("still-here", json!({})).await.expect("emit while degraded");
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_expiry_closes_then_reestablish() {
        let heartbeat = HeartbeatConfig::new(Duration::from_secs(10))
            .with_grace_period(Duration::from_secs(60));
        let (host, mut peer, _) = connected(config().heartbeat(heartbeat)).await;

        let reasons = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&reasons);
        host.on(TOPIC_CHANNEL_CLOSED, move |event| {
            if let ChannelEvent::Closed { reason } = event {
                seen.lock().push(*reason);
            }
            Ok(())
        });

        let start = tokio::time::Instant::now();
        host.wait_for_state(ChannelState::Closed).await.expect("closed");
        assert_eq!(start.elapsed(), Duration::from_secs(100));
        assert_eq!(*reasons.lock(), vec![CloseReason::PeerLost]);

        let (result, _) = tokio::join!(host.establish(), peer.accept_handshake());
        result.expect("re-established");
        assert_eq!(host.state(), ChannelState::Connected);
    }

    // ------------------------------------------------------------------------
    // Signing
    // ------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_signed_channel_drops_tampered_frames() {
        let key = "shared-secret";
        let (host_end, peer_end) = MemoryTransport::pair(HOST_ORIGIN, CLIENT_ORIGIN);
        let host = Host::attach(config().signing_key(key).build().expect("config"), host_end);
        let signer = MessageSigner::new(key).expect("signer");
        let mut peer = FakePeer::new(peer_end).with_signer(signer.clone());

        let (result, _) = tokio::join!(host.establish(), peer.accept_handshake());
        result.expect("handshake");
        let alerts = count_topic(&host.handle(), "alert");

        let mut tampered = peer.envelope(&event("alert"), None);
        tampered.payload = Some(json!({"name": "alert", "data": {"severity": "low"}}));
        peer.send_message(&tampered).await;
        peer.send(event("alert"), None).await;

        let emitted = host.emit("ping", json!({}));
        let (sent, (message, _)) = tokio::join!(emitted, peer.recv());
        sent.expect("emit");
        assert!(signer.verify(&message));

        sync(&mut peer).await;
        assert_eq!(load(&alerts), 1);
        assert_eq!(host.diagnostics().malformed, 1);
    }
}
