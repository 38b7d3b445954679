//! Channel event loop.
//!
//! Every channel runs as one tokio task that exclusively owns the session:
//! transport, validator, correlator, liveness state and outbound sequence.
//! [`ChannelHandle`]s talk to it over an unbounded command channel and read
//! its state through a `watch`.
//!
//! ```text
//! ChannelHandle ──Command──► ChannelCore ──OutboundFrame──► Transport
//!       ▲                      │   ▲
//!       └──watch<State>────────┘   └──InboundFrame── Transport
//! ```
//!
//! All timers (handshake deadline, request deadlines, heartbeat, passive
//! liveness check) collapse into one `sleep_until` branch recomputed on
//! every iteration, so leaving a state drops its timers with it.

// ============================================================================
// Imports
// ============================================================================

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, sleep_until};
use tracing::{Instrument, debug, debug_span, info, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{MessageId, Nonce, SubscriptionId};
use crate::protocol::{
    ChannelEvent, ErrorPayload, EventPayload, Features, HandshakePayload, InboundRequest,
    Message, MessageSigner, PROTOCOL_VERSION, Payload, ReadyPayload, RequestPayload,
    ResponseError, ResponsePayload,
};
use crate::transport::{InboundFrame, OutboundFrame, Transport};

use super::config::{ClientConfig, HostConfig, RequestClass};
use super::correlator::{Correlator, Reply};
use super::diagnostics::{Diagnostics, DiagnosticsSnapshot};
use super::dispatcher::{Dispatcher, RouteOutcome};
use super::monitor::{
    DEFAULT_MISSED_THRESHOLD, LivenessMonitor, LivenessVerdict, PassiveChange, PassiveLiveness,
    deadline_after,
};
use super::origin::Origin;
use super::state::{ChannelState, CloseReason};
use super::validator::{InboundValidator, Rejection};

// ============================================================================
// Constants
// ============================================================================

/// How long an inbound REQUEST stays answerable.
///
/// Matches the longest [`RequestClass`] timeout; the peer has given up by then.
const INBOUND_RESPONSE_WINDOW: Duration = Duration::from_secs(120);

// ============================================================================
// Types
// ============================================================================

/// Commands sent from handles to the channel task.
pub(crate) enum Command {
    /// Start a handshake (Host only).
    Establish {
        reply: oneshot::Sender<Result<()>>,
    },
    /// Send a REQUEST and await its RESPONSE.
    Request {
        kind: String,
        body: Value,
        timeout: Duration,
        reply: Reply,
    },
    /// Answer an inbound REQUEST.
    Respond {
        id: MessageId,
        payload: ResponsePayload,
    },
    /// Send an EVENT.
    Emit {
        name: String,
        data: Value,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Tear the channel down.
    Close,
}

/// Which end of the channel this task plays.
enum Side {
    Host(Arc<HostConfig>),
    Client(Arc<ClientConfig>),
}

impl Side {
    fn name(&self) -> &'static str {
        match self {
            Self::Host(_) => "host",
            Self::Client(_) => "client",
        }
    }
}

/// An in-flight handshake: a Host attempt (with nonce) or a Client waiting
/// for the Host's HANDSHAKE.
struct PendingHandshake {
    nonce: Option<Nonce>,
    deadline: Instant,
    timeout: Duration,
    reply: Option<oneshot::Sender<Result<()>>>,
}

/// Session facts learned from the handshake.
#[derive(Debug, Default)]
struct Session {
    peer_origin: Option<Origin>,
    features: Features,
}

/// State shared between the channel task and its handles.
pub(crate) struct Shared {
    dispatcher: Dispatcher,
    diagnostics: Diagnostics,
    /// Inbound requests not yet answered, with the instant they go stale.
    awaiting: Mutex<FxHashMap<MessageId, Instant>>,
    session: RwLock<Session>,
}

impl Shared {
    /// Records an inbound request as answerable, dropping stale entries.
    fn await_answer(&self, id: MessageId, now: Instant) {
        let mut awaiting = self.awaiting.lock();
        awaiting.retain(|_, stale_at| *stale_at > now);
        awaiting.insert(id, deadline_after(now, INBOUND_RESPONSE_WINDOW));
    }

    /// Claims the right to answer `id`. False if unknown, taken, or stale.
    fn take_answerable(&self, id: &MessageId, now: Instant) -> bool {
        self.awaiting
            .lock()
            .remove(id)
            .is_some_and(|stale_at| stale_at > now)
    }
}

// ============================================================================
// ChannelCore
// ============================================================================

/// The channel task.
pub(crate) struct ChannelCore {
    side: Side,
    transport: Box<dyn Transport>,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ChannelState>,
    shared: Arc<Shared>,
    validator: InboundValidator,
    correlator: Correlator,
    signer: Option<MessageSigner>,
    next_sequence: u64,
    handshake: Option<PendingHandshake>,
    monitor: Option<LivenessMonitor>,
    passive: Option<PassiveLiveness>,
}

impl ChannelCore {
    /// Spawns a Host channel in UNINITIALIZED.
    pub(crate) fn spawn_host(config: HostConfig, transport: Box<dyn Transport>) -> ChannelHandle {
        let expected = config.expected_origin.clone();
        let signer = config.signer.clone();
        let max_pending = config.max_pending_requests;
        let request_timeout = config.request_timeout;

        let (core, handle) = Self::new(
            Side::Host(Arc::new(config)),
            transport,
            expected,
            signer,
            max_pending,
            request_timeout,
        );
        core.start();
        handle
    }

    /// Spawns a Client channel waiting in HANDSHAKING for the Host.
    ///
    /// The receiver completes once a valid HANDSHAKE was answered.
    pub(crate) fn spawn_client(
        config: ClientConfig,
        transport: Box<dyn Transport>,
    ) -> (ChannelHandle, oneshot::Receiver<Result<()>>) {
        let expected = config.host_origin.clone();
        let signer = config.signer.clone();
        let max_pending = config.max_pending_requests;
        let request_timeout = config.request_timeout;
        let accept_timeout = config.handshake_timeout;

        let (mut core, handle) = Self::new(
            Side::Client(Arc::new(config)),
            transport,
            expected,
            signer,
            max_pending,
            request_timeout,
        );

        let (tx, rx) = oneshot::channel();
        core.handshake = Some(PendingHandshake {
            nonce: None,
            deadline: deadline_after(Instant::now(), accept_timeout),
            timeout: accept_timeout,
            reply: Some(tx),
        });
        core.set_state(ChannelState::Handshaking);
        core.start();
        (handle, rx)
    }

    fn new(
        side: Side,
        transport: Box<dyn Transport>,
        expected: Origin,
        signer: Option<MessageSigner>,
        max_pending: usize,
        request_timeout: Duration,
    ) -> (Self, ChannelHandle) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ChannelState::Uninitialized);
        let shared = Arc::new(Shared {
            dispatcher: Dispatcher::new(),
            diagnostics: Diagnostics::default(),
            awaiting: Mutex::new(FxHashMap::default()),
            session: RwLock::new(Session::default()),
        });

        let core = Self {
            side,
            transport,
            commands: command_rx,
            state: state_tx,
            shared: Arc::clone(&shared),
            validator: InboundValidator::new(expected, signer.clone()),
            correlator: Correlator::new(max_pending),
            signer,
            next_sequence: 1,
            handshake: None,
            monitor: None,
            passive: None,
        };

        let handle = ChannelHandle {
            commands: command_tx,
            state: state_rx,
            shared,
            request_timeout,
        };

        (core, handle)
    }

    fn start(self) {
        let span = debug_span!("channel", side = self.side.name());
        tokio::spawn(self.run().instrument(span));
    }

    // ========================================================================
    // Event Loop
    // ========================================================================

    async fn run(mut self) {
        debug!("Channel task started");

        loop {
            let wake = self.next_wake(Instant::now());

            tokio::select! {
                frame = self.transport.recv() => match frame {
                    Some(frame) => self.on_frame(frame).await,
                    None => {
                        debug!("Transport ended");
                        self.close(CloseReason::TransportClosed);
                        break;
                    }
                },

                command = self.commands.recv() => match command {
                    Some(Command::Close) => {
                        self.close(CloseReason::Destroyed);
                        break;
                    }
                    Some(command) => self.on_command(command).await,
                    None => {
                        debug!("All channel handles dropped");
                        self.close(CloseReason::Destroyed);
                        break;
                    }
                },

                () = sleep_until_opt(wake) => self.on_timer().await,
            }
        }

        self.transport.close().await;
        debug!("Channel task terminated");
    }

    fn next_wake(&self, now: Instant) -> Option<Instant> {
        [
            self.handshake.as_ref().map(|h| h.deadline),
            self.correlator.next_deadline(),
            self.monitor.as_ref().map(LivenessMonitor::next_beat_at),
            self.passive.as_ref().map(|p| p.next_check_at(now)),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    async fn on_timer(&mut self) {
        let now = Instant::now();

        if self.handshake.as_ref().is_some_and(|h| h.deadline <= now) {
            let timeout_ms = self
                .handshake
                .as_ref()
                .map_or(0, |h| h.timeout.as_millis() as u64);
            warn!(timeout_ms, "Handshake timed out");
            self.fail_handshake(
                Error::handshake_timeout(timeout_ms),
                CloseReason::HandshakeTimeout,
            );
            return;
        }

        self.correlator.expire(now);

        if self.monitor.as_ref().is_some_and(|m| m.next_beat_at() <= now) {
            self.on_heartbeat_tick(now).await;
        }

        let lost = self
            .passive
            .as_mut()
            .and_then(|passive| passive.check(now))
            == Some(PassiveChange::Lost);
        if lost {
            self.on_lost(DEFAULT_MISSED_THRESHOLD);
        }
    }

    // ========================================================================
    // Commands
    // ========================================================================

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Establish { reply } => self.on_establish(reply).await,

            Command::Request {
                kind,
                body,
                timeout,
                reply,
            } => self.on_send_request(kind, body, timeout, reply).await,

            Command::Respond { id, payload } => {
                if self.state().accepts_traffic() {
                    self.respond(id, payload).await;
                } else {
                    debug!(request_id = %id, state = %self.state(), "Dropping response, channel not connected");
                }
            }

            Command::Emit { name, data, reply } => {
                let result = if self.state().accepts_traffic() {
                    trace!(%name, "Emitting event");
                    self.send(Payload::Event(EventPayload { name, data }), None)
                        .await
                        .map(|_| ())
                } else {
                    Err(Error::not_connected(self.state()))
                };
                let _ = reply.send(result);
            }

            // Handled by the event loop.
            Command::Close => {}
        }
    }

    async fn on_send_request(&mut self, kind: String, body: Value, timeout: Duration, reply: Reply) {
        let state = self.state();
        if !state.accepts_traffic() {
            let _ = reply.send(Err(Error::not_connected(state)));
            return;
        }

        let id = MessageId::generate();
        if let Err((reply, e)) = self.correlator.register(id.clone(), kind.clone(), timeout, reply) {
            let _ = reply.send(Err(e));
            return;
        }

        let payload = Payload::Request(RequestPayload::new(kind, body));
        if let Err(e) = self.send(payload, Some(id.clone())).await {
            warn!(request_id = %id, error = %e, "Failed to send request");
            self.correlator.fail(&id, e);
        }
    }

    async fn on_establish(&mut self, reply: oneshot::Sender<Result<()>>) {
        let Side::Host(config) = &self.side else {
            let _ = reply.send(Err(Error::protocol("only the Host initiates the handshake")));
            return;
        };
        let config = Arc::clone(config);

        match self.state() {
            ChannelState::Connected | ChannelState::Degraded => {
                let _ = reply.send(Ok(()));
                return;
            }
            ChannelState::Handshaking => {
                let _ = reply.send(Err(Error::protocol("handshake already in progress")));
                return;
            }
            ChannelState::Uninitialized | ChannelState::Closed => {}
        }

        self.validator.unpin();
        *self.shared.session.write() = Session::default();

        let nonce = Nonce::generate();
        let payload = Payload::Handshake(HandshakePayload {
            credential: config.credential.clone(),
            version: PROTOCOL_VERSION,
            nonce: nonce.clone(),
            features: config.features.clone(),
            heartbeat_interval_ms: config.heartbeat.interval.as_millis() as u64,
        });

        self.set_state(ChannelState::Handshaking);
        self.handshake = Some(PendingHandshake {
            nonce: Some(nonce.clone()),
            deadline: deadline_after(Instant::now(), config.handshake_timeout),
            timeout: config.handshake_timeout,
            reply: Some(reply),
        });

        debug!(
            credential = %config.credential,
            %nonce,
            target = %config.expected_origin,
            container = config.container_target().unwrap_or("-"),
            "Sending handshake"
        );
        if let Err(e) = self.send(payload, None).await {
            warn!(error = %e, "Failed to send handshake");
            self.fail_handshake(e, CloseReason::TransportClosed);
        }
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    async fn on_frame(&mut self, frame: InboundFrame) {
        if self.state().is_closed() {
            trace!(origin = %frame.origin, "Dropping frame on closed channel");
            return;
        }

        let (message, payload) = match self.validator.validate(&frame) {
            Ok(accepted) => accepted,
            Err(rejection) => {
                self.on_rejection(&frame, &rejection);
                return;
            }
        };
        trace!(kind = %message.kind, sequence = message.sequence, "Frame accepted");

        let restored = self
            .passive
            .as_mut()
            .and_then(|passive| passive.on_inbound(Instant::now()))
            == Some(PassiveChange::Restored);
        if restored {
            self.on_restored();
        }

        match payload {
            Payload::Handshake(handshake) => self.on_handshake(handshake).await,
            Payload::Ready(ready) => self.on_ready(ready),
            Payload::Error(error) if self.is_handshake_rejection(&error) => {
                warn!(reason = %error.message, "Handshake rejected by peer");
                self.fail_handshake(
                    Error::handshake_rejected(error.message),
                    CloseReason::HandshakeRejected,
                );
            }
            Payload::Heartbeat => {
                if let Err(e) = self.send(Payload::HeartbeatAck, message.id).await {
                    warn!(error = %e, "Failed to acknowledge heartbeat");
                }
            }
            Payload::HeartbeatAck => self.on_heartbeat_ack(),
            _ if !self.state().accepts_traffic() => {
                debug!(kind = %message.kind, state = %self.state(), "Dropping message before connected");
            }
            Payload::Request(request) => self.on_request(message.id, request).await,
            Payload::Response(response) => self.on_response(message.id, response),
            Payload::Event(event) => {
                self.route(&ChannelEvent::Event {
                    name: event.name,
                    data: event.data,
                });
            }
            Payload::Error(error) => {
                debug!(code = %error.code, "Peer reported error");
                self.route(&ChannelEvent::Error {
                    code: error.code,
                    message: error.message,
                });
            }
            Payload::Other { kind, payload } => {
                self.route(&ChannelEvent::Unknown { kind, payload });
            }
        }
    }

    fn on_rejection(&self, frame: &InboundFrame, rejection: &Rejection) {
        self.shared.diagnostics.record(rejection);
        match rejection {
            Rejection::OriginRejected { .. } => {
                trace!(origin = %frame.origin, "Frame from untrusted origin dropped");
            }
            Rejection::Malformed(e) => debug!(error = %e, "Malformed frame dropped"),
            Rejection::Replayed { sequence, last } => {
                warn!(sequence, last, "Replayed frame dropped");
            }
        }
    }

    /// Client: validate the Host's handshake and answer READY or ERROR.
    async fn on_handshake(&mut self, handshake: HandshakePayload) {
        let Side::Client(config) = &self.side else {
            debug!("Unexpected HANDSHAKE ignored");
            return;
        };
        let config = Arc::clone(config);

        let refusal = if handshake.version == PROTOCOL_VERSION {
            config.check_credential(&handshake.credential)
        } else {
            Some("unsupported protocol version")
        };

        if let Some(reason) = refusal {
            self.shared.diagnostics.handshake_refused();
            warn!(credential = %handshake.credential, reason, "Handshake refused");
            let payload = Payload::Error(ErrorPayload::handshake_rejected(handshake.nonce, reason));
            if let Err(e) = self.send(payload, None).await {
                warn!(error = %e, "Failed to send handshake rejection");
            }
            return;
        }

        let origin = self.validator.trusted().clone();
        self.validator.pin(origin.clone());
        let features = config.negotiate(&handshake.features);

        let resumed = self.state().accepts_traffic();
        if resumed {
            let rejected = self.correlator.reject_all();
            self.shared.awaiting.lock().clear();
            debug!(rejected, "Host started a new session");
        }

        {
            let mut session = self.shared.session.write();
            session.peer_origin = Some(origin.clone());
            session.features = features.clone();
        }

        let ready = Payload::Ready(ReadyPayload {
            nonce: Some(handshake.nonce),
            version: PROTOCOL_VERSION,
            features,
        });
        if let Err(e) = self.send(ready, None).await {
            warn!(error = %e, "Failed to send READY");
            return;
        }

        self.passive = (handshake.heartbeat_interval_ms > 0).then(|| {
            let interval = Duration::from_millis(handshake.heartbeat_interval_ms);
            PassiveLiveness::new(
                interval,
                interval.saturating_mul(DEFAULT_MISSED_THRESHOLD),
                Instant::now(),
            )
        });

        if !resumed {
            self.set_state(ChannelState::Connected);
            if let Some(reply) = self.handshake.take().and_then(|h| h.reply) {
                let _ = reply.send(Ok(()));
            }
        }
        info!(peer_origin = %origin, "Channel connected");
    }

    /// Host: complete the handshake if the nonce matches.
    fn on_ready(&mut self, ready: ReadyPayload) {
        let Side::Host(config) = &self.side else {
            debug!("Unexpected READY ignored");
            return;
        };
        let heartbeat = config.heartbeat;

        let Some(expected) = self.handshake.as_ref().and_then(|h| h.nonce.as_ref()) else {
            debug!("READY outside a handshake ignored");
            return;
        };
        if ready.nonce.as_ref() != Some(expected) {
            debug!("READY with mismatched nonce ignored");
            return;
        }

        if ready.version != PROTOCOL_VERSION {
            warn!(version = ready.version, "Peer accepted an unsupported protocol version");
            self.fail_handshake(
                Error::handshake_rejected(format!(
                    "protocol version mismatch: expected {PROTOCOL_VERSION}, got {}",
                    ready.version
                )),
                CloseReason::HandshakeRejected,
            );
            return;
        }

        let origin = self.validator.trusted().clone();
        self.validator.pin(origin.clone());
        {
            let mut session = self.shared.session.write();
            session.peer_origin = Some(origin.clone());
            session.features = ready.features;
        }

        self.monitor = Some(LivenessMonitor::new(heartbeat, Instant::now()));
        self.set_state(ChannelState::Connected);
        info!(peer_origin = %origin, "Channel connected");

        if let Some(reply) = self.handshake.take().and_then(|h| h.reply) {
            let _ = reply.send(Ok(()));
        }
    }

    fn is_handshake_rejection(&self, error: &ErrorPayload) -> bool {
        error.code == ErrorPayload::HANDSHAKE_REJECTED
            && error.nonce.is_some()
            && self.handshake.as_ref().and_then(|h| h.nonce.as_ref()) == error.nonce.as_ref()
    }

    async fn on_request(&mut self, id: Option<MessageId>, request: RequestPayload) {
        let Some(id) = id else {
            return;
        };

        self.shared.await_answer(id.clone(), Instant::now());
        let event = ChannelEvent::Request(InboundRequest {
            id: id.clone(),
            kind: request.kind,
            body: request.body,
        });
        let outcome = self.route(&event);

        let unanswered = outcome.delivered == 0 || outcome.failed == outcome.delivered;
        if unanswered && self.shared.awaiting.lock().remove(&id).is_some() {
            let error = if outcome.delivered == 0 {
                ResponseError::new(
                    ResponseError::UNHANDLED_REQUEST,
                    format!("no handler for '{}'", event.topic()),
                )
            } else {
                ResponseError::new(ResponseError::HANDLER_FAILED, "request handler failed")
            };
            debug!(request_id = %id, code = %error.code, "Answering request automatically");
            self.respond(id, ResponsePayload::failure(error)).await;
        }
    }

    fn on_response(&mut self, id: Option<MessageId>, response: ResponsePayload) {
        let Some(id) = id else {
            return;
        };
        if !self.correlator.resolve(&id, response) {
            self.shared.diagnostics.unmatched_response();
            debug!(response_id = %id, "Response without pending request ignored");
        }
    }

    // ========================================================================
    // Liveness
    // ========================================================================

    async fn on_heartbeat_tick(&mut self, now: Instant) {
        let Some(monitor) = self.monitor.as_mut() else {
            return;
        };

        match monitor.on_tick(now) {
            LivenessVerdict::Healthy | LivenessVerdict::Degraded => {}
            LivenessVerdict::Lost { missed } => self.on_lost(missed),
            LivenessVerdict::Expired => {
                warn!("Degraded past grace period");
                self.close(CloseReason::PeerLost);
                return;
            }
        }

        let id = MessageId::generate();
        if let Some(monitor) = self.monitor.as_mut() {
            monitor.beat_sent(id.clone());
        }
        trace!(heartbeat_id = %id, "Sending heartbeat");
        if let Err(e) = self.send(Payload::Heartbeat, Some(id)).await {
            warn!(error = %e, "Failed to send heartbeat");
        }
    }

    fn on_heartbeat_ack(&mut self) {
        let restored = self
            .monitor
            .as_mut()
            .is_some_and(|monitor| monitor.on_ack(Instant::now()));
        if restored {
            self.on_restored();
        }
    }

    fn on_lost(&mut self, missed: u32) {
        if self.set_state(ChannelState::Degraded) {
            warn!(missed, "Peer unresponsive");
            self.route(&ChannelEvent::ConnectionLost {
                missed_heartbeats: missed,
            });
        }
    }

    fn on_restored(&mut self) {
        if self.state() == ChannelState::Degraded && self.set_state(ChannelState::Connected) {
            info!("Connection restored");
            self.route(&ChannelEvent::ConnectionRestored);
        }
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    /// Wraps `payload` in an envelope and sends it to the trusted origin.
    async fn send(&mut self, payload: Payload, id: Option<MessageId>) -> Result<MessageId> {
        let id = id.unwrap_or_else(MessageId::generate);
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let mut message = Message::with_id(payload.message_type(), id.clone(), sequence, payload.to_value()?);
        if let Some(signer) = &self.signer {
            signer.apply(&mut message);
        }

        let data = message.to_json()?;
        let target = self.validator.trusted().as_str().to_string();
        trace!(kind = %message.kind, message_id = %id, sequence, "Sending message");

        self.transport.send(OutboundFrame::new(target, data)).await?;
        Ok(id)
    }

    async fn respond(&mut self, id: MessageId, payload: ResponsePayload) {
        if let Err(e) = self.send(Payload::Response(payload), Some(id.clone())).await {
            warn!(request_id = %id, error = %e, "Failed to send response");
        }
    }

    // ========================================================================
    // State
    // ========================================================================

    fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Applies a legal transition. Returns `false` if nothing changed.
    fn set_state(&self, next: ChannelState) -> bool {
        let current = self.state();
        if current == next {
            return false;
        }
        if !current.can_transition(next) {
            warn!(from = %current, to = %next, "Illegal state transition ignored");
            return false;
        }

        debug!(from = %current, to = %next, "State transition");
        self.state.send_replace(next);
        true
    }

    fn route(&self, event: &ChannelEvent) -> RouteOutcome {
        let outcome = self.shared.dispatcher.route(event);
        for _ in 0..outcome.failed {
            self.shared.diagnostics.handler_failed();
        }
        outcome
    }

    fn fail_handshake(&mut self, error: Error, reason: CloseReason) {
        let reply = self.handshake.take().and_then(|h| h.reply);
        self.close(reason);
        if let Some(reply) = reply {
            let _ = reply.send(Err(error));
        }
    }

    /// Moves to CLOSED: rejects pending requests, drops timers and notifies
    /// handlers once.
    fn close(&mut self, reason: CloseReason) {
        if self.state().is_closed() {
            return;
        }

        self.set_state(ChannelState::Closed);
        self.monitor = None;
        self.passive = None;
        if let Some(reply) = self.handshake.take().and_then(|h| h.reply) {
            let _ = reply.send(Err(Error::ChannelClosed));
        }
        let rejected = self.correlator.reject_all();
        self.shared.awaiting.lock().clear();

        info!(%reason, rejected, "Channel closed");
        self.route(&ChannelEvent::Closed { reason });
    }
}

/// Sleeps until `deadline`, or forever without one.
async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

// ============================================================================
// ChannelHandle
// ============================================================================

/// Cloneable handle to a running channel.
///
/// Handles do not keep the channel open: it closes when its owning
/// [`Host`](crate::Host) or [`Client`](crate::Client) is dropped or
/// destroyed. Handler closures typically capture a handle to answer
/// requests.
#[derive(Clone)]
pub struct ChannelHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ChannelState>,
    shared: Arc<Shared>,
    request_timeout: Duration,
}

impl std::fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("state", &self.state())
            .field("peer_origin", &self.peer_origin())
            .finish_non_exhaustive()
    }
}

impl ChannelHandle {
    // ========================================================================
    // Requests
    // ========================================================================

    /// Sends a REQUEST with the default timeout and awaits the result.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] unless CONNECTED or DEGRADED
    /// - [`Error::RequestTimeout`] if no RESPONSE arrives in time
    /// - [`Error::Remote`] if the peer answered with an error
    /// - [`Error::ChannelClosed`] if the channel closes while pending
    /// - [`Error::TooManyPendingRequests`] at the pending limit
    pub async fn request(&self, kind: impl Into<String>, body: Value) -> Result<Value> {
        self.request_with_timeout(kind, body, self.request_timeout)
            .await
    }

    /// Sends a REQUEST with the timeout of `class`.
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request).
    pub async fn request_with_class(
        &self,
        kind: impl Into<String>,
        body: Value,
        class: RequestClass,
    ) -> Result<Value> {
        self.request_with_timeout(kind, body, class.timeout()).await
    }

    /// Sends a REQUEST with an explicit timeout.
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request).
    pub async fn request_with_timeout(
        &self,
        kind: impl Into<String>,
        body: Value,
        timeout: Duration,
    ) -> Result<Value> {
        let (reply, rx) = oneshot::channel();
        self.send_command(Command::Request {
            kind: kind.into(),
            body,
            timeout,
            reply,
        })?;
        rx.await.map_err(|_| Error::ChannelClosed)?
    }

    /// Answers an inbound REQUEST.
    ///
    /// Synchronous so handlers can call it directly.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] unless CONNECTED or DEGRADED
    /// - [`Error::UnknownRequest`] if `request_id` is not awaiting an answer
    ///   (never received, already answered, stale, or dropped on close)
    /// - [`Error::ChannelClosed`] if the channel task has ended
    pub fn respond(
        &self,
        request_id: &MessageId,
        result: std::result::Result<Value, ResponseError>,
    ) -> Result<()> {
        let state = self.state();
        if !state.accepts_traffic() {
            return Err(Error::not_connected(state));
        }
        if !self.shared.take_answerable(request_id, Instant::now()) {
            return Err(Error::UnknownRequest {
                request_id: request_id.clone(),
            });
        }

        self.send_command(Command::Respond {
            id: request_id.clone(),
            payload: result.into(),
        })
    }

    /// Sends an EVENT.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] unless CONNECTED or DEGRADED
    /// - [`Error::ChannelClosed`] if the channel task has ended
    /// - transport errors from the send
    pub async fn emit(&self, name: impl Into<String>, data: Value) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send_command(Command::Emit {
            name: name.into(),
            data,
            reply,
        })?;
        rx.await.map_err(|_| Error::ChannelClosed)?
    }

    // ========================================================================
    // Handlers
    // ========================================================================

    /// Subscribes `handler` to `topic`.
    pub fn on<F>(&self, topic: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&ChannelEvent) -> Result<()> + Send + Sync + 'static,
    {
        self.shared.dispatcher.on(topic, handler)
    }

    /// Removes a subscription. Returns `false` if it was not registered.
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.shared.dispatcher.off(id)
    }

    // ========================================================================
    // State
    // ========================================================================

    /// Current channel state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Returns a receiver notified on every state change.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.state.clone()
    }

    /// Waits until the channel reaches `target`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelClosed`] if the channel task ends first.
    pub async fn wait_for_state(&self, target: ChannelState) -> Result<()> {
        let mut rx = self.state.clone();
        rx.wait_for(|state| *state == target)
            .await
            .map(|_| ())
            .map_err(|_| Error::ChannelClosed)
    }

    /// Peer origin pinned by the last successful handshake.
    #[must_use]
    pub fn peer_origin(&self) -> Option<Origin> {
        self.shared.session.read().peer_origin.clone()
    }

    /// Features negotiated by the last successful handshake.
    #[must_use]
    pub fn features(&self) -> Features {
        self.shared.session.read().features.clone()
    }

    /// Drop counters.
    #[must_use]
    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.shared.diagnostics.snapshot()
    }

    /// Requests teardown. Pending requests fail with
    /// [`Error::ChannelClosed`].
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }

    // ========================================================================
    // Internal
    // ========================================================================

    pub(crate) async fn establish(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send_command(Command::Establish { reply })?;
        rx.await.map_err(|_| Error::ChannelClosed)?
    }

    fn send_command(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::ChannelClosed)
    }
}
