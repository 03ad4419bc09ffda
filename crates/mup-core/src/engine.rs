//! Client engine.
//!
//! Ties the components together into one state machine per session:
//!
//! ```text
//!            connect / disconnect / requests / intents
//!                              │
//!                              ▼
//! ChannelEvent ──────────> ┌────────┐ ──────> EngineAction
//! (open, frame, close)     │ Engine │         (open, send, close, settle)
//! tick ──────────────────> └────────┘ ──────> SessionEvent (listeners)
//!                              │
//!                              ▼
//!                       ComponentTree ──────> Renderer
//! ```
//!
//! # Inbound routing
//!
//! A decoded envelope whose id matches an outstanding request settles that
//! request; an `error` reply settles it with [`RequestError::Remote`]. A
//! correlated `component_update` (batch results, event acknowledgements) is
//! also applied to the tree. Uncorrelated messages are routed by type:
//! `handshake_response` completes the handshake (only while handshaking),
//! `component_update` goes to the dispatcher, `error` becomes a
//! [`SessionEvent::Error`]. Malformed frames and unknown types are logged and
//! dropped.
//!
//! # Request lifecycle
//!
//! Correlated requests take a continuation `C`. The continuation comes back
//! exactly once in an [`EngineAction::Settle`]: with the reply, or with the
//! reason there was none (not connected, timeout, connection lost, send
//! failure, cancellation).

use std::time::Instant;

use mup_proto::{
    Envelope, MessageId, MessageType, Payload,
    payloads::{
        session::{CapabilityFilters, CapabilityQuery, HandshakeResponse},
        update::{BatchOperation, ErrorPayload},
    },
};
use serde_json::Value;
use tracing::{debug, error, info, trace, warn};

use crate::{
    config::EngineConfig,
    correlation::{CorrelationTable, PendingRequest, RequestKind},
    dispatch::{
        DisconnectReason, EventDispatcher, EventKind, Listener, ListenerId, SessionEvent, UiIntent,
    },
    env::Environment,
    error::{EngineError, RequestError},
    handshake::{Negotiator, Session},
    metrics::{MetricsRecorder, MetricsSnapshot},
    reconnect::{ConnectionState, ReconnectController, ReconnectDecision},
    render::Renderer,
    transport::{CLOSE_NORMAL, ChannelEvent},
    tree::ComponentTree,
};

/// Close code sent when the server does not answer the handshake in time.
pub const CLOSE_HANDSHAKE_TIMEOUT: u16 = 4000;

const ID_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Effects requested by the engine.
///
/// The runtime executes them in order.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineAction<C> {
    /// Open a channel to `url` and report back with [`ChannelEvent::Opened`]
    /// or [`ChannelEvent::Error`]
    OpenChannel {
        /// Endpoint
        url: String,
    },
    /// Write a text frame; report failure with [`Engine::send_failed`]
    Send {
        /// Id of the envelope inside
        message_id: MessageId,
        /// Encoded envelope
        frame: String,
    },
    /// Close the live channel
    CloseChannel {
        /// Close code
        code: u16,
        /// Close reason
        reason: String,
    },
    /// Hand a request's outcome to its continuation
    Settle {
        /// Request id; `None` if the request never got one
        message_id: Option<MessageId>,
        /// Caller's continuation
        continuation: C,
        /// Reply payload or the reason there is none
        outcome: Result<Value, RequestError>,
    },
}

/// Result of submitting outbound traffic.
#[derive(Debug)]
pub struct Submission<C> {
    /// Id assigned to the envelope, if one was built
    pub message_id: Option<MessageId>,
    /// Effects to execute
    pub actions: Vec<EngineAction<C>>,
}

impl<C> Submission<C> {
    fn rejected(continuation: C, message_id: Option<MessageId>, error: RequestError) -> Self {
        Self {
            message_id: None,
            actions: vec![EngineAction::Settle { message_id, continuation, outcome: Err(error) }],
        }
    }
}

/// Client session state machine.
///
/// `E` supplies time and randomness; `C` is the caller's per-request
/// continuation type.
pub struct Engine<E: Environment, C> {
    env: E,
    config: EngineConfig,
    connection: ReconnectController,
    negotiator: Negotiator,
    pending: CorrelationTable<C>,
    tree: ComponentTree,
    dispatcher: EventDispatcher,
    metrics: MetricsRecorder,
    renderer: Option<Box<dyn Renderer>>,
    issued: u64,
}

impl<E: Environment, C> Engine<E, C> {
    /// Create an engine in `Disconnected`.
    pub fn new(env: E, config: EngineConfig) -> Self {
        let negotiator = Negotiator::new(
            config.client_info.clone(),
            config.context.clone(),
            config.handshake_timeout,
        );
        Self {
            connection: ReconnectController::new(config.reconnect),
            negotiator,
            pending: CorrelationTable::new(),
            tree: ComponentTree::new(),
            dispatcher: EventDispatcher::new(),
            metrics: MetricsRecorder::new(),
            renderer: None,
            issued: 0,
            env,
            config,
        }
    }

    /// Connection state.
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Session identity, once the handshake has completed.
    pub fn session(&self) -> Option<&Session> {
        self.negotiator.session()
    }

    /// Current component tree.
    pub fn tree(&self) -> &ComponentTree {
        &self.tree
    }

    /// Configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Metrics as of now.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.env.now())
    }

    /// Number of outstanding correlated requests.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Whether `message_id` is awaiting a reply.
    pub fn is_pending(&self, message_id: &MessageId) -> bool {
        self.pending.contains(message_id)
    }

    /// Install the renderer that observes tree changes.
    pub fn set_renderer(&mut self, renderer: Box<dyn Renderer>) {
        self.renderer = Some(renderer);
    }

    /// Register a listener.
    pub fn on(&mut self, kind: EventKind, listener: Listener) -> ListenerId {
        self.dispatcher.on(kind, listener)
    }

    /// Remove a listener.
    pub fn off(&mut self, id: ListenerId) -> bool {
        self.dispatcher.off(id)
    }

    /// Start connecting with a fresh retry budget.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless disconnected.
    pub fn connect(&mut self) -> Result<Vec<EngineAction<C>>, EngineError> {
        self.connection.begin_connect()?;
        info!(url = %self.config.url, "connecting");
        Ok(vec![EngineAction::OpenChannel { url: self.config.url.clone() }])
    }

    /// Tear the session down without reconnecting.
    ///
    /// Outstanding requests settle with `ConnectionLost`; the session and the
    /// component tree are cleared.
    pub fn disconnect(&mut self) -> Vec<EngineAction<C>> {
        let had_retry = self.connection.retry_at().is_some();
        let was_live = self.connection.shutdown();
        let mut actions = self.settle_all(&RequestError::ConnectionLost);
        self.negotiator.clear();
        self.tree.clear();
        self.metrics.mark_down(self.env.now());

        if was_live {
            actions.push(EngineAction::CloseChannel {
                code: CLOSE_NORMAL,
                reason: "client disconnect".to_string(),
            });
        }
        if was_live || had_retry {
            info!("disconnected");
            self.dispatcher.emit(&SessionEvent::Disconnected {
                reason: DisconnectReason::Requested,
                retry_in: None,
            });
        }
        actions
    }

    /// Feed a channel event.
    pub fn handle_channel_event(&mut self, event: ChannelEvent) -> Vec<EngineAction<C>> {
        match event {
            ChannelEvent::Opened => self.on_open(),
            ChannelEvent::Message(text) => self.on_frame(&text),
            ChannelEvent::Closed { code, reason } => {
                self.connection_lost(DisconnectReason::ChannelClosed { code, reason })
            },
            ChannelEvent::Error(error) => {
                self.connection_lost(DisconnectReason::ChannelError(error))
            },
        }
    }

    /// A `Send` action could not be written.
    pub fn send_failed(&mut self, message_id: &MessageId) -> Vec<EngineAction<C>> {
        self.metrics.record_send_failed();
        match self.pending.resolve(message_id) {
            Some(request) => {
                warn!(%message_id, kind = ?request.kind, "request could not be sent");
                vec![settle(request, Err(RequestError::SendFailed))]
            },
            None => {
                warn!(%message_id, "frame could not be sent");
                Vec::new()
            },
        }
    }

    /// Cancel an outstanding request.
    ///
    /// A reply arriving later is treated as uncorrelated.
    pub fn cancel(&mut self, message_id: &MessageId) -> Vec<EngineAction<C>> {
        self.pending
            .cancel(message_id)
            .map(|request| settle(request, Err(RequestError::Cancelled)))
            .into_iter()
            .collect()
    }

    /// Fire every deadline that has passed: request timeouts, the handshake
    /// timeout and a scheduled reconnect.
    pub fn tick(&mut self) -> Vec<EngineAction<C>> {
        let now = self.env.now();
        let mut actions: Vec<EngineAction<C>> = self
            .pending
            .expire(now)
            .into_iter()
            .map(|request| {
                let after = request.timeout();
                warn!(
                    message_id = %request.message_id,
                    kind = ?request.kind,
                    ?after,
                    "request timed out"
                );
                settle(request, Err(RequestError::Timeout { after }))
            })
            .collect();

        if self.connection.state() == ConnectionState::Handshaking && self.negotiator.expired(now)
        {
            warn!(timeout = ?self.config.handshake_timeout, "handshake timed out");
            actions.push(EngineAction::CloseChannel {
                code: CLOSE_HANDSHAKE_TIMEOUT,
                reason: "handshake timeout".to_string(),
            });
            actions.extend(self.connection_lost(DisconnectReason::HandshakeTimeout));
        }

        if self.connection.poll_retry(now) {
            info!(attempt = self.connection.attempts(), url = %self.config.url, "reconnecting");
            actions.push(EngineAction::OpenChannel { url: self.config.url.clone() });
        }
        actions
    }

    /// Earliest instant at which [`Engine::tick`] has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let handshake = match self.connection.state() {
            ConnectionState::Handshaking => self.negotiator.deadline(),
            _ => None,
        };
        [self.pending.next_deadline(), handshake, self.connection.retry_at()]
            .into_iter()
            .flatten()
            .min()
    }

    /// Ask which component types the server can produce.
    ///
    /// Settles with the raw `capability_response` payload.
    pub fn query_capabilities(
        &mut self,
        filters: CapabilityFilters,
        continuation: C,
    ) -> Submission<C> {
        let query = CapabilityQuery::component_availability(filters);
        self.request(RequestKind::CapabilityQuery, Payload::CapabilityQuery(query), continuation)
    }

    /// Submit a batch of server-side operations.
    ///
    /// Settles with the reply payload (normally carrying `batch_results`).
    pub fn batch_operation(&mut self, batch: BatchOperation, continuation: C) -> Submission<C> {
        self.request(RequestKind::BatchOperation, Payload::BatchOperation(batch), continuation)
    }

    /// Report a UI intent.
    ///
    /// With a continuation the notification is a correlated request and the
    /// continuation settles with the server's reply. Without one it is
    /// fire-and-forget.
    ///
    /// # Errors
    ///
    /// `NotConnected` for fire-and-forget intents unless the session is
    /// ready. Correlated intents never fail here; they settle instead.
    pub fn emit_intent(
        &mut self,
        intent: UiIntent,
        continuation: Option<C>,
    ) -> Result<Submission<C>, EngineError> {
        if let Some(continuation) = continuation {
            let notification = self.dispatcher.notification(&self.tree, intent);
            return Ok(self.request(
                RequestKind::EventNotification,
                Payload::EventNotification(notification),
                continuation,
            ));
        }

        let state = self.connection.state();
        if state != ConnectionState::Ready {
            return Err(EngineError::NotConnected { state });
        }
        let notification = self.dispatcher.notification(&self.tree, intent);
        let (message_id, frame) = self.encode(Payload::EventNotification(notification))?;
        debug!(%message_id, "event sent");
        Ok(Submission {
            message_id: Some(message_id.clone()),
            actions: vec![EngineAction::Send { message_id, frame }],
        })
    }

    fn request(&mut self, kind: RequestKind, payload: Payload, continuation: C) -> Submission<C> {
        let state = self.connection.state();
        if state != ConnectionState::Ready {
            debug!(?kind, ?state, "request rejected, not connected");
            return Submission::rejected(continuation, None, RequestError::NotConnected);
        }

        let (message_id, frame) = match self.encode(payload) {
            Ok(encoded) => encoded,
            Err(error) => {
                error!(%error, ?kind, "failed to encode request");
                return Submission::rejected(continuation, None, RequestError::SendFailed);
            },
        };

        let now = self.env.now();
        let timeout = self.config.request_timeout;
        if let Err(continuation) =
            self.pending.register(message_id.clone(), kind, now, timeout, continuation)
        {
            error!(%message_id, "message id already outstanding");
            return Submission::rejected(continuation, Some(message_id), RequestError::SendFailed);
        }

        debug!(%message_id, ?kind, "request sent");
        Submission {
            message_id: Some(message_id.clone()),
            actions: vec![EngineAction::Send { message_id, frame }],
        }
    }

    fn on_open(&mut self) -> Vec<EngineAction<C>> {
        if let Err(error) = self.connection.channel_opened() {
            warn!(%error, "closing unexpected channel");
            return vec![EngineAction::CloseChannel {
                code: CLOSE_NORMAL,
                reason: "not connecting".to_string(),
            }];
        }

        let request = self.negotiator.start(self.env.now());
        match self.encode(Payload::HandshakeRequest(request)) {
            Ok((message_id, frame)) => {
                debug!(%message_id, "channel open, handshake sent");
                vec![EngineAction::Send { message_id, frame }]
            },
            Err(error) => {
                error!(%error, "failed to encode handshake");
                let mut actions = vec![EngineAction::CloseChannel {
                    code: CLOSE_NORMAL,
                    reason: "handshake encoding failed".to_string(),
                }];
                let reason = DisconnectReason::ChannelError(error.to_string());
                actions.extend(self.connection_lost(reason));
                actions
            },
        }
    }

    fn on_frame(&mut self, text: &str) -> Vec<EngineAction<C>> {
        let envelope = match Envelope::decode(text) {
            Ok(envelope) => envelope,
            Err(error) => {
                self.metrics.record_dropped();
                warn!(%error, "dropping malformed frame");
                return Vec::new();
            },
        };
        self.metrics.record_received();
        trace!(
            message_type = %envelope.message_type,
            message_id = %envelope.message_id,
            "frame received"
        );

        if let Some(request) = self.pending.resolve(&envelope.message_id) {
            if envelope.message_type == MessageType::ComponentUpdate {
                self.dispatcher.route_component_update(
                    &mut self.tree,
                    &mut self.renderer,
                    &envelope.payload,
                );
            }
            return vec![self.settle_reply(request, envelope)];
        }

        match &envelope.message_type {
            MessageType::HandshakeResponse => self.on_handshake_response(&envelope),
            MessageType::ComponentUpdate => {
                self.dispatcher.route_component_update(
                    &mut self.tree,
                    &mut self.renderer,
                    &envelope.payload,
                );
                Vec::new()
            },
            MessageType::Error => {
                let payload = envelope
                    .payload_as::<ErrorPayload>()
                    .unwrap_or_else(|_| ErrorPayload::new(envelope.payload.to_string()));
                warn!(error = %payload.error, "server error");
                self.dispatcher.emit(&SessionEvent::Error(payload));
                Vec::new()
            },
            MessageType::CapabilityResponse => {
                debug!(message_id = %envelope.message_id, "ignoring uncorrelated capability response");
                Vec::new()
            },
            MessageType::Unknown(tag) => {
                warn!(message_type = %tag, "ignoring unknown message type");
                Vec::new()
            },
            other => {
                warn!(message_type = %other, "ignoring message not meant for clients");
                Vec::new()
            },
        }
    }

    fn on_handshake_response(&mut self, envelope: &Envelope) -> Vec<EngineAction<C>> {
        let response = match envelope.payload_as::<HandshakeResponse>() {
            Ok(response) => response,
            Err(error) => {
                warn!(%error, "invalid handshake response");
                return Vec::new();
            },
        };
        if let Err(error) = self.connection.handshake_completed() {
            warn!(%error, "unexpected handshake response");
            return Vec::new();
        }

        self.metrics.mark_ready(self.env.now());
        let session = self.negotiator.complete(response);
        info!(
            client_id = %session.client_id,
            server = %session.server_info.name,
            "session ready"
        );
        let event = SessionEvent::Connected {
            client_id: session.client_id.clone(),
            server_capabilities: session.capabilities.clone(),
        };
        self.dispatcher.emit(&event);
        Vec::new()
    }

    fn connection_lost(&mut self, reason: DisconnectReason) -> Vec<EngineAction<C>> {
        let now = self.env.now();
        let Some(decision) = self.connection.connection_lost(now) else {
            debug!(%reason, "already disconnected");
            return Vec::new();
        };

        let actions = self.settle_all(&RequestError::ConnectionLost);
        self.negotiator.clear();
        self.metrics.mark_down(now);

        let event = match decision {
            ReconnectDecision::Retry { attempt, delay } => {
                self.metrics.record_reconnect();
                info!(
                    %reason,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "connection lost, reconnect scheduled"
                );
                SessionEvent::Disconnected { reason, retry_in: Some(delay) }
            },
            ReconnectDecision::GiveUp { attempts } => {
                error!(%reason, attempts, "connection lost, giving up");
                SessionEvent::Disconnected {
                    reason: DisconnectReason::MaxRetriesExceeded,
                    retry_in: None,
                }
            },
        };
        self.dispatcher.emit(&event);
        actions
    }

    fn settle_reply(&mut self, request: PendingRequest<C>, envelope: Envelope) -> EngineAction<C> {
        let latency = self.env.now().saturating_duration_since(request.issued_at);
        self.metrics.record_latency(latency);
        debug!(message_id = %request.message_id, kind = ?request.kind, ?latency, "reply received");

        let outcome = if envelope.message_type == MessageType::Error {
            Err(RequestError::Remote { message: error_message(&envelope.payload) })
        } else {
            Ok(envelope.payload)
        };
        settle(request, outcome)
    }

    fn settle_all(&mut self, error: &RequestError) -> Vec<EngineAction<C>> {
        let requests = self.pending.reject_all();
        if !requests.is_empty() {
            debug!(count = requests.len(), %error, "failing outstanding requests");
        }
        requests.into_iter().map(|request| settle(request, Err(error.clone()))).collect()
    }

    fn encode(&mut self, payload: Payload) -> Result<(MessageId, String), EngineError> {
        let message_id = self.next_message_id();
        let frame = payload.into_envelope(message_id.clone(), self.env.wall_clock())?.encode()?;
        self.metrics.record_sent();
        Ok((message_id, frame))
    }

    /// `msg_<counter>_<9 random base-36 characters>`.
    fn next_message_id(&mut self) -> MessageId {
        self.issued += 1;
        let mut entropy = [0u8; 9];
        self.env.random_bytes(&mut entropy);
        let suffix: String = entropy
            .iter()
            .map(|byte| char::from(ID_ALPHABET[usize::from(*byte) % ID_ALPHABET.len()]))
            .collect();
        MessageId::new(format!("msg_{}_{suffix}", self.issued))
    }
}

fn settle<C>(request: PendingRequest<C>, outcome: Result<Value, RequestError>) -> EngineAction<C> {
    EngineAction::Settle {
        message_id: Some(request.message_id),
        continuation: request.continuation,
        outcome,
    }
}

fn error_message(payload: &Value) -> String {
    payload
        .get("error")
        .and_then(Value::as_str)
        .map_or_else(|| payload.to_string(), str::to_string)
}
