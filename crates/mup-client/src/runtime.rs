//! Engine runtime.
//!
//! One task per session. The task owns the [`Engine`], the live channel
//! connection (if any) and the receiving end of the command queue, and loops
//! over three sources:
//!
//! - commands from [`ClientHandle`]s
//! - events from the live connection, and results of channel opens
//! - the engine's next deadline
//!
//! Each source produces engine actions, executed in order before the loop
//! waits again. Channel opens run in their own task so that a slow connect
//! never blocks commands; every open carries a generation number and results
//! of superseded opens are closed on arrival.

use std::{collections::VecDeque, io, sync::Arc, time::Instant};

use mup_core::{
    Engine, EngineAction, EngineError, RequestError,
    dispatch::{EventKind, Listener, ListenerId, SessionEvent, UiIntent},
    env::Environment,
    metrics::MetricsSnapshot,
    reconnect::ConnectionState,
    render::Renderer,
    transport::{CLOSE_NORMAL, Channel, ChannelConnection, ChannelEvent},
};
use mup_proto::{
    ComponentNode, MessageId,
    payloads::{session::CapabilityFilters, update::BatchOperation},
};
use serde_json::Value;
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, trace, warn};

use crate::{ClientHandle, RuntimeConfig};

/// Continuation the runtime hands to the engine for each request.
pub(crate) type Reply = oneshot::Sender<Result<Value, RequestError>>;

/// Request submitted to the engine; answers with the assigned id.
pub(crate) type Ack = oneshot::Sender<Option<MessageId>>;

pub(crate) enum Command {
    Connect(oneshot::Sender<Result<(), EngineError>>),
    Disconnect(oneshot::Sender<()>),
    QueryCapabilities { filters: CapabilityFilters, reply: Reply, ack: Ack },
    Batch { batch: BatchOperation, reply: Reply, ack: Ack },
    RequestIntent { intent: UiIntent, reply: Reply, ack: Ack },
    NotifyIntent { intent: UiIntent, done: oneshot::Sender<Result<(), EngineError>> },
    Cancel(MessageId),
    On { kind: EventKind, listener: Listener, done: oneshot::Sender<ListenerId> },
    Off { id: ListenerId, done: oneshot::Sender<bool> },
    SetRenderer(Box<dyn Renderer>),
    State(oneshot::Sender<ConnectionState>),
    Metrics(oneshot::Sender<MetricsSnapshot>),
    Tree(oneshot::Sender<Option<ComponentNode>>),
}

struct Opened<T> {
    generation: u64,
    result: io::Result<T>,
}

/// Session runtime over channel `Ch` and environment `E`.
pub struct Runtime<E: Environment, Ch: Channel> {
    env: E,
    channel: Arc<Ch>,
    engine: Engine<E, Reply>,
    connection: Option<Ch::Connection>,
    generation: u64,
    commands: mpsc::Receiver<Command>,
    opened_tx: mpsc::UnboundedSender<Opened<Ch::Connection>>,
    opened_rx: mpsc::UnboundedReceiver<Opened<Ch::Connection>>,
}

/// Spawn a runtime on the current tokio runtime.
///
/// The task runs until every [`ClientHandle`] is dropped.
pub fn spawn<E, Ch>(env: E, channel: Ch, config: RuntimeConfig) -> (ClientHandle, JoinHandle<()>)
where
    E: Environment,
    Ch: Channel,
{
    let (runtime, handle) = Runtime::new(env, channel, config);
    (handle, tokio::spawn(runtime.run()))
}

impl<E: Environment, Ch: Channel> Runtime<E, Ch> {
    /// Create a runtime and a handle to it. Nothing runs until
    /// [`Runtime::run`] is polled.
    pub fn new(env: E, channel: Ch, config: RuntimeConfig) -> (Self, ClientHandle) {
        let (command_tx, commands) = mpsc::channel(config.command_capacity.max(1));
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (opened_tx, opened_rx) = mpsc::unbounded_channel();

        let mut engine = Engine::new(env.clone(), config.engine);
        for kind in [
            EventKind::Connected,
            EventKind::Disconnected,
            EventKind::Error,
            EventKind::ComponentUpdate,
            EventKind::BatchResult,
            EventKind::SyncFailed,
        ] {
            let events = events.clone();
            engine.on(
                kind,
                Box::new(move |event: &SessionEvent| {
                    // No subscribers is fine.
                    let _ = events.send(event.clone());
                    Ok(())
                }),
            );
        }

        let runtime = Self {
            env,
            channel: Arc::new(channel),
            engine,
            connection: None,
            generation: 0,
            commands,
            opened_tx,
            opened_rx,
        };
        (runtime, ClientHandle::new(command_tx, events))
    }

    /// Run until every handle is dropped, then disconnect.
    pub async fn run(mut self) {
        loop {
            let deadline = self.engine.next_deadline();
            let actions = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                opened = self.opened_rx.recv() => match opened {
                    Some(opened) => self.handle_opened(opened).await,
                    None => Vec::new(),
                },
                event = recv_event(&mut self.connection) => self.handle_channel_event(event),
                () = sleep_until(&self.env, deadline) => self.engine.tick(),
            };
            self.execute(actions).await;
        }

        debug!("all handles dropped, shutting down");
        let actions = self.engine.disconnect();
        self.execute(actions).await;
    }

    fn handle_command(&mut self, command: Command) -> Vec<EngineAction<Reply>> {
        match command {
            Command::Connect(done) => {
                let (result, actions) = match self.engine.connect() {
                    Ok(actions) => (Ok(()), actions),
                    Err(error) => (Err(error), Vec::new()),
                };
                let _ = done.send(result);
                actions
            },
            Command::Disconnect(done) => {
                self.generation += 1;
                let actions = self.engine.disconnect();
                let _ = done.send(());
                actions
            },
            Command::QueryCapabilities { filters, reply, ack } => {
                let submission = self.engine.query_capabilities(filters, reply);
                let _ = ack.send(submission.message_id);
                submission.actions
            },
            Command::Batch { batch, reply, ack } => {
                let submission = self.engine.batch_operation(batch, reply);
                let _ = ack.send(submission.message_id);
                submission.actions
            },
            Command::RequestIntent { intent, reply, ack } => {
                match self.engine.emit_intent(intent, Some(reply)) {
                    Ok(submission) => {
                        let _ = ack.send(submission.message_id);
                        submission.actions
                    },
                    Err(error) => {
                        warn!(%error, "intent rejected");
                        let _ = ack.send(None);
                        Vec::new()
                    },
                }
            },
            Command::NotifyIntent { intent, done } => match self.engine.emit_intent(intent, None) {
                Ok(submission) => {
                    let _ = done.send(Ok(()));
                    submission.actions
                },
                Err(error) => {
                    let _ = done.send(Err(error));
                    Vec::new()
                },
            },
            Command::Cancel(message_id) => self.engine.cancel(&message_id),
            Command::On { kind, listener, done } => {
                let _ = done.send(self.engine.on(kind, listener));
                Vec::new()
            },
            Command::Off { id, done } => {
                let _ = done.send(self.engine.off(id));
                Vec::new()
            },
            Command::SetRenderer(renderer) => {
                self.engine.set_renderer(renderer);
                Vec::new()
            },
            Command::State(done) => {
                let _ = done.send(self.engine.state());
                Vec::new()
            },
            Command::Metrics(done) => {
                let _ = done.send(self.engine.metrics());
                Vec::new()
            },
            Command::Tree(done) => {
                let _ = done.send(self.engine.tree().to_node());
                Vec::new()
            },
        }
    }

    async fn handle_opened(&mut self, opened: Opened<Ch::Connection>) -> Vec<EngineAction<Reply>> {
        if opened.generation != self.generation {
            if let Ok(mut connection) = opened.result {
                debug!(generation = opened.generation, "closing superseded channel");
                connection.close(CLOSE_NORMAL, "superseded").await;
            }
            return Vec::new();
        }

        match opened.result {
            Ok(connection) => {
                self.connection = Some(connection);
                self.engine.handle_channel_event(ChannelEvent::Opened)
            },
            Err(error) => self.engine.handle_channel_event(ChannelEvent::Error(error.to_string())),
        }
    }

    fn handle_channel_event(&mut self, event: Option<ChannelEvent>) -> Vec<EngineAction<Reply>> {
        let Some(event) = event else {
            self.connection = None;
            return Vec::new();
        };
        if matches!(event, ChannelEvent::Closed { .. } | ChannelEvent::Error(_)) {
            self.connection = None;
        }
        self.engine.handle_channel_event(event)
    }

    async fn execute(&mut self, actions: Vec<EngineAction<Reply>>) {
        let mut queue = VecDeque::from(actions);
        while let Some(action) = queue.pop_front() {
            match action {
                EngineAction::OpenChannel { url } => self.open(url),
                EngineAction::Send { message_id, frame } => {
                    let sent = match self.connection.as_mut() {
                        Some(connection) => connection.send(frame).await,
                        None => Err(io::Error::new(io::ErrorKind::NotConnected, "no channel")),
                    };
                    match sent {
                        Ok(()) => trace!(%message_id, "frame sent"),
                        Err(error) => {
                            warn!(%message_id, %error, "send failed");
                            queue.extend(self.engine.send_failed(&message_id));
                        },
                    }
                },
                EngineAction::CloseChannel { code, reason } => {
                    if let Some(mut connection) = self.connection.take() {
                        connection.close(code, &reason).await;
                    }
                },
                EngineAction::Settle { message_id, continuation, outcome } => {
                    if continuation.send(outcome).is_err() {
                        trace!(?message_id, "caller no longer waiting");
                    }
                },
            }
        }
    }

    fn open(&mut self, url: String) {
        self.generation += 1;
        self.connection = None;
        let generation = self.generation;
        let channel = Arc::clone(&self.channel);
        let opened = self.opened_tx.clone();
        tokio::spawn(async move {
            let result = channel.open(&url).await;
            let _ = opened.send(Opened { generation, result });
        });
    }
}

async fn recv_event<T: ChannelConnection>(connection: &mut Option<T>) -> Option<ChannelEvent> {
    match connection {
        Some(connection) => connection.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until<E: Environment>(env: &E, deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => env.sleep(deadline.saturating_duration_since(env.now())).await,
        None => std::future::pending().await,
    }
}
