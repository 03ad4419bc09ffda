//! Caller-facing handle.

use mup_core::{
    RequestError,
    dispatch::{DisconnectReason, EventKind, Listener, ListenerId, SessionEvent, UiIntent},
    metrics::MetricsSnapshot,
    reconnect::ConnectionState,
    render::Renderer,
};
use mup_proto::{
    ComponentNode, MessageId,
    payloads::{
        session::{CapabilityFilters, CapabilityResponse},
        update::BatchOperation,
    },
};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::debug;

use crate::{
    ClientError,
    runtime::{Ack, Command, Reply},
};

/// Cloneable handle to a running session.
///
/// Every method is a message to the runtime task; a handle outliving the task
/// gets [`ClientError::Stopped`].
#[derive(Debug, Clone)]
pub struct ClientHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<SessionEvent>,
}

/// A correlated request in flight.
#[derive(Debug)]
pub struct RequestTicket {
    message_id: Option<MessageId>,
    reply: oneshot::Receiver<Result<Value, RequestError>>,
    commands: mpsc::Sender<Command>,
}

impl RequestTicket {
    /// Id of the request on the wire; `None` if it was rejected before
    /// being sent.
    pub fn message_id(&self) -> Option<&MessageId> {
        self.message_id.as_ref()
    }

    /// Wait for the reply payload.
    ///
    /// # Errors
    ///
    /// `Request` with the reason the request settled without a reply.
    pub async fn wait(self) -> Result<Value, ClientError> {
        match self.reply.await {
            Ok(outcome) => outcome.map_err(ClientError::from),
            Err(_) => Err(ClientError::Stopped),
        }
    }

    /// Cancel the request; [`RequestTicket::wait`] then yields `Cancelled`.
    ///
    /// # Errors
    ///
    /// `Stopped` if the runtime is gone.
    pub async fn cancel(&self) -> Result<(), ClientError> {
        let Some(message_id) = self.message_id.clone() else {
            return Ok(());
        };
        self.commands.send(Command::Cancel(message_id)).await.map_err(|_| ClientError::Stopped)
    }
}

impl ClientHandle {
    pub(crate) fn new(
        commands: mpsc::Sender<Command>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self { commands, events }
    }

    /// Connect and wait for the handshake.
    ///
    /// Transient failures are retried by the engine; this returns once the
    /// session is ready or the retry budget is spent.
    ///
    /// # Errors
    ///
    /// - `Engine` if the session is not disconnected
    /// - `RetriesExhausted` if every attempt failed
    /// - `Closed` if [`ClientHandle::disconnect`] was called meanwhile
    pub async fn connect(&self) -> Result<String, ClientError> {
        let mut events = self.events.subscribe();
        let (done, started) = oneshot::channel();
        self.send(Command::Connect(done)).await?;
        started.await.map_err(|_| ClientError::Stopped)??;

        loop {
            match events.recv().await {
                Ok(SessionEvent::Connected { client_id, .. }) => return Ok(client_id),
                Ok(SessionEvent::Disconnected { reason, retry_in }) => match reason {
                    DisconnectReason::MaxRetriesExceeded => {
                        return Err(ClientError::RetriesExhausted);
                    },
                    DisconnectReason::Requested => return Err(ClientError::Closed),
                    other => debug!(reason = %other, ?retry_in, "connect attempt failed"),
                },
                Ok(_) => {},
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "connect waiter lagged");
                },
                Err(broadcast::error::RecvError::Closed) => return Err(ClientError::Stopped),
            }
        }
    }

    /// Disconnect without reconnecting. Outstanding requests settle with
    /// `ConnectionLost`.
    ///
    /// # Errors
    ///
    /// `Stopped` if the runtime is gone.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        let (done, finished) = oneshot::channel();
        self.send(Command::Disconnect(done)).await?;
        finished.await.map_err(|_| ClientError::Stopped)
    }

    /// Submit a capability query without waiting.
    ///
    /// # Errors
    ///
    /// `Stopped` if the runtime is gone.
    pub async fn submit_query(
        &self,
        filters: CapabilityFilters,
    ) -> Result<RequestTicket, ClientError> {
        self.submit(|reply, ack| Command::QueryCapabilities { filters, reply, ack }).await
    }

    /// Ask which component types the server can produce.
    ///
    /// # Errors
    ///
    /// `Request` if there was no reply, `InvalidReply` if the reply is not a
    /// capability response.
    pub async fn query_capabilities(
        &self,
        filters: CapabilityFilters,
    ) -> Result<CapabilityResponse, ClientError> {
        let reply = self.submit_query(filters).await?.wait().await?;
        serde_json::from_value(reply).map_err(ClientError::InvalidReply)
    }

    /// Submit a batch without waiting.
    ///
    /// # Errors
    ///
    /// `Stopped` if the runtime is gone.
    pub async fn submit_batch(&self, batch: BatchOperation) -> Result<RequestTicket, ClientError> {
        self.submit(|reply, ack| Command::Batch { batch, reply, ack }).await
    }

    /// Run a batch of server-side operations; returns the raw reply.
    ///
    /// Per-item outcomes are also delivered as
    /// [`SessionEvent::BatchResult`]s.
    ///
    /// # Errors
    ///
    /// `Request` if there was no reply.
    pub async fn batch_operation(&self, batch: BatchOperation) -> Result<Value, ClientError> {
        self.submit_batch(batch).await?.wait().await
    }

    /// Report a UI intent without expecting a reply.
    ///
    /// # Errors
    ///
    /// `Engine` unless the session is ready.
    pub async fn send_event(&self, intent: UiIntent) -> Result<(), ClientError> {
        let (done, sent) = oneshot::channel();
        self.send(Command::NotifyIntent { intent, done }).await?;
        sent.await.map_err(|_| ClientError::Stopped)?.map_err(ClientError::from)
    }

    /// Report a UI intent and wait for the server's reply.
    ///
    /// # Errors
    ///
    /// `Request` if there was no reply.
    pub async fn request_event(&self, intent: UiIntent) -> Result<Value, ClientError> {
        self.submit(|reply, ack| Command::RequestIntent { intent, reply, ack }).await?.wait().await
    }

    /// Register a listener. It runs on the runtime task and must not block.
    ///
    /// # Errors
    ///
    /// `Stopped` if the runtime is gone.
    pub async fn on(&self, kind: EventKind, listener: Listener) -> Result<ListenerId, ClientError> {
        let (done, registered) = oneshot::channel();
        self.send(Command::On { kind, listener, done }).await?;
        registered.await.map_err(|_| ClientError::Stopped)
    }

    /// Remove a listener; `false` if it was not registered.
    ///
    /// # Errors
    ///
    /// `Stopped` if the runtime is gone.
    pub async fn off(&self, id: ListenerId) -> Result<bool, ClientError> {
        let (done, removed) = oneshot::channel();
        self.send(Command::Off { id, done }).await?;
        removed.await.map_err(|_| ClientError::Stopped)
    }

    /// Receive every session event from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Install the renderer that observes tree changes.
    ///
    /// # Errors
    ///
    /// `Stopped` if the runtime is gone.
    pub async fn set_renderer(&self, renderer: Box<dyn Renderer>) -> Result<(), ClientError> {
        self.send(Command::SetRenderer(renderer)).await
    }

    /// Connection state.
    ///
    /// # Errors
    ///
    /// `Stopped` if the runtime is gone.
    pub async fn state(&self) -> Result<ConnectionState, ClientError> {
        let (done, state) = oneshot::channel();
        self.send(Command::State(done)).await?;
        state.await.map_err(|_| ClientError::Stopped)
    }

    /// Metrics as of now.
    ///
    /// # Errors
    ///
    /// `Stopped` if the runtime is gone.
    pub async fn metrics(&self) -> Result<MetricsSnapshot, ClientError> {
        let (done, snapshot) = oneshot::channel();
        self.send(Command::Metrics(done)).await?;
        snapshot.await.map_err(|_| ClientError::Stopped)
    }

    /// Copy of the current component tree; `None` if empty.
    ///
    /// # Errors
    ///
    /// `Stopped` if the runtime is gone.
    pub async fn tree(&self) -> Result<Option<ComponentNode>, ClientError> {
        let (done, tree) = oneshot::channel();
        self.send(Command::Tree(done)).await?;
        tree.await.map_err(|_| ClientError::Stopped)
    }

    async fn submit(
        &self,
        command: impl FnOnce(Reply, Ack) -> Command,
    ) -> Result<RequestTicket, ClientError> {
        let (reply_tx, reply) = oneshot::channel();
        let (ack, assigned) = oneshot::channel();
        self.send(command(reply_tx, ack)).await?;
        let message_id = assigned.await.map_err(|_| ClientError::Stopped)?;
        Ok(RequestTicket { message_id, reply, commands: self.commands.clone() })
    }

    async fn send(&self, command: Command) -> Result<(), ClientError> {
        self.commands.send(command).await.map_err(|_| ClientError::Stopped)
    }
}
