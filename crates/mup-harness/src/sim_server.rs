//! Scripted protocol server for simulations.
//!
//! Serves one connection at a time on a turmoil host:
//!
//! - `handshake_request` gets a `handshake_response` with a fresh
//!   `client_<n>` id, followed by the initial tree if one is scripted
//! - `capability_query` gets the catalog, filtered
//! - `batch_operation` gets `batch_results`; items naming a component the
//!   server never sent fail
//! - `event_notification` gets a notification component to upsert
//! - anything else gets an `error`
//!
//! Replies reuse the id of the message they answer.

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use futures_util::{SinkExt, StreamExt};
use mup_proto::{
    ComponentNode, ComponentType, Envelope, MessageId, Payload,
    payloads::{
        session::{
            CapabilityQuery, CapabilityResponse, ComponentCapability, HandshakeResponse,
            ServerInfo,
        },
        update::{BatchItem, BatchOperation, ErrorPayload, EventNotification},
    },
};
use serde_json::{Map, Value, json};
use time::OffsetDateTime;
use tokio_tungstenite::{WebSocketStream, tungstenite::Message};
use tracing::{debug, info};

/// What the server does.
#[derive(Debug, Clone, Default)]
pub struct ServerScript {
    /// Component types offered to capability queries
    pub catalog: Vec<ComponentCapability>,
    /// Tree pushed right after each handshake
    pub initial_tree: Option<ComponentNode>,
    /// Never answer anything but the handshake
    pub silent: bool,
    /// Close this many connections right after their handshake
    pub hang_up_after_handshake: usize,
}

impl ServerScript {
    /// Script offering a small catalog and a form as the initial tree.
    pub fn demo() -> Self {
        let capability = |kind: &str, features: &[&str]| ComponentCapability {
            kind: kind.to_string(),
            version: "2.0.0".to_string(),
            features: features.iter().map(|feature| (*feature).to_string()).collect(),
        };
        let form = ComponentNode::new("sample_form", ComponentType::Form)
            .with_prop("title", json!("Contact"))
            .with_event("on_submit", "handle_form_submit")
            .with_child(ComponentNode::new("email", ComponentType::Input));
        Self {
            catalog: vec![
                capability("form", &["validation", "auto_save"]),
                capability("data_table", &["sorting", "pagination"]),
                capability("notification", &[]),
            ],
            initial_tree: Some(
                ComponentNode::new("root", ComponentType::Container).with_child(form),
            ),
            ..Self::default()
        }
    }
}

/// Scripted server. Clones share the connection counter.
#[derive(Debug, Clone)]
pub struct SimServer {
    script: ServerScript,
    connections: Arc<AtomicUsize>,
}

impl SimServer {
    /// Server following `script`.
    pub fn new(script: ServerScript) -> Self {
        Self { script, connections: Arc::new(AtomicUsize::new(0)) }
    }

    /// Connections accepted so far, across clones.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Accept and serve connections on `port` until the host stops.
    ///
    /// # Errors
    ///
    /// Binding or accepting failed.
    pub async fn serve(self, port: u16) -> io::Result<()> {
        let listener = turmoil::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
        info!(port, "sim server listening");
        loop {
            let (stream, peer) = listener.accept().await?;
            let connection = self.connections.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(%peer, connection, "accepted");
            let socket = match tokio_tungstenite::accept_async(stream).await {
                Ok(socket) => socket,
                Err(error) => {
                    debug!(%error, "websocket upgrade failed");
                    continue;
                },
            };
            if let Err(error) = self.session(socket, connection).await {
                debug!(%error, connection, "session ended with error");
            }
        }
    }

    async fn session(
        &self,
        mut socket: WebSocketStream<turmoil::net::TcpStream>,
        connection: usize,
    ) -> io::Result<()> {
        let mut sent = 0u64;
        while let Some(message) = socket.next().await {
            let text = match message.map_err(io::Error::other)? {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };
            let envelope = match Envelope::decode(&text) {
                Ok(envelope) => envelope,
                Err(error) => {
                    sent += 1;
                    let reply = Payload::Error(ErrorPayload::new(error.to_string()));
                    send(&mut socket, reply, MessageId::new(format!("srv_{sent}"))).await?;
                    continue;
                },
            };

            let payload = match Payload::from_envelope(&envelope) {
                Ok(payload) => payload,
                Err(error) => {
                    let reply = Payload::Error(ErrorPayload::new(error.to_string()));
                    send(&mut socket, reply, envelope.message_id).await?;
                    continue;
                },
            };

            if let Payload::HandshakeRequest(request) = payload {
                debug!(user = %request.context.user_id, connection, "handshake");
                sent += 1;
                let response = Payload::HandshakeResponse(self.handshake_response(connection));
                send(&mut socket, response, MessageId::new(format!("srv_{sent}"))).await?;
                if let Some(root) = &self.script.initial_tree {
                    sent += 1;
                    let snapshot = Payload::ComponentUpdate(json!({ "root_component": root }));
                    send(&mut socket, snapshot, MessageId::new(format!("srv_{sent}"))).await?;
                }
                if connection <= self.script.hang_up_after_handshake {
                    debug!(connection, "hanging up");
                    return Ok(());
                }
                continue;
            }

            if self.script.silent {
                continue;
            }
            let reply = self.answer(payload);
            send(&mut socket, reply, envelope.message_id).await?;
        }
        Ok(())
    }

    fn handshake_response(&self, connection: usize) -> HandshakeResponse {
        let components: Vec<&str> =
            self.script.catalog.iter().map(|capability| capability.kind.as_str()).collect();
        let mut capabilities = Map::new();
        capabilities.insert("components".to_string(), json!(components));
        capabilities.insert("batch_operations".to_string(), json!({ "max_batch_size": 50 }));
        HandshakeResponse {
            client_id: format!("client_{connection}"),
            capabilities,
            server_info: ServerInfo {
                name: "mup-sim".to_string(),
                version: mup_proto::PROTOCOL_VERSION.to_string(),
                ..ServerInfo::default()
            },
            session_info: Value::Null,
        }
    }

    fn answer(&self, payload: Payload) -> Payload {
        match payload {
            Payload::CapabilityQuery(query) => Payload::CapabilityResponse(self.query(&query)),
            Payload::BatchOperation(batch) => Payload::ComponentUpdate(self.batch(&batch)),
            Payload::EventNotification(event) => Payload::ComponentUpdate(acknowledge(&event)),
            other => Payload::Error(ErrorPayload::new(format!(
                "unsupported message type: {}",
                other.message_type()
            ))),
        }
    }

    fn query(&self, query: &CapabilityQuery) -> CapabilityResponse {
        let filters = &query.filters;
        let available_components: Vec<ComponentCapability> = self
            .script
            .catalog
            .iter()
            .filter(|capability| {
                filters.component_type.as_ref().is_none_or(|kind| *kind == capability.kind)
            })
            .filter(|capability| {
                filters.required_features.iter().all(|feature| capability.features.contains(feature))
            })
            .cloned()
            .collect();
        CapabilityResponse {
            query_type: query.query_type.clone(),
            total_count: available_components.len(),
            available_components,
        }
    }

    fn batch(&self, batch: &BatchOperation) -> Value {
        let known: Vec<&str> =
            self.script.initial_tree.as_ref().map(ComponentNode::subtree_ids).unwrap_or_default();
        let results: Vec<Value> = batch
            .operations
            .iter()
            .map(|item| {
                let (BatchItem::ComponentUpdate { operation_id, component_id, .. }
                | BatchItem::EventBinding { operation_id, component_id, .. }) = item;
                if known.contains(&component_id.as_str()) {
                    json!({ "operation_id": operation_id, "status": "success" })
                } else {
                    json!({
                        "operation_id": operation_id,
                        "error": format!("component not found: {component_id}"),
                    })
                }
            })
            .collect();
        json!({ "batch_results": results })
    }
}

fn acknowledge(event: &EventNotification) -> Value {
    let handler = event.handler.as_deref().unwrap_or(event.event_type.as_str());
    let notification =
        ComponentNode::new(format!("notification_{}", event.component_id), ComponentType::Notification)
            .with_prop("message", json!(format!("handled by {handler}")));
    json!({ "status": "success", "ui_updates": [notification] })
}

async fn send(
    socket: &mut WebSocketStream<turmoil::net::TcpStream>,
    payload: Payload,
    message_id: MessageId,
) -> io::Result<()> {
    let frame = payload
        .into_envelope(message_id, OffsetDateTime::now_utc())
        .and_then(|envelope| envelope.encode())
        .map_err(io::Error::other)?;
    socket.send(Message::Text(frame)).await.map_err(io::Error::other)
}
