//! Runtime over a real loopback WebSocket.
#![cfg(feature = "websocket")]

use futures_util::{SinkExt, StreamExt};
use mup_client::{ClientError, RuntimeConfig, SystemEnv, WebSocketChannel, spawn};
use mup_core::{RequestError, dispatch::UiIntent, reconnect::ConnectionState};
use mup_proto::{Envelope, MessageId, MessageType, payloads::session::CapabilityFilters};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

/// Answer the handshake and every capability query, then wait for close.
async fn serve_one(listener: TcpListener) {
    let (stream, _) = listener.accept().await.unwrap();
    let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();

    while let Some(Ok(message)) = socket.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let request = Envelope::decode(&text).unwrap();
        let (message_type, message_id, payload) = match request.message_type {
            MessageType::HandshakeRequest => (
                MessageType::HandshakeResponse,
                MessageId::from("srv_1"),
                json!({ "client_id": "c1", "server_info": { "name": "loopback", "version": "2.0.0" } }),
            ),
            MessageType::CapabilityQuery => (
                MessageType::CapabilityResponse,
                request.message_id.clone(),
                json!({
                    "query_type": "component_availability",
                    "available_components": [{ "type": "form", "version": "2.0.0", "features": [] }],
                    "total_count": 1
                }),
            ),
            _ => (
                MessageType::Error,
                request.message_id.clone(),
                json!({ "error": "unsupported" }),
            ),
        };
        let reply = Envelope { message_type, message_id, payload, ..request };
        socket.send(Message::Text(reply.encode().unwrap())).await.unwrap();
    }
}

#[tokio::test]
async fn connect_query_disconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let server = tokio::spawn(serve_one(listener));

    let (handle, _task) = spawn(SystemEnv::new(), WebSocketChannel::new(), RuntimeConfig::new(url));
    assert_eq!(handle.connect().await.unwrap(), "c1");

    let response = handle.query_capabilities(CapabilityFilters::default()).await.unwrap();
    assert_eq!(response.total_count, 1);
    assert_eq!(response.available_components[0].kind, "form");

    let error = handle.batch_operation(serde_json::from_value(json!({ "operations": [] })).unwrap());
    assert!(matches!(
        error.await,
        Err(ClientError::Request(RequestError::Remote { message })) if message == "unsupported"
    ));

    let metrics = handle.metrics().await.unwrap();
    assert_eq!(metrics.messages_sent, 3);
    assert_eq!(metrics.messages_received, 3);

    handle.disconnect().await.unwrap();
    assert_eq!(handle.state().await.unwrap(), ConnectionState::Disconnected);
    server.await.unwrap();
}

#[tokio::test]
async fn requests_before_connect_fail_fast() {
    let (handle, _task) = spawn(
        SystemEnv::new(),
        WebSocketChannel::new(),
        RuntimeConfig::new("ws://127.0.0.1:9"),
    );

    let intent = UiIntent::new("f", "on_submit", Value::Null);
    let error = handle.request_event(intent.clone()).await;
    assert!(matches!(error, Err(ClientError::Request(RequestError::NotConnected))));
    assert!(matches!(handle.send_event(intent).await, Err(ClientError::Engine(_))));
}

#[tokio::test]
async fn handle_outliving_runtime_reports_stopped() {
    let (handle, task) = spawn(
        SystemEnv::new(),
        WebSocketChannel::new(),
        RuntimeConfig::new("ws://127.0.0.1:9"),
    );
    task.abort();
    let _ = task.await;

    assert!(matches!(handle.state().await, Err(ClientError::Stopped)));
}
