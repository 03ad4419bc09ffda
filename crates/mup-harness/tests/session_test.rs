//! End-to-end sessions over the simulated network.
//!
//! A [`SimServer`] runs on the `server` host; the client host runs the real
//! runtime with a [`SimChannel`] and [`SimEnv`].

use std::time::Duration;

use mup_client::{ClientError, ClientHandle, RuntimeConfig, spawn};
use mup_core::{
    RequestError,
    dispatch::{SessionEvent, UiIntent},
    reconnect::ConnectionState,
};
use mup_harness::{ServerScript, SimChannel, SimEnv, SimServer};
use mup_proto::{
    BatchOutcome,
    payloads::{
        session::CapabilityFilters,
        update::{BatchItem, BatchOperation, ExecutionMode},
    },
};
use serde_json::{Map, json};
use tokio::sync::broadcast;

const URL: &str = "ws://server:8080/";

fn simulation() -> turmoil::Sim<'static> {
    turmoil::Builder::new().simulation_duration(Duration::from_secs(60)).build()
}

fn host_server(sim: &mut turmoil::Sim<'_>, server: &SimServer) {
    let server = server.clone();
    sim.host("server", move || {
        let server = server.clone();
        async move {
            server.serve(8080).await?;
            Ok(())
        }
    });
}

fn start_client() -> ClientHandle {
    let (handle, _task) = spawn(SimEnv::new(), SimChannel::new(), RuntimeConfig::new(URL));
    handle
}

async fn next_matching(
    events: &mut broadcast::Receiver<SessionEvent>,
    wanted: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    loop {
        let event = events.recv().await.expect("event stream open");
        if wanted(&event) {
            return event;
        }
    }
}

#[test]
fn handshake_then_initial_tree() {
    let mut sim = simulation();
    let server = SimServer::new(ServerScript::demo());
    host_server(&mut sim, &server);

    sim.client("client", async {
        let handle = start_client();
        let mut events = handle.subscribe();

        let client_id = handle.connect().await?;
        assert_eq!(client_id, "client_1");
        assert_eq!(handle.state().await?, ConnectionState::Ready);

        next_matching(&mut events, |event| matches!(event, SessionEvent::ComponentUpdate(_))).await;
        let tree = handle.tree().await?.expect("initial tree");
        assert_eq!(tree.id, "root");
        assert_eq!(tree.children[0].id, "sample_form");
        Ok(())
    });

    sim.run().expect("simulation");
}

#[test]
fn capability_query_filters_catalog() {
    let mut sim = simulation();
    host_server(&mut sim, &SimServer::new(ServerScript::demo()));

    sim.client("client", async {
        let handle = start_client();
        handle.connect().await?;

        let all = handle.query_capabilities(CapabilityFilters::default()).await?;
        assert_eq!(all.total_count, 3);

        let sortable = handle
            .query_capabilities(CapabilityFilters {
                component_type: None,
                required_features: vec!["sorting".to_string()],
            })
            .await?;
        assert_eq!(sortable.total_count, 1);
        assert_eq!(sortable.available_components[0].kind, "data_table");

        let metrics = handle.metrics().await?;
        assert!(metrics.last_latency.is_some());
        Ok(())
    });

    sim.run().expect("simulation");
}

#[test]
fn batch_reports_each_item() {
    let mut sim = simulation();
    host_server(&mut sim, &SimServer::new(ServerScript::demo()));

    sim.client("client", async {
        let handle = start_client();
        let mut events = handle.subscribe();
        handle.connect().await?;

        let batch = BatchOperation {
            operations: vec![
                BatchItem::ComponentUpdate {
                    operation_id: "op1".to_string(),
                    component_id: "sample_form".to_string(),
                    updates: Map::new(),
                },
                BatchItem::EventBinding {
                    operation_id: "op2".to_string(),
                    component_id: "missing".to_string(),
                    events: Map::new(),
                },
            ],
            execution_mode: ExecutionMode::Sequential,
            rollback_on_error: false,
        };
        let reply = handle.batch_operation(batch).await?;
        assert_eq!(reply["batch_results"].as_array().map(Vec::len), Some(2));

        let first =
            next_matching(&mut events, |event| matches!(event, SessionEvent::BatchResult { .. }))
                .await;
        let second =
            next_matching(&mut events, |event| matches!(event, SessionEvent::BatchResult { .. }))
                .await;
        assert!(matches!(
            first,
            SessionEvent::BatchResult { index: 0, outcome: BatchOutcome::Success(_) }
        ));
        assert!(matches!(
            second,
            SessionEvent::BatchResult { index: 1, outcome: BatchOutcome::Failure { .. } }
        ));
        Ok(())
    });

    sim.run().expect("simulation");
}

#[test]
fn event_reply_upserts_notification() {
    let mut sim = simulation();
    host_server(&mut sim, &SimServer::new(ServerScript::demo()));

    sim.client("client", async {
        let handle = start_client();
        let mut events = handle.subscribe();
        handle.connect().await?;
        next_matching(&mut events, |event| matches!(event, SessionEvent::ComponentUpdate(_))).await;

        let intent = UiIntent::new("sample_form", "on_submit", json!({ "email": "a@example.com" }));
        let reply = handle.request_event(intent).await?;
        assert_eq!(reply["status"], "success");

        next_matching(&mut events, |event| matches!(event, SessionEvent::ComponentUpdate(_))).await;
        let tree = handle.tree().await?.expect("tree");
        let notification = tree
            .children
            .iter()
            .find(|child| child.id == "notification_sample_form")
            .expect("notification upserted under root");
        assert_eq!(notification.props["message"], "handled by handle_form_submit");
        Ok(())
    });

    sim.run().expect("simulation");
}

#[test]
fn reconnects_after_server_hangs_up() {
    let mut sim = simulation();
    let server =
        SimServer::new(ServerScript { hang_up_after_handshake: 1, ..ServerScript::demo() });
    host_server(&mut sim, &server);

    let observed = server.clone();
    sim.client("client", async move {
        let handle = start_client();
        let mut events = handle.subscribe();
        assert_eq!(handle.connect().await?, "client_1");

        let lost =
            next_matching(&mut events, |event| matches!(event, SessionEvent::Disconnected { .. }))
                .await;
        assert!(matches!(
            lost,
            SessionEvent::Disconnected { retry_in: Some(delay), .. } if delay == Duration::from_secs(1)
        ));

        let back = next_matching(&mut events, |event| {
            matches!(event, SessionEvent::Connected { .. })
        })
        .await;
        assert!(matches!(back, SessionEvent::Connected { client_id, .. } if client_id == "client_2"));
        assert_eq!(observed.connections(), 2);
        assert_eq!(handle.metrics().await?.reconnects, 1);
        Ok(())
    });

    sim.run().expect("simulation");
}

#[test]
fn silent_server_times_out_requests() {
    let mut sim = simulation();
    host_server(&mut sim, &SimServer::new(ServerScript { silent: true, ..ServerScript::demo() }));

    sim.client("client", async {
        let handle = start_client();
        handle.connect().await?;

        let started = tokio::time::Instant::now();
        let error = handle.query_capabilities(CapabilityFilters::default()).await.unwrap_err();
        assert!(matches!(error, ClientError::Request(RequestError::Timeout { .. })));
        assert!(started.elapsed() >= Duration::from_secs(5));
        Ok(())
    });

    sim.run().expect("simulation");
}

#[test]
fn disconnect_clears_session() {
    let mut sim = simulation();
    host_server(&mut sim, &SimServer::new(ServerScript::demo()));

    sim.client("client", async {
        let handle = start_client();
        let mut events = handle.subscribe();
        handle.connect().await?;
        next_matching(&mut events, |event| matches!(event, SessionEvent::ComponentUpdate(_))).await;

        handle.disconnect().await?;
        assert_eq!(handle.state().await?, ConnectionState::Disconnected);
        assert!(handle.tree().await?.is_none());

        let error = handle.query_capabilities(CapabilityFilters::default()).await.unwrap_err();
        assert!(matches!(error, ClientError::Request(RequestError::NotConnected)));
        Ok(())
    });

    sim.run().expect("simulation");
}
