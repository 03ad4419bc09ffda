//! Connects to a MUP server, runs a capability query, optionally reports one
//! UI intent, then logs every session event until the deadline or Ctrl-C.
//!
//! ```text
//! RUST_LOG=mup=debug mup-probe ws://localhost:8080 --feature validation
//! ```

use std::{process::ExitCode, time::Duration};

use clap::Parser;
use mup_client::{ClientError, ClientHandle, RuntimeConfig, SystemEnv, WebSocketChannel, spawn};
use mup_core::dispatch::{SessionEvent, UiIntent};
use mup_proto::payloads::session::{CapabilityFilters, SessionContext};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mup-probe", version, about)]
struct Args {
    /// Server endpoint
    #[arg(default_value = "ws://localhost:8080")]
    url: String,

    /// User id sent at handshake
    #[arg(long, default_value = "probe")]
    user: String,

    /// Session id sent at handshake
    #[arg(long, default_value = "probe-session")]
    session: String,

    /// Only query this component type
    #[arg(long)]
    component_type: Option<String>,

    /// Only query components offering this feature (repeatable)
    #[arg(long = "feature")]
    features: Vec<String>,

    /// Report an intent as `component_id:event_type` after connecting
    #[arg(long)]
    intent: Option<String>,

    /// Seconds to keep listening
    #[arg(long, default_value_t = 10)]
    duration: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(%error, "probe failed");
            ExitCode::FAILURE
        },
    }
}

async fn run(args: Args) -> Result<(), ClientError> {
    let mut config = RuntimeConfig::new(&args.url);
    config.engine = config.engine.with_context(SessionContext::new(&args.user, &args.session));
    let (handle, _runtime) = spawn(SystemEnv::new(), WebSocketChannel::new(), config);
    let mut events = handle.subscribe();

    let client_id = handle.connect().await?;
    info!(url = %args.url, %client_id, "connected");

    let filters = CapabilityFilters {
        component_type: args.component_type.clone(),
        required_features: args.features,
    };
    let capabilities = handle.query_capabilities(filters).await?;
    for component in &capabilities.available_components {
        info!(
            kind = %component.kind,
            version = %component.version,
            features = ?component.features,
            "component available"
        );
    }
    info!(total = capabilities.total_count, "capability query answered");

    if let Some(intent) = args.intent.as_deref() {
        report_intent(&handle, intent).await?;
    }

    let deadline = tokio::time::sleep(Duration::from_secs(args.duration));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            () = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            },
            event = events.recv() => match event {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event log lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    let metrics = handle.metrics().await?;
    match serde_json::to_string(&metrics) {
        Ok(json) => info!(metrics = %json, "session metrics"),
        Err(error) => warn!(%error, "could not encode metrics"),
    }
    handle.disconnect().await
}

async fn report_intent(handle: &ClientHandle, target: &str) -> Result<(), ClientError> {
    let Some((component_id, event_type)) = target.split_once(':') else {
        warn!(intent = target, "expected component_id:event_type, skipping");
        return Ok(());
    };
    let reply = handle.request_event(UiIntent::new(component_id, event_type, Value::Null)).await?;
    info!(component_id, event_type, %reply, "intent acknowledged");
    Ok(())
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::Connected { client_id, .. } => info!(%client_id, "session ready"),
        SessionEvent::Disconnected { reason, retry_in } => {
            warn!(%reason, ?retry_in, "disconnected");
        },
        SessionEvent::Error(payload) => warn!(error = %payload.error, "server error"),
        SessionEvent::ComponentUpdate(payload) => info!(%payload, "component update"),
        SessionEvent::BatchResult { index, outcome } => info!(index, ?outcome, "batch result"),
        SessionEvent::SyncFailed(error) => warn!(%error, "tree out of sync"),
    }
}
