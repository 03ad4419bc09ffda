//! Async runtime for the MUP client engine.
//!
//! [`mup_core::Engine`] decides; this crate does. A [`Runtime`] task owns the
//! engine and the live channel connection, executes engine actions, feeds
//! channel events back and sleeps until the engine's next deadline. Callers
//! talk to it through a cloneable [`ClientHandle`]: requests resolve through
//! oneshot continuations, session events arrive through listeners or a
//! broadcast subscription.
//!
//! # Components
//!
//! - [`ClientHandle`]: async API (connect, query, batch, intents, listeners)
//! - [`Runtime`]: generic orchestration loop over any [`mup_core::transport::Channel`]
//! - [`websocket`]: production channel over `tokio-tungstenite`
//! - [`SystemEnv`]: system clock and OS randomness
//! - [`RuntimeConfig`]: engine configuration plus queue sizes

mod config;
mod error;
mod handle;
mod runtime;
mod system_env;
#[cfg(feature = "websocket")]
pub mod websocket;

pub use config::RuntimeConfig;
pub use error::ClientError;
pub use handle::{ClientHandle, RequestTicket};
pub use runtime::{Runtime, spawn};
pub use system_env::SystemEnv;
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketChannel, WebSocketConnection};

/// Connect to `url` over a WebSocket with default settings.
///
/// Spawns the runtime on the current tokio runtime and waits for the
/// handshake to complete.
///
/// # Errors
///
/// Whatever [`ClientHandle::connect`] reports.
#[cfg(feature = "websocket")]
pub async fn connect(url: impl Into<String>) -> Result<ClientHandle, ClientError> {
    let config = RuntimeConfig::new(url);
    let (handle, _task) = spawn(SystemEnv::new(), WebSocketChannel::new(), config);
    handle.connect().await?;
    Ok(handle)
}
