//! Engine configuration.

use std::time::Duration;

use mup_proto::payloads::session::{ClientInfo, SessionContext};

use crate::reconnect::ReconnectPolicy;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Server endpoint (`ws://host:port/path`)
    pub url: String,
    /// Client identification sent at handshake
    pub client_info: ClientInfo,
    /// User and session context sent at handshake
    pub context: SessionContext,
    /// Reconnect budget and backoff base
    pub reconnect: ReconnectPolicy,
    /// How long a correlated request waits for its reply
    pub request_timeout: Duration,
    /// How long the server has to answer the handshake
    pub handshake_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8080".to_string(),
            client_info: ClientInfo::default(),
            context: SessionContext::new("anonymous", "default"),
            reconnect: ReconnectPolicy::default(),
            request_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    /// Defaults pointed at `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), ..Self::default() }
    }

    /// Builder: set the handshake context.
    #[must_use]
    pub fn with_context(mut self, context: SessionContext) -> Self {
        self.context = context;
        self
    }
}
