//! Runtime configuration.

use mup_core::EngineConfig;

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Engine configuration (URL, handshake context, timeouts, reconnect)
    pub engine: EngineConfig,
    /// Commands buffered between handles and the runtime task
    pub command_capacity: usize,
    /// Session events buffered per broadcast subscriber
    pub event_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { engine: EngineConfig::default(), command_capacity: 64, event_capacity: 256 }
    }
}

impl RuntimeConfig {
    /// Defaults pointed at `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self { engine: EngineConfig::new(url), ..Self::default() }
    }
}
