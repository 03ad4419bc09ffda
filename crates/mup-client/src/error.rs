//! Client error types.

use mup_core::{EngineError, RequestError};
use thiserror::Error;

/// Errors returned by [`crate::ClientHandle`].
#[derive(Error, Debug)]
pub enum ClientError {
    /// The request settled without a reply
    #[error(transparent)]
    Request(#[from] RequestError),

    /// The engine rejected the call
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The reply did not have the expected shape
    #[error("invalid reply: {0}")]
    InvalidReply(#[source] serde_json::Error),

    /// Reconnect attempts exhausted before the session became ready
    #[error("reconnect attempts exhausted")]
    RetriesExhausted,

    /// The session was closed while waiting
    #[error("session closed")]
    Closed,

    /// The runtime task is gone
    #[error("client runtime stopped")]
    Stopped,
}
