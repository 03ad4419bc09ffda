//! Error types for the client engine.

use std::time::Duration;

use mup_proto::{Path, PatchKind, ProtocolError};
use thiserror::Error;

use crate::reconnect::ConnectionState;

/// Errors from connection state transitions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Operation not valid in the current state
    #[error("invalid state {state:?} for {operation}")]
    InvalidState {
        /// State the connection was in
        state: ConnectionState,
        /// Operation that was attempted
        operation: &'static str,
    },
}

/// Why a correlated request did not produce a reply.
///
/// Every outstanding request settles exactly once, either with the reply
/// payload or with one of these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// The session was not ready when the request was issued
    #[error("not connected")]
    NotConnected,

    /// No reply within the request timeout
    #[error("request timed out after {after:?}")]
    Timeout {
        /// Timeout that elapsed
        after: Duration,
    },

    /// The channel went away while the request was outstanding
    #[error("connection lost")]
    ConnectionLost,

    /// The caller cancelled the request
    #[error("request cancelled")]
    Cancelled,

    /// The frame could not be written to the channel
    #[error("failed to send request")]
    SendFailed,

    /// The server answered with an `error` message
    #[error("server error: {message}")]
    Remote {
        /// Error text from the server
        message: String,
    },
}

/// Errors from a single component tree operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// The path does not resolve to a node (or an insertion point)
    #[error("no node at {path}")]
    PathNotFound {
        /// Unresolvable path
        path: Path,
    },

    /// A move whose destination lies inside the moved subtree
    #[error("cannot move {path} into its own subtree at {destination}")]
    CyclicMove {
        /// Node being moved
        path: Path,
        /// Requested destination
        destination: Path,
    },

    /// Inserting would give two nodes the same id
    #[error("component id {id} already present")]
    DuplicateId {
        /// Conflicting id
        id: String,
    },
}

/// A patch stopped at a failing operation.
///
/// Operations before `index` stay applied; the failing one and everything
/// after it did not touch the tree.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("patch operation {index} ({kind}) failed: {source}")]
pub struct PatchError {
    /// Position of the failing operation (also the number applied)
    pub index: usize,
    /// Kind of the failing operation
    pub kind: PatchKind,
    /// What went wrong
    #[source]
    pub source: TreeError,
}

/// Errors surfaced by engine entry points.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Fire-and-forget traffic needs a ready session
    #[error("not connected (state {state:?})")]
    NotConnected {
        /// State the engine was in
        state: ConnectionState,
    },

    /// Invalid lifecycle transition
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Envelope could not be encoded
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
