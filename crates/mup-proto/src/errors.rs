//! Protocol error types.

use thiserror::Error;

use crate::MessageType;

/// Convenience alias for results produced by this crate.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while encoding or decoding wire messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The text frame is not a valid `{ "mup": { .. } }` envelope.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(#[source] serde_json::Error),

    /// The envelope decoded but its payload does not match its message type.
    #[error("invalid {message_type} payload: {source}")]
    InvalidPayload {
        /// Message type the payload was decoded as
        message_type: MessageType,
        /// Underlying decode error
        #[source]
        source: serde_json::Error,
    },

    /// Serializing an outbound envelope failed.
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),
}
