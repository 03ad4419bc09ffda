//! Message type tags.
//!
//! The wire carries the tag as a snake_case string. Unrecognised strings are
//! kept verbatim in [`MessageType::Unknown`] so the receiver can log them;
//! they are never an error at this layer.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Envelope message type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    /// Client → server: opening capability exchange
    HandshakeRequest,
    /// Server → client: assigned client id and server capabilities
    HandshakeResponse,
    /// Client → server: filtered capability lookup
    CapabilityQuery,
    /// Server → client: capability lookup result
    CapabilityResponse,
    /// Client → server: several component operations in one request
    BatchOperation,
    /// Client → server: user interaction on a component
    EventNotification,
    /// Server → client: tree snapshot, patch, upserts or batch results
    ComponentUpdate,
    /// Either direction: error report
    Error,
    /// Any other tag, kept verbatim
    Unknown(String),
}

impl MessageType {
    /// Wire representation of this tag.
    pub fn as_str(&self) -> &str {
        match self {
            Self::HandshakeRequest => "handshake_request",
            Self::HandshakeResponse => "handshake_response",
            Self::CapabilityQuery => "capability_query",
            Self::CapabilityResponse => "capability_response",
            Self::BatchOperation => "batch_operation",
            Self::EventNotification => "event_notification",
            Self::ComponentUpdate => "component_update",
            Self::Error => "error",
            Self::Unknown(raw) => raw,
        }
    }

    /// Whether this is one of the tags the protocol defines.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

impl From<&str> for MessageType {
    fn from(raw: &str) -> Self {
        match raw {
            "handshake_request" => Self::HandshakeRequest,
            "handshake_response" => Self::HandshakeResponse,
            "capability_query" => Self::CapabilityQuery,
            "capability_response" => Self::CapabilityResponse,
            "batch_operation" => Self::BatchOperation,
            "event_notification" => Self::EventNotification,
            "component_update" => Self::ComponentUpdate,
            "error" => Self::Error,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl From<String> for MessageType {
    fn from(raw: String) -> Self {
        match Self::from(raw.as_str()) {
            Self::Unknown(_) => Self::Unknown(raw),
            known => known,
        }
    }
}

impl From<MessageType> for String {
    fn from(message_type: MessageType) -> Self {
        match message_type {
            MessageType::Unknown(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
