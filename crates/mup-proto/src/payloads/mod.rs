//! Typed payload views.
//!
//! [`Payload`] is a closed union over the message types the protocol defines,
//! with an explicit [`Payload::Unknown`] arm for anything else.

pub mod component;
pub mod patch;
pub mod session;
pub mod update;

use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;

use crate::{Envelope, MessageId, MessageType, ProtocolError, Result};

/// Payload of an envelope, typed by its message type.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Client capability announcement
    HandshakeRequest(session::HandshakeRequest),
    /// Session assignment
    HandshakeResponse(session::HandshakeResponse),
    /// Capability lookup
    CapabilityQuery(session::CapabilityQuery),
    /// Capability lookup result
    CapabilityResponse(session::CapabilityResponse),
    /// Grouped component operations
    BatchOperation(update::BatchOperation),
    /// User interaction report
    EventNotification(update::EventNotification),
    /// Tree update; kept raw, see [`update::ComponentUpdate::from_value`]
    ComponentUpdate(Value),
    /// Error report
    Error(update::ErrorPayload),
    /// Unrecognised message type
    Unknown {
        /// Raw message type string
        message_type: String,
        /// Raw payload
        payload: Value,
    },
}

impl Payload {
    /// Message type this payload travels under.
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::HandshakeRequest(_) => MessageType::HandshakeRequest,
            Self::HandshakeResponse(_) => MessageType::HandshakeResponse,
            Self::CapabilityQuery(_) => MessageType::CapabilityQuery,
            Self::CapabilityResponse(_) => MessageType::CapabilityResponse,
            Self::BatchOperation(_) => MessageType::BatchOperation,
            Self::EventNotification(_) => MessageType::EventNotification,
            Self::ComponentUpdate(_) => MessageType::ComponentUpdate,
            Self::Error(_) => MessageType::Error,
            Self::Unknown { message_type, .. } => MessageType::Unknown(message_type.clone()),
        }
    }

    /// Decode the typed payload of an envelope.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self> {
        Ok(match &envelope.message_type {
            MessageType::HandshakeRequest => Self::HandshakeRequest(envelope.payload_as()?),
            MessageType::HandshakeResponse => Self::HandshakeResponse(envelope.payload_as()?),
            MessageType::CapabilityQuery => Self::CapabilityQuery(envelope.payload_as()?),
            MessageType::CapabilityResponse => Self::CapabilityResponse(envelope.payload_as()?),
            MessageType::BatchOperation => Self::BatchOperation(envelope.payload_as()?),
            MessageType::EventNotification => Self::EventNotification(envelope.payload_as()?),
            MessageType::ComponentUpdate => Self::ComponentUpdate(envelope.payload.clone()),
            MessageType::Error => Self::Error(envelope.payload_as()?),
            MessageType::Unknown(tag) => {
                Self::Unknown { message_type: tag.clone(), payload: envelope.payload.clone() }
            },
        })
    }

    /// Wrap this payload in an envelope.
    pub fn into_envelope(
        self,
        message_id: MessageId,
        timestamp: OffsetDateTime,
    ) -> Result<Envelope> {
        let message_type = self.message_type();
        let payload = match self {
            Self::HandshakeRequest(p) => raw(&p)?,
            Self::HandshakeResponse(p) => raw(&p)?,
            Self::CapabilityQuery(p) => raw(&p)?,
            Self::CapabilityResponse(p) => raw(&p)?,
            Self::BatchOperation(p) => raw(&p)?,
            Self::EventNotification(p) => raw(&p)?,
            Self::Error(p) => raw(&p)?,
            Self::ComponentUpdate(payload) | Self::Unknown { payload, .. } => payload,
        };
        Ok(Envelope::new(message_type, message_id, timestamp, payload))
    }
}

fn raw<T: Serialize>(payload: &T) -> Result<Value> {
    serde_json::to_value(payload).map_err(ProtocolError::Encode)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::datetime;

    use super::*;

    #[test]
    fn typed_payload_survives_envelope() {
        let payload = Payload::Error(update::ErrorPayload::new("bad query"));
        let envelope = payload
            .clone()
            .into_envelope(MessageId::from("m1"), datetime!(2024-01-01 0:00 UTC))
            .unwrap();

        assert_eq!(envelope.message_type, MessageType::Error);
        assert_eq!(envelope.payload, json!({ "error": "bad query" }));
        assert_eq!(Payload::from_envelope(&envelope).unwrap(), payload);
    }

    #[test]
    fn mismatched_payload_is_invalid() {
        let envelope = Envelope::new(
            MessageType::HandshakeResponse,
            MessageId::from("m1"),
            datetime!(2024-01-01 0:00 UTC),
            json!({ "capabilities": {} }),
        );

        let err = Payload::from_envelope(&envelope).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidPayload { message_type: MessageType::HandshakeResponse, .. }
        ));
    }

    #[test]
    fn unknown_type_keeps_raw_payload() {
        let envelope = Envelope::new(
            MessageType::from("context_transfer"),
            MessageId::from("m2"),
            datetime!(2024-01-01 0:00 UTC),
            json!({ "k": 1 }),
        );

        match Payload::from_envelope(&envelope).unwrap() {
            Payload::Unknown { message_type, payload } => {
                assert_eq!(message_type, "context_transfer");
                assert_eq!(payload, json!({ "k": 1 }));
            },
            other => unreachable!("unexpected payload {other:?}"),
        }
    }
}
