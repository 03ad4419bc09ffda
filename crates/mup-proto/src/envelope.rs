//! Envelope codec.
//!
//! A frame on the wire looks like:
//!
//! ```json
//! { "mup": { "version": "2.0.0", "message_type": "capability_query",
//!            "message_id": "msg_1_k3j9x0a1b", "timestamp": "2024-01-01T00:00:00Z",
//!            "payload": {} } }
//! ```
//!
//! Decoding requires `message_type` and `message_id`. The timestamp is read
//! as ISO-8601 when it parses (a missing offset means UTC) and dropped
//! otherwise. The payload stays raw JSON until a handler asks for a typed
//! view.

use std::fmt;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use time::{
    OffsetDateTime, PrimitiveDateTime,
    format_description::well_known::{Iso8601, Rfc3339},
};

use crate::{MessageType, ProtocolError, Result};

/// Protocol version stamped on outbound envelopes.
pub const PROTOCOL_VERSION: &str = "2.0.0";

/// Correlation key of an envelope.
///
/// Unique among outstanding requests of one engine instance. Replies carry the
/// id of the request they answer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Wrap an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Top-level protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol version of the sender
    #[serde(default = "default_version")]
    pub version: String,
    /// Message type tag
    pub message_type: MessageType,
    /// Correlation key
    pub message_id: MessageId,
    /// Send time; `None` if absent or unparseable
    #[serde(default, with = "timestamp", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<OffsetDateTime>,
    /// Type-specific payload, kept raw
    #[serde(default)]
    pub payload: Value,
}

fn default_version() -> String {
    PROTOCOL_VERSION.to_string()
}

mod timestamp {
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;
    use time::OffsetDateTime;

    #[allow(clippy::ref_option)] // signature fixed by `serde(with)`
    pub(super) fn serialize<S: Serializer>(
        value: &Option<OffsetDateTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        time::serde::rfc3339::option::serialize(value, serializer)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<OffsetDateTime>, D::Error> {
        Ok(match Value::deserialize(deserializer)? {
            Value::String(raw) => super::parse_timestamp(&raw),
            _ => None,
        })
    }
}

/// Parse an ISO-8601 timestamp; one without an offset is taken as UTC.
fn parse_timestamp(raw: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(raw, &Rfc3339)
        .or_else(|_| OffsetDateTime::parse(raw, &Iso8601::DEFAULT))
        .or_else(|_| {
            PrimitiveDateTime::parse(raw, &Iso8601::DEFAULT).map(PrimitiveDateTime::assume_utc)
        })
        .ok()
}

#[derive(Serialize)]
struct WireRef<'a> {
    mup: &'a Envelope,
}

#[derive(Deserialize)]
struct Wire {
    mup: Envelope,
}

impl Envelope {
    /// Build an envelope stamped with [`PROTOCOL_VERSION`].
    pub fn new(
        message_type: MessageType,
        message_id: MessageId,
        timestamp: OffsetDateTime,
        payload: Value,
    ) -> Self {
        Self {
            version: default_version(),
            message_type,
            message_id,
            timestamp: Some(timestamp),
            payload,
        }
    }

    /// Encode into a JSON text frame.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(&WireRef { mup: self }).map_err(ProtocolError::Encode)
    }

    /// Decode a JSON text frame.
    pub fn decode(text: &str) -> Result<Self> {
        serde_json::from_str::<Wire>(text)
            .map(|wire| wire.mup)
            .map_err(ProtocolError::MalformedEnvelope)
    }

    /// Decode the payload as `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        T::deserialize(&self.payload).map_err(|source| ProtocolError::InvalidPayload {
            message_type: self.message_type.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::datetime;

    use super::*;

    fn sample() -> Envelope {
        Envelope::new(
            MessageType::CapabilityQuery,
            MessageId::from("msg_1_abc"),
            datetime!(2024-01-01 0:00 UTC),
            json!({ "query_type": "component_availability", "filters": {} }),
        )
    }

    #[test]
    fn encode_wraps_in_mup_object() {
        let text = sample().encode().unwrap();
        insta::assert_snapshot!(text, @r#"{"mup":{"version":"2.0.0","message_type":"capability_query","message_id":"msg_1_abc","timestamp":"2024-01-01T00:00:00Z","payload":{"filters":{},"query_type":"component_availability"}}}"#);
    }

    #[test]
    fn decode_accepts_encoded_frame() {
        let envelope = sample();
        let decoded = Envelope::decode(&envelope.encode().unwrap()).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn decode_accepts_millisecond_timestamps_and_missing_version() {
        let text = r#"{"mup":{"message_type":"error","message_id":"m9",
            "timestamp":"2024-05-06T07:08:09.123Z","payload":{"error":"boom"}}}"#;
        let envelope = Envelope::decode(text).unwrap();
        assert_eq!(envelope.version, PROTOCOL_VERSION);
        assert_eq!(envelope.message_type, MessageType::Error);
        assert_eq!(envelope.message_id.as_str(), "m9");
    }

    #[test]
    fn decode_accepts_timestamp_without_offset() {
        let text = r#"{"mup":{"version":"1.0.0","message_type":"handshake_response",
            "message_id":"msg_1","timestamp":"2024-01-01T00:00:00.123456",
            "payload":{"client_id":"c1"}}}"#;
        let envelope = Envelope::decode(text).unwrap();
        assert_eq!(envelope.message_type, MessageType::HandshakeResponse);
        let date = envelope.timestamp.map(OffsetDateTime::date);
        assert_eq!(date, Some(datetime!(2024-01-01 0:00 UTC).date()));

        assert_eq!(
            parse_timestamp("2024-03-04T05:06:07"),
            Some(datetime!(2024-03-04 5:06:07 UTC))
        );
    }

    #[test]
    fn decode_tolerates_bad_or_missing_timestamp() {
        for timestamp in [r#""yesterday""#, "1704067200", "null"] {
            let text = format!(
                r#"{{"mup":{{"message_type":"error","message_id":"m1","timestamp":{timestamp}}}}}"#
            );
            let envelope = Envelope::decode(&text).unwrap();
            assert_eq!(envelope.timestamp, None);
        }

        let bare =
            Envelope::decode(r#"{"mup":{"message_type":"error","message_id":"m1"}}"#).unwrap();
        assert_eq!(bare.timestamp, None);
    }

    #[test]
    fn decode_rejects_frame_without_mup_wrapper() {
        let text = r#"{"message_type":"error","message_id":"m9"}"#;
        assert!(matches!(Envelope::decode(text), Err(ProtocolError::MalformedEnvelope(_))));
    }

    #[test]
    fn decode_rejects_non_json() {
        assert!(matches!(Envelope::decode("not json"), Err(ProtocolError::MalformedEnvelope(_))));
    }

    #[test]
    fn decode_keeps_unknown_message_type() {
        let text = r#"{"mup":{"message_type":"state_sync","message_id":"m1",
            "timestamp":"2024-01-01T00:00:00Z"}}"#;
        let envelope = Envelope::decode(text).unwrap();
        assert_eq!(envelope.message_type, MessageType::Unknown("state_sync".into()));
        assert_eq!(envelope.payload, Value::Null);
    }
}
