//! Session payloads: handshake and capability discovery.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Rendering features a client declares at handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCapabilities {
    /// Surfaces the client can render to (`web`, `terminal`, ..)
    pub rendering_targets: Vec<String>,
    /// DOM-level events the client can report
    pub supported_events: Vec<String>,
    /// Deepest tree the client accepts
    pub max_component_depth: u32,
    /// Whether updates may arrive while a previous one is rendering
    pub concurrent_updates: bool,
    /// Whether the client speaks MCP side channels
    #[serde(default)]
    pub mcp_integration: bool,
}

impl Default for ClientCapabilities {
    fn default() -> Self {
        Self {
            rendering_targets: vec!["web".to_string()],
            supported_events: ["click", "input", "change", "submit"]
                .into_iter()
                .map(String::from)
                .collect(),
            max_component_depth: 10,
            concurrent_updates: true,
            mcp_integration: false,
        }
    }
}

/// Client identification sent at handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Human-readable client name
    pub name: String,
    /// Client version
    pub version: String,
    /// Declared features
    pub capabilities: ClientCapabilities,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: "mup-client".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            capabilities: ClientCapabilities::default(),
        }
    }
}

/// User and session context re-sent on every handshake.
///
/// Authentication material, if any, lives in `preferences` or extra fields
/// and is opaque to the protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    /// End-user identifier
    pub user_id: String,
    /// Client-chosen session identifier, stable across reconnects
    pub session_id: String,
    /// Display and accessibility preferences
    #[serde(default)]
    pub preferences: Value,
}

impl SessionContext {
    /// Context with the default preference set.
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
            preferences: json!({
                "theme": "light",
                "language": "en",
                "accessibility": { "high_contrast": false, "screen_reader": false }
            }),
        }
    }
}

/// `handshake_request` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    /// Who is connecting
    pub client_info: ClientInfo,
    /// On whose behalf
    pub context: SessionContext,
}

/// Server identification returned at handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server name
    #[serde(default)]
    pub name: String,
    /// Server version
    #[serde(default)]
    pub version: String,
    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Vendor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
}

/// `handshake_response` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    /// Identifier the server assigned to this client
    pub client_id: String,
    /// Capability name → descriptor
    #[serde(default)]
    pub capabilities: Map<String, Value>,
    /// Server identification
    #[serde(default)]
    pub server_info: ServerInfo,
    /// Server-side session details
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub session_info: Value,
}

/// Filters narrowing a [`CapabilityQuery`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityFilters {
    /// Only this component type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_type: Option<String>,
    /// Only components offering all of these features
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_features: Vec<String>,
}

/// Query kind asking which component types the server can produce.
pub const COMPONENT_AVAILABILITY: &str = "component_availability";

/// `capability_query` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityQuery {
    /// Query kind, normally [`COMPONENT_AVAILABILITY`]
    pub query_type: String,
    /// Narrowing filters
    #[serde(default)]
    pub filters: CapabilityFilters,
}

impl CapabilityQuery {
    /// Component availability query with the given filters.
    pub fn component_availability(filters: CapabilityFilters) -> Self {
        Self { query_type: COMPONENT_AVAILABILITY.to_string(), filters }
    }
}

/// A component type the server offers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentCapability {
    /// Component type name
    #[serde(rename = "type")]
    pub kind: String,
    /// Implementation version
    #[serde(default)]
    pub version: String,
    /// Supported features
    #[serde(default)]
    pub features: Vec<String>,
}

/// `capability_response` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityResponse {
    /// Echo of the query kind
    pub query_type: String,
    /// Matching component types
    #[serde(default)]
    pub available_components: Vec<ComponentCapability>,
    /// Number of matches
    #[serde(default)]
    pub total_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_response_tolerates_sparse_server() {
        let response: HandshakeResponse =
            serde_json::from_value(json!({ "client_id": "c1" })).unwrap();
        assert_eq!(response.client_id, "c1");
        assert!(response.capabilities.is_empty());
        assert_eq!(response.server_info, ServerInfo::default());
    }

    #[test]
    fn empty_filters_serialize_to_empty_object() {
        let query = CapabilityQuery::component_availability(CapabilityFilters::default());
        assert_eq!(
            serde_json::to_value(&query).unwrap(),
            json!({ "query_type": "component_availability", "filters": {} })
        );
    }

    #[test]
    fn capability_response_decodes_component_list() {
        let response: CapabilityResponse = serde_json::from_value(json!({
            "query_type": "component_availability",
            "available_components": [
                { "type": "form", "version": "2.0.0", "features": ["validation", "auto_save"] }
            ],
            "total_count": 1
        }))
        .unwrap();

        assert_eq!(response.total_count, 1);
        assert_eq!(response.available_components[0].kind, "form");
    }
}
