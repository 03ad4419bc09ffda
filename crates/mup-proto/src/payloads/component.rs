//! Component model.
//!
//! A [`ComponentNode`] is one element of the server-driven UI. Its `props`
//! are type-specific and opaque to the protocol; `events` declares which
//! server-side handler should receive each kind of user interaction.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Component kind.
///
/// The protocol names a fixed set of kinds; anything else is carried in
/// [`ComponentType::Other`] so newer servers do not break older clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ComponentType {
    /// Layout container
    Container,
    /// Static text
    Text,
    /// Single input field
    Input,
    /// Clickable button
    Button,
    /// Form with fields and submit
    Form,
    /// Simple table
    Table,
    /// Sortable, paginated data table
    DataTable,
    /// Transient notification
    Notification,
    /// Unrecognised kind
    Other(String),
}

impl ComponentType {
    /// Wire representation.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Container => "container",
            Self::Text => "text",
            Self::Input => "input",
            Self::Button => "button",
            Self::Form => "form",
            Self::Table => "table",
            Self::DataTable => "data_table",
            Self::Notification => "notification",
            Self::Other(raw) => raw,
        }
    }
}

impl From<String> for ComponentType {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "container" => Self::Container,
            "text" => Self::Text,
            "input" => Self::Input,
            "button" => Self::Button,
            "form" => Self::Form,
            "table" => Self::Table,
            "data_table" => Self::DataTable,
            "notification" => Self::Notification,
            _ => Self::Other(raw),
        }
    }
}

impl From<ComponentType> for String {
    fn from(kind: ComponentType) -> Self {
        match kind {
            ComponentType::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server-side handler bound to a component event.
///
/// Accepts `{ "handler": "name", .. }` and the bare `"name"` shorthand. A
/// binding without a handler name, or of any other shape, decodes with
/// `handler: None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawBinding")]
pub struct EventBinding {
    /// Handler name the server dispatches on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
    /// Any further binding attributes
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EventBinding {
    /// Binding with only a handler name.
    pub fn new(handler: impl Into<String>) -> Self {
        Self { handler: Some(handler.into()), extra: Map::new() }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawBinding {
    Name(String),
    Full {
        #[serde(default, deserialize_with = "handler_name")]
        handler: Option<String>,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    Opaque(Value),
}

fn handler_name<'de, D: serde::Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(name) => Some(name),
        _ => None,
    })
}

impl From<RawBinding> for EventBinding {
    fn from(raw: RawBinding) -> Self {
        match raw {
            RawBinding::Name(handler) => Self::new(handler),
            RawBinding::Full { handler, extra } => Self { handler, extra },
            RawBinding::Opaque(_) => Self { handler: None, extra: Map::new() },
        }
    }
}

/// One node of the component tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentNode {
    /// Identifier, unique within the tree
    pub id: String,
    /// Component kind
    #[serde(rename = "type")]
    pub kind: ComponentType,
    /// Type-specific attributes
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub props: Map<String, Value>,
    /// Event name → handler binding
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub events: BTreeMap<String, EventBinding>,
    /// Ordered children
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ComponentNode>,
    /// Fields the protocol does not interpret (`version`, `metadata`, ..)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ComponentNode {
    /// Leaf node with no props, events or children.
    pub fn new(id: impl Into<String>, kind: ComponentType) -> Self {
        Self {
            id: id.into(),
            kind,
            props: Map::new(),
            events: BTreeMap::new(),
            children: Vec::new(),
            extra: Map::new(),
        }
    }

    /// Builder: append a child.
    #[must_use]
    pub fn with_child(mut self, child: Self) -> Self {
        self.children.push(child);
        self
    }

    /// Builder: set a prop.
    #[must_use]
    pub fn with_prop(mut self, key: impl Into<String>, value: Value) -> Self {
        self.props.insert(key.into(), value);
        self
    }

    /// Builder: bind an event to a handler.
    #[must_use]
    pub fn with_event(mut self, event: impl Into<String>, handler: impl Into<String>) -> Self {
        self.events.insert(event.into(), EventBinding::new(handler));
        self
    }

    /// Handler name bound to `event`, if any.
    pub fn handler_for(&self, event: &str) -> Option<&str> {
        self.events.get(event).and_then(|binding| binding.handler.as_deref())
    }

    /// Ids of this node and all of its descendants, depth-first pre-order.
    pub fn subtree_ids(&self) -> Vec<&str> {
        let mut ids = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            ids.push(node.id.as_str());
            stack.extend(node.children.iter().rev());
        }
        ids
    }
}
