//! Component updates, batches, events and errors.
//!
//! `component_update` is overloaded on the wire: the same message type carries
//! full snapshots, positional patches, lists of components to upsert, single
//! components and batch results. [`ComponentUpdate::from_value`] picks the
//! shape by looking at which keys are present.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{component::ComponentNode, patch::PatchOperation};
use crate::{MessageType, ProtocolError, Result};

/// Outcome of one item of a server-side batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    /// Item succeeded; raw result object
    Success(Value),
    /// Item failed
    Failure {
        /// Error message
        error: String,
        /// Raw result object
        detail: Value,
    },
}

impl BatchOutcome {
    /// Classify a raw batch result: anything carrying an `error` field failed.
    pub fn from_value(value: Value) -> Self {
        let error = value.get("error").map(|error| match error {
            Value::String(message) => message.clone(),
            other => other.to_string(),
        });
        match error {
            Some(error) => Self::Failure { error, detail: value },
            None => Self::Success(value),
        }
    }

    /// Whether this item succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Classified `component_update` payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentUpdate {
    /// Per-item results of a batch operation
    BatchResults(Vec<BatchOutcome>),
    /// Full tree snapshot
    Snapshot(ComponentNode),
    /// Ordered positional patch
    Patch(Vec<PatchOperation>),
    /// Top-level components to upsert
    Upserts(Vec<ComponentNode>),
    /// One component to upsert
    Single(ComponentNode),
    /// None of the above; listeners still see the raw payload
    Opaque,
}

impl ComponentUpdate {
    /// Classify a raw `component_update` payload.
    ///
    /// Keys are checked in order: `batch_results`, `root_component`,
    /// `operations`, `ui_updates`, `component`; otherwise a payload that is
    /// itself a node (`id` + `type`) is a single update.
    pub fn from_value(payload: &Value) -> Result<Self> {
        if let Some(results) = payload.get("batch_results") {
            let results: Vec<Value> = decode(results)?;
            return Ok(Self::BatchResults(results.into_iter().map(BatchOutcome::from_value).collect()));
        }
        if let Some(root) = payload.get("root_component") {
            return Ok(Self::Snapshot(decode(root)?));
        }
        if let Some(operations) = payload.get("operations") {
            return Ok(Self::Patch(decode(operations)?));
        }
        if let Some(updates) = payload.get("ui_updates") {
            return Ok(Self::Upserts(decode(updates)?));
        }
        if let Some(component) = payload.get("component") {
            return Ok(Self::Single(decode(component)?));
        }
        if payload.get("id").is_some() && payload.get("type").is_some() {
            return Ok(Self::Single(decode(payload)?));
        }
        Ok(Self::Opaque)
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: &Value) -> Result<T> {
    T::deserialize(value).map_err(|source| ProtocolError::InvalidPayload {
        message_type: MessageType::ComponentUpdate,
        source,
    })
}

/// How the server should run a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One after another
    #[default]
    Sequential,
    /// Concurrently
    Parallel,
}

/// One server-side operation inside a [`BatchOperation`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchItem {
    /// Merge `updates` into a registered component
    ComponentUpdate {
        /// Caller-chosen id echoed in the result
        operation_id: String,
        /// Target component
        component_id: String,
        /// Fields to merge
        #[serde(default)]
        updates: Map<String, Value>,
    },
    /// Add event bindings to a registered component
    EventBinding {
        /// Caller-chosen id echoed in the result
        operation_id: String,
        /// Target component
        component_id: String,
        /// Event name → binding
        #[serde(default)]
        events: Map<String, Value>,
    },
}

/// `batch_operation` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOperation {
    /// Items to run
    pub operations: Vec<BatchItem>,
    /// Sequential or parallel
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    /// Whether the server should undo applied items when one fails
    #[serde(default)]
    pub rollback_on_error: bool,
}

/// `event_notification` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventNotification {
    /// Component the interaction happened on
    pub component_id: String,
    /// Event name (`on_submit`, `on_row_click`, ..)
    pub event_type: String,
    /// Event-specific data
    #[serde(default)]
    pub event_data: Value,
    /// Handler declared by the component for this event; `null` if none
    pub handler: Option<String>,
}

/// `error` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Error message
    pub error: String,
    /// Additional fields
    #[serde(flatten)]
    pub detail: Map<String, Value>,
}

impl ErrorPayload {
    /// Error with only a message.
    pub fn new(error: impl Into<String>) -> Self {
        Self { error: error.into(), detail: Map::new() }
    }
}
