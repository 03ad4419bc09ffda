//! Event dispatch.
//!
//! Outbound, a [`UiIntent`] (the user did something to a component) becomes
//! an `event_notification` carrying the handler the component declared for
//! that event. Inbound, `component_update` payloads are applied to the tree
//! and fanned out to registered listeners as [`SessionEvent`]s.
//!
//! Listeners run synchronously, in registration order, on the engine's
//! thread. A failing listener is logged and skipped; it never stops delivery
//! to the listeners after it.

use std::{error::Error, fmt, time::Duration};

use mup_proto::{
    BatchOutcome, ComponentNode, ComponentUpdate, PatchOperation,
    payloads::update::{ErrorPayload, EventNotification},
};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    error::{PatchError, TreeError},
    render::Renderer,
    tree::ComponentTree,
};

/// Why the session went down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The channel closed
    ChannelClosed {
        /// Close code
        code: u16,
        /// Close reason
        reason: String,
    },
    /// The channel reported an error
    ChannelError(String),
    /// The server did not answer the handshake in time
    HandshakeTimeout,
    /// Reconnect budget exhausted; the engine stays down
    MaxRetriesExceeded,
    /// The application asked to disconnect
    Requested,
}

impl DisconnectReason {
    /// Short machine-readable name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChannelClosed { .. } => "channel_closed",
            Self::ChannelError(_) => "channel_error",
            Self::HandshakeTimeout => "handshake_timeout",
            Self::MaxRetriesExceeded => "max_retries_exceeded",
            Self::Requested => "requested",
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChannelClosed { code, reason } => write!(f, "channel closed ({code}) {reason}"),
            Self::ChannelError(error) => write!(f, "channel error: {error}"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// A component update that could not be applied.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The payload did not match any update shape it claimed
    #[error("invalid component update: {0}")]
    InvalidPayload(String),
    /// A patch failed part way
    #[error(transparent)]
    Patch(#[from] PatchError),
    /// A snapshot or upsert was rejected
    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// Notification delivered to listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Handshake completed
    Connected {
        /// Server-assigned client id
        client_id: String,
        /// Capabilities the server advertised
        server_capabilities: Map<String, Value>,
    },
    /// The session went down
    Disconnected {
        /// Why
        reason: DisconnectReason,
        /// Delay before the scheduled reconnect; `None` if none is scheduled
        retry_in: Option<Duration>,
    },
    /// The server sent an uncorrelated `error`
    Error(ErrorPayload),
    /// A component update was applied; raw payload
    ComponentUpdate(Value),
    /// One entry of a batch's results
    BatchResult {
        /// Position in `batch_results`
        index: usize,
        /// Outcome of that entry
        outcome: BatchOutcome,
    },
    /// A component update could not be applied
    SyncFailed(SyncError),
}

impl SessionEvent {
    /// Kind listeners subscribe to.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connected { .. } => EventKind::Connected,
            Self::Disconnected { .. } => EventKind::Disconnected,
            Self::Error(_) => EventKind::Error,
            Self::ComponentUpdate(_) => EventKind::ComponentUpdate,
            Self::BatchResult { .. } => EventKind::BatchResult,
            Self::SyncFailed(_) => EventKind::SyncFailed,
        }
    }
}

/// Subscription key for [`SessionEvent`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// [`SessionEvent::Connected`]
    Connected,
    /// [`SessionEvent::Disconnected`]
    Disconnected,
    /// [`SessionEvent::Error`]
    Error,
    /// [`SessionEvent::ComponentUpdate`]
    ComponentUpdate,
    /// [`SessionEvent::BatchResult`]
    BatchResult,
    /// [`SessionEvent::SyncFailed`]
    SyncFailed,
}

/// Error a listener may return; it is logged and delivery continues.
pub type ListenerError = Box<dyn Error + Send + Sync>;

/// Registered callback.
pub type Listener = Box<dyn FnMut(&SessionEvent) -> Result<(), ListenerError> + Send>;

/// Handle for removing a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration {
    id: ListenerId,
    kind: EventKind,
    listener: Listener,
}

/// User interaction on a component.
#[derive(Debug, Clone, PartialEq)]
pub struct UiIntent {
    /// Component the interaction happened on
    pub component_id: String,
    /// Event name (`on_submit`, `on_row_click`, ..)
    pub event_type: String,
    /// Event-specific data
    pub data: Value,
}

impl UiIntent {
    /// Create an intent.
    pub fn new(component_id: impl Into<String>, event_type: impl Into<String>, data: Value) -> Self {
        Self { component_id: component_id.into(), event_type: event_type.into(), data }
    }
}

/// Listener registry and inbound update router.
#[derive(Default)]
pub struct EventDispatcher {
    next_id: u64,
    registrations: Vec<Registration>,
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher").field("listeners", &self.registrations.len()).finish()
    }
}

impl EventDispatcher {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for events of `kind`.
    pub fn on(&mut self, kind: EventKind, listener: Listener) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.registrations.push(Registration { id, kind, listener });
        id
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn off(&mut self, id: ListenerId) -> bool {
        let before = self.registrations.len();
        self.registrations.retain(|registration| registration.id != id);
        self.registrations.len() != before
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    /// Whether no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Deliver `event` to every listener of its kind, in registration order.
    pub fn emit(&mut self, event: &SessionEvent) {
        let kind = event.kind();
        for registration in self.registrations.iter_mut().filter(|r| r.kind == kind) {
            if let Err(error) = (registration.listener)(event) {
                warn!(listener = registration.id.0, ?kind, %error, "listener failed");
            }
        }
    }

    /// Build the outbound notification for `intent`, attaching the handler the
    /// component declares for the event (or none).
    pub fn notification(&self, tree: &ComponentTree, intent: UiIntent) -> EventNotification {
        let handler =
            tree.handler_for(&intent.component_id, &intent.event_type).map(str::to_string);
        if handler.is_none() {
            debug!(
                component = %intent.component_id,
                event = %intent.event_type,
                "no handler bound for event"
            );
        }
        EventNotification {
            component_id: intent.component_id,
            event_type: intent.event_type,
            event_data: intent.data,
            handler,
        }
    }

    /// Apply a `component_update` payload and notify listeners.
    ///
    /// - batch results: one [`SessionEvent::BatchResult`] per entry
    /// - snapshot, patch, upserts, single component: the tree is updated, the
    ///   renderer sees the change, then [`SessionEvent::ComponentUpdate`]
    /// - failure to apply: [`SessionEvent::SyncFailed`]
    /// - anything else: [`SessionEvent::ComponentUpdate`] with the raw payload
    pub fn route_component_update(
        &mut self,
        tree: &mut ComponentTree,
        renderer: &mut Option<Box<dyn Renderer>>,
        payload: &Value,
    ) {
        let update = match ComponentUpdate::from_value(payload) {
            Ok(update) => update,
            Err(error) => {
                warn!(%error, "malformed component update");
                self.emit(&SessionEvent::SyncFailed(SyncError::InvalidPayload(error.to_string())));
                return;
            },
        };

        let applied = match update {
            ComponentUpdate::BatchResults(results) => {
                for (index, outcome) in results.into_iter().enumerate() {
                    self.emit(&SessionEvent::BatchResult { index, outcome });
                }
                return;
            },
            ComponentUpdate::Snapshot(root) => Self::apply_snapshot(tree, renderer, root),
            ComponentUpdate::Patch(operations) => Self::apply_patch(tree, renderer, &operations),
            ComponentUpdate::Upserts(components) => {
                Self::apply_upserts(tree, renderer, components)
            },
            ComponentUpdate::Single(component) => {
                Self::apply_upserts(tree, renderer, vec![component])
            },
            ComponentUpdate::Opaque => Ok(()),
        };

        match applied {
            Ok(()) => self.emit(&SessionEvent::ComponentUpdate(payload.clone())),
            Err(error) => {
                warn!(%error, "component update rejected");
                self.emit(&SessionEvent::SyncFailed(error));
            },
        }
    }

    fn apply_snapshot(
        tree: &mut ComponentTree,
        renderer: &mut Option<Box<dyn Renderer>>,
        root: ComponentNode,
    ) -> Result<(), SyncError> {
        tree.replace_tree(root.clone())?;
        debug!(root = %root.id, nodes = tree.len(), "tree replaced");
        if let Some(renderer) = renderer {
            renderer.on_tree_replaced(&root);
        }
        Ok(())
    }

    fn apply_patch(
        tree: &mut ComponentTree,
        renderer: &mut Option<Box<dyn Renderer>>,
        operations: &[PatchOperation],
    ) -> Result<(), SyncError> {
        let result = tree.apply_patch(operations);
        let applied = match &result {
            Ok(()) => operations.len(),
            Err(error) => error.index,
        };
        if applied > 0
            && let Some(renderer) = renderer
        {
            renderer.on_patch_applied(&operations[..applied], tree);
        }
        debug!(applied, total = operations.len(), "patch applied");
        result.map_err(SyncError::from)
    }

    fn apply_upserts(
        tree: &mut ComponentTree,
        renderer: &mut Option<Box<dyn Renderer>>,
        components: Vec<ComponentNode>,
    ) -> Result<(), SyncError> {
        let total = components.len();
        let mut applied = Vec::with_capacity(total);
        let mut failure = None;
        for component in components {
            if let Err(error) = tree.upsert(component.clone()) {
                failure = Some(error);
                break;
            }
            applied.push(component);
        }
        if !applied.is_empty()
            && let Some(renderer) = renderer
        {
            renderer.on_components_upserted(&applied, tree);
        }
        debug!(applied = applied.len(), total, "components upserted");
        failure.map_or(Ok(()), |error| Err(error.into()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use mup_proto::ComponentType;
    use serde_json::json;

    use super::*;

    type Seen = Arc<Mutex<Vec<SessionEvent>>>;

    fn recorder(seen: &Seen) -> Listener {
        let seen = Arc::clone(seen);
        Box::new(move |event| {
            seen.lock().unwrap().push(event.clone());
            Ok(())
        })
    }

    #[derive(Default)]
    struct RecordingRenderer {
        replaced: Arc<Mutex<usize>>,
        patched: Arc<Mutex<Vec<usize>>>,
    }

    impl Renderer for RecordingRenderer {
        fn on_tree_replaced(&mut self, _root: &ComponentNode) {
            *self.replaced.lock().unwrap() += 1;
        }

        fn on_patch_applied(&mut self, operations: &[PatchOperation], _tree: &ComponentTree) {
            self.patched.lock().unwrap().push(operations.len());
        }
    }

    #[test]
    fn listeners_run_in_registration_order_despite_failures() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = EventDispatcher::new();
        for name in ["first", "failing", "last"] {
            let order = Arc::clone(&order);
            dispatcher.on(
                EventKind::Error,
                Box::new(move |_| {
                    order.lock().unwrap().push(name);
                    if name == "failing" { Err("boom".into()) } else { Ok(()) }
                }),
            );
        }

        dispatcher.emit(&SessionEvent::Error(ErrorPayload::new("x")));
        assert_eq!(*order.lock().unwrap(), vec!["first", "failing", "last"]);
    }

    #[test]
    fn off_removes_only_that_listener() {
        let seen = Seen::default();
        let mut dispatcher = EventDispatcher::new();
        let id = dispatcher.on(EventKind::ComponentUpdate, recorder(&seen));
        dispatcher.on(EventKind::ComponentUpdate, recorder(&seen));

        assert!(dispatcher.off(id));
        assert!(!dispatcher.off(id));
        dispatcher.emit(&SessionEvent::ComponentUpdate(json!({})));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn batch_results_fan_out_per_entry() {
        let seen = Seen::default();
        let mut dispatcher = EventDispatcher::new();
        dispatcher.on(EventKind::BatchResult, recorder(&seen));
        dispatcher.on(EventKind::ComponentUpdate, recorder(&seen));

        let mut tree = ComponentTree::new();
        dispatcher.route_component_update(
            &mut tree,
            &mut None,
            &json!({ "batch_results": [{ "success": true }, { "error": "nope" }] }),
        );

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(matches!(&seen[0], SessionEvent::BatchResult { index: 0, outcome } if outcome.is_success()));
        assert!(matches!(&seen[1], SessionEvent::BatchResult { index: 1, outcome } if !outcome.is_success()));
    }

    #[test]
    fn snapshot_updates_tree_then_renderer_then_listeners() {
        let seen = Seen::default();
        let mut dispatcher = EventDispatcher::new();
        dispatcher.on(EventKind::ComponentUpdate, recorder(&seen));
        let rendering = RecordingRenderer::default();
        let replaced = Arc::clone(&rendering.replaced);
        let mut renderer: Option<Box<dyn Renderer>> = Some(Box::new(rendering));

        let mut tree = ComponentTree::new();
        let payload = json!({ "root_component": { "id": "root", "type": "container" } });
        dispatcher.route_component_update(&mut tree, &mut renderer, &payload);

        assert_eq!(tree.root_id(), Some("root"));
        assert_eq!(*replaced.lock().unwrap(), 1);
        assert_eq!(*seen.lock().unwrap(), vec![SessionEvent::ComponentUpdate(payload)]);
    }

    #[test]
    fn failed_patch_renders_prefix_and_reports_sync_failure() {
        let seen = Seen::default();
        let mut dispatcher = EventDispatcher::new();
        dispatcher.on(EventKind::SyncFailed, recorder(&seen));
        dispatcher.on(EventKind::ComponentUpdate, recorder(&seen));
        let rendering = RecordingRenderer::default();
        let patched = Arc::clone(&rendering.patched);
        let mut renderer: Option<Box<dyn Renderer>> = Some(Box::new(rendering));

        let mut tree = ComponentTree::new();
        tree.replace_tree(ComponentNode::new("root", ComponentType::Container)).unwrap();
        dispatcher.route_component_update(
            &mut tree,
            &mut renderer,
            &json!({ "operations": [
                { "op": "add", "path": [], "value": { "id": "t", "type": "text" } },
                { "op": "remove", "path": [7] }
            ] }),
        );

        assert!(tree.contains("t"));
        assert_eq!(*patched.lock().unwrap(), vec![1]);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(matches!(&seen[0], SessionEvent::SyncFailed(SyncError::Patch(e)) if e.index == 1));
    }

    #[test]
    fn notification_carries_declared_handler() {
        let mut tree = ComponentTree::new();
        tree.replace_tree(
            ComponentNode::new("form", ComponentType::Form).with_event("on_submit", "save_form"),
        )
        .unwrap();
        let dispatcher = EventDispatcher::new();

        let bound = dispatcher
            .notification(&tree, UiIntent::new("form", "on_submit", json!({ "name": "Ada" })));
        assert_eq!(bound.handler.as_deref(), Some("save_form"));
        assert_eq!(bound.event_data, json!({ "name": "Ada" }));

        let unbound = dispatcher.notification(&tree, UiIntent::new("form", "on_reset", Value::Null));
        assert_eq!(unbound.handler, None);
    }
}
