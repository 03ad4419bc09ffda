//! Component tree.
//!
//! The tree is stored as an arena keyed by component id: each slot holds the
//! node's own data, its parent id and its ordered child ids. The arena is the
//! id index, so lookups by id are O(1) and can never disagree with the
//! structure; positional paths are resolved by walking child lists from the
//! root.
//!
//! # Invariants
//!
//! - Every id in the arena is reachable from the root, and every reachable
//!   node is in the arena
//! - Ids are unique
//! - A child's parent pointer names the node whose child list contains it
//!
//! Every mutation validates before it writes, so a failing operation leaves
//! the tree exactly as it was.

use std::collections::{BTreeMap, HashMap, HashSet};

use mup_proto::{ComponentNode, ComponentType, EventBinding, Path, PathSegment, PatchOperation};
use serde_json::{Map, Value};

use crate::error::{PatchError, TreeError};

#[derive(Debug, Clone, PartialEq)]
struct Slot {
    kind: ComponentType,
    props: Map<String, Value>,
    events: BTreeMap<String, EventBinding>,
    extra: Map<String, Value>,
    parent: Option<String>,
    children: Vec<String>,
}

/// Borrowed view of one node in a [`ComponentTree`].
#[derive(Debug, Clone, Copy)]
pub struct NodeRef<'a> {
    id: &'a str,
    slot: &'a Slot,
}

impl<'a> NodeRef<'a> {
    /// Component id
    pub fn id(&self) -> &'a str {
        self.id
    }

    /// Component kind
    pub fn kind(&self) -> &'a ComponentType {
        &self.slot.kind
    }

    /// Type-specific attributes
    pub fn props(&self) -> &'a Map<String, Value> {
        &self.slot.props
    }

    /// Event bindings
    pub fn events(&self) -> &'a BTreeMap<String, EventBinding> {
        &self.slot.events
    }

    /// Handler bound to `event`
    pub fn handler_for(&self, event: &str) -> Option<&'a str> {
        self.slot.events.get(event).and_then(|binding| binding.handler.as_deref())
    }

    /// Parent id; `None` for the root
    pub fn parent(&self) -> Option<&'a str> {
        self.slot.parent.as_deref()
    }

    /// Ordered child ids
    pub fn children(&self) -> &'a [String] {
        &self.slot.children
    }
}

/// The client's model of the server-driven UI.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComponentTree {
    root: Option<String>,
    nodes: HashMap<String, Slot>,
}

impl ComponentTree {
    /// Empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the tree has no root.
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Id of the root node.
    pub fn root_id(&self) -> Option<&str> {
        self.root.as_deref()
    }

    /// Node with this id.
    pub fn get(&self, id: &str) -> Option<NodeRef<'_>> {
        self.nodes.get_key_value(id).map(|(id, slot)| NodeRef { id, slot })
    }

    /// Whether a node with this id exists.
    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Handler `component_id` declares for `event`.
    pub fn handler_for(&self, component_id: &str, event: &str) -> Option<&str> {
        self.get(component_id).and_then(|node| node.handler_for(event))
    }

    /// Id of the node at `path`.
    pub fn resolve(&self, path: &Path) -> Option<&str> {
        self.resolve_segments(path.segments())
    }

    /// All ids in the index, in no particular order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Ids reachable from the root, depth-first pre-order.
    pub fn reachable_ids(&self) -> Vec<&str> {
        let mut ids = Vec::new();
        let mut stack: Vec<&str> = self.root.as_deref().into_iter().collect();
        while let Some(id) = stack.pop() {
            ids.push(id);
            if let Some(slot) = self.nodes.get(id) {
                stack.extend(slot.children.iter().rev().map(String::as_str));
            }
        }
        ids
    }

    /// Materialize the whole tree.
    pub fn to_node(&self) -> Option<ComponentNode> {
        self.root.as_deref().and_then(|root| self.subtree(root))
    }

    /// Materialize the subtree rooted at `id`.
    pub fn subtree(&self, id: &str) -> Option<ComponentNode> {
        let slot = self.nodes.get(id)?;
        Some(ComponentNode {
            id: id.to_string(),
            kind: slot.kind.clone(),
            props: slot.props.clone(),
            events: slot.events.clone(),
            children: slot.children.iter().filter_map(|child| self.subtree(child)).collect(),
            extra: slot.extra.clone(),
        })
    }

    /// Drop every node.
    pub fn clear(&mut self) {
        self.root = None;
        self.nodes.clear();
    }

    /// Replace the whole tree with a snapshot.
    ///
    /// # Errors
    ///
    /// `DuplicateId` if the snapshot repeats an id; the old tree is kept.
    pub fn replace_tree(&mut self, root: ComponentNode) -> Result<(), TreeError> {
        Self::check_unique(&root)?;
        self.clear();
        self.graft(root, None, None);
        Ok(())
    }

    /// Apply patch operations in order, stopping at the first failure.
    ///
    /// Operations before the failing one stay applied. An empty patch is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// [`PatchError`] naming the failing operation's index and kind.
    pub fn apply_patch(&mut self, operations: &[PatchOperation]) -> Result<(), PatchError> {
        for (index, operation) in operations.iter().enumerate() {
            self.apply(operation).map_err(|source| PatchError {
                index,
                kind: operation.kind(),
                source,
            })?;
        }
        Ok(())
    }

    /// Apply one patch operation.
    ///
    /// # Errors
    ///
    /// - `PathNotFound` if a path (or insertion position) does not resolve
    /// - `CyclicMove` if a move targets the moved node's own subtree
    /// - `DuplicateId` if an inserted subtree collides with an existing id
    pub fn apply(&mut self, operation: &PatchOperation) -> Result<(), TreeError> {
        match operation {
            PatchOperation::Add { path, value } => self.add(path, value),
            PatchOperation::Remove { path } => self.remove(path),
            PatchOperation::Replace { path, value } => {
                let target = self.require(path)?;
                self.check_fresh(value, Some(&target))?;
                self.swap_in(&target, value.clone());
                Ok(())
            },
            PatchOperation::Move { path, value } => self.move_node(path, value),
        }
    }

    /// Insert or replace a component by id.
    ///
    /// An existing node with the same id is replaced in place (subtree
    /// included). A new id is appended under the root, or becomes the root of
    /// an empty tree.
    ///
    /// # Errors
    ///
    /// `DuplicateId` if the incoming subtree collides with another node.
    pub fn upsert(&mut self, node: ComponentNode) -> Result<(), TreeError> {
        if self.nodes.contains_key(&node.id) {
            let target = node.id.clone();
            self.check_fresh(&node, Some(&target))?;
            self.swap_in(&target, node);
            return Ok(());
        }

        self.check_fresh(&node, None)?;
        let root = self.root.clone();
        self.graft(node, root.as_deref(), None);
        Ok(())
    }

    fn add(&mut self, path: &Path, value: &ComponentNode) -> Result<(), TreeError> {
        if self.root.is_none() {
            if !path.is_root() {
                return Err(TreeError::PathNotFound { path: path.clone() });
            }
            self.check_fresh(value, None)?;
            self.graft(value.clone(), None, None);
            return Ok(());
        }

        let (parent, position) = self.insertion_point(path)?;
        if position.is_some_and(|index| index > self.child_count(&parent)) {
            return Err(TreeError::PathNotFound { path: path.clone() });
        }
        self.check_fresh(value, None)?;
        self.graft(value.clone(), Some(parent.as_str()), position);
        Ok(())
    }

    fn remove(&mut self, path: &Path) -> Result<(), TreeError> {
        let target = self.require(path)?;
        if self.root.as_deref() == Some(target.as_str()) {
            self.clear();
            return Ok(());
        }
        self.detach(&target);
        self.drop_subtree(&target);
        Ok(())
    }

    fn move_node(&mut self, path: &Path, destination: &Path) -> Result<(), TreeError> {
        let target = self.require(path)?;
        let (parent, position) = self.insertion_point(destination)?;
        if self.is_within(&parent, &target) {
            return Err(TreeError::CyclicMove {
                path: path.clone(),
                destination: destination.clone(),
            });
        }

        // The destination index counts siblings after the node is detached.
        if let Some(index) = position {
            let mut len = self.child_count(&parent);
            if self.get(&target).and_then(|node| node.parent()) == Some(parent.as_str()) {
                len -= 1;
            }
            if index > len {
                return Err(TreeError::PathNotFound { path: destination.clone() });
            }
        }

        self.detach(&target);
        self.attach(&target, &parent, position);
        Ok(())
    }

    /// Replace the node `target` (and its subtree) with `value`, keeping its
    /// position. Callers have validated ids.
    fn swap_in(&mut self, target: &str, value: ComponentNode) {
        match self.detach(target) {
            Some((parent, position)) => {
                self.drop_subtree(target);
                self.graft(value, Some(parent.as_str()), Some(position));
            },
            None => {
                self.drop_subtree(target);
                self.root = None;
                self.graft(value, None, None);
            },
        }
    }

    /// Insert a subtree under `parent` (at `position`, or appended), or as the
    /// root when `parent` is `None`.
    fn graft(&mut self, node: ComponentNode, parent: Option<&str>, position: Option<usize>) {
        let id = self.insert_slots(node, parent.map(str::to_string));
        match parent {
            Some(parent) => self.attach(&id, parent, position),
            None => self.root = Some(id),
        }
    }

    fn insert_slots(&mut self, node: ComponentNode, parent: Option<String>) -> String {
        let ComponentNode { id, kind, props, events, children, extra } = node;
        let children =
            children.into_iter().map(|child| self.insert_slots(child, Some(id.clone()))).collect();
        self.nodes.insert(id.clone(), Slot { kind, props, events, extra, parent, children });
        id
    }

    fn attach(&mut self, id: &str, parent: &str, position: Option<usize>) {
        if let Some(slot) = self.nodes.get_mut(parent) {
            let position = position.unwrap_or(slot.children.len()).min(slot.children.len());
            slot.children.insert(position, id.to_string());
        }
        if let Some(slot) = self.nodes.get_mut(id) {
            slot.parent = Some(parent.to_string());
        }
    }

    /// Unlink `id` from its parent's child list; returns the parent and the
    /// position it held. `None` for the root.
    fn detach(&mut self, id: &str) -> Option<(String, usize)> {
        let parent = self.nodes.get(id)?.parent.clone()?;
        let siblings = &mut self.nodes.get_mut(&parent)?.children;
        let position = siblings.iter().position(|child| child == id)?;
        siblings.remove(position);
        Some((parent, position))
    }

    fn drop_subtree(&mut self, id: &str) {
        let mut stack = vec![id.to_string()];
        while let Some(id) = stack.pop() {
            if let Some(slot) = self.nodes.remove(&id) {
                stack.extend(slot.children);
            }
        }
    }

    fn resolve_segments(&self, segments: &[PathSegment]) -> Option<&str> {
        let mut current = self.root.as_deref()?;
        for segment in segments {
            let children = &self.nodes.get(current)?.children;
            let next = match segment {
                PathSegment::Index(index) => children.get(*index)?,
                PathSegment::Id(id) => children.iter().find(|child| *child == id)?,
            };
            current = next.as_str();
        }
        Some(current)
    }

    fn require(&self, path: &Path) -> Result<String, TreeError> {
        self.resolve(path)
            .map(str::to_string)
            .ok_or_else(|| TreeError::PathNotFound { path: path.clone() })
    }

    /// Parent and optional position addressed by an add-style path: a
    /// trailing index selects the position under the prefix, anything else
    /// names the parent and appends.
    fn insertion_point(&self, path: &Path) -> Result<(String, Option<usize>), TreeError> {
        let (parent, position) = match path.split_trailing_index() {
            Some((prefix, index)) => (self.resolve_segments(prefix), Some(index)),
            None => (self.resolve(path), None),
        };
        parent
            .map(|parent| (parent.to_string(), position))
            .ok_or_else(|| TreeError::PathNotFound { path: path.clone() })
    }

    fn child_count(&self, id: &str) -> usize {
        self.nodes.get(id).map_or(0, |slot| slot.children.len())
    }

    fn is_within(&self, id: &str, ancestor: &str) -> bool {
        let mut current = Some(id);
        while let Some(node) = current {
            if node == ancestor {
                return true;
            }
            current = self.nodes.get(node).and_then(|slot| slot.parent.as_deref());
        }
        false
    }

    /// Ids of `id` and its descendants.
    fn subtree_ids(&self, id: &str) -> HashSet<&str> {
        let mut ids = HashSet::new();
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            if let Some((key, slot)) = self.nodes.get_key_value(id) {
                ids.insert(key.as_str());
                stack.extend(slot.children.iter().map(String::as_str));
            }
        }
        ids
    }

    /// Check that `node`'s subtree can be inserted: no id repeats inside it,
    /// and none collides with the tree except ids inside `replacing`, which is
    /// about to be removed.
    fn check_fresh(&self, node: &ComponentNode, replacing: Option<&str>) -> Result<(), TreeError> {
        Self::check_unique(node)?;
        let vacated = replacing.map(|id| self.subtree_ids(id)).unwrap_or_default();
        match node.subtree_ids().into_iter().find(|id| self.contains(id) && !vacated.contains(id)) {
            Some(id) => Err(TreeError::DuplicateId { id: id.to_string() }),
            None => Ok(()),
        }
    }

    fn check_unique(node: &ComponentNode) -> Result<(), TreeError> {
        let mut seen = HashSet::new();
        match node.subtree_ids().into_iter().find(|id| !seen.insert(*id)) {
            Some(id) => Err(TreeError::DuplicateId { id: id.to_string() }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use mup_proto::PatchKind;
    use serde_json::json;

    use super::*;

    fn leaf(id: &str) -> ComponentNode {
        ComponentNode::new(id, ComponentType::Text)
    }

    fn container(id: &str, children: impl IntoIterator<Item = ComponentNode>) -> ComponentNode {
        children
            .into_iter()
            .fold(ComponentNode::new(id, ComponentType::Container), ComponentNode::with_child)
    }

    /// root[a[a1, a2], b]
    fn sample() -> ComponentTree {
        let mut tree = ComponentTree::new();
        tree.replace_tree(container(
            "root",
            [container("a", [leaf("a1"), leaf("a2")]), leaf("b")],
        ))
        .unwrap();
        tree
    }

    fn children<'a>(tree: &'a ComponentTree, id: &str) -> Vec<&'a str> {
        tree.get(id).unwrap().children().iter().map(String::as_str).collect()
    }

    #[test]
    fn snapshot_indexes_every_node() {
        let tree = sample();
        assert_eq!(tree.len(), 5);
        assert_eq!(tree.reachable_ids(), vec!["root", "a", "a1", "a2", "b"]);
        assert_eq!(tree.get("a1").unwrap().parent(), Some("a"));
        assert_eq!(tree.resolve(&Path::indices([0, 1])), Some("a2"));
        assert_eq!(
            tree.resolve(&Path::root().child(PathSegment::Id("a".into())).child(PathSegment::Index(0))),
            Some("a1")
        );
    }

    #[test]
    fn snapshot_with_repeated_id_keeps_old_tree() {
        let mut tree = sample();
        let err = tree.replace_tree(container("x", [leaf("y"), leaf("y")])).unwrap_err();

        assert_eq!(err, TreeError::DuplicateId { id: "y".into() });
        assert_eq!(tree, sample());
    }

    #[test]
    fn add_with_trailing_index_inserts_at_position() {
        let mut tree = sample();
        tree.apply(&PatchOperation::Add { path: Path::indices([0, 1]), value: leaf("new") }).unwrap();
        assert_eq!(children(&tree, "a"), vec!["a1", "new", "a2"]);

        tree.apply(&PatchOperation::Add { path: Path::indices([2]), value: leaf("end") }).unwrap();
        assert_eq!(children(&tree, "root"), vec!["a", "b", "end"]);
    }

    #[test]
    fn add_without_index_appends_under_named_parent() {
        let mut tree = sample();
        let path = Path::root().child(PathSegment::Id("a".into()));
        tree.apply(&PatchOperation::Add { path, value: leaf("a3") }).unwrap();

        assert_eq!(children(&tree, "a"), vec!["a1", "a2", "a3"]);
        assert_eq!(tree.get("a3").unwrap().parent(), Some("a"));
    }

    #[test]
    fn add_past_end_is_path_not_found() {
        let mut tree = sample();
        let err =
            tree.apply(&PatchOperation::Add { path: Path::indices([3]), value: leaf("x") }).unwrap_err();

        assert_eq!(err, TreeError::PathNotFound { path: Path::indices([3]) });
        assert_eq!(tree, sample());
    }

    #[test]
    fn add_to_empty_tree_installs_root() {
        let mut tree = ComponentTree::new();
        tree.apply(&PatchOperation::Add { path: Path::root(), value: leaf("only") }).unwrap();
        assert_eq!(tree.root_id(), Some("only"));

        let mut empty = ComponentTree::new();
        let err = empty
            .apply(&PatchOperation::Add { path: Path::indices([0]), value: leaf("x") })
            .unwrap_err();
        assert!(matches!(err, TreeError::PathNotFound { .. }));
    }

    #[test]
    fn add_duplicate_id_is_rejected() {
        let mut tree = sample();
        let err =
            tree.apply(&PatchOperation::Add { path: Path::root(), value: leaf("a1") }).unwrap_err();

        assert_eq!(err, TreeError::DuplicateId { id: "a1".into() });
        assert_eq!(tree, sample());
    }

    #[test]
    fn remove_drops_subtree_from_index() {
        let mut tree = sample();
        tree.apply(&PatchOperation::Remove { path: Path::indices([0]) }).unwrap();

        assert!(!tree.contains("a"));
        assert!(!tree.contains("a1"));
        assert_eq!(tree.len(), 2);
        assert_eq!(children(&tree, "root"), vec!["b"]);
    }

    #[test]
    fn remove_root_empties_tree() {
        let mut tree = sample();
        tree.apply(&PatchOperation::Remove { path: Path::root() }).unwrap();
        assert!(tree.is_empty());
        assert_eq!(tree.len(), 0);
    }

    #[test]
    fn replace_keeps_position_and_allows_reusing_ids() {
        let mut tree = sample();
        let replacement = container("a", [leaf("a1")]).with_prop("title", json!("Fresh"));
        tree.apply(&PatchOperation::Replace { path: Path::indices([0]), value: replacement }).unwrap();

        assert_eq!(children(&tree, "root"), vec!["a", "b"]);
        assert_eq!(children(&tree, "a"), vec!["a1"]);
        assert!(!tree.contains("a2"));
        assert_eq!(tree.get("a").unwrap().props()["title"], json!("Fresh"));
    }

    #[test]
    fn replace_colliding_with_sibling_is_rejected() {
        let mut tree = sample();
        let err = tree
            .apply(&PatchOperation::Replace { path: Path::indices([0]), value: leaf("b") })
            .unwrap_err();
        assert_eq!(err, TreeError::DuplicateId { id: "b".into() });
    }

    #[test]
    fn move_within_parent_counts_after_detach() {
        let mut tree = sample();
        tree.apply(&PatchOperation::Move { path: Path::indices([0]), value: Path::indices([1]) })
            .unwrap();
        assert_eq!(children(&tree, "root"), vec!["b", "a"]);
    }

    #[test]
    fn move_across_parents_updates_parent_pointer() {
        let mut tree = sample();
        tree.apply(&PatchOperation::Move { path: Path::indices([1]), value: Path::indices([0, 0]) })
            .unwrap();

        assert_eq!(children(&tree, "a"), vec!["b", "a1", "a2"]);
        assert_eq!(tree.get("b").unwrap().parent(), Some("a"));
    }

    #[test]
    fn move_into_own_subtree_is_cyclic_and_leaves_tree_unchanged() {
        let mut tree = sample();
        let op = PatchOperation::Move { path: Path::indices([0]), value: Path::indices([0, 0]) };
        let err = tree.apply(&op).unwrap_err();

        assert!(matches!(err, TreeError::CyclicMove { .. }));
        assert_eq!(tree, sample());

        let root_move = PatchOperation::Move { path: Path::root(), value: Path::indices([1]) };
        assert!(matches!(tree.apply(&root_move), Err(TreeError::CyclicMove { .. })));
    }

    #[test]
    fn patch_stops_at_first_failure() {
        let mut tree = sample();
        let ops = vec![
            PatchOperation::Remove { path: Path::indices([1]) },
            PatchOperation::Remove { path: Path::indices([5]) },
            PatchOperation::Add { path: Path::root(), value: leaf("never") },
        ];
        let err = tree.apply_patch(&ops).unwrap_err();

        assert_eq!(err.index, 1);
        assert_eq!(err.kind, PatchKind::Remove);
        assert!(!tree.contains("b"));
        assert!(!tree.contains("never"));
    }

    #[test]
    fn empty_patch_is_noop() {
        let mut tree = sample();
        tree.apply_patch(&[]).unwrap();
        assert_eq!(tree, sample());
    }

    #[test]
    fn upsert_replaces_in_place_or_appends_to_root() {
        let mut tree = sample();
        tree.upsert(leaf("a2").with_prop("content", json!("changed"))).unwrap();
        assert_eq!(children(&tree, "a"), vec!["a1", "a2"]);
        assert_eq!(tree.get("a2").unwrap().props()["content"], json!("changed"));

        tree.upsert(ComponentNode::new("n1", ComponentType::Notification)).unwrap();
        assert_eq!(children(&tree, "root"), vec!["a", "b", "n1"]);

        let mut empty = ComponentTree::new();
        empty.upsert(leaf("first")).unwrap();
        assert_eq!(empty.root_id(), Some("first"));
    }

    #[test]
    fn handler_lookup_by_id() {
        let mut tree = ComponentTree::new();
        tree.replace_tree(
            container("root", [ComponentNode::new("f", ComponentType::Form).with_event("on_submit", "save")]),
        )
        .unwrap();

        assert_eq!(tree.handler_for("f", "on_submit"), Some("save"));
        assert_eq!(tree.handler_for("f", "on_reset"), None);
        assert_eq!(tree.handler_for("ghost", "on_submit"), None);
    }

    #[test]
    fn materialized_tree_matches_snapshot() {
        let snapshot = container("root", [container("a", [leaf("a1"), leaf("a2")]), leaf("b")]);
        let mut tree = ComponentTree::new();
        tree.replace_tree(snapshot.clone()).unwrap();
        assert_eq!(tree.to_node(), Some(snapshot));
    }
}
