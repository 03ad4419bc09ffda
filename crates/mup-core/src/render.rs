//! Renderer collaborator.
//!
//! The engine owns the component tree; a renderer only observes it. Each hook
//! runs after the tree has been mutated, so the renderer always sees the
//! post-update state.

use mup_proto::{ComponentNode, PatchOperation};

use crate::tree::ComponentTree;

/// Receives tree changes for display.
pub trait Renderer: Send {
    /// The tree was replaced by a snapshot.
    fn on_tree_replaced(&mut self, root: &ComponentNode);

    /// A patch was applied.
    ///
    /// On partial failure `operations` holds only the prefix that was applied.
    fn on_patch_applied(&mut self, operations: &[PatchOperation], tree: &ComponentTree);

    /// Components were inserted or replaced by id.
    ///
    /// Defaults to re-rendering the whole tree.
    fn on_components_upserted(&mut self, components: &[ComponentNode], tree: &ComponentTree) {
        let _ = components;
        if let Some(root) = tree.to_node() {
            self.on_tree_replaced(&root);
        }
    }
}
