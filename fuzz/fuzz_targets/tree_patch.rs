//! Arbitrary snapshots and patches applied to the component tree: no panics,
//! and the id index always matches what is reachable from the root.

#![no_main]

use libfuzzer_sys::fuzz_target;
use mup_core::tree::ComponentTree;
use mup_proto::{ComponentNode, PatchOperation};
use serde_json::Value;

fuzz_target!(|data: &[u8]| {
    let Ok(value) = serde_json::from_slice::<Value>(data) else {
        return;
    };
    let Some(root) = value
        .get("root")
        .and_then(|root| serde_json::from_value::<ComponentNode>(root.clone()).ok())
    else {
        return;
    };
    let operations: Vec<PatchOperation> = value
        .get("operations")
        .and_then(|ops| serde_json::from_value(ops.clone()).ok())
        .unwrap_or_default();

    let mut tree = ComponentTree::new();
    if tree.replace_tree(root).is_err() {
        return;
    }
    for operation in &operations {
        let before = tree.clone();
        if tree.apply(operation).is_err() {
            assert_eq!(tree, before, "failed operation mutated the tree");
        }

        let mut indexed: Vec<&str> = tree.ids().collect();
        let mut reachable = tree.reachable_ids();
        indexed.sort_unstable();
        reachable.sort_unstable();
        assert_eq!(indexed, reachable);
    }
});
