//! Positional tree patches.
//!
//! A [`Path`] walks from the root: each segment selects a child of the current
//! node, either by position (`0`) or by the child's id (`"header"`). The empty
//! path addresses the root itself.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::component::ComponentNode;

/// One step of a [`Path`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    /// Child at this position
    Index(usize),
    /// Child with this id
    Id(String),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(index) => write!(f, "{index}"),
            Self::Id(id) => f.write_str(id),
        }
    }
}

/// Structural address of a node, from the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(pub Vec<PathSegment>);

impl Path {
    /// The empty path, addressing the root.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Path made of child indices.
    pub fn indices(indices: impl IntoIterator<Item = usize>) -> Self {
        Self(indices.into_iter().map(PathSegment::Index).collect())
    }

    /// Whether this path addresses the root.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Segments from the root down.
    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    /// Split into the parent prefix and a trailing index, if the path ends in
    /// an explicit position.
    pub fn split_trailing_index(&self) -> Option<(&[PathSegment], usize)> {
        match self.0.split_last() {
            Some((PathSegment::Index(index), parent)) => Some((parent, *index)),
            _ => None,
        }
    }

    /// Builder: append a segment.
    #[must_use]
    pub fn child(mut self, segment: PathSegment) -> Self {
        self.0.push(segment);
        self
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.0 {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

/// Kind of a [`PatchOperation`], for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchKind {
    /// Insert a node
    Add,
    /// Detach a node
    Remove,
    /// Swap a node in place
    Replace,
    /// Detach and re-insert a node
    Move,
}

impl fmt::Display for PatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Replace => "replace",
            Self::Move => "move",
        })
    }
}

/// One structural edit of the component tree.
///
/// Wire shape: `{ "op": "add", "path": [0, "header"], "value": { .. } }`. For
/// `move`, `value` is the destination path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PatchOperation {
    /// Insert `value` under the node at `path`; a trailing index selects the
    /// insertion position under the prefix instead
    Add {
        /// Parent, or parent plus position
        path: Path,
        /// Subtree to insert
        value: ComponentNode,
    },
    /// Detach the node at `path`
    Remove {
        /// Target
        path: Path,
    },
    /// Swap the node at `path` for `value`
    Replace {
        /// Target
        path: Path,
        /// Replacement subtree
        value: ComponentNode,
    },
    /// Move the node at `path` to the destination `value`
    Move {
        /// Node to move
        path: Path,
        /// Destination, addressed like an add
        value: Path,
    },
}

impl PatchOperation {
    /// Kind of this operation.
    pub fn kind(&self) -> PatchKind {
        match self {
            Self::Add { .. } => PatchKind::Add,
            Self::Remove { .. } => PatchKind::Remove,
            Self::Replace { .. } => PatchKind::Replace,
            Self::Move { .. } => PatchKind::Move,
        }
    }

    /// Primary path of this operation.
    pub fn path(&self) -> &Path {
        match self {
            Self::Add { path, .. }
            | Self::Remove { path }
            | Self::Replace { path, .. }
            | Self::Move { path, .. } => path,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::ComponentType;

    #[test]
    fn path_mixes_indices_and_ids() {
        let path: Path = serde_json::from_value(json!([0, "header", 2])).unwrap();
        assert_eq!(
            path.segments(),
            &[PathSegment::Index(0), PathSegment::Id("header".into()), PathSegment::Index(2)]
        );
        assert_eq!(path.to_string(), "/0/header/2");
        assert_eq!(Path::root().to_string(), "/");
    }

    #[test]
    fn trailing_index_splits_off() {
        let path = Path::indices([1, 3]);
        let (parent, index) = path.split_trailing_index().unwrap();
        assert_eq!(parent, &[PathSegment::Index(1)]);
        assert_eq!(index, 3);

        let by_id = Path::root().child(PathSegment::Id("list".into()));
        assert!(by_id.split_trailing_index().is_none());
    }

    #[test]
    fn decodes_each_operation_kind() {
        let ops: Vec<PatchOperation> = serde_json::from_value(json!([
            { "op": "add", "path": [0], "value": { "id": "t", "type": "text" } },
            { "op": "remove", "path": [1] },
            { "op": "replace", "path": ["t"], "value": { "id": "u", "type": "text" } },
            { "op": "move", "path": [0, 0], "value": [1] }
        ]))
        .unwrap();

        let kinds: Vec<PatchKind> = ops.iter().map(PatchOperation::kind).collect();
        assert_eq!(kinds, vec![PatchKind::Add, PatchKind::Remove, PatchKind::Replace, PatchKind::Move]);
        assert_eq!(
            ops[0],
            PatchOperation::Add {
                path: Path::indices([0]),
                value: ComponentNode::new("t", ComponentType::Text)
            }
        );
        assert_eq!(ops[3], PatchOperation::Move { path: Path::indices([0, 0]), value: Path::indices([1]) });
    }
}
