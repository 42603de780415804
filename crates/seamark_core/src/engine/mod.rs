//! Hierarchical consistency and bulk synchronization engine.
//!
//! # Responsibility
//! - Maintain materialized lineage paths for tree nodes.
//! - Cascade activation through ancestors/descendants.
//! - Match entities to tree regions by lineage prefix.
//! - Reconcile incoming record batches against persisted state.
//!
//! # Invariants
//! - `lineage(n) == lineage(parent(n)) + key(n) + "/"`, or `/key/` for roots.
//! - An active node has only active ancestors; an inactive node has only
//!   inactive descendants.
//! - Structural violations (cycles, missing keys) are surfaced, never repaired
//!   implicitly.

use crate::model::tree::{InvalidNodeKey, NodeKey};
use crate::repo::StoreError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod activation;
pub mod arena;
pub mod change;
pub mod lineage;
pub mod matcher;
pub mod snapshot;
pub mod sync;

/// Errors from tree-structural operations.
#[derive(Debug)]
pub enum TreeError {
    /// Walking the parent chain revisited a node.
    CycleDetected(NodeKey),
    /// Node was used before it was assigned an identity.
    MissingKey,
    /// Re-parent would make the node its own descendant.
    InvalidReparent { node: NodeKey, parent: NodeKey },
    /// Another node already carries this key.
    DuplicateKey(NodeKey),
    NodeNotFound(NodeKey),
    ParentNotFound(NodeKey),
    /// Node cannot be destroyed while children still reference it.
    HasChildren(NodeKey),
    InvalidKey(InvalidNodeKey),
    /// Backing store failure.
    Store(StoreError),
}

impl Display for TreeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CycleDetected(key) => write!(f, "cycle detected in parent chain at node {key}"),
            Self::MissingKey => write!(f, "node has no key assigned"),
            Self::InvalidReparent { node, parent } => write!(
                f,
                "cannot move node {node} under {parent}: parent is inside the moved subtree"
            ),
            Self::DuplicateKey(key) => write!(f, "node key already exists: {key}"),
            Self::NodeNotFound(key) => write!(f, "node not found: {key}"),
            Self::ParentNotFound(key) => write!(f, "parent node not found: {key}"),
            Self::HasChildren(key) => write!(f, "node {key} still has children"),
            Self::InvalidKey(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for TreeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidKey(err) => Some(err),
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for TreeError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<InvalidNodeKey> for TreeError {
    fn from(value: InvalidNodeKey) -> Self {
        Self::InvalidKey(value)
    }
}

pub(crate) fn require_key(node: &crate::model::tree::TreeNode) -> Result<&NodeKey, TreeError> {
    node.key.as_ref().ok_or(TreeError::MissingKey)
}
