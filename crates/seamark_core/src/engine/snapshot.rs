//! Explicit read snapshot of one tree.
//!
//! # Responsibility
//! - Hold a loaded, lineage-bearing copy of every node of one tree kind for
//!   read-side queries such as subtree matching.
//! - Tell callers when it has gone stale relative to the owning service.
//!
//! # Invariants
//! - A snapshot never observes writes made after it was taken; callers
//!   refresh it explicitly.

use crate::engine::arena::TreeArena;
use crate::engine::matcher::is_ancestor_or_self;
use crate::engine::TreeError;
use crate::model::tree::{NodeKey, TreeKind, TreeNode};
use crate::repo::tree_repo::TreeRepository;

#[derive(Debug, Clone)]
pub struct TreeSnapshot {
    kind: TreeKind,
    arena: TreeArena,
    generation: u64,
}

impl TreeSnapshot {
    /// Loads every node of the repository's tree, including buffered writes.
    pub fn load(repo: &impl TreeRepository) -> Result<Self, TreeError> {
        let arena = TreeArena::from_nodes(repo.list_all()?)?;
        Ok(Self::from_arena(repo.kind(), arena, 0))
    }

    pub(crate) fn from_arena(kind: TreeKind, arena: TreeArena, generation: u64) -> Self {
        Self {
            kind,
            arena,
            generation,
        }
    }

    pub fn kind(&self) -> TreeKind {
        self.kind
    }

    /// Write generation of the source this snapshot was taken from.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether no write happened at the source since the snapshot was taken.
    pub fn is_current(&self, source_generation: u64) -> bool {
        self.generation == source_generation
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn node(&self, key: &NodeKey) -> Option<&TreeNode> {
        self.arena.get(key)
    }

    /// Stored lineage of `key`; `None` for unknown or not yet encoded nodes.
    pub fn lineage_of(&self, key: &NodeKey) -> Option<&str> {
        self.arena
            .get(key)
            .map(TreeNode::lineage)
            .filter(|lineage| !lineage.is_empty())
    }

    pub fn roots(&self) -> Vec<&TreeNode> {
        self.arena.roots()
    }

    pub fn children(&self, key: &NodeKey) -> Vec<&TreeNode> {
        self.arena.children(key)
    }

    /// `key` and every node below it, ordered by lineage.
    pub fn nodes_in_subtree(&self, key: &NodeKey) -> Vec<&TreeNode> {
        let Some(prefix) = self.lineage_of(key) else {
            return Vec::new();
        };
        let mut nodes: Vec<&TreeNode> = self
            .arena
            .nodes()
            .filter(|node| is_ancestor_or_self(prefix, node.lineage()))
            .collect();
        nodes.sort_by(|left, right| {
            left.lineage()
                .cmp(right.lineage())
                .then_with(|| left.key.cmp(&right.key))
        });
        nodes
    }
}
