//! Materialized lineage encoding.
//!
//! # Responsibility
//! - Encode a node's ancestor chain as `/root/.../parent/key/`.
//! - Detect stale lineage and report whether descendants need re-encoding.
//!
//! # Invariants
//! - Every key in a lineage is followed by `/`, so a string prefix test is an
//!   ancestor-or-self test on whole segments.
//! - Traversal is bounded by a seen-set; revisiting a node fails with
//!   `CycleDetected`.

use crate::engine::arena::TreeArena;
use crate::engine::{require_key, TreeError};
use crate::model::tree::{NodeKey, TreeNode};
use std::collections::HashSet;

pub const SEPARATOR: char = '/';

/// Encodes the lineage of `node` from its parent chain in `arena`.
///
/// `node` need not be in the arena yet; its parent chain must be.
pub fn compute_lineage(arena: &TreeArena, node: &TreeNode) -> Result<String, TreeError> {
    let key = require_key(node)?;
    let mut seen = HashSet::from([key.clone()]);
    let mut chain = vec![key.clone()];

    let mut cursor = node.parent.clone();
    while let Some(current) = cursor {
        if !seen.insert(current.clone()) {
            return Err(TreeError::CycleDetected(current));
        }
        let parent = arena
            .get(&current)
            .ok_or_else(|| TreeError::ParentNotFound(current.clone()))?;
        cursor = parent.parent.clone();
        chain.push(current);
    }

    chain.reverse();
    Ok(encode(chain.iter()))
}

/// Re-encodes one node's lineage in place.
///
/// Returns `true` when the stored value changed, which means every descendant
/// lineage is stale too. Descendants are not touched here.
pub fn update_lineage(arena: &mut TreeArena, key: &NodeKey) -> Result<bool, TreeError> {
    let lineage = compute_lineage(arena, arena.require(key)?)?;
    let node = arena.require_mut(key)?;
    if node.lineage == lineage {
        return Ok(false);
    }
    node.lineage = lineage;
    Ok(true)
}

/// Re-encodes `key` and every descendant, parents before children.
///
/// Returns the keys whose lineage changed.
pub fn refresh_subtree(arena: &mut TreeArena, key: &NodeKey) -> Result<Vec<NodeKey>, TreeError> {
    let mut changed = Vec::new();
    if update_lineage(arena, key)? {
        changed.push(key.clone());
    }
    for descendant in arena.descendants(key) {
        if update_lineage(arena, &descendant)? {
            changed.push(descendant);
        }
    }
    Ok(changed)
}

/// Joins keys into the `/a/b/` form.
pub fn encode<'a>(keys: impl IntoIterator<Item = &'a NodeKey>) -> String {
    let mut lineage = String::from(SEPARATOR);
    for key in keys {
        lineage.push_str(key.as_str());
        lineage.push(SEPARATOR);
    }
    lineage
}

/// A lineage is `/` followed by one or more `key/` segments.
pub fn is_well_formed(lineage: &str) -> bool {
    lineage.len() >= 3
        && lineage.starts_with(SEPARATOR)
        && lineage.ends_with(SEPARATOR)
        && !lineage.contains("//")
}
