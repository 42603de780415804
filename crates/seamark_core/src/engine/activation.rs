//! Activation cascade.
//!
//! Activation flows upward, deactivation flows downward. Both walks stop at
//! the first node already in the target state: the invariant guarantees
//! everything beyond it is already consistent, so the cost is proportional
//! to the number of flags that actually change.

use crate::engine::arena::TreeArena;
use crate::engine::TreeError;
use crate::model::tree::NodeKey;
use std::collections::HashSet;

/// Sets the flag on `key` and restores the activation invariant.
///
/// Returns the keys whose flag changed, starting with `key` when it changed.
pub fn set_active(
    arena: &mut TreeArena,
    key: &NodeKey,
    value: bool,
) -> Result<Vec<NodeKey>, TreeError> {
    let node = arena.require_mut(key)?;
    let mut changed = Vec::new();
    if node.active != value {
        node.active = value;
        changed.push(key.clone());
    }

    if value {
        activate_ancestors(arena, key, &mut changed)?;
    } else {
        deactivate_descendants(arena, key, &mut changed);
    }
    Ok(changed)
}

fn activate_ancestors(
    arena: &mut TreeArena,
    key: &NodeKey,
    changed: &mut Vec<NodeKey>,
) -> Result<(), TreeError> {
    let mut seen = HashSet::from([key.clone()]);
    let mut cursor = arena.require(key)?.parent.clone();
    while let Some(current) = cursor {
        if !seen.insert(current.clone()) {
            return Err(TreeError::CycleDetected(current));
        }
        let parent = arena
            .get_mut(&current)
            .ok_or_else(|| TreeError::ParentNotFound(current.clone()))?;
        if parent.active {
            break;
        }
        parent.active = true;
        cursor = parent.parent.clone();
        changed.push(current);
    }
    Ok(())
}

fn deactivate_descendants(arena: &mut TreeArena, key: &NodeKey, changed: &mut Vec<NodeKey>) {
    let mut stack: Vec<NodeKey> = arena
        .get(key)
        .map(|node| node.children.iter().rev().cloned().collect())
        .unwrap_or_default();
    while let Some(current) = stack.pop() {
        let Some(node) = arena.get_mut(&current) else {
            continue;
        };
        if !node.active {
            continue;
        }
        node.active = false;
        stack.extend(node.children.iter().rev().cloned());
        changed.push(current);
    }
}
