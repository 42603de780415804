//! Key-addressed node arena.
//!
//! Nodes hold their parent as a key and their children as an ordered key list;
//! the arena owns every node, so there are no mutual object references.

use crate::engine::{lineage, require_key, TreeError};
use crate::model::tree::{NodeKey, TreeNode};
use std::collections::{HashMap, HashSet};

/// Structural invariant violation found by `TreeArena::check_consistency`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inconsistency {
    /// Stored lineage differs from the one encoded from the parent chain.
    LineageMismatch {
        key: NodeKey,
        stored: String,
        expected: String,
    },
    /// Active node below an inactive parent.
    ActiveUnderInactive { key: NodeKey, parent: NodeKey },
    /// Parent key does not resolve to a node.
    DanglingParent { key: NodeKey, parent: NodeKey },
    /// Parent chain loops back on itself.
    Cycle(NodeKey),
}

#[derive(Debug, Clone, Default)]
pub struct TreeArena {
    nodes: HashMap<NodeKey, TreeNode>,
}

impl TreeArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an arena from loaded nodes, deriving every child list.
    ///
    /// Dangling parents are kept as-is and reported by `check_consistency`.
    pub fn from_nodes(nodes: impl IntoIterator<Item = TreeNode>) -> Result<Self, TreeError> {
        let mut arena = Self::new();
        for mut node in nodes {
            let key = require_key(&node)?.clone();
            node.children.clear();
            if arena.nodes.insert(key.clone(), node).is_some() {
                return Err(TreeError::DuplicateKey(key));
            }
        }

        let links: Vec<(NodeKey, NodeKey)> = arena
            .nodes
            .iter()
            .filter_map(|(key, node)| node.parent.clone().map(|parent| (parent, key.clone())))
            .collect();
        let mut parents = HashSet::new();
        for (parent, child) in links {
            if let Some(parent_node) = arena.nodes.get_mut(&parent) {
                parent_node.children.push(child);
                parents.insert(parent);
            }
        }
        for parent in parents {
            arena.sort_children(&parent);
        }
        Ok(arena)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, key: &NodeKey) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn get(&self, key: &NodeKey) -> Option<&TreeNode> {
        self.nodes.get(key)
    }

    pub(crate) fn get_mut(&mut self, key: &NodeKey) -> Option<&mut TreeNode> {
        self.nodes.get_mut(key)
    }

    pub(crate) fn require(&self, key: &NodeKey) -> Result<&TreeNode, TreeError> {
        self.nodes
            .get(key)
            .ok_or_else(|| TreeError::NodeNotFound(key.clone()))
    }

    pub(crate) fn require_mut(&mut self, key: &NodeKey) -> Result<&mut TreeNode, TreeError> {
        self.nodes
            .get_mut(key)
            .ok_or_else(|| TreeError::NodeNotFound(key.clone()))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &TreeNode> {
        self.nodes.values()
    }

    /// Root nodes ordered by `sort_order`, then key.
    pub fn roots(&self) -> Vec<&TreeNode> {
        let mut roots: Vec<&TreeNode> = self.nodes.values().filter(|node| node.is_root()).collect();
        roots.sort_by(|left, right| sibling_order(left, right));
        roots
    }

    /// Direct children in sibling order.
    pub fn children(&self, key: &NodeKey) -> Vec<&TreeNode> {
        self.nodes
            .get(key)
            .map(|node| {
                node.children
                    .iter()
                    .filter_map(|child| self.nodes.get(child))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Ancestor keys from the immediate parent up to the root.
    pub fn ancestors(&self, key: &NodeKey) -> Result<Vec<NodeKey>, TreeError> {
        let mut seen = HashSet::from([key.clone()]);
        let mut result = Vec::new();
        let mut cursor = self.require(key)?.parent.clone();
        while let Some(current) = cursor {
            if !seen.insert(current.clone()) {
                return Err(TreeError::CycleDetected(current));
            }
            let node = self
                .nodes
                .get(&current)
                .ok_or_else(|| TreeError::ParentNotFound(current.clone()))?;
            cursor = node.parent.clone();
            result.push(current);
        }
        Ok(result)
    }

    /// Descendant keys in depth-first pre-order, excluding `key` itself.
    pub fn descendants(&self, key: &NodeKey) -> Vec<NodeKey> {
        let mut result = Vec::new();
        let mut seen = HashSet::from([key.clone()]);
        let mut stack: Vec<NodeKey> = self
            .nodes
            .get(key)
            .map(|node| node.children.iter().rev().cloned().collect())
            .unwrap_or_default();
        while let Some(current) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(node) = self.nodes.get(&current) {
                stack.extend(node.children.iter().rev().cloned());
            }
            result.push(current);
        }
        result
    }

    /// Whether `candidate` is `ancestor` or lies somewhere below it.
    pub fn is_descendant_or_self(
        &self,
        candidate: &NodeKey,
        ancestor: &NodeKey,
    ) -> Result<bool, TreeError> {
        if candidate == ancestor {
            return Ok(true);
        }
        Ok(self.ancestors(candidate)?.contains(ancestor))
    }

    /// Adds a node and links it under its parent.
    pub(crate) fn insert(&mut self, mut node: TreeNode) -> Result<(), TreeError> {
        let key = require_key(&node)?.clone();
        if self.nodes.contains_key(&key) {
            return Err(TreeError::DuplicateKey(key));
        }
        if let Some(parent) = node.parent.as_ref() {
            if !self.nodes.contains_key(parent) {
                return Err(TreeError::ParentNotFound(parent.clone()));
            }
        }
        node.children.clear();
        let parent = node.parent.clone();
        self.nodes.insert(key.clone(), node);
        if let Some(parent) = parent {
            self.attach(&parent, key);
        }
        Ok(())
    }

    /// Moves `key` under `new_parent` and fixes both child lists.
    ///
    /// Lineage is left untouched; callers recompute it for the moved subtree.
    pub(crate) fn relink(
        &mut self,
        key: &NodeKey,
        new_parent: Option<NodeKey>,
    ) -> Result<(), TreeError> {
        if let Some(parent) = new_parent.as_ref() {
            if !self.nodes.contains_key(parent) {
                return Err(TreeError::ParentNotFound(parent.clone()));
            }
        }
        let old_parent = std::mem::replace(&mut self.require_mut(key)?.parent, new_parent.clone());
        if let Some(old_parent) = old_parent {
            if let Some(parent_node) = self.nodes.get_mut(&old_parent) {
                parent_node.children.retain(|child| child != key);
            }
        }
        if let Some(parent) = new_parent {
            self.attach(&parent, key.clone());
        }
        Ok(())
    }

    /// Removes a childless node.
    pub(crate) fn remove(&mut self, key: &NodeKey) -> Result<TreeNode, TreeError> {
        if !self.require(key)?.children.is_empty() {
            return Err(TreeError::HasChildren(key.clone()));
        }
        let node = self.require(key)?.clone();
        self.nodes.remove(key);
        if let Some(parent) = node.parent.as_ref() {
            if let Some(parent_node) = self.nodes.get_mut(parent) {
                parent_node.children.retain(|child| child != key);
            }
        }
        Ok(node)
    }

    pub(crate) fn set_sort_order(&mut self, key: &NodeKey, sort_order: f64) -> Result<(), TreeError> {
        let node = self.require_mut(key)?;
        node.sort_order = sort_order;
        if let Some(parent) = node.parent.clone() {
            self.sort_children(&parent);
        }
        Ok(())
    }

    /// Reports every violated structural invariant, ordered by key.
    pub fn check_consistency(&self) -> Vec<Inconsistency> {
        let mut keys: Vec<&NodeKey> = self.nodes.keys().collect();
        keys.sort();

        let mut issues = Vec::new();
        for key in keys {
            let node = &self.nodes[key];
            if let Some(parent) = node.parent.as_ref() {
                match self.nodes.get(parent) {
                    None => {
                        issues.push(Inconsistency::DanglingParent {
                            key: key.clone(),
                            parent: parent.clone(),
                        });
                        continue;
                    }
                    Some(parent_node) if node.active && !parent_node.active => {
                        issues.push(Inconsistency::ActiveUnderInactive {
                            key: key.clone(),
                            parent: parent.clone(),
                        });
                    }
                    Some(_) => {}
                }
            }

            match lineage::compute_lineage(self, node) {
                Ok(expected) if expected != node.lineage => {
                    issues.push(Inconsistency::LineageMismatch {
                        key: key.clone(),
                        stored: node.lineage.clone(),
                        expected,
                    });
                }
                Ok(_) => {}
                Err(TreeError::CycleDetected(_)) => issues.push(Inconsistency::Cycle(key.clone())),
                Err(_) => {}
            }
        }
        issues
    }

    fn attach(&mut self, parent: &NodeKey, child: NodeKey) {
        if let Some(parent_node) = self.nodes.get_mut(parent) {
            parent_node.children.push(child);
        }
        self.sort_children(parent);
    }

    fn sort_children(&mut self, parent: &NodeKey) {
        let Some(children) = self.nodes.get(parent).map(|node| node.children.clone()) else {
            return;
        };
        let mut ordered: Vec<&TreeNode> = children
            .iter()
            .filter_map(|child| self.nodes.get(child))
            .collect();
        ordered.sort_by(|left, right| sibling_order(left, right));
        let ordered: Vec<NodeKey> = ordered
            .into_iter()
            .filter_map(|node| node.key.clone())
            .collect();
        if let Some(parent_node) = self.nodes.get_mut(parent) {
            parent_node.children = ordered;
        }
    }
}

fn sibling_order(left: &TreeNode, right: &TreeNode) -> std::cmp::Ordering {
    left.sort_order
        .total_cmp(&right.sort_order)
        .then_with(|| left.key.cmp(&right.key))
}

#[cfg(test)]
mod tests {
    use super::{Inconsistency, TreeArena};
    use crate::engine::TreeError;
    use crate::model::tree::{NodeKey, TreeNode};

    fn key(value: &str) -> NodeKey {
        NodeKey::parse(value).unwrap()
    }

    fn node(value: &str, parent: Option<&str>) -> TreeNode {
        let mut node = TreeNode::new(key(value));
        node.parent = parent.map(key);
        node
    }

    #[test]
    fn from_nodes_derives_children_in_sibling_order() {
        let mut late = node("b", Some("root"));
        late.sort_order = 2.0;
        let mut early = node("c", Some("root"));
        early.sort_order = 1.0;
        let arena = TreeArena::from_nodes([node("root", None), late, early]).unwrap();

        let children: Vec<&str> = arena
            .children(&key("root"))
            .iter()
            .map(|child| child.key.as_ref().unwrap().as_str())
            .collect();
        assert_eq!(children, vec!["c", "b"]);
    }

    #[test]
    fn ancestors_detects_cycles() {
        let arena =
            TreeArena::from_nodes([node("a", Some("b")), node("b", Some("a"))]).unwrap();
        let err = arena.ancestors(&key("a")).unwrap_err();
        assert!(matches!(err, TreeError::CycleDetected(_)));
        assert!(arena
            .check_consistency()
            .iter()
            .any(|issue| matches!(issue, Inconsistency::Cycle(_))));
    }

    #[test]
    fn remove_rejects_node_with_children() {
        let mut arena = TreeArena::from_nodes([node("a", None), node("b", Some("a"))]).unwrap();
        assert!(matches!(
            arena.remove(&key("a")),
            Err(TreeError::HasChildren(_))
        ));
        arena.remove(&key("b")).unwrap();
        arena.remove(&key("a")).unwrap();
        assert!(arena.is_empty());
    }

    #[test]
    fn relink_moves_child_between_parents() {
        let mut arena = TreeArena::from_nodes([
            node("a", None),
            node("b", None),
            node("c", Some("a")),
        ])
        .unwrap();
        arena.relink(&key("c"), Some(key("b"))).unwrap();

        assert!(arena.children(&key("a")).is_empty());
        assert_eq!(arena.children(&key("b")).len(), 1);
        assert_eq!(arena.get(&key("c")).unwrap().parent, Some(key("b")));
    }

    #[test]
    fn dangling_parent_is_reported() {
        let arena = TreeArena::from_nodes([node("orphan", Some("gone"))]).unwrap();
        assert_eq!(
            arena.check_consistency(),
            vec![Inconsistency::DanglingParent {
                key: key("orphan"),
                parent: key("gone"),
            }]
        );
    }
}
