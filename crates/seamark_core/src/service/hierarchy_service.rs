//! Tree-edit use-case service.
//!
//! # Responsibility
//! - Own the arena of one tree kind and mirror every edit into the store.
//! - Maintain lineage and activation on insert, move and toggle.
//! - Serve as the `RecordStore<TreeNode>` seam for bulk synchronization.
//!
//! # Invariants
//! - Public edit operations commit as a unit: on any failure the store
//!   buffer is discarded and the arena reloaded from durable state.
//! - A rejected move leaves both arena and store untouched.
//! - Lineage is never repaired implicitly; `rebuild_lineages` is explicit.

use crate::engine::arena::{Inconsistency, TreeArena};
use crate::engine::snapshot::TreeSnapshot;
use crate::engine::{activation, lineage, require_key, TreeError};
use crate::model::record::float_bits;
use crate::model::tree::{normalize_lang, NewNode, NodeKey, TreeKind, TreeNode};
use crate::repo::record_repo::RecordStore;
use crate::repo::tree_repo::TreeRepository;
use log::{debug, info, warn};
use std::collections::BTreeSet;

/// Tree-edit facade for one tree kind.
pub struct HierarchyService<R: TreeRepository> {
    repo: R,
    arena: TreeArena,
    generation: u64,
}

impl<R: TreeRepository> HierarchyService<R> {
    /// Loads every node of the repository's tree.
    ///
    /// Stored lineage is taken as-is; run `check_consistency` to audit it.
    pub fn load(repo: R) -> Result<Self, TreeError> {
        let arena = TreeArena::from_nodes(repo.list_all()?)?;
        debug!(
            "event=tree_load module=service status=ok tree={} nodes={}",
            repo.kind().as_db_str(),
            arena.len()
        );
        Ok(Self {
            repo,
            arena,
            generation: 0,
        })
    }

    pub fn kind(&self) -> TreeKind {
        self.repo.kind()
    }

    /// Incremented by every flush that wrote something.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&self, key: &NodeKey) -> Option<&TreeNode> {
        self.arena.get(key)
    }

    pub fn children(&self, key: &NodeKey) -> Vec<&TreeNode> {
        self.arena.children(key)
    }

    pub fn roots(&self) -> Vec<&TreeNode> {
        self.arena.roots()
    }

    /// `key` and all its descendants, read through a lineage prefix query.
    pub fn subtree(&self, key: &NodeKey) -> Result<Vec<TreeNode>, TreeError> {
        let node = self.arena.require(key)?;
        Ok(self.repo.find_by_lineage_prefix(node.lineage())?)
    }

    /// Detached copy for read-side queries, stamped with the current generation.
    pub fn snapshot(&self) -> TreeSnapshot {
        TreeSnapshot::from_arena(self.kind(), self.arena.clone(), self.generation)
    }

    /// Replaces `snapshot` with current state when a write landed since it
    /// was taken, or when it belongs to another tree. Returns whether it was
    /// replaced.
    pub fn refresh_snapshot(&self, snapshot: &mut TreeSnapshot) -> bool {
        if snapshot.kind() == self.kind() && snapshot.is_current(self.generation) {
            return false;
        }
        *snapshot = self.snapshot();
        debug!(
            "event=tree_snapshot_refresh module=service status=ok tree={} generation={}",
            self.kind().as_db_str(),
            self.generation
        );
        true
    }

    pub fn check_consistency(&self) -> Vec<Inconsistency> {
        self.arena.check_consistency()
    }

    /// Inserts one node and returns it with its key and lineage assigned.
    ///
    /// # Errors
    /// - `DuplicateKey` when the key is taken.
    /// - `ParentNotFound` when the parent does not exist.
    pub fn insert_node(&mut self, request: NewNode) -> Result<TreeNode, TreeError> {
        let key = self.commit("tree_insert", |service| service.stage_insert(request))?;
        let node = self.arena.require(&key)?.clone();
        info!(
            "event=tree_insert module=service status=ok tree={} node={} lineage={} active={}",
            self.kind().as_db_str(),
            key,
            node.lineage(),
            node.active
        );
        Ok(node)
    }

    /// Re-parents `key`; `None` makes it a root.
    ///
    /// Returns every node whose lineage changed.
    ///
    /// # Errors
    /// - `InvalidReparent` when `new_parent` is the node or one of its
    ///   descendants; nothing is modified.
    pub fn move_node(
        &mut self,
        key: &NodeKey,
        new_parent: Option<NodeKey>,
    ) -> Result<Vec<NodeKey>, TreeError> {
        let target = new_parent.clone();
        let relined = self.commit("tree_move", |service| service.stage_move(key, new_parent))?;
        info!(
            "event=tree_move module=service status=ok tree={} node={} parent={} relined={}",
            self.kind().as_db_str(),
            key,
            target.as_ref().map_or("-", NodeKey::as_str),
            relined.len()
        );
        Ok(relined)
    }

    /// Sets the activation flag and cascades it; returns the toggled keys.
    pub fn set_active(&mut self, key: &NodeKey, value: bool) -> Result<Vec<NodeKey>, TreeError> {
        let changed = self.commit("tree_set_active", |service| {
            let changed = activation::set_active(&mut service.arena, key, value)?;
            service.persist(changed.iter())?;
            Ok(changed)
        })?;
        info!(
            "event=tree_set_active module=service status=ok tree={} node={} active={} changed={}",
            self.kind().as_db_str(),
            key,
            value,
            changed.len()
        );
        Ok(changed)
    }

    /// Sets the description for `lang`, replacing any existing one.
    pub fn set_desc(
        &mut self,
        key: &NodeKey,
        lang: &str,
        name: impl Into<String>,
    ) -> Result<(), TreeError> {
        let name = name.into();
        self.commit("tree_set_desc", |service| {
            service.arena.require_mut(key)?.set_desc(lang, name);
            service.persist([key])
        })
    }

    /// Returns whether a description for `lang` existed.
    pub fn remove_desc(&mut self, key: &NodeKey, lang: &str) -> Result<bool, TreeError> {
        self.commit("tree_remove_desc", |service| {
            let removed = service.arena.require_mut(key)?.remove_desc(lang);
            if removed {
                service.persist([key])?;
            }
            Ok(removed)
        })
    }

    pub fn set_sort_order(&mut self, key: &NodeKey, sort_order: f64) -> Result<(), TreeError> {
        self.commit("tree_set_sort_order", |service| {
            service.arena.set_sort_order(key, sort_order)?;
            service.persist([key])
        })
    }

    /// Deletes a childless node.
    ///
    /// # Errors
    /// - `HasChildren` while children still reference the node.
    pub fn delete_node(&mut self, key: &NodeKey) -> Result<TreeNode, TreeError> {
        let removed = self.commit("tree_delete", |service| {
            let removed = service.arena.remove(key)?;
            service.repo.delete(key)?;
            Ok(removed)
        })?;
        info!(
            "event=tree_delete module=service status=ok tree={} node={}",
            self.kind().as_db_str(),
            key
        );
        Ok(removed)
    }

    /// Re-encodes and persists every lineage reachable from the roots.
    ///
    /// Returns the keys whose stored lineage was stale. Nodes caught in a
    /// parent cycle are unreachable from any root and stay as reported by
    /// `check_consistency`.
    pub fn rebuild_lineages(&mut self) -> Result<Vec<NodeKey>, TreeError> {
        let repaired = self.commit("tree_rebuild_lineages", |service| {
            let roots: Vec<NodeKey> = service
                .arena
                .roots()
                .into_iter()
                .filter_map(|node| node.key.clone())
                .collect();
            let mut repaired = Vec::new();
            for root in &roots {
                repaired.extend(lineage::refresh_subtree(&mut service.arena, root)?);
            }
            service.persist(repaired.iter())?;
            Ok(repaired)
        })?;
        info!(
            "event=tree_rebuild_lineages module=service status=ok tree={} repaired={}",
            self.kind().as_db_str(),
            repaired.len()
        );
        Ok(repaired)
    }

    /// Makes buffered writes durable; rolls back on failure.
    pub fn flush(&mut self) -> Result<usize, TreeError> {
        self.flush_repo().map_err(|err| self.abandon("tree_flush", err))
    }

    /// Runs `op` and flushes; any failure rolls the service back.
    fn commit<T>(
        &mut self,
        event: &'static str,
        op: impl FnOnce(&mut Self) -> Result<T, TreeError>,
    ) -> Result<T, TreeError> {
        let outcome = match op(self) {
            Ok(value) => self.flush_repo().map(|_| value),
            Err(err) => Err(err),
        };
        outcome.map_err(|err| self.abandon(event, err))
    }

    fn abandon(&mut self, event: &'static str, err: TreeError) -> TreeError {
        warn!(
            "event={event} module=service status=error tree={} error={err}",
            self.kind().as_db_str()
        );
        if let Err(rollback_err) = self.rollback() {
            warn!(
                "event=tree_rollback module=service status=error tree={} error={rollback_err}",
                self.kind().as_db_str()
            );
        }
        err
    }

    fn flush_repo(&mut self) -> Result<usize, TreeError> {
        let writes = self.repo.flush()?;
        if writes > 0 {
            self.generation += 1;
        }
        Ok(writes)
    }

    /// Drops buffered writes and reloads the arena from durable state.
    fn rollback(&mut self) -> Result<(), TreeError> {
        let dropped = self.repo.discard_pending();
        self.arena = TreeArena::from_nodes(self.repo.list_all()?)?;
        debug!(
            "event=tree_rollback module=service status=ok tree={} dropped={}",
            self.kind().as_db_str(),
            dropped
        );
        Ok(())
    }

    /// Buffers the current arena state of every key.
    fn persist<'k>(&mut self, keys: impl IntoIterator<Item = &'k NodeKey>) -> Result<(), TreeError> {
        let keys: BTreeSet<&NodeKey> = keys.into_iter().collect();
        for key in keys {
            let node = self.arena.require(key)?;
            self.repo.save(node)?;
        }
        Ok(())
    }

    fn stage_insert(&mut self, request: NewNode) -> Result<NodeKey, TreeError> {
        let key = request.key.unwrap_or_else(NodeKey::generate);
        if self.arena.contains(&key) {
            return Err(TreeError::DuplicateKey(key));
        }
        let parent_active = match request.parent.as_ref() {
            Some(parent) => Some(
                self.arena
                    .get(parent)
                    .ok_or_else(|| TreeError::ParentNotFound(parent.clone()))?
                    .active,
            ),
            None => None,
        };

        let mut node = TreeNode::new(key.clone());
        node.parent = request.parent;
        node.mrn = request.mrn;
        node.active = request.active.unwrap_or(parent_active.unwrap_or(true));
        node.sort_order = request.sort_order;
        node.descs = request
            .descs
            .into_iter()
            .map(|(lang, desc)| (normalize_lang(&lang), desc))
            .collect();
        let active = node.active;

        self.arena.insert(node)?;
        lineage::update_lineage(&mut self.arena, &key)?;
        let toggled = activation::set_active(&mut self.arena, &key, active)?;
        self.persist(std::iter::once(&key).chain(toggled.iter()))?;
        Ok(key)
    }

    /// Moves `key` and re-applies its own flag under the new parent.
    fn stage_move(
        &mut self,
        key: &NodeKey,
        new_parent: Option<NodeKey>,
    ) -> Result<Vec<NodeKey>, TreeError> {
        let active = self.arena.require(key)?.active;
        self.stage_relink(key, new_parent, active)
    }

    /// Re-parents `key`, re-encodes its subtree and applies `active` to it
    /// in the new position.
    fn stage_relink(
        &mut self,
        key: &NodeKey,
        new_parent: Option<NodeKey>,
        active: bool,
    ) -> Result<Vec<NodeKey>, TreeError> {
        self.arena.require(key)?;
        if let Some(parent) = new_parent.as_ref() {
            if !self.arena.contains(parent) {
                return Err(TreeError::ParentNotFound(parent.clone()));
            }
            if self.arena.is_descendant_or_self(parent, key)? {
                return Err(TreeError::InvalidReparent {
                    node: key.clone(),
                    parent: parent.clone(),
                });
            }
        }

        self.arena.relink(key, new_parent)?;
        let relined = lineage::refresh_subtree(&mut self.arena, key)?;
        let toggled = activation::set_active(&mut self.arena, key, active)?;
        self.persist(std::iter::once(key).chain(&relined).chain(&toggled))?;
        Ok(relined)
    }

    /// Applies a full candidate state to an existing node.
    ///
    /// A re-parented node takes the candidate's flag in its new position, so
    /// the old flag never touches the new ancestors.
    fn stage_update(&mut self, candidate: TreeNode) -> Result<(), TreeError> {
        let key = require_key(&candidate)?.clone();
        let current = self.arena.require(&key)?;
        let parent_changed = current.parent != candidate.parent;
        let order_changed = float_bits(current.sort_order) != float_bits(candidate.sort_order);

        if parent_changed {
            self.stage_relink(&key, candidate.parent.clone(), candidate.active)?;
        }
        if order_changed {
            self.arena.set_sort_order(&key, candidate.sort_order)?;
        }
        let node = self.arena.require_mut(&key)?;
        node.mrn = candidate.mrn;
        node.descs = candidate
            .descs
            .into_iter()
            .map(|(lang, desc)| (normalize_lang(&lang), desc))
            .collect();
        let toggled = activation::set_active(&mut self.arena, &key, candidate.active)?;
        self.persist(std::iter::once(&key).chain(&toggled))
    }
}

/// Lets `BulkSynchronizer` reconcile tree nodes with lineage and activation
/// maintained on every staged write.
///
/// Candidate parents must already exist or come earlier in the batch.
impl<R: TreeRepository> RecordStore<TreeNode> for HierarchyService<R> {
    type Error = TreeError;

    /// Gives a candidate without an explicit flag the flag of its parent, or
    /// `true` for a root.
    fn resolve(&self, mut candidate: TreeNode) -> Result<TreeNode, TreeError> {
        if candidate.inherit_active {
            candidate.active = match candidate.parent.as_ref() {
                Some(parent) => {
                    self.arena
                        .get(parent)
                        .ok_or_else(|| TreeError::ParentNotFound(parent.clone()))?
                        .active
                }
                None => true,
            };
            candidate.inherit_active = false;
        }
        Ok(candidate)
    }

    fn find_by_key(&self, key: &str) -> Result<Option<TreeNode>, TreeError> {
        let key = NodeKey::parse(key)?;
        Ok(self.arena.get(&key).cloned())
    }

    fn insert(&mut self, record: TreeNode) -> Result<(), TreeError> {
        self.stage_insert(NewNode::from(record)).map(|_| ())
    }

    fn update(&mut self, record: TreeNode) -> Result<(), TreeError> {
        self.stage_update(record)
    }

    fn flush(&mut self) -> Result<usize, TreeError> {
        self.flush_repo()
    }

    fn discard_pending(&mut self) -> Result<(), TreeError> {
        self.rollback()
    }
}
