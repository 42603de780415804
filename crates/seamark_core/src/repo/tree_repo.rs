//! Tree node store contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist area/category nodes with their lineage and descriptions.
//! - Answer prefix queries over lineage as index range scans.
//!
//! # Invariants
//! - One repository instance serves exactly one `TreeKind`.
//! - Nodes returned from the store carry no child list; the arena derives it.
//! - Prefix results are ordered by `lineage ASC, node_key ASC`.

use crate::model::record::RecordMeta;
use crate::model::tree::{NodeDesc, NodeKey, TreeKind, TreeNode};
use crate::repo::{bool_to_int, ensure_schema_ready, StoreError, StoreResult};
use log::debug;
use rusqlite::{params, Connection, Row, Transaction, TransactionBehavior};
use std::collections::BTreeMap;

const NODE_SELECT_SQL: &str = "SELECT
    node_key,
    parent_key,
    mrn,
    is_active,
    lineage,
    sort_order,
    version,
    created_at,
    updated_at
FROM tree_nodes";

/// Store interface for one tree of nodes.
pub trait TreeRepository {
    /// Tree served by this store.
    fn kind(&self) -> TreeKind;
    /// Loads one node by key, observing buffered writes.
    fn find_by_key(&self, key: &NodeKey) -> StoreResult<Option<TreeNode>>;
    /// Loads every node whose lineage starts with `prefix`.
    fn find_by_lineage_prefix(&self, prefix: &str) -> StoreResult<Vec<TreeNode>>;
    /// Loads every node of the tree.
    fn list_all(&self) -> StoreResult<Vec<TreeNode>>;
    /// Buffers an insert-or-update of one node.
    fn save(&mut self, node: &TreeNode) -> StoreResult<()>;
    /// Buffers the removal of one node.
    fn delete(&mut self, key: &NodeKey) -> StoreResult<()>;
    /// Makes buffered writes durable; returns the number of writes applied.
    fn flush(&mut self) -> StoreResult<usize>;
    /// Drops buffered writes; returns how many were dropped.
    fn discard_pending(&mut self) -> usize;
}

#[derive(Debug, Clone)]
enum PendingWrite {
    Save(TreeNode),
    Delete,
}

/// SQLite-backed tree store with a write buffer.
pub struct SqliteTreeRepository<'conn> {
    conn: &'conn Connection,
    kind: TreeKind,
    pending: BTreeMap<NodeKey, PendingWrite>,
}

impl<'conn> SqliteTreeRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection, kind: TreeKind) -> StoreResult<Self> {
        ensure_schema_ready(conn, &["tree_nodes", "tree_node_descs"])?;
        Ok(Self {
            conn,
            kind,
            pending: BTreeMap::new(),
        })
    }

    fn query_nodes(&self, sql: &str, bind: &[&dyn rusqlite::ToSql]) -> StoreResult<Vec<TreeNode>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(bind)?;
        let mut nodes = Vec::new();
        while let Some(row) = rows.next()? {
            let mut node = parse_node_row(row)?;
            node.descs = load_descs(self.conn, self.kind, &node)?;
            nodes.push(node);
        }
        Ok(nodes)
    }

    /// Replaces stored rows with buffered writes matching `filter`.
    fn overlay_pending(
        &self,
        stored: Vec<TreeNode>,
        filter: impl Fn(&TreeNode) -> bool,
    ) -> Vec<TreeNode> {
        let mut merged: Vec<TreeNode> = stored
            .into_iter()
            .filter(|node| {
                node.key
                    .as_ref()
                    .map_or(true, |key| !self.pending.contains_key(key))
            })
            .collect();
        merged.extend(self.pending.values().filter_map(|write| match write {
            PendingWrite::Save(node) if filter(node) => Some(node.clone()),
            _ => None,
        }));
        merged.sort_by(|left, right| {
            left.lineage
                .cmp(&right.lineage)
                .then_with(|| left.key.cmp(&right.key))
        });
        merged
    }
}

impl TreeRepository for SqliteTreeRepository<'_> {
    fn kind(&self) -> TreeKind {
        self.kind
    }

    fn find_by_key(&self, key: &NodeKey) -> StoreResult<Option<TreeNode>> {
        match self.pending.get(key) {
            Some(PendingWrite::Save(node)) => return Ok(Some(node.clone())),
            Some(PendingWrite::Delete) => return Ok(None),
            None => {}
        }

        let nodes = self.query_nodes(
            &format!("{NODE_SELECT_SQL} WHERE tree = ?1 AND node_key = ?2;"),
            &[&self.kind.as_db_str(), &key.as_str()],
        )?;
        Ok(nodes.into_iter().next())
    }

    fn find_by_lineage_prefix(&self, prefix: &str) -> StoreResult<Vec<TreeNode>> {
        let Some(upper) = prefix_upper_bound(prefix) else {
            return self.list_all();
        };

        // Half-open range [prefix, upper) keeps the scan on idx_tree_nodes_lineage.
        let stored = self.query_nodes(
            &format!(
                "{NODE_SELECT_SQL}
                 WHERE tree = ?1
                   AND lineage >= ?2
                   AND lineage < ?3
                 ORDER BY lineage ASC, node_key ASC;"
            ),
            &[&self.kind.as_db_str(), &prefix, &upper],
        )?;
        Ok(self.overlay_pending(stored, |node| node.lineage.starts_with(prefix)))
    }

    fn list_all(&self) -> StoreResult<Vec<TreeNode>> {
        let stored = self.query_nodes(
            &format!("{NODE_SELECT_SQL} WHERE tree = ?1 ORDER BY lineage ASC, node_key ASC;"),
            &[&self.kind.as_db_str()],
        )?;
        Ok(self.overlay_pending(stored, |_| true))
    }

    fn save(&mut self, node: &TreeNode) -> StoreResult<()> {
        let key = node
            .key
            .clone()
            .ok_or(StoreError::MissingNaturalKey(self.kind.as_db_str()))?;
        self.pending.insert(key, PendingWrite::Save(node.clone()));
        Ok(())
    }

    fn delete(&mut self, key: &NodeKey) -> StoreResult<()> {
        self.pending.insert(key.clone(), PendingWrite::Delete);
        Ok(())
    }

    fn flush(&mut self) -> StoreResult<usize> {
        let pending = std::mem::take(&mut self.pending);
        if pending.is_empty() {
            return Ok(0);
        }

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        for (key, write) in &pending {
            match write {
                PendingWrite::Save(node) => write_node(&tx, self.kind, key, node)?,
                PendingWrite::Delete => delete_node(&tx, self.kind, key)?,
            }
        }
        tx.commit()?;

        debug!(
            "event=tree_flush module=repo status=ok tree={} writes={}",
            self.kind.as_db_str(),
            pending.len()
        );
        Ok(pending.len())
    }

    fn discard_pending(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }
}

fn write_node(tx: &Transaction<'_>, kind: TreeKind, key: &NodeKey, node: &TreeNode) -> StoreResult<()> {
    tx.execute(
        "INSERT INTO tree_nodes (
            tree,
            node_key,
            parent_key,
            mrn,
            is_active,
            lineage,
            sort_order
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT (tree, node_key) DO UPDATE SET
            parent_key = excluded.parent_key,
            mrn = excluded.mrn,
            is_active = excluded.is_active,
            lineage = excluded.lineage,
            sort_order = excluded.sort_order,
            version = version + 1,
            updated_at = (strftime('%s', 'now') * 1000);",
        params![
            kind.as_db_str(),
            key.as_str(),
            node.parent.as_ref().map(NodeKey::as_str),
            node.mrn.as_deref(),
            bool_to_int(node.active),
            node.lineage.as_str(),
            node.sort_order,
        ],
    )?;

    tx.execute(
        "DELETE FROM tree_node_descs WHERE tree = ?1 AND node_key = ?2;",
        params![kind.as_db_str(), key.as_str()],
    )?;
    let mut insert_desc = tx.prepare_cached(
        "INSERT INTO tree_node_descs (tree, node_key, lang, name) VALUES (?1, ?2, ?3, ?4);",
    )?;
    for (lang, desc) in &node.descs {
        insert_desc.execute(params![kind.as_db_str(), key.as_str(), lang, desc.name])?;
    }
    Ok(())
}

fn delete_node(tx: &Transaction<'_>, kind: TreeKind, key: &NodeKey) -> StoreResult<()> {
    tx.execute(
        "DELETE FROM tree_node_descs WHERE tree = ?1 AND node_key = ?2;",
        params![kind.as_db_str(), key.as_str()],
    )?;
    tx.execute(
        "DELETE FROM tree_nodes WHERE tree = ?1 AND node_key = ?2;",
        params![kind.as_db_str(), key.as_str()],
    )?;
    Ok(())
}

fn load_descs(
    conn: &Connection,
    kind: TreeKind,
    node: &TreeNode,
) -> StoreResult<BTreeMap<String, NodeDesc>> {
    let Some(key) = node.key.as_ref() else {
        return Ok(BTreeMap::new());
    };
    let mut stmt = conn.prepare_cached(
        "SELECT lang, name
         FROM tree_node_descs
         WHERE tree = ?1 AND node_key = ?2
         ORDER BY lang ASC;",
    )?;
    let mut rows = stmt.query(params![kind.as_db_str(), key.as_str()])?;
    let mut descs = BTreeMap::new();
    while let Some(row) = rows.next()? {
        let lang: String = row.get(0)?;
        descs.insert(lang, NodeDesc::new(row.get::<_, String>(1)?));
    }
    Ok(descs)
}

fn parse_node_row(row: &Row<'_>) -> StoreResult<TreeNode> {
    let key_text: String = row.get("node_key")?;
    let key = parse_key(&key_text, "tree_nodes.node_key")?;
    let parent = row
        .get::<_, Option<String>>("parent_key")?
        .map(|value| parse_key(&value, "tree_nodes.parent_key"))
        .transpose()?;

    let active = match row.get::<_, i64>("is_active")? {
        0 => false,
        1 => true,
        other => {
            return Err(StoreError::InvalidData(format!(
                "invalid is_active value `{other}` in tree_nodes.is_active"
            )));
        }
    };

    let mut node = TreeNode::new(key);
    node.parent = parent;
    node.mrn = row.get("mrn")?;
    node.active = active;
    node.lineage = row.get("lineage")?;
    node.sort_order = row.get("sort_order")?;
    node.meta = RecordMeta {
        version: row.get("version")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    };
    Ok(node)
}

fn parse_key(value: &str, column: &'static str) -> StoreResult<NodeKey> {
    NodeKey::parse(value)
        .map_err(|_| StoreError::InvalidData(format!("invalid node key `{value}` in {column}")))
}

/// Smallest string greater than every string starting with `prefix`.
fn prefix_upper_bound(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        if let Some(next) = char::from_u32(u32::from(last) + 1) {
            chars.push(next);
            return Some(chars.into_iter().collect());
        }
    }
    None
}
