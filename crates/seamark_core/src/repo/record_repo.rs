//! Natural-key record store contracts and SQLite implementation.
//!
//! # Responsibility
//! - Define `RecordStore`, the seam the bulk synchronizer writes through.
//! - Persist flat records as JSON payloads keyed by `(kind, natural_key)`.
//!
//! # Invariants
//! - House-keeping columns (`version`, `created_at`, `updated_at`) live
//!   outside the payload and are maintained by SQL, never by callers.
//! - Buffered writes are applied in one immediate transaction per flush.

use crate::model::aton::AtonNode;
use crate::model::message_tag::MessageTag;
use crate::model::record::{RecordMeta, SyncableRecord};
use crate::model::transmitter::Transmitter;
use crate::repo::{ensure_schema_ready, StoreError, StoreResult};
use log::debug;
use rusqlite::{params, Connection, Row, Transaction, TransactionBehavior};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::error::Error;

/// Store seam used by `BulkSynchronizer`.
///
/// `insert`/`update` stage a write; `flush` makes every staged write durable
/// or fails as a unit.
pub trait RecordStore<R: SyncableRecord> {
    type Error: Error + 'static;

    /// Fills in values a candidate takes from stored state, before it is
    /// compared. Returns the candidate unchanged by default.
    fn resolve(&self, candidate: R) -> Result<R, Self::Error> {
        Ok(candidate)
    }

    fn find_by_key(&self, key: &str) -> Result<Option<R>, Self::Error>;
    fn insert(&mut self, record: R) -> Result<(), Self::Error>;
    fn update(&mut self, record: R) -> Result<(), Self::Error>;
    fn flush(&mut self) -> Result<usize, Self::Error>;
    /// Drops staged writes after a failure so the store matches durable state.
    fn discard_pending(&mut self) -> Result<(), Self::Error>;
}

/// A syncable record persisted in the generic `sync_records` table.
pub trait StoredRecord: SyncableRecord + Serialize + DeserializeOwned {
    /// Discriminator stored in `sync_records.kind`.
    const KIND: &'static str;

    fn meta_mut(&mut self) -> &mut RecordMeta;
}

impl StoredRecord for AtonNode {
    const KIND: &'static str = "aton";

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }
}

impl StoredRecord for Transmitter {
    const KIND: &'static str = "transmitter";

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }
}

impl StoredRecord for MessageTag {
    const KIND: &'static str = "message_tag";

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }
}

#[derive(Debug, Clone)]
enum PendingRecord<R> {
    Save(R),
    Delete,
}

/// SQLite-backed store for one record kind.
pub struct SqliteRecordStore<'conn, R: StoredRecord> {
    conn: &'conn Connection,
    pending: BTreeMap<String, PendingRecord<R>>,
}

impl<'conn, R: StoredRecord> SqliteRecordStore<'conn, R> {
    /// Creates store from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> StoreResult<Self> {
        ensure_schema_ready(conn, &["sync_records"])?;
        Ok(Self {
            conn,
            pending: BTreeMap::new(),
        })
    }

    /// Loads one record by natural key, observing buffered writes.
    pub fn get(&self, key: &str) -> StoreResult<Option<R>> {
        match self.pending.get(key) {
            Some(PendingRecord::Save(record)) => return Ok(Some(record.clone())),
            Some(PendingRecord::Delete) => return Ok(None),
            None => {}
        }

        let mut stmt = self.conn.prepare_cached(
            "SELECT payload, version, created_at, updated_at
             FROM sync_records
             WHERE kind = ?1 AND natural_key = ?2;",
        )?;
        let mut rows = stmt.query(params![R::KIND, key])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_record_row(row)?)),
            None => Ok(None),
        }
    }

    /// Loads every record of this kind ordered by natural key.
    pub fn list_all(&self) -> StoreResult<Vec<R>> {
        let mut stmt = self.conn.prepare(
            "SELECT natural_key, payload, version, created_at, updated_at
             FROM sync_records
             WHERE kind = ?1
             ORDER BY natural_key ASC;",
        )?;
        let mut rows = stmt.query([R::KIND])?;
        let mut records = BTreeMap::new();
        while let Some(row) = rows.next()? {
            let key: String = row.get("natural_key")?;
            if !self.pending.contains_key(&key) {
                records.insert(key, parse_record_row(row)?);
            }
        }
        for (key, write) in &self.pending {
            if let PendingRecord::Save(record) = write {
                records.insert(key.clone(), record.clone());
            }
        }
        Ok(records.into_values().collect())
    }

    /// Buffers an insert-or-update keyed by the record's natural key.
    pub fn save(&mut self, record: R) -> StoreResult<()> {
        let key = record
            .natural_key()
            .ok_or(StoreError::MissingNaturalKey(R::KIND))?
            .to_string();
        self.pending.insert(key, PendingRecord::Save(record));
        Ok(())
    }

    pub fn delete(&mut self, key: &str) {
        self.pending.insert(key.to_string(), PendingRecord::Delete);
    }

    /// Makes buffered writes durable; returns the number of writes applied.
    pub fn flush_pending(&mut self) -> StoreResult<usize> {
        let pending = std::mem::take(&mut self.pending);
        if pending.is_empty() {
            return Ok(0);
        }

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        for (key, write) in &pending {
            match write {
                PendingRecord::Save(record) => write_record(&tx, R::KIND, key, record)?,
                PendingRecord::Delete => {
                    tx.execute(
                        "DELETE FROM sync_records WHERE kind = ?1 AND natural_key = ?2;",
                        params![R::KIND, key],
                    )?;
                }
            }
        }
        tx.commit()?;

        debug!(
            "event=record_flush module=repo status=ok kind={} writes={}",
            R::KIND,
            pending.len()
        );
        Ok(pending.len())
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl<R: StoredRecord> RecordStore<R> for SqliteRecordStore<'_, R> {
    type Error = StoreError;

    fn find_by_key(&self, key: &str) -> StoreResult<Option<R>> {
        self.get(key)
    }

    fn insert(&mut self, record: R) -> StoreResult<()> {
        self.save(record)
    }

    fn update(&mut self, record: R) -> StoreResult<()> {
        self.save(record)
    }

    fn flush(&mut self) -> StoreResult<usize> {
        self.flush_pending()
    }

    fn discard_pending(&mut self) -> StoreResult<()> {
        self.pending.clear();
        Ok(())
    }
}

fn write_record<R: StoredRecord>(
    tx: &Transaction<'_>,
    kind: &str,
    key: &str,
    record: &R,
) -> StoreResult<()> {
    let payload = serde_json::to_string(record)?;
    tx.execute(
        "INSERT INTO sync_records (kind, natural_key, payload)
         VALUES (?1, ?2, ?3)
         ON CONFLICT (kind, natural_key) DO UPDATE SET
            payload = excluded.payload,
            version = version + 1,
            updated_at = (strftime('%s', 'now') * 1000);",
        params![kind, key, payload],
    )?;
    Ok(())
}

fn parse_record_row<R: StoredRecord>(row: &Row<'_>) -> StoreResult<R> {
    let payload: String = row.get("payload")?;
    let mut record: R = serde_json::from_str(&payload)?;
    *record.meta_mut() = RecordMeta {
        version: row.get("version")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    };
    Ok(record)
}
