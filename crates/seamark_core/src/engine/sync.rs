//! Bulk synchronization of candidate records against a record store.
//!
//! # Responsibility
//! - Classify each candidate against its persisted counterpart.
//! - Stage inserts for new records and in-place updates for changed ones.
//! - Flush staged writes in bounded chunks.
//!
//! # Invariants
//! - Unchanged candidates never produce a write.
//! - Absence from a batch never deletes anything.
//! - Chunks flushed before a failure stay committed.

use crate::config::SyncConfig;
use crate::engine::change::{classify, ChangeKind};
use crate::model::record::SyncableRecord;
use crate::repo::record_repo::RecordStore;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// What to do when flushing a chunk fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop at the failed chunk and keep what was committed before it.
    #[default]
    Abort,
    /// Drop the failed chunk, count its records as failed, keep going.
    SkipFailedChunk,
}

impl FailurePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Abort => "abort",
            Self::SkipFailedChunk => "skip_failed_chunk",
        }
    }
}

/// Per-pass counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Records dropped with a failed chunk.
    pub failed: usize,
    /// Successful flushes.
    pub flushes: usize,
}

impl SyncReport {
    /// Candidates accounted for by this report.
    pub fn total(&self) -> usize {
        self.created + self.updated + self.unchanged + self.failed
    }

    fn record(&mut self, kind: ChangeKind) {
        match kind {
            ChangeKind::New => self.created += 1,
            ChangeKind::Changed => self.updated += 1,
            ChangeKind::Unchanged => self.unchanged += 1,
        }
    }

    fn absorb_chunk(&mut self, chunk: &SyncReport) {
        self.created += chunk.created;
        self.updated += chunk.updated;
        self.unchanged += chunk.unchanged;
    }
}

impl Display for SyncReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "created={} updated={} unchanged={} failed={}",
            self.created, self.updated, self.unchanged, self.failed
        )
    }
}

/// Errors that end a synchronization pass.
///
/// Every variant carries the report of what was durably committed before
/// the pass stopped.
#[derive(Debug)]
pub enum SyncError<E> {
    /// Candidate at `index` has no natural key.
    MissingKey { index: usize, committed: SyncReport },
    /// Store refused to look up or stage the candidate at `index`.
    Rejected {
        index: usize,
        key: String,
        committed: SyncReport,
        source: E,
    },
    /// Flushing a chunk failed under `FailurePolicy::Abort`.
    StoreFailure {
        committed: SyncReport,
        /// Candidates consumed, including the failed chunk.
        processed: usize,
        source: E,
    },
}

impl<E> SyncError<E> {
    pub fn committed(&self) -> &SyncReport {
        match self {
            Self::MissingKey { committed, .. }
            | Self::Rejected { committed, .. }
            | Self::StoreFailure { committed, .. } => committed,
        }
    }
}

impl<E: Display> Display for SyncError<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingKey { index, committed } => write!(
                f,
                "candidate #{index} has no natural key ({committed} committed)"
            ),
            Self::Rejected {
                index,
                key,
                committed,
                source,
            } => write!(
                f,
                "candidate #{index} `{key}` rejected by store: {source} ({committed} committed)"
            ),
            Self::StoreFailure {
                committed,
                processed,
                source,
            } => write!(
                f,
                "flush failed after {processed} candidates: {source} ({committed} committed)"
            ),
        }
    }
}

impl<E: Error + 'static> Error for SyncError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::MissingKey { .. } => None,
            Self::Rejected { source, .. } | Self::StoreFailure { source, .. } => Some(source),
        }
    }
}

/// Reconciles candidate batches against a `RecordStore`.
///
/// Holds configuration only; every pass is independent.
#[derive(Debug, Clone)]
pub struct BulkSynchronizer {
    batch_size: usize,
    failure_policy: FailurePolicy,
}

impl Default for BulkSynchronizer {
    fn default() -> Self {
        Self::new(SyncConfig::default())
    }
}

impl BulkSynchronizer {
    /// A zero batch size is treated as one.
    pub fn new(config: SyncConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            failure_policy: config.failure_policy,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    /// Runs one synchronization pass over `candidates` in input order.
    ///
    /// # Errors
    /// - `MissingKey`/`Rejected` discard the open chunk and stop.
    /// - `StoreFailure` when a flush fails under `FailurePolicy::Abort`.
    pub fn synchronize<R, S>(
        &self,
        store: &mut S,
        candidates: impl IntoIterator<Item = R>,
    ) -> Result<SyncReport, SyncError<S::Error>>
    where
        R: SyncableRecord,
        S: RecordStore<R>,
    {
        let started_at = Instant::now();
        info!(
            "event=sync_start module=engine status=start batch_size={} policy={}",
            self.batch_size,
            self.failure_policy.as_str()
        );

        let mut pass = Pass::default();
        let outcome = self.run(store, candidates, &mut pass);
        match &outcome {
            Ok(report) => info!(
                "event=sync_done module=engine status=ok duration_ms={} created={} updated={} unchanged={} failed={} flushes={}",
                started_at.elapsed().as_millis(),
                report.created,
                report.updated,
                report.unchanged,
                report.failed,
                report.flushes
            ),
            Err(err) => error!(
                "event=sync_failed module=engine status=error duration_ms={} processed={} committed_created={} committed_updated={} error={}",
                started_at.elapsed().as_millis(),
                pass.processed,
                err.committed().created,
                err.committed().updated,
                error_code(err)
            ),
        }
        outcome
    }

    fn run<R, S>(
        &self,
        store: &mut S,
        candidates: impl IntoIterator<Item = R>,
        pass: &mut Pass,
    ) -> Result<SyncReport, SyncError<S::Error>>
    where
        R: SyncableRecord,
        S: RecordStore<R>,
    {
        for (index, candidate) in candidates.into_iter().enumerate() {
            let Some(key) = candidate.natural_key().map(str::to_string) else {
                discard::<R, S>(store);
                return Err(SyncError::MissingKey {
                    index,
                    committed: pass.committed,
                });
            };

            if let Err(source) = stage(store, &key, candidate, &mut pass.chunk) {
                discard::<R, S>(store);
                return Err(SyncError::Rejected {
                    index,
                    key,
                    committed: pass.committed,
                    source,
                });
            }
            pass.processed += 1;

            if pass.chunk.total() >= self.batch_size {
                self.flush_chunk::<R, S>(store, pass)?;
            }
        }

        if pass.chunk.total() > 0 {
            self.flush_chunk::<R, S>(store, pass)?;
        }
        Ok(pass.committed)
    }

    fn flush_chunk<R, S>(&self, store: &mut S, pass: &mut Pass) -> Result<(), SyncError<S::Error>>
    where
        R: SyncableRecord,
        S: RecordStore<R>,
    {
        let chunk = std::mem::take(&mut pass.chunk);
        match store.flush() {
            Ok(writes) => {
                pass.committed.absorb_chunk(&chunk);
                pass.committed.flushes += 1;
                debug!(
                    "event=sync_chunk_flush module=engine status=ok records={} writes={} processed={}",
                    chunk.total(),
                    writes,
                    pass.processed
                );
                Ok(())
            }
            Err(source) => {
                discard::<R, S>(store);
                warn!(
                    "event=sync_chunk_flush module=engine status=error records={} processed={} policy={} error={}",
                    chunk.total(),
                    pass.processed,
                    self.failure_policy.as_str(),
                    source
                );
                match self.failure_policy {
                    FailurePolicy::Abort => Err(SyncError::StoreFailure {
                        committed: pass.committed,
                        processed: pass.processed,
                        source,
                    }),
                    FailurePolicy::SkipFailedChunk => {
                        pass.committed.failed += chunk.total();
                        Ok(())
                    }
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct Pass {
    committed: SyncReport,
    chunk: SyncReport,
    processed: usize,
}

fn stage<R, S>(store: &mut S, key: &str, candidate: R, chunk: &mut SyncReport) -> Result<(), S::Error>
where
    R: SyncableRecord,
    S: RecordStore<R>,
{
    let candidate = store.resolve(candidate)?;
    let persisted = store.find_by_key(key)?;
    let kind = classify(&candidate, persisted.as_ref());
    match (kind, persisted) {
        (ChangeKind::Unchanged, Some(_)) => {}
        (ChangeKind::Changed, Some(mut record)) => {
            record.absorb(&candidate);
            store.update(record)?;
        }
        (_, _) => store.insert(candidate)?,
    }
    chunk.record(kind);
    Ok(())
}

fn discard<R, S>(store: &mut S)
where
    R: SyncableRecord,
    S: RecordStore<R>,
{
    if let Err(err) = store.discard_pending() {
        warn!("event=sync_discard module=engine status=error error={err}");
    }
}

fn error_code<E>(err: &SyncError<E>) -> &'static str {
    match err {
        SyncError::MissingKey { .. } => "missing_key",
        SyncError::Rejected { .. } => "rejected",
        SyncError::StoreFailure { .. } => "store_failure",
    }
}

#[cfg(test)]
mod tests {
    use super::{BulkSynchronizer, FailurePolicy, SyncError, SyncReport};
    use crate::config::SyncConfig;
    use crate::model::aton::AtonNode;
    use crate::model::record::{RecordMeta, SyncableRecord};
    use crate::repo::record_repo::RecordStore;
    use std::collections::{BTreeMap, HashSet};
    use std::fmt::{Display, Formatter};

    #[derive(Debug)]
    struct FlushRefused(usize);

    impl Display for FlushRefused {
        fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
            write!(f, "flush #{} refused", self.0)
        }
    }

    impl std::error::Error for FlushRefused {}

    /// Committed map plus a staging buffer; selected flush calls fail.
    #[derive(Default)]
    struct MemoryStore {
        committed: BTreeMap<String, AtonNode>,
        pending: BTreeMap<String, AtonNode>,
        failing_flushes: HashSet<usize>,
        flush_calls: usize,
        writes: usize,
    }

    impl RecordStore<AtonNode> for MemoryStore {
        type Error = FlushRefused;

        fn find_by_key(&self, key: &str) -> Result<Option<AtonNode>, FlushRefused> {
            Ok(self
                .pending
                .get(key)
                .or_else(|| self.committed.get(key))
                .cloned())
        }

        fn insert(&mut self, record: AtonNode) -> Result<(), FlushRefused> {
            let key = record.natural_key().unwrap().to_string();
            self.pending.insert(key, record);
            Ok(())
        }

        fn update(&mut self, record: AtonNode) -> Result<(), FlushRefused> {
            self.insert(record)
        }

        fn flush(&mut self) -> Result<usize, FlushRefused> {
            self.flush_calls += 1;
            if self.failing_flushes.contains(&self.flush_calls) {
                return Err(FlushRefused(self.flush_calls));
            }
            let written = self.pending.len();
            self.writes += written;
            self.committed.append(&mut self.pending);
            Ok(written)
        }

        fn discard_pending(&mut self) -> Result<(), FlushRefused> {
            self.pending.clear();
            Ok(())
        }
    }

    fn aton(uid: &str) -> AtonNode {
        AtonNode::new(uid, 55.5, 12.5).with_tag("seamark:type", "buoy_lateral")
    }

    fn synchronizer(batch_size: usize, failure_policy: FailurePolicy) -> BulkSynchronizer {
        BulkSynchronizer::new(SyncConfig {
            batch_size,
            failure_policy,
        })
    }

    #[test]
    fn housekeeping_only_difference_counts_as_unchanged() {
        let mut store = MemoryStore::default();
        store.committed.insert("aton-2".into(), aton("aton-2"));
        let mut stamped = aton("aton-3");
        stamped.meta = RecordMeta {
            version: 4,
            created_at: 10,
            updated_at: 20,
        };
        store.committed.insert("aton-3".into(), stamped);

        let mut candidate_3 = aton("aton-3");
        candidate_3.meta.updated_at = 99;
        let report = synchronizer(100, FailurePolicy::Abort)
            .synchronize(&mut store, vec![aton("aton-1"), aton("aton-2"), candidate_3])
            .unwrap();

        assert_eq!(
            (report.created, report.updated, report.unchanged),
            (1, 0, 2)
        );
        assert_eq!(store.writes, 1);
    }

    #[test]
    fn changed_record_is_updated_in_place() {
        let mut store = MemoryStore::default();
        let mut persisted = aton("aton-1");
        persisted.meta.version = 3;
        store.committed.insert("aton-1".into(), persisted);

        let candidate = aton("aton-1").with_tag("seamark:name", "Drogden");
        let report = BulkSynchronizer::default()
            .synchronize(&mut store, [candidate])
            .unwrap();

        assert_eq!(report.updated, 1);
        let stored = &store.committed["aton-1"];
        assert_eq!(stored.meta.version, 3);
        assert_eq!(stored.name(), Some("Drogden"));
    }

    #[test]
    fn second_pass_with_same_batch_writes_nothing() {
        let mut store = MemoryStore::default();
        let batch: Vec<AtonNode> = (0..5).map(|i| aton(&format!("aton-{i}"))).collect();
        let sync = BulkSynchronizer::default();

        let first = sync.synchronize(&mut store, batch.clone()).unwrap();
        let writes_after_first = store.writes;
        let second = sync.synchronize(&mut store, batch).unwrap();

        assert_eq!(first.created, 5);
        assert_eq!(
            (second.created, second.updated, second.unchanged),
            (0, 0, 5)
        );
        assert_eq!(store.writes, writes_after_first);
    }

    #[test]
    fn flushes_every_batch_size_records() {
        let mut store = MemoryStore::default();
        let batch = (0..250).map(|i| aton(&format!("aton-{i}")));
        let report = synchronizer(100, FailurePolicy::Abort)
            .synchronize(&mut store, batch)
            .unwrap();

        assert_eq!(report.created, 250);
        assert_eq!(report.flushes, 3);
        assert_eq!(store.flush_calls, 3);
    }

    #[test]
    fn abort_policy_keeps_committed_prefix() {
        let mut store = MemoryStore {
            failing_flushes: HashSet::from([2]),
            ..MemoryStore::default()
        };
        let batch = (0..5).map(|i| aton(&format!("aton-{i}")));
        let err = synchronizer(2, FailurePolicy::Abort)
            .synchronize(&mut store, batch)
            .unwrap_err();

        match err {
            SyncError::StoreFailure {
                committed,
                processed,
                ..
            } => {
                assert_eq!(committed.created, 2);
                assert_eq!(processed, 4);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.committed.len(), 2);
        assert!(store.pending.is_empty());
        assert_eq!(store.flush_calls, 2);
    }

    #[test]
    fn skip_policy_counts_failed_chunk_and_continues() {
        let mut store = MemoryStore {
            failing_flushes: HashSet::from([2]),
            ..MemoryStore::default()
        };
        let batch = (0..5).map(|i| aton(&format!("aton-{i}")));
        let report = synchronizer(2, FailurePolicy::SkipFailedChunk)
            .synchronize(&mut store, batch)
            .unwrap();

        assert_eq!(
            report,
            SyncReport {
                created: 3,
                updated: 0,
                unchanged: 0,
                failed: 2,
                flushes: 2,
            }
        );
        assert!(!store.committed.contains_key("aton-2"));
        assert!(store.committed.contains_key("aton-4"));
    }

    #[test]
    fn blank_natural_key_stops_the_pass() {
        let mut store = MemoryStore::default();
        let err = synchronizer(1, FailurePolicy::SkipFailedChunk)
            .synchronize(&mut store, vec![aton("aton-1"), aton("   ")])
            .unwrap_err();

        assert!(matches!(err, SyncError::MissingKey { index: 1, .. }));
        assert_eq!(err.committed().created, 1);
    }

    #[test]
    fn zero_batch_size_is_clamped() {
        assert_eq!(synchronizer(0, FailurePolicy::Abort).batch_size(), 1);
    }
}
