//! Change detection between a candidate record and its persisted counterpart.

use crate::model::record::SyncableRecord;
use serde::Serialize;

/// Outcome of comparing a candidate with persisted state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// No persisted record carries the natural key.
    New,
    /// Significant fields differ.
    Changed,
    /// Significant fields are equal; house-keeping fields may still differ.
    Unchanged,
}

/// Classifies `candidate` against `persisted` by significant fields only.
pub fn classify<R: SyncableRecord>(candidate: &R, persisted: Option<&R>) -> ChangeKind {
    match persisted {
        None => ChangeKind::New,
        Some(persisted) if has_changed(persisted, candidate) => ChangeKind::Changed,
        Some(_) => ChangeKind::Unchanged,
    }
}

pub fn has_changed<R: SyncableRecord>(persisted: &R, candidate: &R) -> bool {
    persisted.significant_fields() != candidate.significant_fields()
}
