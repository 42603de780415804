//! Significant-field capability shared by every synchronized record type.
//!
//! # Responsibility
//! - Declare how a record exposes its natural key and comparable content.
//! - Carry house-keeping metadata outside of that comparable content.
//!
//! # Invariants
//! - `significant_fields` never includes `RecordMeta` values.
//! - `absorb` never replaces the receiver's identity.

use serde::{Deserialize, Deserializer};
use std::fmt::Debug;

/// House-keeping fields maintained by the store.
///
/// Always differs between a freshly parsed candidate and its persisted
/// counterpart, so change detection must ignore it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordMeta {
    /// Optimistic-concurrency counter, bumped on every persisted update.
    pub version: i64,
    /// Epoch ms creation timestamp.
    pub created_at: i64,
    /// Epoch ms update timestamp.
    pub updated_at: i64,
}

/// A record reconciled against persisted state by natural key.
pub trait SyncableRecord: Clone {
    /// Comparable view over the fields that matter for change detection.
    type Fields<'a>: PartialEq + Debug
    where
        Self: 'a;

    /// Caller-meaningful unique key; `None` when the record has none yet.
    fn natural_key(&self) -> Option<&str>;

    fn significant_fields(&self) -> Self::Fields<'_>;

    /// Copies the significant content of `candidate` into `self` in place.
    fn absorb(&mut self, candidate: &Self);
}

/// Comparable bit pattern of a float field; `-0.0` reads as `0.0`.
pub(crate) fn float_bits(value: f64) -> u64 {
    if value == 0.0 {
        0.0_f64.to_bits()
    } else {
        value.to_bits()
    }
}

/// Deserializes a natural key with surrounding whitespace removed, so the
/// stored payload carries the same key the record is filed under.
pub(crate) fn deserialize_trimmed<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(raw.trim().to_string())
}
