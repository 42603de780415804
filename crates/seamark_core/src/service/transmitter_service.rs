//! Area-based transmitter selection.
//!
//! # Responsibility
//! - Select NAVTEX transmitters whose coverage lies inside message areas.
//!
//! # Invariants
//! - Results are ordered by case-insensitive name, then name.
//! - An empty area list selects every transmitter.

use crate::engine::matcher::SubtreeMatcher;
use crate::engine::snapshot::TreeSnapshot;
use crate::model::transmitter::Transmitter;
use crate::model::tree::{NodeKey, TreeKind, TreeNode};
use crate::repo::record_repo::SqliteRecordStore;
use crate::repo::StoreError;
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug)]
pub enum TransmitterServiceError {
    /// Requested area is not part of the snapshot.
    AreaNotFound(NodeKey),
    /// Snapshot was taken from a tree other than the area tree.
    NotAreaTree(TreeKind),
    Store(StoreError),
}

impl Display for TransmitterServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AreaNotFound(key) => write!(f, "area not found: {key}"),
            Self::NotAreaTree(kind) => {
                write!(f, "expected an area snapshot, got `{}`", kind.as_db_str())
            }
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for TransmitterServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for TransmitterServiceError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// One transmitter and whether it is selected for a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromulgationEntry {
    pub transmitter: Transmitter,
    pub selected: bool,
}

pub struct TransmitterService<'conn> {
    store: SqliteRecordStore<'conn, Transmitter>,
}

impl<'conn> TransmitterService<'conn> {
    pub fn new(store: SqliteRecordStore<'conn, Transmitter>) -> Self {
        Self { store }
    }

    /// Transmitters covering any area inside the subtrees of `areas`.
    ///
    /// An empty `areas` list selects every transmitter.
    ///
    /// # Errors
    /// - `AreaNotFound` for an area key missing from the snapshot; unknown
    ///   areas are never dropped silently.
    /// - `NotAreaTree` when `snapshot` is not an area tree.
    pub fn find_by_areas(
        &self,
        snapshot: &TreeSnapshot,
        areas: &[NodeKey],
        only_active: bool,
    ) -> Result<Vec<Transmitter>, TransmitterServiceError> {
        let regions = resolve_regions(snapshot, areas)?;
        let matcher = SubtreeMatcher::new(snapshot);
        let mut selected: Vec<Transmitter> = self
            .store
            .list_all()?
            .into_iter()
            .filter(|transmitter| !only_active || transmitter.active)
            .filter(|transmitter| matcher.matches(transmitter, &regions))
            .collect();
        sort_by_name(&mut selected);
        Ok(selected)
    }

    /// Every active transmitter, flagged when it serves the message `areas`.
    ///
    /// A message without areas selects no transmitter.
    pub fn promulgation_selection(
        &self,
        snapshot: &TreeSnapshot,
        areas: &[NodeKey],
    ) -> Result<Vec<PromulgationEntry>, TransmitterServiceError> {
        let regions = resolve_regions(snapshot, areas)?;
        let matcher = SubtreeMatcher::new(snapshot);
        let mut active: Vec<Transmitter> = self
            .store
            .list_all()?
            .into_iter()
            .filter(|transmitter| transmitter.active)
            .collect();
        sort_by_name(&mut active);
        Ok(active
            .into_iter()
            .map(|transmitter| PromulgationEntry {
                selected: !regions.is_empty() && matcher.matches(&transmitter, &regions),
                transmitter,
            })
            .collect())
    }
}

fn resolve_regions<'s>(
    snapshot: &'s TreeSnapshot,
    areas: &[NodeKey],
) -> Result<Vec<&'s TreeNode>, TransmitterServiceError> {
    if snapshot.kind() != TreeKind::Area {
        return Err(TransmitterServiceError::NotAreaTree(snapshot.kind()));
    }
    areas
        .iter()
        .map(|key| {
            snapshot
                .node(key)
                .ok_or_else(|| TransmitterServiceError::AreaNotFound(key.clone()))
        })
        .collect()
}

fn sort_by_name(transmitters: &mut [Transmitter]) {
    transmitters.sort_by(|left, right| {
        left.name
            .to_lowercase()
            .cmp(&right.name.to_lowercase())
            .then_with(|| left.name.cmp(&right.name))
    });
}
