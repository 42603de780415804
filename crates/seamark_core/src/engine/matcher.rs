//! Subtree membership by lineage prefix.
//!
//! # Responsibility
//! - Decide whether an entity associated with tree regions falls inside any
//!   of a set of region subtrees.
//!
//! # Invariants
//! - Prefix tests only accept well-formed lineages, so `/1/` never matches
//!   `/12/`.
//! - An empty region list is unrestricted and matches everything.

use crate::engine::lineage::is_well_formed;
use crate::engine::snapshot::TreeSnapshot;
use crate::model::transmitter::Transmitter;
use crate::model::tree::{NodeKey, TreeNode};

/// An entity associated with zero or more tree regions.
pub trait RegionMember {
    fn region_keys(&self) -> Vec<&NodeKey>;
}

impl RegionMember for Transmitter {
    fn region_keys(&self) -> Vec<&NodeKey> {
        self.areas.iter().collect()
    }
}

/// Whether `lineage` denotes `ancestor` itself or a node below it.
pub fn is_ancestor_or_self(ancestor: &str, lineage: &str) -> bool {
    is_well_formed(ancestor) && is_well_formed(lineage) && lineage.starts_with(ancestor)
}

/// Whether any member lineage lies inside any region lineage.
///
/// Vacuously true when `region_lineages` is empty.
pub fn matches_lineages<'a, 'b>(
    member_lineages: impl IntoIterator<Item = &'a str>,
    region_lineages: &[&'b str],
) -> bool {
    if region_lineages.is_empty() {
        return true;
    }
    member_lineages.into_iter().any(|lineage| {
        region_lineages
            .iter()
            .any(|region| is_ancestor_or_self(region, lineage))
    })
}

/// Resolves member region keys through a tree snapshot.
pub struct SubtreeMatcher<'s> {
    snapshot: &'s TreeSnapshot,
}

impl<'s> SubtreeMatcher<'s> {
    pub fn new(snapshot: &'s TreeSnapshot) -> Self {
        Self { snapshot }
    }

    /// Whether `member` belongs to the subtree of any node in `region_roots`.
    ///
    /// Member region keys unknown to the snapshot never match.
    pub fn matches(&self, member: &impl RegionMember, region_roots: &[&TreeNode]) -> bool {
        let regions: Vec<&str> = region_roots.iter().map(|node| node.lineage()).collect();
        let member_lineages = member
            .region_keys()
            .into_iter()
            .filter_map(|key| self.snapshot.lineage_of(key));
        matches_lineages(member_lineages, &regions)
    }

    /// Keeps the members that match `region_roots`, preserving input order.
    pub fn select<'m, M: RegionMember>(
        &self,
        members: &'m [M],
        region_roots: &[&TreeNode],
    ) -> Vec<&'m M> {
        members
            .iter()
            .filter(|member| self.matches(*member, region_roots))
            .collect()
    }
}
