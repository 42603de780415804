//! Domain model for hierarchical entities and bulk-synchronized records.
//!
//! # Responsibility
//! - Define tree-structured entities (areas, categories) and their keys.
//! - Define flat records reconciled by natural key (AtoNs, transmitters, tags).
//! - Declare the significant-field capability used by change detection.
//!
//! # Invariants
//! - Node keys never contain the lineage separator.
//! - House-keeping metadata is never part of a significant-field snapshot.

pub mod aton;
pub mod message_tag;
pub mod record;
pub mod transmitter;
pub mod tree;
