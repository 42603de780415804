//! Hierarchical-entity consistency and bulk-synchronization engine for
//! maritime safety notice data.
//! Tree invariants (lineage, activation) and record reconciliation live here.

pub mod config;
pub mod db;
pub mod engine;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{ConfigError, EngineConfig, SyncConfig};
pub use db::{open_db, open_db_in_memory, DbError};
pub use engine::arena::{Inconsistency, TreeArena};
pub use engine::change::{classify, ChangeKind};
pub use engine::matcher::{RegionMember, SubtreeMatcher};
pub use engine::snapshot::TreeSnapshot;
pub use engine::sync::{BulkSynchronizer, FailurePolicy, SyncError, SyncReport};
pub use engine::TreeError;
pub use logging::{default_log_level, init_logging, init_logging_from, logging_status, LoggingError};
pub use model::aton::AtonNode;
pub use model::message_tag::{MessageTag, MessageTagType};
pub use model::record::{RecordMeta, SyncableRecord};
pub use model::transmitter::Transmitter;
pub use model::tree::{NewNode, NodeDesc, NodeKey, TreeKind, TreeNode};
pub use repo::record_repo::{RecordStore, SqliteRecordStore, StoredRecord};
pub use repo::tree_repo::{SqliteTreeRepository, TreeRepository};
pub use repo::{StoreError, StoreResult};
pub use service::hierarchy_service::HierarchyService;
pub use service::transmitter_service::{
    PromulgationEntry, TransmitterService, TransmitterServiceError,
};

/// Minimal health-check API.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
