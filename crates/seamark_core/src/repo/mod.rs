//! Record store abstractions and SQLite implementations.
//!
//! # Responsibility
//! - Define the store contracts consumed by the engine (find-by-key, prefix
//!   query, save, delete, flush).
//! - Isolate SQLite query details from the engine and services.
//!
//! # Invariants
//! - Writes are buffered and only become durable on `flush()`.
//! - Reads observe buffered writes.
//! - A failed flush rolls back the whole buffered chunk.

use crate::db::DbError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod record_repo;
pub mod tree_repo;

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from record store operations.
#[derive(Debug)]
pub enum StoreError {
    /// Underlying SQLite/bootstrap error, including constraint violations
    /// surfaced at flush time.
    Db(DbError),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Record cannot be stored without a natural key.
    MissingNaturalKey(&'static str),
    /// Stored payload could not be encoded or decoded.
    Payload(serde_json::Error),
    /// Persisted data cannot be converted to a valid model.
    InvalidData(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "store requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => write!(f, "store requires table `{table}`"),
            Self::MissingNaturalKey(kind) => write!(f, "`{kind}` record has no natural key"),
            Self::Payload(err) => write!(f, "invalid record payload: {err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Payload(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Payload(value)
    }
}

pub(crate) fn ensure_schema_ready(
    conn: &rusqlite::Connection,
    tables: &[&'static str],
) -> StoreResult<()> {
    let expected_version = crate::db::migrations::latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(StoreError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for table in tables {
        let exists: i64 = conn.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [*table],
            |row| row.get(0),
        )?;
        if exists != 1 {
            return Err(StoreError::MissingRequiredTable(table));
        }
    }
    Ok(())
}

pub(crate) fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}
