//! Store interface consumed by the reconciliation engine.
//!
//! The engine never owns schema or connections; the host hands it something
//! that implements [`Store`]. Two implementations ship with the crate:
//!
//! - [`SqliteStore`]: rusqlite-backed, real transactions and foreign keys
//! - [`MemoryStore`]: in-memory fake with checkpoint/rollback and fault injection

use std::collections::BTreeMap;

use thiserror::Error;

use crate::audit::AuditEntry;
use crate::records::EntityRecord;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Conflict, busy or locked database. Safe to retry.
    #[error("transient store error: {0}")]
    Transient(String),

    /// Constraint violation, missing table, corrupt row. Retrying won't help.
    #[error("store error: {0}")]
    Permanent(String),

    #[error("invalid collection name: {0:?}")]
    InvalidCollection(String),

    #[error("no transaction in progress")]
    NoTransaction,
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::DatabaseBusy
                    || e.code == rusqlite::ErrorCode::DatabaseLocked =>
            {
                StoreError::Transient(err.to_string())
            }
            _ => StoreError::Permanent(err.to_string()),
        }
    }
}

/// Store operations, named for fault injection and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Query,
    GetEntity,
    UpdateOwner,
    CountOwnedBy,
    CountReferences,
    DeleteEntity,
    Begin,
    Commit,
    Rollback,
    InsertAudit,
    ListAudit,
}

/// Transactional relational store holding entities, dependents and audit entries.
///
/// All methods take `&self`; implementations guard their own state. A handle
/// runs at most one transaction at a time. Parallel work uses one handle per
/// worker.
pub trait Store {
    /// Snapshot of every entity in a cohort, ordered by `internal_id`.
    fn query(&self, cohort_key: &str) -> Result<Vec<EntityRecord>, StoreError>;

    fn get_entity(&self, internal_id: &str) -> Result<Option<EntityRecord>, StoreError>;

    /// Re-point every record in `collection` owned by `old_owner`. Returns rows moved.
    fn update_owner(&self, collection: &str, old_owner: &str, new_owner: &str)
        -> Result<u64, StoreError>;

    fn count_owned_by(&self, collection: &str, owner_id: &str) -> Result<u64, StoreError>;

    /// References to `owner_id` across EVERY dependent collection the store
    /// knows about, configured or not. Only non-zero counts are returned.
    fn count_references(&self, owner_id: &str) -> Result<BTreeMap<String, u64>, StoreError>;

    /// Delete an entity. Returns false if it did not exist.
    fn delete_entity(&self, internal_id: &str) -> Result<bool, StoreError>;

    fn begin_transaction(&self) -> Result<(), StoreError>;

    fn commit(&self) -> Result<(), StoreError>;

    fn rollback(&self) -> Result<(), StoreError>;

    fn insert_audit_entry(&self, entry: &AuditEntry) -> Result<(), StoreError>;

    /// Audit entries for a cohort, oldest first.
    fn audit_entries(&self, cohort_key: &str) -> Result<Vec<AuditEntry>, StoreError>;
}

/// Collection names end up in SQL as identifiers, so keep them boring:
/// ASCII letters, digits and underscores, not starting with a digit.
pub fn validate_collection_name(name: &str) -> Result<(), StoreError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidCollection(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_collection_name() {
        assert!(validate_collection_name("results").is_ok());
        assert!(validate_collection_name("_attendance_2024").is_ok());

        assert!(validate_collection_name("").is_err());
        assert!(validate_collection_name("2024_results").is_err());
        assert!(validate_collection_name("results; DROP TABLE entities").is_err());
        assert!(validate_collection_name("re\"sults").is_err());
    }

    #[test]
    fn test_busy_sqlite_error_is_transient() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        let constraint = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
            None,
        );

        assert!(StoreError::from(busy).is_transient());
        assert!(!StoreError::from(constraint).is_transient());
        assert!(!StoreError::from(rusqlite::Error::QueryReturnedNoRows).is_transient());
    }
}
