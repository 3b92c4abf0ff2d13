//! Error taxonomy shared by the lease manager and the entity stores.
//!
//! # Purpose
//! Lease conflicts, duplicate IDs and missing rows are expected outcomes that
//! callers branch on, so they are distinct variants rather than opaque failures.
//! Transport and transaction failures surface as [`StoreError::Database`].
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate id: {0}")]
    DuplicateId(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("lease conflict on {entity_id}: {}", describe_holder(.leased_by))]
    LeaseConflict {
        entity_id: String,
        leased_by: Option<String>,
    },
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub fn lease_conflict(entity_id: impl Into<String>, leased_by: Option<String>) -> Self {
        StoreError::LeaseConflict {
            entity_id: entity_id.into(),
            leased_by,
        }
    }

    pub fn invalid_query(message: impl Into<String>) -> Self {
        StoreError::InvalidQuery(message.into())
    }

    pub fn is_lease_conflict(&self) -> bool {
        matches!(self, StoreError::LeaseConflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

fn describe_holder(leased_by: &Option<String>) -> String {
    match leased_by {
        Some(holder) => format!("leased by {holder}"),
        None => "caller holds no active lease".to_string(),
    }
}

/// Detects primary-key/unique violations independently of the backend.
///
/// Postgres reports SQLSTATE `23505`, SQLite reports extended code `1555`/`2067`;
/// `sqlx` normalises both into [`sqlx::error::ErrorKind::UniqueViolation`].
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.is_unique_violation();
    }
    false
}
