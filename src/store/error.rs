//! Store Errors
//!
//! Error types for repository and unit-of-work operations.

use uuid::Uuid;

use crate::outbox::OutboxError;

/// Errors that can occur in the store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Row does not exist (or is not visible)
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    /// Optimistic concurrency conflict
    #[error("Concurrency conflict for aggregate {aggregate_id}")]
    ConcurrencyConflict { aggregate_id: Uuid },

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored row violates an aggregate invariant
    #[error("Corrupt row: {0}")]
    CorruptRow(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        StoreError::NotFound { entity, id }
    }

    /// Check if this error is a concurrency conflict
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, StoreError::ConcurrencyConflict { .. })
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::ConcurrencyConflict { .. } => true,
            StoreError::Database(e) => is_serialization_failure(e),
            _ => false,
        }
    }
}

impl From<OutboxError> for StoreError {
    fn from(err: OutboxError) -> Self {
        match err {
            OutboxError::Database(e) => StoreError::Database(e),
            OutboxError::Serialization(e) => StoreError::Serialization(e),
        }
    }
}

/// Postgres serialization failure (40001) or deadlock (40P01)
fn is_serialization_failure(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .map(|code| code == "40001" || code == "40P01")
        .unwrap_or(false)
}
