//! Processed Event Repository
//!
//! Remembers which outbox rows a consumer has already handled, keyed by
//! `(consumer, event_id)`.

use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

/// Processed Event Repository Error
#[derive(Debug, thiserror::Error)]
pub enum IdempotencyError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Consumer-side deduplication record
#[async_trait]
pub trait ProcessedEventStore: Send + Sync {
    async fn is_processed(&self, consumer: &str, event_id: i64) -> Result<bool, IdempotencyError>;

    /// Record the event as handled. Returns `false` if it already was.
    async fn mark_processed(&self, consumer: &str, event_id: i64)
        -> Result<bool, IdempotencyError>;
}

/// Repository backed by the `processed_events` table
#[derive(Debug, Clone)]
pub struct PgProcessedEventStore {
    pool: PgPool,
}

impl PgProcessedEventStore {
    /// Create a new PgProcessedEventStore
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Delete records older than `days`; the outbox rows they refer to are archived by then
    pub async fn cleanup_older_than(&self, days: i32) -> Result<u64, IdempotencyError> {
        let rows = sqlx::query(
            r#"
            DELETE FROM processed_events
            WHERE processed_at < NOW() - make_interval(days => $1)
            "#,
        )
        .bind(days)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows)
    }
}

#[async_trait]
impl ProcessedEventStore for PgProcessedEventStore {
    async fn is_processed(&self, consumer: &str, event_id: i64) -> Result<bool, IdempotencyError> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM processed_events WHERE consumer = $1 AND event_id = $2
            )
            "#,
        )
        .bind(consumer)
        .bind(event_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn mark_processed(
        &self,
        consumer: &str,
        event_id: i64,
    ) -> Result<bool, IdempotencyError> {
        let rows = sqlx::query(
            r#"
            INSERT INTO processed_events (consumer, event_id, processed_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (consumer, event_id) DO NOTHING
            "#,
        )
        .bind(consumer)
        .bind(event_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows == 1)
    }
}

/// In-process store for tests and single-process consumers
#[derive(Debug, Default)]
pub struct InMemoryProcessedEventStore {
    seen: Mutex<HashSet<(String, i64)>>,
}

impl InMemoryProcessedEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProcessedEventStore for InMemoryProcessedEventStore {
    async fn is_processed(&self, consumer: &str, event_id: i64) -> Result<bool, IdempotencyError> {
        let seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(seen.contains(&(consumer.to_string(), event_id)))
    }

    async fn mark_processed(
        &self,
        consumer: &str,
        event_id: i64,
    ) -> Result<bool, IdempotencyError> {
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(seen.insert((consumer.to_string(), event_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_store_scopes_by_consumer() {
        let store = InMemoryProcessedEventStore::new();

        assert!(!store.is_processed("mailer", 1).await.unwrap());
        assert!(store.mark_processed("mailer", 1).await.unwrap());
        assert!(!store.mark_processed("mailer", 1).await.unwrap());

        assert!(store.is_processed("mailer", 1).await.unwrap());
        assert!(!store.is_processed("projector", 1).await.unwrap());
    }

    #[test]
    fn test_idempotency_error_display() {
        let err = IdempotencyError::Database(sqlx::Error::PoolClosed);
        assert!(err.to_string().contains("Database error"));
    }
}
