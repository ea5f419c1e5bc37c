//! Outbox storage
//!
//! Write path (`record`) and the claim protocol the dispatcher polls through.
//! Claiming sits behind `OutboxSource` so a push-based feed can replace
//! polling without touching the write side.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};

use super::{NewOutboxEvent, OutboxError, OutboxEvent};

/// Backlog figures used for lag monitoring
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OutboxStats {
    /// Rows with `processed_at IS NULL`
    pub pending: i64,
    /// `created_at` of the oldest pending row
    pub oldest_pending_at: Option<DateTime<Utc>>,
}

impl OutboxStats {
    /// Age of the oldest pending row in whole seconds
    pub fn oldest_pending_age_secs(&self, now: DateTime<Utc>) -> Option<i64> {
        self.oldest_pending_at
            .map(|created_at| (now - created_at).num_seconds().max(0))
    }
}

/// Source of claimable outbox rows
#[async_trait]
pub trait OutboxSource: Send + Sync {
    /// Claim up to `limit` unprocessed rows in ascending id order.
    ///
    /// Rows claimed by another open batch are skipped, never returned twice.
    async fn claim(&self, limit: i64) -> Result<Box<dyn ClaimedBatch>, OutboxError>;

    async fn stats(&self) -> Result<OutboxStats, OutboxError>;
}

/// Rows held by one dispatcher until `finish`
#[async_trait]
pub trait ClaimedBatch: Send {
    fn events(&self) -> &[OutboxEvent];

    /// Record a successful delivery; applied when the batch finishes
    async fn mark_processed(&mut self, id: i64) -> Result<(), OutboxError>;

    /// Persist the processed marks and release the claim
    async fn finish(self: Box<Self>) -> Result<(), OutboxError>;
}

// =========================================================================
// Write path
// =========================================================================

/// Append staged rows inside the caller's database transaction
pub async fn record(conn: &mut PgConnection, events: &[NewOutboxEvent]) -> Result<(), OutboxError> {
    for event in events {
        sqlx::query(
            r#"
            INSERT INTO outbox_events (event_type, aggregate_type, aggregate_id, payload, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&event.event_type)
        .bind(&event.aggregate_type)
        .bind(&event.aggregate_id)
        .bind(&event.payload)
        .bind(event.created_at)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

// =========================================================================
// Postgres claim protocol
// =========================================================================

/// Polls `outbox_events` with `FOR UPDATE SKIP LOCKED`
#[derive(Debug, Clone)]
pub struct PgOutboxSource {
    pool: PgPool,
}

impl PgOutboxSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OutboxSource for PgOutboxSource {
    async fn claim(&self, limit: i64) -> Result<Box<dyn ClaimedBatch>, OutboxError> {
        let mut tx = self.pool.begin().await?;

        let events: Vec<OutboxEvent> = sqlx::query_as(
            r#"
            SELECT id, event_type, aggregate_type, aggregate_id, payload, created_at, processed_at
            FROM outbox_events
            WHERE processed_at IS NULL
            ORDER BY id ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        Ok(Box::new(PgClaimedBatch { tx, events }))
    }

    async fn stats(&self) -> Result<OutboxStats, OutboxError> {
        let (pending, oldest_pending_at): (i64, Option<DateTime<Utc>>) = sqlx::query_as(
            r#"
            SELECT COUNT(*), MIN(created_at)
            FROM outbox_events
            WHERE processed_at IS NULL
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(OutboxStats {
            pending,
            oldest_pending_at,
        })
    }
}

/// Claimed rows stay locked by the open transaction until `finish`.
/// Dropping the batch rolls back, releasing the rows unprocessed.
struct PgClaimedBatch {
    tx: Transaction<'static, Postgres>,
    events: Vec<OutboxEvent>,
}

#[async_trait]
impl ClaimedBatch for PgClaimedBatch {
    fn events(&self) -> &[OutboxEvent] {
        &self.events
    }

    async fn mark_processed(&mut self, id: i64) -> Result<(), OutboxError> {
        // processed_at only ever moves from NULL to a timestamp
        sqlx::query(
            r#"
            UPDATE outbox_events
            SET processed_at = NOW()
            WHERE id = $1 AND processed_at IS NULL
            "#,
        )
        .bind(id)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<(), OutboxError> {
        self.tx.commit().await?;
        Ok(())
    }
}
