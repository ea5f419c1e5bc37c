//! Scheduled Jobs
//!
//! Background maintenance for the outbox: archiving delivered rows and
//! pruning consumer deduplication records. Backlog lag is watched by the
//! dispatcher itself.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

use crate::idempotency::{IdempotencyError, PgProcessedEventStore};
use crate::outbox::{report_lag, OutboxSource};

// =========================================================================
// Outbox Archival
// =========================================================================

/// Move processed outbox rows older than `days` into `outbox_events_archive`.
/// Unprocessed rows are never touched.
pub async fn archive_processed_events(pool: &PgPool, days: i32) -> Result<u64, JobError> {
    let result = sqlx::query(
        r#"
        WITH moved AS (
            DELETE FROM outbox_events
            WHERE processed_at IS NOT NULL
              AND processed_at < NOW() - make_interval(days => $1)
            RETURNING id, event_type, aggregate_type, aggregate_id, payload, created_at, processed_at
        )
        INSERT INTO outbox_events_archive
            (id, event_type, aggregate_type, aggregate_id, payload, created_at, processed_at)
        SELECT id, event_type, aggregate_type, aggregate_id, payload, created_at, processed_at
        FROM moved
        "#,
    )
    .bind(days)
    .execute(pool)
    .await?;

    let rows_archived = result.rows_affected();

    if rows_archived > 0 {
        tracing::info!(
            rows_archived = rows_archived,
            older_than_days = days,
            "Archived processed outbox events"
        );
    }

    Ok(rows_archived)
}

// =========================================================================
// Consumer Deduplication Cleanup
// =========================================================================

/// Delete consumer deduplication records older than `days`
pub async fn cleanup_processed_events(pool: &PgPool, days: i32) -> Result<u64, JobError> {
    let rows_deleted = PgProcessedEventStore::new(pool.clone())
        .cleanup_older_than(days)
        .await?;

    if rows_deleted > 0 {
        tracing::info!(
            rows_deleted = rows_deleted,
            "Deleted old consumer deduplication records"
        );
    }

    Ok(rows_deleted)
}

// =========================================================================
// Job Scheduler
// =========================================================================

/// Configuration for job scheduler
#[derive(Debug, Clone)]
pub struct JobSchedulerConfig {
    /// Interval for archival and cleanup (default: 1 hour)
    pub archive_interval: Duration,
    /// Processed rows older than this many days are archived (default: 30)
    pub archive_after_days: i32,
    /// Backlog age that triggers a warning in `run_all_once` (default: 5 minutes)
    pub lag_warn_after: Duration,
}

impl Default for JobSchedulerConfig {
    fn default() -> Self {
        Self {
            archive_interval: Duration::from_secs(3600),
            archive_after_days: 30,
            lag_warn_after: Duration::from_secs(300),
        }
    }
}

/// Job Scheduler - runs periodic maintenance tasks
pub struct JobScheduler {
    pool: PgPool,
    outbox: Arc<dyn OutboxSource>,
    config: JobSchedulerConfig,
}

impl JobScheduler {
    /// Create a new job scheduler
    pub fn new(pool: PgPool, outbox: Arc<dyn OutboxSource>) -> Self {
        Self {
            pool,
            outbox,
            config: JobSchedulerConfig::default(),
        }
    }

    /// Create with custom configuration
    pub fn with_config(
        pool: PgPool,
        outbox: Arc<dyn OutboxSource>,
        config: JobSchedulerConfig,
    ) -> Self {
        Self {
            pool,
            outbox,
            config,
        }
    }

    /// Start the job scheduler in the background
    /// Returns a handle that can be used to abort the scheduler
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run the scheduler loop
    async fn run(&self) {
        tracing::info!("Job scheduler started");

        let mut archive_interval = interval(self.config.archive_interval);
        let days = self.config.archive_after_days;

        loop {
            archive_interval.tick().await;

            if let Err(e) = archive_processed_events(&self.pool, days).await {
                tracing::error!(error = %e, "Outbox archival failed");
            }
            if let Err(e) = cleanup_processed_events(&self.pool, days).await {
                tracing::error!(error = %e, "Deduplication cleanup failed");
            }
        }
    }

    /// Run all maintenance jobs once (for manual trigger or testing)
    pub async fn run_all_once(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();
        let days = self.config.archive_after_days;

        match archive_processed_events(&self.pool, days).await {
            Ok(count) => report.outbox_events_archived = count,
            Err(e) => report.errors.push(format!("Outbox archival: {}", e)),
        }

        match cleanup_processed_events(&self.pool, days).await {
            Ok(count) => report.processed_events_deleted = count,
            Err(e) => report.errors.push(format!("Deduplication cleanup: {}", e)),
        }

        match self.outbox.stats().await {
            Ok(stats) => {
                report_lag(&stats, self.config.lag_warn_after);
                report.outbox_pending = stats.pending;
            }
            Err(e) => report.errors.push(format!("Backlog check: {}", e)),
        }

        report.completed_at = Utc::now();
        report
    }
}

/// Report from running maintenance jobs
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub outbox_events_archived: u64,
    pub processed_events_deleted: u64,
    pub outbox_pending: i64,
    pub errors: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

/// Job execution errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<IdempotencyError> for JobError {
    fn from(err: IdempotencyError) -> Self {
        match err {
            IdempotencyError::Database(e) => JobError::Database(e),
        }
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_scheduler_config_default() {
        let config = JobSchedulerConfig::default();
        assert_eq!(config.archive_interval, Duration::from_secs(3600));
        assert_eq!(config.archive_after_days, 30);
        assert_eq!(config.lag_warn_after, Duration::from_secs(300));
    }

    #[test]
    fn test_maintenance_report_default() {
        let report = MaintenanceReport::default();
        assert_eq!(report.outbox_events_archived, 0);
        assert_eq!(report.outbox_pending, 0);
        assert_eq!(report.errors.len(), 0);
    }

    #[test]
    fn test_job_error_display() {
        let err = JobError::Database(sqlx::Error::PoolClosed);
        assert!(err.to_string().starts_with("Database error"));
    }
}
