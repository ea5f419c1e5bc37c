//! Database module
//!
//! Connection setup, schema verification and the application context that
//! hands the pool and store implementations to every component.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::outbox::{OutboxSource, PgOutboxSource};
use crate::store::{PgUnitOfWorkFactory, UnitOfWorkFactory};

/// Tables the process needs; created by `migrations/0001_ledger.sql`
const REQUIRED_TABLES: [&str; 6] = [
    "accounts",
    "transactions",
    "split_lines",
    "outbox_events",
    "outbox_events_archive",
    "processed_events",
];

/// Verify database connectivity
pub async fn verify_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Check if required tables exist
pub async fn check_schema(pool: &PgPool) -> Result<bool, sqlx::Error> {
    for table in REQUIRED_TABLES {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = 'public' AND table_name = $1
            )
            "#,
        )
        .bind(table)
        .fetch_one(pool)
        .await?;

        if !exists {
            tracing::error!(table = table, "Required table does not exist");
            return Ok(false);
        }
    }

    Ok(true)
}

/// Everything a component needs, built once at startup
#[derive(Clone)]
pub struct AppContext {
    pub config: Config,
    pub pool: PgPool,
    pub uow_factory: Arc<dyn UnitOfWorkFactory>,
    pub outbox: Arc<dyn OutboxSource>,
}

impl AppContext {
    /// Connect, verify the schema and wire the Postgres implementations
    pub async fn init(config: &Config) -> AppResult<Self> {
        tracing::info!("Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .connect(&config.database_url)
            .await?;

        verify_connection(&pool).await?;
        if !check_schema(&pool).await? {
            return Err(AppError::Internal(
                "database schema is incomplete, apply migrations/0001_ledger.sql".to_string(),
            ));
        }

        tracing::info!("Database connected successfully");

        Ok(Self::with_pool(config.clone(), pool))
    }

    /// Wire the Postgres implementations around an existing pool
    pub fn with_pool(config: Config, pool: PgPool) -> Self {
        Self {
            uow_factory: Arc::new(PgUnitOfWorkFactory::new(pool.clone())),
            outbox: Arc::new(PgOutboxSource::new(pool.clone())),
            config,
            pool,
        }
    }
}
