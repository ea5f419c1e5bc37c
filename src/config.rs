//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::outbox::DispatcherConfig;

/// Which sink the dispatcher delivers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    Log,
    PgNotify,
}

impl FromStr for SinkKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "log" => Ok(SinkKind::Log),
            "pg_notify" => Ok(SinkKind::PgNotify),
            _ => Err(ConfigError::InvalidValue("OUTBOX_SINK")),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Health endpoint host
    pub host: String,

    /// Health endpoint port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    pub outbox_poll_interval: Duration,
    pub outbox_batch_size: i64,
    pub outbox_delivery_timeout: Duration,
    pub outbox_sink: SinkKind,
    /// Channel used by the `pg_notify` sink
    pub outbox_notify_channel: String,
    /// Backlog age that triggers a lag warning
    pub outbox_lag_warn: Duration,
    /// Processed rows older than this are moved to the archive table
    pub outbox_archive_after_days: i32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| ConfigError::MissingEnv("DATABASE_URL"))?;

        let outbox_batch_size: i64 = parse_env("OUTBOX_BATCH_SIZE", 100)?;
        if outbox_batch_size <= 0 {
            return Err(ConfigError::InvalidValue("OUTBOX_BATCH_SIZE"));
        }

        Ok(Self {
            database_url,
            database_max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10)?,
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_env("PORT", 3000)?,
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            outbox_poll_interval: parse_millis("OUTBOX_POLL_INTERVAL_MS", 1000)?,
            outbox_batch_size,
            outbox_delivery_timeout: parse_millis("OUTBOX_DELIVERY_TIMEOUT_MS", 5000)?,
            outbox_sink: parse_env("OUTBOX_SINK", SinkKind::Log)?,
            outbox_notify_channel: env::var("OUTBOX_NOTIFY_CHANNEL")
                .unwrap_or_else(|_| "ledger_events".to_string()),
            outbox_lag_warn: Duration::from_secs(parse_env("OUTBOX_LAG_WARN_SECS", 300)?),
            outbox_archive_after_days: parse_env("OUTBOX_ARCHIVE_AFTER_DAYS", 30)?,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Dispatcher settings derived from this configuration
    pub fn dispatcher(&self) -> DispatcherConfig {
        DispatcherConfig {
            batch_size: self.outbox_batch_size,
            poll_interval: self.outbox_poll_interval,
            delivery_timeout: self.outbox_delivery_timeout,
            lag_warn_after: self.outbox_lag_warn,
            ..DispatcherConfig::default()
        }
    }
}

/// Read an optional variable, falling back to `default` when unset
fn parse_env<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue(name)),
        Err(_) => Ok(default),
    }
}

/// Non-zero duration in milliseconds; a zero tick would panic the dispatcher loop
fn parse_millis(name: &'static str, default: u64) -> Result<Duration, ConfigError> {
    match parse_env(name, default)? {
        0 => Err(ConfigError::InvalidValue(name)),
        millis => Ok(Duration::from_millis(millis)),
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
