//! Outbox Errors

use std::time::Duration;

/// Errors while writing or claiming outbox rows
#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A single delivery attempt failed. The row stays unprocessed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeliveryError {
    /// The sink refused the event
    #[error("Delivery rejected: {0}")]
    Rejected(String),

    /// The sink did not answer in time
    #[error("Delivery timed out after {0:?}")]
    Timeout(Duration),

    /// The sink could not be reached
    #[error("Transport error: {0}")]
    Transport(String),

    /// The stored payload could not be parsed
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

impl From<sqlx::Error> for DeliveryError {
    fn from(err: sqlx::Error) -> Self {
        DeliveryError::Transport(err.to_string())
    }
}
