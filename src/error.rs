//! Error handling module
//!
//! Use-case level error type and HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::domain::DomainError;
use crate::outbox::OutboxError;
use crate::store::StoreError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error(transparent)]
    Domain(#[from] DomainError),

    // Store errors (409 on conflicts, 5xx otherwise)
    #[error(transparent)]
    Store(StoreError),

    // Server errors (5xx)
    #[error(transparent)]
    Outbox(#[from] OutboxError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl AppError {
    /// Conflicts caused by a concurrent writer; recomputing from fresh state may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Store(e) if e.is_retryable())
    }

    /// Check if this is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(self, AppError::Domain(e) if e.is_client_error())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => {
                AppError::Domain(DomainError::not_found(entity, id))
            }
            other => AppError::Store(other),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Store(StoreError::Serialization(err))
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, details) = match &self {
            AppError::Domain(domain_err) => match domain_err {
                DomainError::Validation(e) => {
                    (StatusCode::BAD_REQUEST, "validation_error", Some(e.to_string()))
                }
                DomainError::BusinessRuleViolation(msg) => (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "business_rule_violation",
                    Some(msg.clone()),
                ),
                DomainError::EntityNotFound { entity, id } => (
                    StatusCode::NOT_FOUND,
                    "not_found",
                    Some(format!("{} {}", entity, id)),
                ),
                DomainError::VersionConflict {
                    expected, found, ..
                } => (
                    StatusCode::CONFLICT,
                    "version_conflict",
                    Some(format!("expected {}, found {}", expected, found)),
                ),
            },

            // 409 Conflict
            AppError::Store(StoreError::ConcurrencyConflict { aggregate_id }) => (
                StatusCode::CONFLICT,
                "concurrency_conflict",
                Some(aggregate_id.to_string()),
            ),
            AppError::Store(StoreError::NotFound { entity, id }) => (
                StatusCode::NOT_FOUND,
                "not_found",
                Some(format!("{} {}", entity, id)),
            ),

            // 500 Internal Server Error
            AppError::Store(e) => {
                tracing::error!("Store error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "store_error", None)
            }
            AppError::Outbox(e) => {
                tracing::error!("Outbox error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "outbox_error", None)
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
            AppError::Config(e) => {
                tracing::error!("Config error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "config_error", None)
            }
        };

        let body = ErrorResponse {
            error: self.to_string(),
            error_code: error_code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}
