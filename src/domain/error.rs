//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use super::money::{Currency, MoneyError};

/// Structural invariant violations. Each variant names the rule that failed.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("A transaction needs at least one split")]
    EmptySplits,

    #[error("Splits sum to {actual} but the transaction amount is {expected}")]
    SplitsDoNotSum { expected: Decimal, actual: Decimal },

    #[error("Split {split_id} sets both a category and a transfer account")]
    CategoryAndTransfer { split_id: Uuid },

    #[error("Transfer split {split_id} must be negative (got {amount})")]
    TransferNotNegative { split_id: Uuid, amount: Decimal },

    #[error("Split {split_id} transfers to the transaction's own account")]
    SelfTransfer { split_id: Uuid },

    #[error("Currency mismatch: expected {expected}, found {found}")]
    CurrencyMismatch { expected: Currency, found: Currency },

    #[error("Duplicate split id {0}")]
    DuplicateSplitId(Uuid),

    #[error("Invalid money value: {0}")]
    InvalidMoney(String),

    #[error("Invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl From<MoneyError> for ValidationError {
    fn from(err: MoneyError) -> Self {
        match err {
            MoneyError::CurrencyMismatch { left, right } => ValidationError::CurrencyMismatch {
                expected: left,
                found: right,
            },
            other => ValidationError::InvalidMoney(other.to_string()),
        }
    }
}

/// Domain-specific errors
///
/// These errors represent invariant failures and business rule violations.
/// They are independent of the web/infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// Input violates a structural invariant
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Structurally valid but semantically disallowed
    #[error("Business rule violation: {0}")]
    BusinessRuleViolation(String),

    /// Referenced entity does not exist
    #[error("{entity} not found: {id}")]
    EntityNotFound { entity: &'static str, id: Uuid },

    /// Aggregate version conflict (optimistic locking)
    #[error("Version conflict on {aggregate_id}: expected {expected}, found {found}")]
    VersionConflict {
        aggregate_id: Uuid,
        expected: i64,
        found: i64,
    },
}

impl DomainError {
    pub fn business_rule(message: impl Into<String>) -> Self {
        Self::BusinessRuleViolation(message.into())
    }

    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        Self::EntityNotFound { entity, id }
    }

    /// Check if this is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::BusinessRuleViolation(_) | Self::EntityNotFound { .. }
        )
    }

    /// Check if this is a conflict error (retry may help)
    pub fn is_conflict_error(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

impl From<MoneyError> for DomainError {
    fn from(err: MoneyError) -> Self {
        DomainError::Validation(err.into())
    }
}
