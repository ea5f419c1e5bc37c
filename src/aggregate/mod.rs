//! Aggregate module
//!
//! Aggregate roots and the consistency boundaries they enforce.

pub mod account;
pub mod transaction;

pub use account::{Account, AccountType};
pub use transaction::{
    FieldUpdate, NewTransaction, Transaction, TransactionRecord, TransactionSource,
    TransactionStatus, TransactionUpdate,
};

/// Aggregate trait that all aggregates implement
pub trait Aggregate {
    /// Get the aggregate type name (for storage and outbox rows)
    fn aggregate_type() -> &'static str;

    /// Get the aggregate ID
    fn id(&self) -> uuid::Uuid;

    /// Get the persisted version (optimistic concurrency token)
    fn version(&self) -> i64;
}
