//! finance_ledger Library
//!
//! Personal ledger core: split transactions, transfer mirrors kept in step
//! on the counterparty account, and a transactional outbox that delivers
//! every state change to downstream consumers.

pub mod aggregate;
pub mod api;
pub mod domain;
pub mod handlers;
pub mod idempotency;
pub mod jobs;
pub mod mirror;
pub mod outbox;
pub mod store;

pub mod config;
pub mod db;
mod error;

pub use config::Config;
pub use db::AppContext;
pub use domain::{DomainError, Money, OperationContext, ValidationError};
pub use domain::{AccountEvent, TransactionEvent};
pub use error::{AppError, AppResult};
