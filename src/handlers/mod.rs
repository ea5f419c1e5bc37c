//! Command Handlers module
//!
//! Use cases that orchestrate aggregates, mirror synchronization and the
//! unit of work. Handlers depend only on the store traits, so the same code
//! runs against Postgres and the in-memory store.

mod account_handler;
mod commands;
mod transaction_handler;


pub use account_handler::AccountHandler;
pub use commands::*;
pub use transaction_handler::TransactionHandler;
