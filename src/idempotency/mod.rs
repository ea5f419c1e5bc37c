//! Idempotency module
//!
//! Consumer-side deduplication for at-least-once outbox delivery.

mod repository;
mod sink;

pub use repository::{
    IdempotencyError, InMemoryProcessedEventStore, PgProcessedEventStore, ProcessedEventStore,
};
pub use sink::IdempotentSink;
