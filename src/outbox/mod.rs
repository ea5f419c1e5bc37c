//! Transactional outbox
//!
//! Events are written as rows in the same database transaction as the
//! business change that produced them, then drained asynchronously by the
//! dispatcher. Delivery is at-least-once.

mod dispatcher;
mod error;
mod event;
mod sink;
mod source;

pub use dispatcher::{report_lag, DispatchReport, DispatcherConfig, OutboxDispatcher};
pub use error::{DeliveryError, OutboxError};
pub use event::{LedgerEvent, NewOutboxEvent, OutboxEvent};
pub use sink::{EventSink, LogSink, PgNotifySink, PG_NOTIFY_MAX_PAYLOAD};
pub use source::{record, ClaimedBatch, OutboxSource, OutboxStats, PgOutboxSource};
