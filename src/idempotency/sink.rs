//! Idempotent consumption
//!
//! Wraps a sink so that a row redelivered after a crash (delivered, but not
//! yet marked processed in the outbox) is acknowledged without reaching the
//! consumer a second time.

use async_trait::async_trait;
use std::sync::Arc;

use crate::outbox::{DeliveryError, EventSink, OutboxEvent};

use super::{IdempotencyError, ProcessedEventStore};

impl From<IdempotencyError> for DeliveryError {
    fn from(err: IdempotencyError) -> Self {
        DeliveryError::Transport(err.to_string())
    }
}

/// Deduplicates deliveries per `(consumer, event_id)`
pub struct IdempotentSink<S> {
    inner: S,
    store: Arc<dyn ProcessedEventStore>,
}

impl<S: EventSink> IdempotentSink<S> {
    pub fn new(inner: S, store: Arc<dyn ProcessedEventStore>) -> Self {
        Self { inner, store }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: EventSink> EventSink for IdempotentSink<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn deliver(&self, event: &OutboxEvent) -> Result<(), DeliveryError> {
        let consumer = self.inner.name();

        if self.store.is_processed(consumer, event.id).await? {
            tracing::debug!(
                outbox_id = event.id,
                consumer = consumer,
                "Event already consumed, acknowledging"
            );
            return Ok(());
        }

        self.inner.deliver(event).await?;
        self.store.mark_processed(consumer, event.id).await?;
        Ok(())
    }
}
