//! Delivery sinks
//!
//! A sink hands one outbox row to a downstream consumer. Delivery is
//! at-least-once: a sink may see the same row again after a crash between
//! delivery and the processed mark, so consumers must be idempotent
//! (see `crate::idempotency::IdempotentSink`).

use async_trait::async_trait;
use serde::Serialize;
use sqlx::PgPool;

use super::{DeliveryError, LedgerEvent, OutboxEvent};

/// Largest payload `pg_notify` accepts
pub const PG_NOTIFY_MAX_PAYLOAD: usize = 8000;

/// Downstream delivery port used by the dispatcher
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Consumer name, used as the idempotency scope
    fn name(&self) -> &str;

    async fn deliver(&self, event: &OutboxEvent) -> Result<(), DeliveryError>;
}

/// Writes each event to the log
#[derive(Debug, Clone, Default)]
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, event: &OutboxEvent) -> Result<(), DeliveryError> {
        match event.decode()? {
            LedgerEvent::Transaction(inner) => tracing::info!(
                outbox_id = event.id,
                event_type = %event.event_type,
                transaction_id = %inner.transaction_id(),
                "Ledger event"
            ),
            LedgerEvent::Account(inner) => tracing::info!(
                outbox_id = event.id,
                event_type = %event.event_type,
                account_id = %inner.account_id(),
                "Ledger event"
            ),
        }
        Ok(())
    }
}

/// Envelope published on the notification channel
#[derive(Debug, Serialize)]
struct NotifyEnvelope<'a> {
    id: i64,
    event_type: &'a str,
    aggregate_type: &'a str,
    aggregate_id: &'a str,
    payload: &'a serde_json::Value,
}

/// Publishes events with `pg_notify` for LISTEN-ing consumers
#[derive(Debug, Clone)]
pub struct PgNotifySink {
    pool: PgPool,
    channel: String,
}

impl PgNotifySink {
    pub fn new(pool: PgPool, channel: impl Into<String>) -> Self {
        Self {
            pool,
            channel: channel.into(),
        }
    }

    fn envelope(event: &OutboxEvent) -> Result<String, DeliveryError> {
        let body = serde_json::to_string(&NotifyEnvelope {
            id: event.id,
            event_type: &event.event_type,
            aggregate_type: &event.aggregate_type,
            aggregate_id: &event.aggregate_id,
            payload: &event.payload,
        })
        .map_err(|e| DeliveryError::InvalidPayload(e.to_string()))?;

        if body.len() > PG_NOTIFY_MAX_PAYLOAD {
            return Err(DeliveryError::Rejected(format!(
                "notification for outbox row {} is {} bytes, limit is {}",
                event.id,
                body.len(),
                PG_NOTIFY_MAX_PAYLOAD
            )));
        }

        Ok(body)
    }
}

#[async_trait]
impl EventSink for PgNotifySink {
    fn name(&self) -> &str {
        &self.channel
    }

    async fn deliver(&self, event: &OutboxEvent) -> Result<(), DeliveryError> {
        let body = Self::envelope(event)?;

        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(&self.channel)
            .bind(body)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
