//! Outbox rows
//!
//! `NewOutboxEvent` is what the unit of work stages; `OutboxEvent` is a
//! persisted row as the dispatcher sees it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::{AccountEvent, DomainEvent, TransactionEvent};

use super::DeliveryError;

/// Pending outbox row, not yet written
#[derive(Debug, Clone, PartialEq)]
pub struct NewOutboxEvent {
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl NewOutboxEvent {
    /// Serialize a domain event into an outbox row
    pub fn from_event<E: DomainEvent>(event: &E) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event_type: event.event_type().to_string(),
            aggregate_type: event.aggregate_type().to_string(),
            aggregate_id: event.aggregate_id().to_string(),
            payload: serde_json::to_value(event)?,
            created_at: Utc::now(),
        })
    }

    /// Serialize a batch of events of one kind
    pub fn from_events<'a, E, I>(events: I) -> Result<Vec<Self>, serde_json::Error>
    where
        E: DomainEvent + 'a,
        I: IntoIterator<Item = &'a E>,
    {
        events.into_iter().map(Self::from_event).collect()
    }
}

/// Persisted outbox row
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct OutboxEvent {
    pub id: i64,
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    /// Parse the payload back into a typed event.
    ///
    /// Unknown fields are ignored; an unknown aggregate or event type is an
    /// `InvalidPayload` delivery failure.
    pub fn decode(&self) -> Result<LedgerEvent, DeliveryError> {
        let invalid = |e: serde_json::Error| {
            DeliveryError::InvalidPayload(format!("outbox row {}: {}", self.id, e))
        };

        match self.aggregate_type.as_str() {
            "Transaction" => serde_json::from_value(self.payload.clone())
                .map(LedgerEvent::Transaction)
                .map_err(invalid),
            "Account" => serde_json::from_value(self.payload.clone())
                .map(LedgerEvent::Account)
                .map_err(invalid),
            other => Err(DeliveryError::InvalidPayload(format!(
                "outbox row {}: unknown aggregate type {:?}",
                self.id, other
            ))),
        }
    }

    /// Aggregate id as a UUID, when it is one
    pub fn aggregate_uuid(&self) -> Option<Uuid> {
        self.aggregate_id.parse().ok()
    }

    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }
}

/// Typed view of an outbox payload
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerEvent {
    Transaction(TransactionEvent),
    Account(AccountEvent),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Currency;

    fn row(aggregate_type: &str, payload: serde_json::Value) -> OutboxEvent {
        OutboxEvent {
            id: 7,
            event_type: "AccountClosed".to_string(),
            aggregate_type: aggregate_type.to_string(),
            aggregate_id: Uuid::nil().to_string(),
            payload,
            created_at: Utc::now(),
            processed_at: None,
        }
    }

    #[test]
    fn test_from_event_fills_columns() {
        let account_id = Uuid::new_v4();
        let event = AccountEvent::AccountCreated {
            account_id,
            user_id: Uuid::new_v4(),
            account_name: "Savings".to_string(),
            account_type: "savings".to_string(),
            currency: Currency::EUR,
            occurred_at: Utc::now(),
        };

        let new = NewOutboxEvent::from_event(&event).unwrap();
        assert_eq!(new.event_type, "AccountCreated");
        assert_eq!(new.aggregate_type, "Account");
        assert_eq!(new.aggregate_id, account_id.to_string());
        assert_eq!(new.payload["type"], "AccountCreated");
        assert_eq!(new.payload["currency"], "EUR");
    }

    #[test]
    fn test_decode_known_payload() {
        let event = AccountEvent::AccountClosed {
            account_id: Uuid::nil(),
            occurred_at: Utc::now(),
        };
        let stored = row("Account", serde_json::to_value(&event).unwrap());

        assert_eq!(stored.decode().unwrap(), LedgerEvent::Account(event));
        assert_eq!(stored.aggregate_uuid(), Some(Uuid::nil()));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let bad = row("Account", serde_json::json!({"type": "AccountExploded"}));
        assert!(matches!(bad.decode(), Err(DeliveryError::InvalidPayload(_))));

        let other = row("Payee", serde_json::json!({}));
        assert!(matches!(other.decode(), Err(DeliveryError::InvalidPayload(_))));
    }
}
