//! Domain Events
//!
//! Events are immutable facts produced by aggregate operations. They are
//! returned from the operation that produced them, staged by the unit of work
//! and serialized into outbox rows; they are never persisted on their own.
//!
//! Payloads are internally tagged JSON. Evolution is additive only: readers
//! ignore unknown fields and new fields must carry a serde default.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::money::Currency;

/// Common accessors every event exposes to the outbox
pub trait DomainEvent: Serialize {
    /// Event name stored in the outbox `event_type` column
    fn event_type(&self) -> &'static str;

    /// Aggregate name stored in the outbox `aggregate_type` column
    fn aggregate_type(&self) -> &'static str;

    fn aggregate_id(&self) -> Uuid;

    fn occurred_at(&self) -> DateTime<Utc>;
}

/// One changed field in an update event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub old: Option<String>,
    pub new: Option<String>,
}

impl FieldChange {
    pub fn new(field: &str, old: Option<String>, new: Option<String>) -> Self {
        Self {
            field: field.to_string(),
            old,
            new,
        }
    }
}

/// Transaction-related events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TransactionEvent {
    /// Transaction was created (user-entered, imported or mirror)
    TransactionCreated {
        transaction_id: Uuid,
        account_id: Uuid,
        user_id: Uuid,
        amount: Decimal,
        currency: Currency,
        effective_date: NaiveDate,
        split_count: usize,
        #[serde(default)]
        is_mirror: bool,
        #[serde(default)]
        source_transaction_id: Option<Uuid>,
        #[serde(default)]
        source_split_id: Option<Uuid>,
        occurred_at: DateTime<Utc>,
    },

    /// Amount and splits were replaced together
    TransactionSplitsReplaced {
        transaction_id: Uuid,
        account_id: Uuid,
        old_amount: Decimal,
        new_amount: Decimal,
        currency: Currency,
        split_count: usize,
        occurred_at: DateTime<Utc>,
    },

    /// Metadata fields changed
    TransactionUpdated {
        transaction_id: Uuid,
        account_id: Uuid,
        changes: Vec<FieldChange>,
        occurred_at: DateTime<Utc>,
    },

    /// Transaction moved from pending to cleared
    TransactionCleared {
        transaction_id: Uuid,
        account_id: Uuid,
        posted_date: NaiveDate,
        occurred_at: DateTime<Utc>,
    },

    /// Transaction was deleted
    TransactionDeleted {
        transaction_id: Uuid,
        account_id: Uuid,
        #[serde(default)]
        is_mirror: bool,
        occurred_at: DateTime<Utc>,
    },
}

impl TransactionEvent {
    pub fn transaction_id(&self) -> Uuid {
        match self {
            TransactionEvent::TransactionCreated { transaction_id, .. }
            | TransactionEvent::TransactionSplitsReplaced { transaction_id, .. }
            | TransactionEvent::TransactionUpdated { transaction_id, .. }
            | TransactionEvent::TransactionCleared { transaction_id, .. }
            | TransactionEvent::TransactionDeleted { transaction_id, .. } => *transaction_id,
        }
    }
}

impl DomainEvent for TransactionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TransactionEvent::TransactionCreated { .. } => "TransactionCreated",
            TransactionEvent::TransactionSplitsReplaced { .. } => "TransactionSplitsReplaced",
            TransactionEvent::TransactionUpdated { .. } => "TransactionUpdated",
            TransactionEvent::TransactionCleared { .. } => "TransactionCleared",
            TransactionEvent::TransactionDeleted { .. } => "TransactionDeleted",
        }
    }

    fn aggregate_type(&self) -> &'static str {
        "Transaction"
    }

    fn aggregate_id(&self) -> Uuid {
        self.transaction_id()
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            TransactionEvent::TransactionCreated { occurred_at, .. }
            | TransactionEvent::TransactionSplitsReplaced { occurred_at, .. }
            | TransactionEvent::TransactionUpdated { occurred_at, .. }
            | TransactionEvent::TransactionCleared { occurred_at, .. }
            | TransactionEvent::TransactionDeleted { occurred_at, .. } => *occurred_at,
        }
    }
}

/// Account-related events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AccountEvent {
    /// Account was created
    AccountCreated {
        account_id: Uuid,
        user_id: Uuid,
        account_name: String,
        account_type: String,
        currency: Currency,
        occurred_at: DateTime<Utc>,
    },

    /// Account was closed; it no longer accepts new transfers
    AccountClosed {
        account_id: Uuid,
        occurred_at: DateTime<Utc>,
    },
}

impl AccountEvent {
    pub fn account_id(&self) -> Uuid {
        match self {
            AccountEvent::AccountCreated { account_id, .. }
            | AccountEvent::AccountClosed { account_id, .. } => *account_id,
        }
    }
}

impl DomainEvent for AccountEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AccountEvent::AccountCreated { .. } => "AccountCreated",
            AccountEvent::AccountClosed { .. } => "AccountClosed",
        }
    }

    fn aggregate_type(&self) -> &'static str {
        "Account"
    }

    fn aggregate_id(&self) -> Uuid {
        self.account_id()
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            AccountEvent::AccountCreated { occurred_at, .. }
            | AccountEvent::AccountClosed { occurred_at, .. } => *occurred_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_event_serialization() {
        let event = TransactionEvent::TransactionCleared {
            transaction_id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            posted_date: NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
            occurred_at: Utc::now(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"TransactionCleared""#));

        let deserialized: TransactionEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, deserialized);
        assert_eq!(deserialized.event_type(), "TransactionCleared");
        assert_eq!(deserialized.aggregate_type(), "Transaction");
    }

    #[test]
    fn test_payload_tolerates_additive_changes() {
        // Written by a newer producer with a field this reader doesn't know,
        // and without a field added after the first release.
        let payload = serde_json::json!({
            "type": "TransactionDeleted",
            "transaction_id": Uuid::nil(),
            "account_id": Uuid::nil(),
            "occurred_at": "2026-01-01T00:00:00Z",
            "archived_by": "retention-job"
        });

        let event: TransactionEvent = serde_json::from_value(payload).unwrap();
        match event {
            TransactionEvent::TransactionDeleted { is_mirror, .. } => assert!(!is_mirror),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_account_event_accessors() {
        let account_id = Uuid::new_v4();
        let event = AccountEvent::AccountCreated {
            account_id,
            user_id: Uuid::new_v4(),
            account_name: "Checking".to_string(),
            account_type: "checking".to_string(),
            currency: Currency::EUR,
            occurred_at: Utc::now(),
        };

        assert_eq!(event.aggregate_id(), account_id);
        assert_eq!(event.event_type(), "AccountCreated");
        assert_eq!(event.aggregate_type(), "Account");
    }
}
