//! Command definitions
//!
//! Commands represent intentions to change the ledger.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::{
    Account, Aggregate, AccountType, Transaction, TransactionSource, TransactionStatus,
    TransactionUpdate,
};
use crate::domain::{Currency, Money, SplitInput};

// =========================================================================
// Account commands
// =========================================================================

/// Command to open a new account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccountCommand {
    pub name: String,
    pub account_type: AccountType,
    pub currency: Currency,
}

impl CreateAccountCommand {
    pub fn new(name: impl Into<String>, account_type: AccountType, currency: Currency) -> Self {
        Self {
            name: name.into(),
            account_type,
            currency,
        }
    }
}

// =========================================================================
// Transaction commands
// =========================================================================

/// Command to record a transaction on one of the caller's accounts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTransactionCommand {
    pub account_id: Uuid,
    pub effective_date: NaiveDate,
    #[serde(default)]
    pub posted_date: Option<NaiveDate>,
    pub amount: Money,
    pub splits: Vec<SplitInput>,
    #[serde(default)]
    pub payee_id: Option<Uuid>,
    #[serde(default)]
    pub memo: Option<String>,
    #[serde(default)]
    pub check_number: Option<String>,
    #[serde(default)]
    pub status: Option<TransactionStatus>,
    #[serde(default)]
    pub source: Option<TransactionSource>,
}

impl CreateTransactionCommand {
    pub fn new(
        account_id: Uuid,
        effective_date: NaiveDate,
        amount: Money,
        splits: Vec<SplitInput>,
    ) -> Self {
        Self {
            account_id,
            effective_date,
            posted_date: None,
            amount,
            splits,
            payee_id: None,
            memo: None,
            check_number: None,
            status: None,
            source: None,
        }
    }

    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }

    pub fn with_payee(mut self, payee_id: Uuid) -> Self {
        self.payee_id = Some(payee_id);
        self
    }

    pub fn cleared_on(mut self, posted_date: NaiveDate) -> Self {
        self.status = Some(TransactionStatus::Cleared);
        self.posted_date = Some(posted_date);
        self
    }

    pub fn imported(mut self) -> Self {
        self.source = Some(TransactionSource::Import);
        self
    }
}

/// Command to replace the amount and split lines of a transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaceSplitsCommand {
    pub transaction_id: Uuid,
    pub amount: Money,
    pub splits: Vec<SplitInput>,
    /// Version the caller last saw; a newer stored version is a conflict
    #[serde(default)]
    pub expected_version: Option<i64>,
}

impl ReplaceSplitsCommand {
    pub fn new(transaction_id: Uuid, amount: Money, splits: Vec<SplitInput>) -> Self {
        Self {
            transaction_id,
            amount,
            splits,
            expected_version: None,
        }
    }

    pub fn expecting_version(mut self, version: i64) -> Self {
        self.expected_version = Some(version);
        self
    }
}

/// Command to change dates, memo, payee or check number
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateTransactionCommand {
    pub transaction_id: Uuid,
    #[serde(flatten)]
    pub update: TransactionUpdate,
}

impl UpdateTransactionCommand {
    pub fn new(transaction_id: Uuid, update: TransactionUpdate) -> Self {
        Self {
            transaction_id,
            update,
        }
    }
}

/// Command to clear a pending transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkClearedCommand {
    pub transaction_id: Uuid,
    #[serde(default)]
    pub posted_date: Option<NaiveDate>,
}

impl MarkClearedCommand {
    pub fn new(transaction_id: Uuid) -> Self {
        Self {
            transaction_id,
            posted_date: None,
        }
    }

    pub fn posted_on(mut self, posted_date: NaiveDate) -> Self {
        self.posted_date = Some(posted_date);
        self
    }
}

// =========================================================================
// Results
// =========================================================================

/// Result of a successful account command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountResult {
    pub account_id: Uuid,
    pub name: String,
    pub currency: Currency,
    pub is_closed: bool,
    pub version: i64,
}

impl From<&Account> for AccountResult {
    fn from(account: &Account) -> Self {
        Self {
            account_id: account.id(),
            name: account.name().to_string(),
            currency: account.currency(),
            is_closed: account.is_closed(),
            version: account.version(),
        }
    }
}

/// Result of a successful transaction command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionResult {
    pub transaction_id: Uuid,
    pub account_id: Uuid,
    pub amount: Decimal,
    pub currency: Currency,
    pub status: TransactionStatus,
    pub version: i64,
    /// Outbox rows written by the command, mirror events included
    pub events_recorded: usize,
}

impl TransactionResult {
    pub(crate) fn new(transaction: &Transaction, events_recorded: usize) -> Self {
        Self {
            transaction_id: transaction.id(),
            account_id: transaction.account_id(),
            amount: transaction.amount().amount(),
            currency: transaction.amount().currency(),
            status: transaction.status(),
            version: transaction.version(),
            events_recorded,
        }
    }
}

/// Result of a successful delete
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResult {
    pub transaction_id: Uuid,
    pub mirrors_deleted: usize,
}
