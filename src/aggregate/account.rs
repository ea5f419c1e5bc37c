//! Account Aggregate
//!
//! Accounts own transactions and act as counterparties of transfer splits.
//! Commands return the event describing the change; the caller stages it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::{AccountEvent, Currency, DomainError, ValidationError};

use super::Aggregate;

/// Kind of account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Checking,
    Savings,
    CreditCard,
    Cash,
    Investment,
    Loan,
    Other,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Checking => "checking",
            AccountType::Savings => "savings",
            AccountType::CreditCard => "credit_card",
            AccountType::Cash => "cash",
            AccountType::Investment => "investment",
            AccountType::Loan => "loan",
            AccountType::Other => "other",
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "checking" => Ok(AccountType::Checking),
            "savings" => Ok(AccountType::Savings),
            "credit_card" => Ok(AccountType::CreditCard),
            "cash" => Ok(AccountType::Cash),
            "investment" => Ok(AccountType::Investment),
            "loan" => Ok(AccountType::Loan),
            "other" => Ok(AccountType::Other),
            other => Err(ValidationError::InvalidField {
                field: "account_type",
                reason: format!("unknown account type {:?}", other),
            }),
        }
    }
}

/// Account Aggregate
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    id: Uuid,
    user_id: Uuid,
    name: String,
    account_type: AccountType,
    currency: Currency,
    is_closed: bool,
    version: i64,
    created_at: DateTime<Utc>,
}

impl Account {
    /// Create a new account and generate the creation event
    pub fn create(
        user_id: Uuid,
        name: String,
        account_type: AccountType,
        currency: Currency,
    ) -> Result<(Self, AccountEvent), DomainError> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(ValidationError::InvalidField {
                field: "name",
                reason: "account name must not be empty".to_string(),
            }
            .into());
        }

        let now = Utc::now();
        let account = Self {
            id: Uuid::new_v4(),
            user_id,
            name,
            account_type,
            currency,
            is_closed: false,
            version: 1,
            created_at: now,
        };

        let event = AccountEvent::AccountCreated {
            account_id: account.id,
            user_id,
            account_name: account.name.clone(),
            account_type: account_type.as_str().to_string(),
            currency,
            occurred_at: now,
        };

        Ok((account, event))
    }

    /// Rebuild an account from stored state
    #[allow(clippy::too_many_arguments)]
    pub fn from_db_state(
        id: Uuid,
        user_id: Uuid,
        name: String,
        account_type: AccountType,
        currency: Currency,
        is_closed: bool,
        version: i64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            name,
            account_type,
            currency,
            is_closed,
            version,
            created_at,
        }
    }

    /// Close the account. Closed accounts reject new transfer mirrors.
    pub fn close(&mut self) -> Result<AccountEvent, DomainError> {
        if self.is_closed {
            return Err(DomainError::business_rule(format!(
                "account {} is already closed",
                self.id
            )));
        }

        self.is_closed = true;
        Ok(AccountEvent::AccountClosed {
            account_id: self.id,
            occurred_at: Utc::now(),
        })
    }

    /// Check that user transactions of `currency` may be posted to this account
    pub fn ensure_accepts_posting(&self, currency: Currency) -> Result<(), DomainError> {
        if self.is_closed {
            return Err(DomainError::business_rule(format!(
                "account {} is closed",
                self.id
            )));
        }

        if self.currency != currency {
            return Err(ValidationError::CurrencyMismatch {
                expected: self.currency,
                found: currency,
            }
            .into());
        }

        Ok(())
    }

    /// Check that a transfer of `currency` may be mirrored onto this account
    pub fn ensure_accepts_transfer(&self, currency: Currency) -> Result<(), DomainError> {
        if self.is_closed {
            return Err(DomainError::business_rule(format!(
                "transfer counterparty account {} is closed",
                self.id
            )));
        }

        if self.currency != currency {
            return Err(DomainError::business_rule(format!(
                "transfer in {} cannot be mirrored onto account {} held in {}",
                currency, self.id, self.currency
            )));
        }

        Ok(())
    }

    pub(crate) fn mark_persisted(&mut self, version: i64) {
        self.version = version;
    }

    // =========================================================================
    // Getters
    // =========================================================================

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn account_type(&self) -> AccountType {
        self.account_type
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn is_closed(&self) -> bool {
        self.is_closed
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Aggregate for Account {
    fn aggregate_type() -> &'static str {
        "Account"
    }

    fn id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checking() -> Account {
        Account::create(
            Uuid::new_v4(),
            "Checking".to_string(),
            AccountType::Checking,
            Currency::EUR,
        )
        .unwrap()
        .0
    }

    #[test]
    fn test_account_create() {
        let user_id = Uuid::new_v4();
        let (account, event) = Account::create(
            user_id,
            "  Savings  ".to_string(),
            AccountType::Savings,
            Currency::EUR,
        )
        .unwrap();

        assert_eq!(account.user_id(), user_id);
        assert_eq!(account.name(), "Savings");
        assert_eq!(account.version(), 1);
        assert!(!account.is_closed());
        match event {
            AccountEvent::AccountCreated {
                account_id,
                account_name,
                account_type,
                ..
            } => {
                assert_eq!(account_id, account.id());
                assert_eq!(account_name, "Savings");
                assert_eq!(account_type, "savings");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_account_name_required() {
        let result = Account::create(
            Uuid::new_v4(),
            "   ".to_string(),
            AccountType::Cash,
            Currency::EUR,
        );
        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[test]
    fn test_account_close_once() {
        let mut account = checking();

        let event = account.close().unwrap();
        assert!(matches!(event, AccountEvent::AccountClosed { .. }));
        assert!(account.is_closed());

        assert!(matches!(
            account.close(),
            Err(DomainError::BusinessRuleViolation(_))
        ));
    }

    #[test]
    fn test_closed_account_rejects_transfers() {
        let mut account = checking();
        assert!(account.ensure_accepts_transfer(Currency::EUR).is_ok());

        account.close().unwrap();
        assert!(matches!(
            account.ensure_accepts_transfer(Currency::EUR),
            Err(DomainError::BusinessRuleViolation(_))
        ));
    }

    #[test]
    fn test_currency_mismatch_rejects_transfers() {
        let account = checking();
        assert!(matches!(
            account.ensure_accepts_transfer(Currency::USD),
            Err(DomainError::BusinessRuleViolation(_))
        ));
    }

    #[test]
    fn test_posting_requires_open_account_in_its_currency() {
        let mut account = checking();
        assert!(account.ensure_accepts_posting(Currency::EUR).is_ok());
        assert!(matches!(
            account.ensure_accepts_posting(Currency::USD),
            Err(DomainError::Validation(ValidationError::CurrencyMismatch { .. }))
        ));

        account.close().unwrap();
        assert!(matches!(
            account.ensure_accepts_posting(Currency::EUR),
            Err(DomainError::BusinessRuleViolation(_))
        ));
    }

    #[test]
    fn test_account_type_round_trip() {
        for kind in [AccountType::Checking, AccountType::CreditCard, AccountType::Other] {
            assert_eq!(kind.as_str().parse::<AccountType>().unwrap(), kind);
        }
        assert!("brokerage".parse::<AccountType>().is_err());
    }
}
