//! Split lines
//!
//! A split line allocates part of a transaction's amount to a category, to a
//! transfer counterparty account, or leaves it uncategorized. Split lines are
//! values: a changed split is a new `SplitLine` replacing the old one.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::ValidationError;
use super::money::Money;

/// What a split allocates its amount to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitTarget {
    Uncategorized,
    Category(Uuid),
    Transfer(Uuid),
}

/// Immutable line item of a transaction.
///
/// # Invariants
/// - Never both `category_id` and `transfer_account_id`
/// - A transfer split is strictly negative (the outflow side)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SplitLine {
    id: Uuid,
    amount: Money,
    #[serde(skip_serializing_if = "Option::is_none")]
    category_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    transfer_account_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    memo: Option<String>,
}

impl SplitLine {
    /// Build a validated split line.
    pub fn new(
        id: Uuid,
        amount: Money,
        category_id: Option<Uuid>,
        transfer_account_id: Option<Uuid>,
        memo: Option<String>,
    ) -> Result<Self, ValidationError> {
        if category_id.is_some() && transfer_account_id.is_some() {
            return Err(ValidationError::CategoryAndTransfer { split_id: id });
        }

        if transfer_account_id.is_some() && !amount.is_negative() {
            return Err(ValidationError::TransferNotNegative {
                split_id: id,
                amount: amount.amount(),
            });
        }

        Ok(Self {
            id,
            amount,
            category_id,
            transfer_account_id,
            memo,
        })
    }

    /// Uncategorized split with a fresh id
    pub fn uncategorized(amount: Money) -> Self {
        Self {
            id: Uuid::new_v4(),
            amount,
            category_id: None,
            transfer_account_id: None,
            memo: None,
        }
    }

    /// Categorized split with a fresh id
    pub fn categorized(amount: Money, category_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            amount,
            category_id: Some(category_id),
            transfer_account_id: None,
            memo: None,
        }
    }

    /// Transfer split with a fresh id
    pub fn transfer(amount: Money, transfer_account_id: Uuid) -> Result<Self, ValidationError> {
        Self::new(Uuid::new_v4(), amount, None, Some(transfer_account_id), None)
    }

    /// Same split identity with a different memo
    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }

    /// Same split identity carrying a different amount, re-validated.
    pub fn with_amount(&self, amount: Money) -> Result<Self, ValidationError> {
        Self::new(
            self.id,
            amount,
            self.category_id,
            self.transfer_account_id,
            self.memo.clone(),
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn category_id(&self) -> Option<Uuid> {
        self.category_id
    }

    pub fn transfer_account_id(&self) -> Option<Uuid> {
        self.transfer_account_id
    }

    pub fn memo(&self) -> Option<&str> {
        self.memo.as_deref()
    }

    pub fn is_transfer(&self) -> bool {
        self.transfer_account_id.is_some()
    }

    pub fn target(&self) -> SplitTarget {
        match (self.category_id, self.transfer_account_id) {
            (_, Some(account_id)) => SplitTarget::Transfer(account_id),
            (Some(category_id), None) => SplitTarget::Category(category_id),
            (None, None) => SplitTarget::Uncategorized,
        }
    }
}

/// Caller-provided split data for create / replace operations.
///
/// `id` refers to an existing split when replacing splits; a missing id means
/// a new split and gets a fresh identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitInput {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub amount: Money,
    #[serde(default)]
    pub category_id: Option<Uuid>,
    #[serde(default)]
    pub transfer_account_id: Option<Uuid>,
    #[serde(default)]
    pub memo: Option<String>,
}

impl SplitInput {
    pub fn new(amount: Money) -> Self {
        Self {
            id: None,
            amount,
            category_id: None,
            transfer_account_id: None,
            memo: None,
        }
    }

    pub fn category(mut self, category_id: Uuid) -> Self {
        self.category_id = Some(category_id);
        self
    }

    pub fn transfer_to(mut self, account_id: Uuid) -> Self {
        self.transfer_account_id = Some(account_id);
        self
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }

    /// Validate into a split line, assigning a fresh id if none was given.
    pub fn into_split(self) -> Result<SplitLine, ValidationError> {
        SplitLine::new(
            self.id.unwrap_or_else(Uuid::new_v4),
            self.amount,
            self.category_id,
            self.transfer_account_id,
            self.memo,
        )
    }
}

impl From<&SplitLine> for SplitInput {
    fn from(split: &SplitLine) -> Self {
        Self {
            id: Some(split.id),
            amount: split.amount,
            category_id: split.category_id,
            transfer_account_id: split.transfer_account_id,
            memo: split.memo.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Currency;
    use rust_decimal_macros::dec;

    fn eur(amount: rust_decimal::Decimal) -> Money {
        Money::new(amount, Currency::EUR).unwrap()
    }

    #[test]
    fn test_category_and_transfer_rejected() {
        let result = SplitLine::new(
            Uuid::new_v4(),
            eur(dec!(-10)),
            Some(Uuid::new_v4()),
            Some(Uuid::new_v4()),
            None,
        );
        assert!(matches!(result, Err(ValidationError::CategoryAndTransfer { .. })));
    }

    #[test]
    fn test_transfer_must_be_negative() {
        let account = Uuid::new_v4();
        assert!(matches!(
            SplitLine::transfer(eur(dec!(70)), account),
            Err(ValidationError::TransferNotNegative { .. })
        ));
        assert!(matches!(
            SplitLine::transfer(eur(dec!(0)), account),
            Err(ValidationError::TransferNotNegative { .. })
        ));
        assert!(SplitLine::transfer(eur(dec!(-70)), account).is_ok());
    }

    #[test]
    fn test_positive_category_split_allowed() {
        let split = SplitLine::categorized(eur(dec!(25)), Uuid::new_v4());
        assert!(matches!(split.target(), SplitTarget::Category(_)));
    }

    #[test]
    fn test_with_amount_keeps_identity() {
        let account = Uuid::new_v4();
        let split = SplitLine::transfer(eur(dec!(-70)), account).unwrap();
        let changed = split.with_amount(eur(dec!(-80))).unwrap();

        assert_eq!(changed.id(), split.id());
        assert_eq!(changed.amount().amount(), dec!(-80));
        assert_eq!(changed.target(), SplitTarget::Transfer(account));

        // Sign rule still applies to the new value
        assert!(split.with_amount(eur(dec!(80))).is_err());
    }

    #[test]
    fn test_split_input_into_split() {
        let category = Uuid::new_v4();
        let input = SplitInput::new(eur(dec!(-30))).category(category).with_memo("groceries");
        let split = input.into_split().unwrap();

        assert_eq!(split.category_id(), Some(category));
        assert_eq!(split.memo(), Some("groceries"));
        assert!(!split.is_transfer());
    }

    #[test]
    fn test_split_input_keeps_given_id() {
        let id = Uuid::new_v4();
        let split = SplitInput::new(eur(dec!(-5))).with_id(id).into_split().unwrap();
        assert_eq!(split.id(), id);
    }
}
