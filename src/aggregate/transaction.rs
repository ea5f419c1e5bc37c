//! Transaction Aggregate
//!
//! A transaction owns an ordered list of split lines whose amounts always sum
//! to the transaction amount. Mutating operations validate the complete new
//! state before touching `self`, so a failed call leaves the aggregate as it
//! was, and they return the event describing the change instead of storing
//! it on the aggregate.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::{
    DomainError, FieldChange, Money, SplitInput, SplitLine, TransactionEvent, ValidationError,
};

use super::Aggregate;

/// Transaction status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Cleared,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Cleared => "cleared",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "cleared" => Ok(TransactionStatus::Cleared),
            other => Err(ValidationError::InvalidField {
                field: "status",
                reason: format!("unknown status {:?}", other),
            }),
        }
    }
}

/// Where a transaction came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionSource {
    Manual,
    Import,
    Mirror,
}

impl TransactionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionSource::Manual => "manual",
            TransactionSource::Import => "import",
            TransactionSource::Mirror => "mirror",
        }
    }
}

impl fmt::Display for TransactionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionSource {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(TransactionSource::Manual),
            "import" => Ok(TransactionSource::Import),
            "mirror" => Ok(TransactionSource::Mirror),
            other => Err(ValidationError::InvalidField {
                field: "source",
                reason: format!("unknown source {:?}", other),
            }),
        }
    }
}

/// Optional field update that distinguishes "leave unchanged" from "clear".
///
/// When deserialized with `#[serde(default)]`, an absent field is
/// `Unchanged`, an explicit `null` is `Clear` and a value is `Set`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FieldUpdate<T> {
    #[default]
    Unchanged,
    Clear,
    Set(T),
}

impl<T: Clone + PartialEq> FieldUpdate<T> {
    /// The resulting value, or `None` when the update leaves `current` as is.
    fn resolve(&self, current: &Option<T>) -> Option<Option<T>> {
        let next = match self {
            FieldUpdate::Unchanged => return None,
            FieldUpdate::Clear => None,
            FieldUpdate::Set(value) => Some(value.clone()),
        };
        (next != *current).then_some(next)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for FieldUpdate<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Option::<T>::deserialize(deserializer)? {
            Some(value) => FieldUpdate::Set(value),
            None => FieldUpdate::Clear,
        })
    }
}

/// Metadata changes; every field is independently optional
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TransactionUpdate {
    pub effective_date: Option<NaiveDate>,
    pub posted_date: Option<NaiveDate>,
    pub memo: FieldUpdate<String>,
    pub payee_id: FieldUpdate<Uuid>,
    pub check_number: FieldUpdate<String>,
}

/// Input for `Transaction::create`
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub account_id: Uuid,
    pub user_id: Uuid,
    pub effective_date: NaiveDate,
    pub posted_date: Option<NaiveDate>,
    pub amount: Money,
    pub splits: Vec<SplitInput>,
    pub payee_id: Option<Uuid>,
    pub memo: Option<String>,
    pub check_number: Option<String>,
    pub status: TransactionStatus,
    pub source: TransactionSource,
}

impl NewTransaction {
    pub fn new(
        account_id: Uuid,
        user_id: Uuid,
        effective_date: NaiveDate,
        amount: Money,
        splits: Vec<SplitInput>,
    ) -> Self {
        Self {
            account_id,
            user_id,
            effective_date,
            posted_date: None,
            amount,
            splits,
            payee_id: None,
            memo: None,
            check_number: None,
            status: TransactionStatus::Pending,
            source: TransactionSource::Manual,
        }
    }
}

/// Flat stored form of a transaction, used to rehydrate the aggregate
#[derive(Debug, Clone)]
pub struct TransactionRecord {
    pub id: Uuid,
    pub account_id: Uuid,
    pub user_id: Uuid,
    pub effective_date: NaiveDate,
    pub posted_date: NaiveDate,
    pub amount: Money,
    pub status: TransactionStatus,
    pub source: TransactionSource,
    pub splits: Vec<SplitLine>,
    pub payee_id: Option<Uuid>,
    pub memo: Option<String>,
    pub check_number: Option<String>,
    pub is_mirror: bool,
    pub source_transaction_id: Option<Uuid>,
    pub source_split_id: Option<Uuid>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Transaction Aggregate
///
/// # Invariants
/// - `splits` is non-empty and sums to `amount` in a single currency
/// - no split transfers to the transaction's own account
/// - a mirror always links back to its source transaction and split
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    id: Uuid,
    account_id: Uuid,
    user_id: Uuid,
    effective_date: NaiveDate,
    posted_date: NaiveDate,
    amount: Money,
    status: TransactionStatus,
    source: TransactionSource,
    splits: Vec<SplitLine>,
    payee_id: Option<Uuid>,
    memo: Option<String>,
    check_number: Option<String>,
    is_mirror: bool,
    source_transaction_id: Option<Uuid>,
    source_split_id: Option<Uuid>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Transaction {
    // =========================================================================
    // Construction
    // =========================================================================

    /// Create a new user or import transaction from validated split input.
    ///
    /// Emits no event; the caller stages `created_event()`.
    pub fn create(new: NewTransaction) -> Result<Self, DomainError> {
        if new.source == TransactionSource::Mirror {
            return Err(DomainError::business_rule(
                "mirror transactions are created by transfer synchronization only",
            ));
        }

        let splits = validate_splits(new.account_id, &new.amount, new.splits)?;
        let now = Utc::now();

        Ok(Self {
            id: Uuid::new_v4(),
            account_id: new.account_id,
            user_id: new.user_id,
            effective_date: new.effective_date,
            posted_date: new.posted_date.unwrap_or(new.effective_date),
            amount: new.amount,
            status: new.status,
            source: new.source,
            splits,
            payee_id: new.payee_id,
            memo: new.memo,
            check_number: new.check_number,
            is_mirror: false,
            source_transaction_id: None,
            source_split_id: None,
            version: 1,
            created_at: now,
            updated_at: now,
        })
    }

    /// Build the mirror of `split` on its transfer target account.
    ///
    /// The mirror carries one uncategorized split with the inverse amount and
    /// copies dates and status from the source.
    pub(crate) fn create_mirror(
        source: &Transaction,
        split: &SplitLine,
        target_user_id: Uuid,
    ) -> Result<Self, DomainError> {
        let target_account_id = split.transfer_account_id().ok_or_else(|| {
            DomainError::business_rule(format!("split {} is not a transfer", split.id()))
        })?;

        let amount = -split.amount();
        let mirror_split = SplitLine::new(
            Uuid::new_v4(),
            amount,
            None,
            None,
            split.memo().map(str::to_string),
        )?;
        let now = Utc::now();

        Ok(Self {
            id: Uuid::new_v4(),
            account_id: target_account_id,
            user_id: target_user_id,
            effective_date: source.effective_date,
            posted_date: source.posted_date,
            amount,
            status: source.status,
            source: TransactionSource::Mirror,
            splits: vec![mirror_split],
            payee_id: None,
            memo: source.memo.clone(),
            check_number: None,
            is_mirror: true,
            source_transaction_id: Some(source.id),
            source_split_id: Some(split.id()),
            version: 1,
            created_at: now,
            updated_at: now,
        })
    }

    /// Rehydrate from storage, re-checking every invariant.
    pub fn from_record(record: TransactionRecord) -> Result<Self, ValidationError> {
        let transaction = Self {
            id: record.id,
            account_id: record.account_id,
            user_id: record.user_id,
            effective_date: record.effective_date,
            posted_date: record.posted_date,
            amount: record.amount,
            status: record.status,
            source: record.source,
            splits: record.splits,
            payee_id: record.payee_id,
            memo: record.memo,
            check_number: record.check_number,
            is_mirror: record.is_mirror,
            source_transaction_id: record.source_transaction_id,
            source_split_id: record.source_split_id,
            version: record.version,
            created_at: record.created_at,
            updated_at: record.updated_at,
        };
        transaction.check_invariants()?;
        Ok(transaction)
    }

    // =========================================================================
    // Events describing the aggregate as a whole
    // =========================================================================

    pub fn created_event(&self) -> TransactionEvent {
        TransactionEvent::TransactionCreated {
            transaction_id: self.id,
            account_id: self.account_id,
            user_id: self.user_id,
            amount: self.amount.amount(),
            currency: self.amount.currency(),
            effective_date: self.effective_date,
            split_count: self.splits.len(),
            is_mirror: self.is_mirror,
            source_transaction_id: self.source_transaction_id,
            source_split_id: self.source_split_id,
            occurred_at: self.created_at,
        }
    }

    pub fn deleted_event(&self) -> TransactionEvent {
        TransactionEvent::TransactionDeleted {
            transaction_id: self.id,
            account_id: self.account_id,
            is_mirror: self.is_mirror,
            occurred_at: Utc::now(),
        }
    }

    // =========================================================================
    // User operations (rejected on mirrors)
    // =========================================================================

    /// Replace amount and splits together.
    pub fn replace_splits(
        &mut self,
        new_amount: Money,
        new_splits: Vec<SplitInput>,
    ) -> Result<TransactionEvent, DomainError> {
        self.ensure_editable()?;
        let splits = validate_splits(self.account_id, &new_amount, new_splits)?;

        let old_amount = self.amount;
        self.amount = new_amount;
        self.splits = splits;
        self.touch();

        Ok(TransactionEvent::TransactionSplitsReplaced {
            transaction_id: self.id,
            account_id: self.account_id,
            old_amount: old_amount.amount(),
            new_amount: new_amount.amount(),
            currency: new_amount.currency(),
            split_count: self.splits.len(),
            occurred_at: self.updated_at,
        })
    }

    /// Apply field-level metadata changes. Returns `None` when nothing changed.
    pub fn update_metadata(
        &mut self,
        update: TransactionUpdate,
    ) -> Result<Option<TransactionEvent>, DomainError> {
        self.ensure_editable()?;

        let mut changes = Vec::new();

        let effective_date = update
            .effective_date
            .filter(|date| *date != self.effective_date);
        if let Some(date) = effective_date {
            changes.push(FieldChange::new(
                "effective_date",
                Some(self.effective_date.to_string()),
                Some(date.to_string()),
            ));
        }

        let posted_date = update.posted_date.filter(|date| *date != self.posted_date);
        if let Some(date) = posted_date {
            changes.push(FieldChange::new(
                "posted_date",
                Some(self.posted_date.to_string()),
                Some(date.to_string()),
            ));
        }

        let memo = update.memo.resolve(&self.memo);
        if let Some(memo) = &memo {
            changes.push(FieldChange::new("memo", self.memo.clone(), memo.clone()));
        }

        let payee_id = update.payee_id.resolve(&self.payee_id);
        if let Some(payee_id) = &payee_id {
            changes.push(FieldChange::new(
                "payee_id",
                self.payee_id.map(|id| id.to_string()),
                payee_id.map(|id| id.to_string()),
            ));
        }

        let check_number = update.check_number.resolve(&self.check_number);
        if let Some(check_number) = &check_number {
            changes.push(FieldChange::new(
                "check_number",
                self.check_number.clone(),
                check_number.clone(),
            ));
        }

        if changes.is_empty() {
            return Ok(None);
        }

        if let Some(date) = effective_date {
            self.effective_date = date;
        }
        if let Some(date) = posted_date {
            self.posted_date = date;
        }
        if let Some(memo) = memo {
            self.memo = memo;
        }
        if let Some(payee_id) = payee_id {
            self.payee_id = payee_id;
        }
        if let Some(check_number) = check_number {
            self.check_number = check_number;
        }
        self.touch();

        Ok(Some(TransactionEvent::TransactionUpdated {
            transaction_id: self.id,
            account_id: self.account_id,
            changes,
            occurred_at: self.updated_at,
        }))
    }

    /// pending → cleared. Idempotent for an unchanged posted date.
    pub fn mark_cleared(
        &mut self,
        posted_date: Option<NaiveDate>,
    ) -> Result<Option<TransactionEvent>, DomainError> {
        self.ensure_editable()?;
        Ok(self.apply_cleared(posted_date))
    }

    /// Check that the transaction may be deleted by a user
    pub fn ensure_deletable(&self) -> Result<(), DomainError> {
        if self.is_mirror {
            return Err(self.mirror_violation("deleted"));
        }
        Ok(())
    }

    // =========================================================================
    // Mirror synchronization (source → mirror only)
    // =========================================================================

    /// Set a mirror's amount, keeping its split identity.
    pub(crate) fn sync_mirror_amount(
        &mut self,
        amount: Money,
    ) -> Result<Option<TransactionEvent>, DomainError> {
        if !self.is_mirror {
            return Err(DomainError::business_rule(format!(
                "transaction {} is not a mirror",
                self.id
            )));
        }
        if amount == self.amount {
            return Ok(None);
        }

        let split = match self.splits.as_slice() {
            [only] => only.with_amount(amount)?,
            _ => SplitLine::new(Uuid::new_v4(), amount, None, None, None)?,
        };

        let old_amount = self.amount;
        self.amount = amount;
        self.splits = vec![split];
        self.touch();

        Ok(Some(TransactionEvent::TransactionSplitsReplaced {
            transaction_id: self.id,
            account_id: self.account_id,
            old_amount: old_amount.amount(),
            new_amount: amount.amount(),
            currency: amount.currency(),
            split_count: 1,
            occurred_at: self.updated_at,
        }))
    }

    /// Copy the source's dates and memo onto a mirror.
    pub(crate) fn sync_mirror_metadata(&mut self, source: &Transaction) -> Option<TransactionEvent> {
        let effective_date = source.effective_date;
        let posted_date = source.posted_date;
        let mut changes = Vec::new();
        if self.effective_date != effective_date {
            changes.push(FieldChange::new(
                "effective_date",
                Some(self.effective_date.to_string()),
                Some(effective_date.to_string()),
            ));
            self.effective_date = effective_date;
        }
        if self.posted_date != posted_date {
            changes.push(FieldChange::new(
                "posted_date",
                Some(self.posted_date.to_string()),
                Some(posted_date.to_string()),
            ));
            self.posted_date = posted_date;
        }
        if self.memo != source.memo {
            changes.push(FieldChange::new("memo", self.memo.clone(), source.memo.clone()));
            self.memo = source.memo.clone();
        }
        if changes.is_empty() {
            return None;
        }

        self.touch();
        Some(TransactionEvent::TransactionUpdated {
            transaction_id: self.id,
            account_id: self.account_id,
            changes,
            occurred_at: self.updated_at,
        })
    }

    /// Clear a mirror together with its source.
    pub(crate) fn sync_mirror_cleared(&mut self, posted_date: NaiveDate) -> Option<TransactionEvent> {
        self.apply_cleared(Some(posted_date))
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn apply_cleared(&mut self, posted_date: Option<NaiveDate>) -> Option<TransactionEvent> {
        match self.status {
            TransactionStatus::Pending => {
                self.status = TransactionStatus::Cleared;
                if let Some(date) = posted_date {
                    self.posted_date = date;
                }
                self.touch();
                Some(TransactionEvent::TransactionCleared {
                    transaction_id: self.id,
                    account_id: self.account_id,
                    posted_date: self.posted_date,
                    occurred_at: self.updated_at,
                })
            }
            TransactionStatus::Cleared => {
                let date = posted_date.filter(|date| *date != self.posted_date)?;
                let change = FieldChange::new(
                    "posted_date",
                    Some(self.posted_date.to_string()),
                    Some(date.to_string()),
                );
                self.posted_date = date;
                self.touch();
                Some(TransactionEvent::TransactionUpdated {
                    transaction_id: self.id,
                    account_id: self.account_id,
                    changes: vec![change],
                    occurred_at: self.updated_at,
                })
            }
        }
    }

    fn ensure_editable(&self) -> Result<(), DomainError> {
        if self.is_mirror {
            return Err(self.mirror_violation("edited"));
        }
        Ok(())
    }

    fn mirror_violation(&self, action: &str) -> DomainError {
        DomainError::business_rule(format!(
            "mirror transaction {} cannot be {} directly; change source transaction {} instead",
            self.id,
            action,
            self.source_transaction_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "<unknown>".to_string()),
        ))
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub(crate) fn mark_persisted(&mut self, version: i64) {
        self.version = version;
    }

    /// Re-check all structural invariants of the current state.
    pub fn check_invariants(&self) -> Result<(), ValidationError> {
        let inputs = self.splits.iter().map(SplitInput::from).collect();
        validate_splits(self.account_id, &self.amount, inputs)?;

        if self.is_mirror
            && (self.source_transaction_id.is_none() || self.source_split_id.is_none())
        {
            return Err(ValidationError::InvalidField {
                field: "source_split_id",
                reason: "mirror transaction without source link".to_string(),
            });
        }
        Ok(())
    }

    // =========================================================================
    // Getters
    // =========================================================================

    pub fn account_id(&self) -> Uuid {
        self.account_id
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn effective_date(&self) -> NaiveDate {
        self.effective_date
    }

    pub fn posted_date(&self) -> NaiveDate {
        self.posted_date
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn source(&self) -> TransactionSource {
        self.source
    }

    pub fn splits(&self) -> &[SplitLine] {
        &self.splits
    }

    pub fn split(&self, split_id: Uuid) -> Option<&SplitLine> {
        self.splits.iter().find(|split| split.id() == split_id)
    }

    pub fn transfer_splits(&self) -> impl Iterator<Item = &SplitLine> {
        self.splits.iter().filter(|split| split.is_transfer())
    }

    pub fn payee_id(&self) -> Option<Uuid> {
        self.payee_id
    }

    pub fn memo(&self) -> Option<&str> {
        self.memo.as_deref()
    }

    pub fn check_number(&self) -> Option<&str> {
        self.check_number.as_deref()
    }

    pub fn is_mirror(&self) -> bool {
        self.is_mirror
    }

    pub fn source_transaction_id(&self) -> Option<Uuid> {
        self.source_transaction_id
    }

    pub fn source_split_id(&self) -> Option<Uuid> {
        self.source_split_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

impl Aggregate for Transaction {
    fn aggregate_type() -> &'static str {
        "Transaction"
    }

    fn id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }
}

/// Validate split input against the transaction's account and amount.
fn validate_splits(
    account_id: Uuid,
    amount: &Money,
    inputs: Vec<SplitInput>,
) -> Result<Vec<SplitLine>, ValidationError> {
    if inputs.is_empty() {
        return Err(ValidationError::EmptySplits);
    }

    let mut seen = HashSet::with_capacity(inputs.len());
    let mut splits = Vec::with_capacity(inputs.len());

    for input in inputs {
        let split = input.into_split()?;

        if split.amount().currency() != amount.currency() {
            return Err(ValidationError::CurrencyMismatch {
                expected: amount.currency(),
                found: split.amount().currency(),
            });
        }
        if split.transfer_account_id() == Some(account_id) {
            return Err(ValidationError::SelfTransfer {
                split_id: split.id(),
            });
        }
        if !seen.insert(split.id()) {
            return Err(ValidationError::DuplicateSplitId(split.id()));
        }

        splits.push(split);
    }

    let amounts: Vec<Money> = splits.iter().map(SplitLine::amount).collect();
    let total = Money::sum(amount.currency(), &amounts)?;
    if total != *amount {
        return Err(ValidationError::SplitsDoNotSum {
            expected: amount.amount(),
            actual: total.amount(),
        });
    }

    Ok(splits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Currency;
    use proptest::prelude::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn eur(amount: Decimal) -> Money {
        Money::new(amount, Currency::EUR).unwrap()
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, day).unwrap()
    }

    fn new_transaction(amount: Decimal, splits: Vec<SplitInput>) -> NewTransaction {
        NewTransaction::new(Uuid::new_v4(), Uuid::new_v4(), date(1), eur(amount), splits)
    }

    /// -30 to a category, -70 transferred to `target`
    fn groceries_and_transfer(target: Uuid) -> Transaction {
        Transaction::create(new_transaction(
            dec!(-100),
            vec![
                SplitInput::new(eur(dec!(-30))).category(Uuid::new_v4()),
                SplitInput::new(eur(dec!(-70))).transfer_to(target),
            ],
        ))
        .unwrap()
    }

    #[test]
    fn test_create_valid_transaction() {
        let target = Uuid::new_v4();
        let transaction = groceries_and_transfer(target);

        assert_eq!(transaction.amount().amount(), dec!(-100));
        assert_eq!(transaction.splits().len(), 2);
        assert_eq!(transaction.posted_date(), transaction.effective_date());
        assert_eq!(transaction.status(), TransactionStatus::Pending);
        assert_eq!(transaction.version(), 1);
        assert_eq!(transaction.transfer_splits().count(), 1);
        assert!(!transaction.is_mirror());
        assert!(transaction.check_invariants().is_ok());
    }

    #[test]
    fn test_create_rejects_empty_splits() {
        let result = Transaction::create(new_transaction(dec!(-10), vec![]));
        assert_eq!(
            result.unwrap_err(),
            DomainError::Validation(ValidationError::EmptySplits)
        );
    }

    #[test]
    fn test_create_rejects_wrong_sum() {
        let result = Transaction::create(new_transaction(
            dec!(-100),
            vec![SplitInput::new(eur(dec!(-90)))],
        ));
        assert!(matches!(
            result,
            Err(DomainError::Validation(ValidationError::SplitsDoNotSum { .. }))
        ));
    }

    #[test]
    fn test_create_rejects_positive_transfer() {
        let result = Transaction::create(new_transaction(
            dec!(50),
            vec![SplitInput::new(eur(dec!(50))).transfer_to(Uuid::new_v4())],
        ));
        assert!(matches!(
            result,
            Err(DomainError::Validation(ValidationError::TransferNotNegative { .. }))
        ));
    }

    #[test]
    fn test_create_rejects_self_transfer() {
        let mut new = new_transaction(dec!(-10), vec![]);
        new.splits = vec![SplitInput::new(eur(dec!(-10))).transfer_to(new.account_id)];

        assert!(matches!(
            Transaction::create(new),
            Err(DomainError::Validation(ValidationError::SelfTransfer { .. }))
        ));
    }

    #[test]
    fn test_create_rejects_mixed_currency() {
        let usd = Money::new(dec!(-10), Currency::USD).unwrap();
        let result = Transaction::create(new_transaction(dec!(-10), vec![SplitInput::new(usd)]));
        assert!(matches!(
            result,
            Err(DomainError::Validation(ValidationError::CurrencyMismatch { .. }))
        ));
    }

    #[test]
    fn test_create_rejects_mirror_source() {
        let mut new = new_transaction(dec!(-10), vec![SplitInput::new(eur(dec!(-10)))]);
        new.source = TransactionSource::Mirror;
        assert!(matches!(
            Transaction::create(new),
            Err(DomainError::BusinessRuleViolation(_))
        ));
    }

    #[test]
    fn test_replace_splits_failure_leaves_state_untouched() {
        let mut transaction = groceries_and_transfer(Uuid::new_v4());
        let before = transaction.clone();

        let result = transaction.replace_splits(
            eur(dec!(-100)),
            vec![
                SplitInput::new(eur(dec!(-40))),
                SplitInput::new(eur(dec!(-50))),
            ],
        );

        assert!(matches!(
            result,
            Err(DomainError::Validation(ValidationError::SplitsDoNotSum { .. }))
        ));
        assert_eq!(transaction, before);
    }

    #[test]
    fn test_replace_splits_success() {
        let mut transaction = groceries_and_transfer(Uuid::new_v4());
        let kept = transaction.splits()[0].id();

        let event = transaction
            .replace_splits(
                eur(dec!(-120)),
                vec![
                    SplitInput::from(&transaction.splits()[0]),
                    SplitInput::new(eur(dec!(-90))),
                ],
            )
            .unwrap();

        assert_eq!(transaction.amount().amount(), dec!(-120));
        assert_eq!(transaction.splits()[0].id(), kept);
        match event {
            TransactionEvent::TransactionSplitsReplaced {
                old_amount,
                new_amount,
                split_count,
                ..
            } => {
                assert_eq!(old_amount, dec!(-100));
                assert_eq!(new_amount, dec!(-120));
                assert_eq!(split_count, 2);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_replace_splits_rejects_duplicate_ids() {
        let mut transaction = groceries_and_transfer(Uuid::new_v4());
        let id = Uuid::new_v4();
        let result = transaction.replace_splits(
            eur(dec!(-20)),
            vec![
                SplitInput::new(eur(dec!(-10))).with_id(id),
                SplitInput::new(eur(dec!(-10))).with_id(id),
            ],
        );
        assert!(matches!(
            result,
            Err(DomainError::Validation(ValidationError::DuplicateSplitId(_)))
        ));
    }

    #[test]
    fn test_update_metadata_field_semantics() {
        let mut transaction = Transaction::create(NewTransaction {
            memo: Some("rent".to_string()),
            check_number: Some("1001".to_string()),
            ..new_transaction(dec!(-10), vec![SplitInput::new(eur(dec!(-10)))])
        })
        .unwrap();

        let event = transaction
            .update_metadata(TransactionUpdate {
                memo: FieldUpdate::Clear,
                check_number: FieldUpdate::Set(String::new()),
                ..Default::default()
            })
            .unwrap()
            .unwrap();

        assert_eq!(transaction.memo(), None);
        assert_eq!(transaction.check_number(), Some(""));
        match event {
            TransactionEvent::TransactionUpdated { changes, .. } => {
                assert_eq!(changes.len(), 2);
                assert_eq!(changes[0], FieldChange::new("memo", Some("rent".into()), None));
            }
            other => panic!("unexpected event {:?}", other),
        }

        // Nothing to change: no event
        let event = transaction
            .update_metadata(TransactionUpdate {
                memo: FieldUpdate::Clear,
                ..Default::default()
            })
            .unwrap();
        assert!(event.is_none());
    }

    #[test]
    fn test_transaction_update_deserialization() {
        let update: TransactionUpdate =
            serde_json::from_str(r#"{"memo": null, "payee_id": null, "check_number": "7"}"#)
                .unwrap();
        assert_eq!(update.memo, FieldUpdate::Clear);
        assert_eq!(update.payee_id, FieldUpdate::Clear);
        assert_eq!(update.check_number, FieldUpdate::Set("7".to_string()));
        assert!(update.effective_date.is_none());

        let update: TransactionUpdate = serde_json::from_str("{}").unwrap();
        assert_eq!(update.memo, FieldUpdate::Unchanged);
    }

    #[test]
    fn test_mark_cleared_idempotent() {
        let mut transaction = groceries_and_transfer(Uuid::new_v4());

        let first = transaction.mark_cleared(Some(date(3))).unwrap();
        assert!(matches!(first, Some(TransactionEvent::TransactionCleared { .. })));
        let after_first = transaction.clone();

        let second = transaction.mark_cleared(Some(date(3))).unwrap();
        assert!(second.is_none());
        assert_eq!(transaction, after_first);

        let without_date = transaction.mark_cleared(None).unwrap();
        assert!(without_date.is_none());
    }

    #[test]
    fn test_mark_cleared_changes_posted_date() {
        let mut transaction = groceries_and_transfer(Uuid::new_v4());
        transaction.mark_cleared(Some(date(3))).unwrap();

        let event = transaction.mark_cleared(Some(date(5))).unwrap();
        assert!(matches!(event, Some(TransactionEvent::TransactionUpdated { .. })));
        assert_eq!(transaction.posted_date(), date(5));
        assert_eq!(transaction.status(), TransactionStatus::Cleared);
    }

    #[test]
    fn test_mirror_creation_and_protection() {
        let target = Uuid::new_v4();
        let source = groceries_and_transfer(target);
        let split = source.transfer_splits().next().unwrap().clone();

        let mut mirror = Transaction::create_mirror(&source, &split, Uuid::new_v4()).unwrap();
        assert!(mirror.is_mirror());
        assert_eq!(mirror.account_id(), target);
        assert_eq!(mirror.amount().amount(), dec!(70));
        assert_eq!(mirror.source(), TransactionSource::Mirror);
        assert_eq!(mirror.source_transaction_id(), Some(source.id()));
        assert_eq!(mirror.source_split_id(), Some(split.id()));
        assert!(mirror.check_invariants().is_ok());

        let before = mirror.clone();
        assert!(matches!(
            mirror.replace_splits(eur(dec!(1)), vec![SplitInput::new(eur(dec!(1)))]),
            Err(DomainError::BusinessRuleViolation(_))
        ));
        assert!(matches!(
            mirror.mark_cleared(None),
            Err(DomainError::BusinessRuleViolation(_))
        ));
        assert!(matches!(
            mirror.update_metadata(TransactionUpdate::default()),
            Err(DomainError::BusinessRuleViolation(_))
        ));
        assert!(matches!(
            mirror.ensure_deletable(),
            Err(DomainError::BusinessRuleViolation(_))
        ));
        assert_eq!(mirror, before);
    }

    #[test]
    fn test_sync_mirror_amount_keeps_split_identity() {
        let source = groceries_and_transfer(Uuid::new_v4());
        let split = source.transfer_splits().next().unwrap().clone();
        let mut mirror = Transaction::create_mirror(&source, &split, Uuid::new_v4()).unwrap();
        let mirror_split_id = mirror.splits()[0].id();

        assert!(mirror.sync_mirror_amount(eur(dec!(70))).unwrap().is_none());

        let event = mirror.sync_mirror_amount(eur(dec!(85))).unwrap();
        assert!(event.is_some());
        assert_eq!(mirror.amount().amount(), dec!(85));
        assert_eq!(mirror.splits()[0].id(), mirror_split_id);
        assert!(mirror.check_invariants().is_ok());
    }

    proptest! {
        #[test]
        fn prop_split_sum_matches_amount(cents in prop::collection::vec(-1_000_000i64..1_000_000, 1..20)) {
            let inputs: Vec<SplitInput> = cents
                .iter()
                .map(|c| SplitInput::new(eur(Decimal::new(*c, 2))))
                .collect();
            let total = Decimal::new(cents.iter().sum::<i64>(), 2);

            let transaction = Transaction::create(new_transaction(total, inputs.clone())).unwrap();
            let amounts: Vec<Money> = transaction.splits().iter().map(SplitLine::amount).collect();
            let sum = Money::sum(Currency::EUR, &amounts).unwrap();
            prop_assert_eq!(sum, transaction.amount());

            // Any other declared amount is rejected
            let off = total + Decimal::new(1, 2);
            prop_assert!(Transaction::create(new_transaction(off, inputs)).is_err());
        }
    }
}
