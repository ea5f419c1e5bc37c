//! Store module
//!
//! Repository ports and the unit of work that binds aggregate writes and
//! outbox rows into one atomic commit. Two implementations: Postgres (sqlx)
//! and an in-memory store for tests and tooling.

mod error;
mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::aggregate::{Account, Transaction, TransactionStatus};
use crate::outbox::NewOutboxEvent;

pub use error::StoreError;
pub use memory::{InMemoryOutboxSource, InMemoryStore};
pub use postgres::{PgUnitOfWork, PgUnitOfWorkFactory};

/// Filters for `TransactionRepository::get_by_account`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionFilter {
    /// Inclusive lower bound on `effective_date`
    pub from_date: Option<NaiveDate>,
    /// Inclusive upper bound on `effective_date`
    pub to_date: Option<NaiveDate>,
    pub status: Option<TransactionStatus>,
    pub include_mirrors: bool,
    pub limit: Option<i64>,
}

impl TransactionFilter {
    /// Everything on the account, mirrors included
    pub fn all() -> Self {
        Self {
            include_mirrors: true,
            ..Default::default()
        }
    }

    pub fn between(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        self.from_date = Some(from);
        self.to_date = Some(to);
        self
    }

    pub fn with_status(mut self, status: TransactionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Check a transaction against every filter except `limit`
    pub fn matches(&self, transaction: &Transaction) -> bool {
        let date = transaction.effective_date();
        self.from_date.map_or(true, |from| date >= from)
            && self.to_date.map_or(true, |to| date <= to)
            && self.status.map_or(true, |status| transaction.status() == status)
            && (self.include_mirrors || !transaction.is_mirror())
    }
}

/// Transaction persistence bound to one unit of work.
///
/// `update` and `delete` are guarded by the aggregate's version: a row changed
/// by someone else since it was loaded yields `StoreError::ConcurrencyConflict`.
#[async_trait]
pub trait TransactionRepository: Send {
    async fn add(&mut self, transaction: &Transaction) -> Result<(), StoreError>;

    async fn get(&mut self, id: Uuid) -> Result<Transaction, StoreError>;

    /// Ordered by effective date, then creation time
    async fn get_by_account(
        &mut self,
        account_id: Uuid,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, StoreError>;

    /// Persist changes and bump the version on success
    async fn update(&mut self, transaction: &mut Transaction) -> Result<(), StoreError>;

    async fn delete(&mut self, transaction: &Transaction) -> Result<(), StoreError>;

    /// Mirror generated by the given source split
    async fn find_mirror_by_split(
        &mut self,
        source_split_id: Uuid,
    ) -> Result<Option<Transaction>, StoreError>;

    /// All mirrors generated by the given source transaction
    async fn find_mirrors(
        &mut self,
        source_transaction_id: Uuid,
    ) -> Result<Vec<Transaction>, StoreError>;

    /// First of `transaction`'s split ids already held by another transaction
    async fn find_taken_split_id(
        &mut self,
        transaction: &Transaction,
    ) -> Result<Option<Uuid>, StoreError>;
}

/// Account persistence bound to one unit of work
#[async_trait]
pub trait AccountRepository: Send {
    async fn add(&mut self, account: &Account) -> Result<(), StoreError>;

    async fn get(&mut self, id: Uuid) -> Result<Account, StoreError>;

    async fn update(&mut self, account: &mut Account) -> Result<(), StoreError>;
}

/// One atomic operation.
///
/// Nothing is visible to others before `commit`; dropping the unit without
/// committing discards every write and staged event.
#[async_trait]
pub trait UnitOfWork: Send {
    fn transactions(&mut self) -> Box<dyn TransactionRepository + '_>;

    fn accounts(&mut self) -> Box<dyn AccountRepository + '_>;

    /// Stage events to be written as outbox rows on commit
    fn collect_events(&mut self, events: Vec<NewOutboxEvent>);

    /// Write staged outbox rows and commit everything atomically
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Opens units of work
#[async_trait]
pub trait UnitOfWorkFactory: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::NewTransaction;
    use crate::domain::{Currency, Money, SplitInput};
    use rust_decimal_macros::dec;

    #[test]
    fn test_filter_matches() {
        let amount = Money::new(dec!(-5), Currency::EUR).unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 2, 10).unwrap();
        let transaction = Transaction::create(NewTransaction::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            date,
            amount,
            vec![SplitInput::new(amount)],
        ))
        .unwrap();

        assert!(TransactionFilter::all().matches(&transaction));
        assert!(TransactionFilter::default().matches(&transaction));

        let february = TransactionFilter::all().between(
            NaiveDate::from_ymd_opt(2026, 2, 1).unwrap(),
            NaiveDate::from_ymd_opt(2026, 2, 28).unwrap(),
        );
        assert!(february.matches(&transaction));

        let march = TransactionFilter::all().between(
            NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2026, 3, 31).unwrap(),
        );
        assert!(!march.matches(&transaction));

        let cleared = TransactionFilter::all().with_status(TransactionStatus::Cleared);
        assert!(!cleared.matches(&transaction));
    }
}
