//! Postgres store
//!
//! One unit of work is one database transaction. Transactions are read
//! without row locks and written back with version-guarded statements: a
//! writer that read a version someone else has since committed over matches
//! no row and fails with a concurrency conflict. Reads must stay unlocked:
//! `FOR UPDATE` would hand the late writer the new version.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgConnection, PgPool, Postgres};
use std::collections::HashMap;
use uuid::Uuid;

use crate::aggregate::{Account, Aggregate, Transaction, TransactionRecord};
use crate::domain::{Currency, Money, SplitLine};
use crate::outbox::{self, NewOutboxEvent};

use super::{
    AccountRepository, StoreError, TransactionFilter, TransactionRepository, UnitOfWork,
    UnitOfWorkFactory,
};

// =========================================================================
// Unit of work
// =========================================================================

/// Opens a database transaction per unit of work
#[derive(Debug, Clone)]
pub struct PgUnitOfWorkFactory {
    pool: PgPool,
}

impl PgUnitOfWorkFactory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UnitOfWorkFactory for PgUnitOfWorkFactory {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork {
            tx,
            staged: Vec::new(),
        }))
    }
}

/// Dropping an uncommitted unit rolls the database transaction back
pub struct PgUnitOfWork {
    tx: sqlx::Transaction<'static, Postgres>,
    staged: Vec<NewOutboxEvent>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    fn transactions(&mut self) -> Box<dyn TransactionRepository + '_> {
        Box::new(PgTransactionRepository {
            conn: &mut *self.tx,
        })
    }

    fn accounts(&mut self) -> Box<dyn AccountRepository + '_> {
        Box::new(PgAccountRepository {
            conn: &mut *self.tx,
        })
    }

    fn collect_events(&mut self, events: Vec<NewOutboxEvent>) {
        self.staged.extend(events);
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut this = *self;
        outbox::record(&mut *this.tx, &this.staged).await?;
        this.tx.commit().await?;

        tracing::debug!(outbox_rows = this.staged.len(), "Unit of work committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

// =========================================================================
// Row types
// =========================================================================

#[derive(Debug, FromRow)]
struct TransactionRow {
    id: Uuid,
    account_id: Uuid,
    user_id: Uuid,
    effective_date: NaiveDate,
    posted_date: NaiveDate,
    amount: Decimal,
    currency: String,
    status: String,
    source: String,
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

#[derive(Debug, FromRow)]
struct SplitRow {
    id: Uuid,
    transaction_id: Uuid,
    amount: Decimal,
    category_id: Option<Uuid>,
    transfer_account_id: Option<Uuid>,
    memo: Option<String>,
}

#[derive(Debug, FromRow)]
struct AccountRow {
    id: Uuid,
    user_id: Uuid,
    name: String,
    account_type: String,
    currency: String,
    is_closed: bool,
    version: i64,
    created_at: DateTime<Utc>,
}

const TRANSACTION_COLUMNS: &str = r#"
    id, account_id, user_id, effective_date, posted_date, amount, currency, status, source,
    payee_id, memo, check_number, is_mirror, source_transaction_id, source_split_id,
    version, created_at, updated_at
"#;

fn corrupt(id: Uuid, err: impl std::fmt::Display) -> StoreError {
    StoreError::CorruptRow(format!("{}: {}", id, err))
}

impl TransactionRow {
    fn into_transaction(self, splits: Vec<SplitRow>) -> Result<Transaction, StoreError> {
        let id = self.id;
        let currency = Currency::new(&self.currency).map_err(|e| corrupt(id, e))?;

        let splits = splits
            .into_iter()
            .map(|row| {
                let amount = Money::new(row.amount, currency).map_err(|e| corrupt(row.id, e))?;
                SplitLine::new(
                    row.id,
                    amount,
                    row.category_id,
                    row.transfer_account_id,
                    row.memo,
                )
                .map_err(|e| corrupt(row.id, e))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let record = TransactionRecord {
            id,
            account_id: self.account_id,
            user_id: self.user_id,
            effective_date: self.effective_date,
            posted_date: self.posted_date,
            amount: Money::new(self.amount, currency).map_err(|e| corrupt(id, e))?,
            status: self.status.parse().map_err(|e| corrupt(id, e))?,
            source: self.source.parse().map_err(|e| corrupt(id, e))?,
            splits,
            payee_id: self.payee_id,
            memo: self.memo,
            check_number: self.check_number,
            is_mirror: self.is_mirror,
            source_transaction_id: self.source_transaction_id,
            source_split_id: self.source_split_id,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        };

        Transaction::from_record(record).map_err(|e| corrupt(id, e))
    }
}

impl AccountRow {
    fn into_account(self) -> Result<Account, StoreError> {
        let id = self.id;
        Ok(Account::from_db_state(
            id,
            self.user_id,
            self.name,
            self.account_type.parse().map_err(|e| corrupt(id, e))?,
            Currency::new(&self.currency).map_err(|e| corrupt(id, e))?,
            self.is_closed,
            self.version,
            self.created_at,
        ))
    }
}

// =========================================================================
// Transaction repository
// =========================================================================

struct PgTransactionRepository<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> PgTransactionRepository<'c> {
    /// Attach split lines to loaded rows, keeping row order
    async fn hydrate(&mut self, rows: Vec<TransactionRow>) -> Result<Vec<Transaction>, StoreError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
        let split_rows: Vec<SplitRow> = sqlx::query_as(
            r#"
            SELECT id, transaction_id, amount, category_id, transfer_account_id, memo
            FROM split_lines
            WHERE transaction_id = ANY($1)
            ORDER BY transaction_id, position ASC
            "#,
        )
        .bind(&ids)
        .fetch_all(&mut *self.conn)
        .await?;

        let mut by_transaction: HashMap<Uuid, Vec<SplitRow>> = HashMap::new();
        for split in split_rows {
            by_transaction
                .entry(split.transaction_id)
                .or_default()
                .push(split);
        }

        rows.into_iter()
            .map(|row| {
                let splits = by_transaction.remove(&row.id).unwrap_or_default();
                row.into_transaction(splits)
            })
            .collect()
    }

    async fn insert_splits(&mut self, transaction: &Transaction) -> Result<(), StoreError> {
        for (position, split) in transaction.splits().iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO split_lines (
                    id, transaction_id, position, amount,
                    category_id, transfer_account_id, memo
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(split.id())
            .bind(transaction.id())
            .bind(position as i32)
            .bind(split.amount().amount())
            .bind(split.category_id())
            .bind(split.transfer_account_id())
            .bind(split.memo())
            .execute(&mut *self.conn)
            .await?;
        }

        Ok(())
    }
}

#[async_trait]
impl<'c> TransactionRepository for PgTransactionRepository<'c> {
    async fn add(&mut self, transaction: &Transaction) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO transactions (
                id, account_id, user_id, effective_date, posted_date, amount, currency,
                status, source, payee_id, memo, check_number, is_mirror,
                source_transaction_id, source_split_id, version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(transaction.id())
        .bind(transaction.account_id())
        .bind(transaction.user_id())
        .bind(transaction.effective_date())
        .bind(transaction.posted_date())
        .bind(transaction.amount().amount())
        .bind(transaction.amount().currency().code())
        .bind(transaction.status().as_str())
        .bind(transaction.source().as_str())
        .bind(transaction.payee_id())
        .bind(transaction.memo())
        .bind(transaction.check_number())
        .bind(transaction.is_mirror())
        .bind(transaction.source_transaction_id())
        .bind(transaction.source_split_id())
        .bind(transaction.version())
        .bind(transaction.created_at())
        .bind(transaction.updated_at())
        .execute(&mut *self.conn)
        .await?;

        self.insert_splits(transaction).await
    }

    async fn get(&mut self, id: Uuid) -> Result<Transaction, StoreError> {
        let row: Option<TransactionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM transactions WHERE id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.conn)
        .await?;

        let row = row.ok_or_else(|| StoreError::not_found("Transaction", id))?;
        self.hydrate(vec![row])
            .await?
            .pop()
            .ok_or_else(|| StoreError::not_found("Transaction", id))
    }

    async fn get_by_account(
        &mut self,
        account_id: Uuid,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, StoreError> {
        let rows: Vec<TransactionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM transactions
            WHERE account_id = $1
              AND ($2::date IS NULL OR effective_date >= $2)
              AND ($3::date IS NULL OR effective_date <= $3)
              AND ($4::text IS NULL OR status = $4)
              AND ($5 OR NOT is_mirror)
            ORDER BY effective_date ASC, created_at ASC, id ASC
            LIMIT $6
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(account_id)
        .bind(filter.from_date)
        .bind(filter.to_date)
        .bind(filter.status.map(|status| status.as_str()))
        .bind(filter.include_mirrors)
        .bind(filter.limit)
        .fetch_all(&mut *self.conn)
        .await?;

        self.hydrate(rows).await
    }

    async fn update(&mut self, transaction: &mut Transaction) -> Result<(), StoreError> {
        let expected = transaction.version();

        let rows = sqlx::query(
            r#"
            UPDATE transactions
            SET effective_date = $3, posted_date = $4, amount = $5, currency = $6,
                status = $7, payee_id = $8, memo = $9, check_number = $10,
                updated_at = $11, version = version + 1
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(transaction.id())
        .bind(expected)
        .bind(transaction.effective_date())
        .bind(transaction.posted_date())
        .bind(transaction.amount().amount())
        .bind(transaction.amount().currency().code())
        .bind(transaction.status().as_str())
        .bind(transaction.payee_id())
        .bind(transaction.memo())
        .bind(transaction.check_number())
        .bind(transaction.updated_at())
        .execute(&mut *self.conn)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(StoreError::ConcurrencyConflict {
                aggregate_id: transaction.id(),
            });
        }

        sqlx::query("DELETE FROM split_lines WHERE transaction_id = $1")
            .bind(transaction.id())
            .execute(&mut *self.conn)
            .await?;
        self.insert_splits(transaction).await?;

        transaction.mark_persisted(expected + 1);
        Ok(())
    }

    async fn delete(&mut self, transaction: &Transaction) -> Result<(), StoreError> {
        // split_lines go with the row (ON DELETE CASCADE)
        let rows = sqlx::query("DELETE FROM transactions WHERE id = $1 AND version = $2")
            .bind(transaction.id())
            .bind(transaction.version())
            .execute(&mut *self.conn)
            .await?
            .rows_affected();

        if rows == 0 {
            return Err(StoreError::ConcurrencyConflict {
                aggregate_id: transaction.id(),
            });
        }

        Ok(())
    }

    async fn find_mirror_by_split(
        &mut self,
        source_split_id: Uuid,
    ) -> Result<Option<Transaction>, StoreError> {
        let rows: Vec<TransactionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM transactions WHERE source_split_id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(source_split_id)
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(self.hydrate(rows).await?.pop())
    }

    async fn find_mirrors(
        &mut self,
        source_transaction_id: Uuid,
    ) -> Result<Vec<Transaction>, StoreError> {
        let rows: Vec<TransactionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM transactions
            WHERE source_transaction_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(source_transaction_id)
        .fetch_all(&mut *self.conn)
        .await?;

        self.hydrate(rows).await
    }

    async fn find_taken_split_id(
        &mut self,
        transaction: &Transaction,
    ) -> Result<Option<Uuid>, StoreError> {
        let ids: Vec<Uuid> = transaction.splits().iter().map(|split| split.id()).collect();

        let taken: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM split_lines
            WHERE id = ANY($1) AND transaction_id <> $2
            LIMIT 1
            "#,
        )
        .bind(&ids)
        .bind(transaction.id())
        .fetch_optional(&mut *self.conn)
        .await?;

        Ok(taken)
    }
}

// =========================================================================
// Account repository
// =========================================================================

struct PgAccountRepository<'c> {
    conn: &'c mut PgConnection,
}

#[async_trait]
impl<'c> AccountRepository for PgAccountRepository<'c> {
    async fn add(&mut self, account: &Account) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, user_id, name, account_type, currency, is_closed, version, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(account.id())
        .bind(account.user_id())
        .bind(account.name())
        .bind(account.account_type().as_str())
        .bind(account.currency().code())
        .bind(account.is_closed())
        .bind(account.version())
        .bind(account.created_at())
        .execute(&mut *self.conn)
        .await?;

        Ok(())
    }

    async fn get(&mut self, id: Uuid) -> Result<Account, StoreError> {
        // Shared lock: concurrent mirror writes proceed, a concurrent close waits
        let row: Option<AccountRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, name, account_type, currency, is_closed, version, created_at
            FROM accounts
            WHERE id = $1
            FOR SHARE
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.conn)
        .await?;

        row.ok_or_else(|| StoreError::not_found("Account", id))?
            .into_account()
    }

    async fn update(&mut self, account: &mut Account) -> Result<(), StoreError> {
        let expected = account.version();

        let rows = sqlx::query(
            r#"
            UPDATE accounts
            SET name = $3, is_closed = $4, version = version + 1
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(account.id())
        .bind(expected)
        .bind(account.name())
        .bind(account.is_closed())
        .execute(&mut *self.conn)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(StoreError::ConcurrencyConflict {
                aggregate_id: account.id(),
            });
        }

        account.mark_persisted(expected + 1);
        Ok(())
    }
}
