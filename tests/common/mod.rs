//! Common test utilities

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use finance_ledger::aggregate::AccountType;
use finance_ledger::domain::{Currency, Money};
use finance_ledger::handlers::{AccountHandler, CreateAccountCommand, TransactionHandler};
use finance_ledger::outbox::{DeliveryError, EventSink, LedgerEvent, OutboxEvent};
use finance_ledger::store::UnitOfWorkFactory;
use finance_ledger::OperationContext;

/// Handlers wired to one store, acting as one user
pub struct Ledger {
    pub accounts: AccountHandler,
    pub transactions: TransactionHandler,
    pub context: OperationContext,
}

impl Ledger {
    pub fn new(factory: Arc<dyn UnitOfWorkFactory>) -> Self {
        Self {
            accounts: AccountHandler::new(factory.clone()),
            transactions: TransactionHandler::new(factory),
            context: OperationContext::new(Uuid::new_v4()),
        }
    }

    pub async fn open(&self, name: &str) -> Uuid {
        self.accounts
            .create(
                CreateAccountCommand::new(name, AccountType::Checking, Currency::EUR),
                &self.context,
            )
            .await
            .expect("Failed to open account")
            .account_id
    }
}

pub fn eur(amount: &str) -> Money {
    Money::parse(amount, Currency::EUR).unwrap()
}

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
}

/// Sink that keeps every decoded event it was handed
#[derive(Default)]
pub struct RecordingSink {
    pub received: Mutex<Vec<(i64, LedgerEvent)>>,
}

impl RecordingSink {
    pub fn ids(&self) -> Vec<i64> {
        self.received.lock().unwrap().iter().map(|(id, _)| *id).collect()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    fn name(&self) -> &str {
        "recorder"
    }

    async fn deliver(&self, event: &OutboxEvent) -> Result<(), DeliveryError> {
        let decoded = event.decode()?;
        self.received.lock().unwrap().push((event.id, decoded));
        Ok(())
    }
}

/// Connect to `DATABASE_URL` and empty every ledger table
pub async fn setup_test_db() -> PgPool {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set for tests");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    sqlx::query(
        "TRUNCATE TABLE split_lines, transactions, accounts, outbox_events, \
         outbox_events_archive, processed_events RESTART IDENTITY CASCADE",
    )
    .execute(&pool)
    .await
    .expect("Failed to clean up DB");

    pool
}
