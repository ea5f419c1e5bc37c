//! Load Testing Tool
//!
//! Inserts synthetic outbox rows, then drains them with the dispatcher to
//! measure write and dispatch throughput.
//!
//! Run with: cargo run --bin load_test --release -- --events 1000

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use finance_ledger::domain::AccountEvent;
use finance_ledger::outbox::{
    self, DeliveryError, DispatcherConfig, EventSink, NewOutboxEvent, OutboxDispatcher,
    OutboxEvent, PgOutboxSource,
};

const INSERT_CHUNK: usize = 500;

/// Counts deliveries without doing anything else
#[derive(Default)]
struct CountingSink {
    delivered: AtomicU64,
}

#[async_trait]
impl EventSink for CountingSink {
    fn name(&self) -> &str {
        "load_test"
    }

    async fn deliver(&self, _event: &OutboxEvent) -> Result<(), DeliveryError> {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    let event_count: usize = args
        .iter()
        .position(|a| a == "--events")
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
        .unwrap_or(1000);

    let database_url = std::env::var("DATABASE_URL")?;

    println!("Load Test - {} outbox events", event_count);
    println!("Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await?;

    // Write path
    let start = Instant::now();
    let mut inserted = 0usize;

    while inserted < event_count {
        let chunk = INSERT_CHUNK.min(event_count - inserted);
        let rows = (0..chunk)
            .map(|_| {
                NewOutboxEvent::from_event(&AccountEvent::AccountClosed {
                    account_id: Uuid::new_v4(),
                    occurred_at: Utc::now(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut tx = pool.begin().await?;
        outbox::record(&mut *tx, &rows).await?;
        tx.commit().await?;

        inserted += chunk;
        println!("Inserted {} events...", inserted);
    }

    let write_elapsed = start.elapsed();

    // Dispatch path
    let sink = Arc::new(CountingSink::default());
    let dispatcher = OutboxDispatcher::with_config(
        Arc::new(PgOutboxSource::new(pool.clone())),
        sink.clone(),
        DispatcherConfig::default(),
    );

    let start = Instant::now();
    loop {
        let report = dispatcher.run_once().await?;
        if report.claimed == 0 {
            break;
        }
    }
    let dispatch_elapsed = start.elapsed();
    let delivered = sink.delivered.load(Ordering::Relaxed);

    println!("\n=== Load Test Results ===");
    println!("Total events: {}", event_count);
    println!(
        "Write: {:.2}s ({:.0} events/sec)",
        write_elapsed.as_secs_f64(),
        inserted as f64 / write_elapsed.as_secs_f64()
    );
    println!(
        "Dispatch: {} delivered in {:.2}s ({:.0} events/sec)",
        delivered,
        dispatch_elapsed.as_secs_f64(),
        delivered as f64 / dispatch_elapsed.as_secs_f64()
    );

    Ok(())
}
