//! Outbox Dispatcher
//!
//! Polls claimed batches from an `OutboxSource` and hands each row to an
//! `EventSink`. A row is marked processed only after the sink returned
//! success within the delivery timeout; anything else leaves it pending for
//! the next cycle. There is no retry cap: stuck rows show up as backlog age.

use chrono::Utc;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, timeout, MissedTickBehavior};

use super::{DeliveryError, EventSink, OutboxError, OutboxSource, OutboxStats};

/// Dispatcher tuning
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum rows claimed per cycle (default: 100)
    pub batch_size: i64,
    /// Delay between polls (default: 1 second)
    pub poll_interval: Duration,
    /// Upper bound for one delivery attempt (default: 5 seconds)
    pub delivery_timeout: Duration,
    /// Warn when the oldest pending row is older than this (default: 5 minutes)
    pub lag_warn_after: Duration,
    /// How often backlog is checked (default: 1 minute)
    pub lag_check_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval: Duration::from_millis(1000),
            delivery_timeout: Duration::from_millis(5000),
            lag_warn_after: Duration::from_secs(300),
            lag_check_interval: Duration::from_secs(60),
        }
    }
}

/// Outcome of one dispatch cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub claimed: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Rows held back because an earlier row of the same aggregate failed
    pub skipped: usize,
}

/// Polling dispatcher
pub struct OutboxDispatcher {
    source: Arc<dyn OutboxSource>,
    sink: Arc<dyn EventSink>,
    config: DispatcherConfig,
}

impl OutboxDispatcher {
    pub fn new(source: Arc<dyn OutboxSource>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            source,
            sink,
            config: DispatcherConfig::default(),
        }
    }

    pub fn with_config(
        source: Arc<dyn OutboxSource>,
        sink: Arc<dyn EventSink>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            source,
            sink,
            config,
        }
    }

    /// Claim one batch and deliver it in ascending id order.
    pub async fn run_once(&self) -> Result<DispatchReport, OutboxError> {
        let mut batch = self.source.claim(self.config.batch_size).await?;
        let events = batch.events().to_vec();

        let mut report = DispatchReport {
            claimed: events.len(),
            ..Default::default()
        };
        let mut blocked: HashSet<(String, String)> = HashSet::new();

        for event in &events {
            let aggregate = (event.aggregate_type.clone(), event.aggregate_id.clone());
            if blocked.contains(&aggregate) {
                report.skipped += 1;
                continue;
            }

            match self.deliver(event).await {
                Ok(()) => {
                    batch.mark_processed(event.id).await?;
                    report.delivered += 1;
                    tracing::debug!(
                        outbox_id = event.id,
                        event_type = %event.event_type,
                        aggregate_id = %event.aggregate_id,
                        sink = self.sink.name(),
                        "Event delivered"
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    blocked.insert(aggregate);
                    tracing::warn!(
                        outbox_id = event.id,
                        event_type = %event.event_type,
                        aggregate_id = %event.aggregate_id,
                        sink = self.sink.name(),
                        error = %e,
                        "Event delivery failed, will retry"
                    );
                }
            }
        }

        batch.finish().await?;

        if report.claimed > 0 {
            tracing::info!(
                claimed = report.claimed,
                delivered = report.delivered,
                failed = report.failed,
                skipped = report.skipped,
                "Outbox batch dispatched"
            );
        }

        Ok(report)
    }

    async fn deliver(&self, event: &super::OutboxEvent) -> Result<(), DeliveryError> {
        // Unparseable rows never reach the sink
        event.decode()?;

        match timeout(self.config.delivery_timeout, self.sink.deliver(event)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(self.config.delivery_timeout)),
        }
    }

    /// Read backlog figures and warn when the oldest pending row is too old.
    pub async fn check_lag(&self) -> Result<OutboxStats, OutboxError> {
        let stats = self.source.stats().await?;
        report_lag(&stats, self.config.lag_warn_after);
        Ok(stats)
    }

    /// Poll until `shutdown` resolves. Cycle errors are logged, never fatal.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tracing::info!(
            sink = self.sink.name(),
            batch_size = self.config.batch_size,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Outbox dispatcher started"
        );

        let mut poll = interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut lag = interval(self.config.lag_check_interval);
        lag.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = poll.tick() => {
                    // Drain a backlog without waiting for the next tick
                    loop {
                        match self.run_once().await {
                            Ok(report) if report.claimed as i64 == self.config.batch_size
                                && report.failed == 0 => continue,
                            Ok(_) => break,
                            Err(e) => {
                                tracing::error!(error = %e, "Outbox dispatch cycle failed");
                                break;
                            }
                        }
                    }
                }
                _ = lag.tick() => {
                    if let Err(e) = self.check_lag().await {
                        tracing::error!(error = %e, "Outbox lag check failed");
                    }
                }
            }
        }

        tracing::info!("Outbox dispatcher stopped");
    }
}

/// Log backlog figures; warns once the oldest pending row exceeds `warn_after`.
pub fn report_lag(stats: &OutboxStats, warn_after: Duration) {
    let age = stats.oldest_pending_age_secs(Utc::now());

    match age {
        Some(age) if age as u64 >= warn_after.as_secs() => tracing::warn!(
            pending = stats.pending,
            oldest_pending_age_secs = age,
            "Outbox backlog is lagging"
        ),
        _ => tracing::debug!(
            pending = stats.pending,
            oldest_pending_age_secs = age,
            "Outbox backlog"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AccountEvent;
    use crate::outbox::{NewOutboxEvent, OutboxEvent};
    use crate::store::{InMemoryStore, UnitOfWorkFactory};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use uuid::Uuid;

    /// Records delivered ids; fails for the ids in `fail_ids`
    #[derive(Default)]
    struct RecordingSink {
        delivered: Mutex<Vec<i64>>,
        fail_ids: HashSet<i64>,
    }

    impl RecordingSink {
        fn failing(ids: &[i64]) -> Self {
            Self {
                fail_ids: ids.iter().copied().collect(),
                ..Default::default()
            }
        }

        fn delivered(&self) -> Vec<i64> {
            self.delivered.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        async fn deliver(&self, event: &OutboxEvent) -> Result<(), DeliveryError> {
            if self.fail_ids.contains(&event.id) {
                return Err(DeliveryError::Rejected("unavailable".to_string()));
            }
            self.delivered.lock().unwrap().push(event.id);
            Ok(())
        }
    }

    struct SlowSink;

    #[async_trait]
    impl EventSink for SlowSink {
        fn name(&self) -> &str {
            "slow"
        }

        async fn deliver(&self, _event: &OutboxEvent) -> Result<(), DeliveryError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }
    }

    fn closed(account_id: Uuid) -> NewOutboxEvent {
        NewOutboxEvent::from_event(&AccountEvent::AccountClosed {
            account_id,
            occurred_at: Utc::now(),
        })
        .unwrap()
    }

    async fn record(store: &InMemoryStore, rows: Vec<NewOutboxEvent>) {
        let mut uow = store.begin().await.unwrap();
        uow.collect_events(rows);
        uow.commit().await.unwrap();
    }

    fn dispatcher(store: &InMemoryStore, sink: Arc<dyn EventSink>) -> OutboxDispatcher {
        OutboxDispatcher::with_config(
            Arc::new(store.outbox_source()),
            sink,
            DispatcherConfig {
                batch_size: 10,
                delivery_timeout: Duration::from_millis(50),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_delivers_in_order_and_never_again() {
        let store = InMemoryStore::new();
        record(
            &store,
            vec![closed(Uuid::new_v4()), closed(Uuid::new_v4()), closed(Uuid::new_v4())],
        )
        .await;

        let sink = Arc::new(RecordingSink::default());
        let dispatcher = dispatcher(&store, sink.clone());

        let report = dispatcher.run_once().await.unwrap();
        assert_eq!(report.claimed, 3);
        assert_eq!(report.delivered, 3);
        assert_eq!(sink.delivered(), vec![1, 2, 3]);
        assert!(store.outbox_events().iter().all(OutboxEvent::is_processed));

        let report = dispatcher.run_once().await.unwrap();
        assert_eq!(report, DispatchReport::default());
        assert_eq!(sink.delivered().len(), 3);
    }

    #[tokio::test]
    async fn test_failure_holds_back_later_rows_of_same_aggregate() {
        let store = InMemoryStore::new();
        let stuck = Uuid::new_v4();
        let other = Uuid::new_v4();
        record(&store, vec![closed(stuck), closed(other), closed(stuck)]).await;

        let failing = Arc::new(RecordingSink::failing(&[1]));
        let report = dispatcher(&store, failing.clone()).run_once().await.unwrap();

        assert_eq!(
            report,
            DispatchReport {
                claimed: 3,
                delivered: 1,
                failed: 1,
                skipped: 1,
            }
        );
        assert_eq!(failing.delivered(), vec![2]);

        let pending: Vec<i64> = store
            .outbox_events()
            .into_iter()
            .filter(|e| !e.is_processed())
            .map(|e| e.id)
            .collect();
        assert_eq!(pending, vec![1, 3]);

        let healthy = Arc::new(RecordingSink::default());
        let report = dispatcher(&store, healthy.clone()).run_once().await.unwrap();
        assert_eq!(report.delivered, 2);
        assert_eq!(healthy.delivered(), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_timeout_leaves_row_pending() {
        let store = InMemoryStore::new();
        record(&store, vec![closed(Uuid::new_v4())]).await;

        let report = dispatcher(&store, Arc::new(SlowSink)).run_once().await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.delivered, 0);
        assert!(!store.outbox_events()[0].is_processed());
    }

    #[tokio::test]
    async fn test_unparseable_payload_never_reaches_sink() {
        let store = InMemoryStore::new();
        let mut garbage = closed(Uuid::new_v4());
        garbage.payload = serde_json::json!({ "type": "AccountRenamed" });
        record(&store, vec![garbage]).await;

        let sink = Arc::new(RecordingSink::default());
        let report = dispatcher(&store, sink.clone()).run_once().await.unwrap();

        assert_eq!(report.failed, 1);
        assert!(sink.delivered().is_empty());
        assert!(!store.outbox_events()[0].is_processed());
    }

    #[tokio::test]
    async fn test_check_lag_reports_backlog() {
        let store = InMemoryStore::new();
        record(&store, vec![closed(Uuid::new_v4()), closed(Uuid::new_v4())]).await;

        let dispatcher = dispatcher(&store, Arc::new(RecordingSink::failing(&[1, 2])));
        dispatcher.run_once().await.unwrap();

        let stats = dispatcher.check_lag().await.unwrap();
        assert_eq!(stats.pending, 2);
        assert!(stats.oldest_pending_at.is_some());
    }

    #[tokio::test]
    async fn test_run_until_stops_on_shutdown() {
        let store = InMemoryStore::new();
        record(&store, vec![closed(Uuid::new_v4())]).await;
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = dispatcher(&store, sink.clone());

        dispatcher
            .run_until(tokio::time::sleep(Duration::from_millis(100)))
            .await;

        assert_eq!(sink.delivered(), vec![1]);
    }
}
