//! finance_ledger - outbox dispatcher process
//!
//! Drains the transactional outbox on a fixed interval, runs outbox
//! maintenance jobs and serves health and backlog endpoints.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use finance_ledger::api::{self, ApiState};
use finance_ledger::config::SinkKind;
use finance_ledger::idempotency::{IdempotentSink, PgProcessedEventStore};
use finance_ledger::jobs::{JobScheduler, JobSchedulerConfig};
use finance_ledger::outbox::{EventSink, LogSink, OutboxDispatcher, PgNotifySink};
use finance_ledger::{AppContext, Config};

/// Initialize tracing/logging
fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "finance_ledger=debug,tower_http=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    if config.is_production() {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Sink selected by `OUTBOX_SINK`
fn build_sink(ctx: &AppContext) -> Arc<dyn EventSink> {
    match ctx.config.outbox_sink {
        SinkKind::Log => Arc::new(IdempotentSink::new(
            LogSink,
            Arc::new(PgProcessedEventStore::new(ctx.pool.clone())),
        )),
        SinkKind::PgNotify => Arc::new(PgNotifySink::new(
            ctx.pool.clone(),
            ctx.config.outbox_notify_channel.clone(),
        )),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(&config);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!(
        environment = %config.environment,
        sink = ?config.outbox_sink,
        "Starting finance_ledger outbox dispatcher"
    );

    let ctx = AppContext::init(&config).await?;

    // Dispatcher
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let dispatcher = OutboxDispatcher::with_config(
        ctx.outbox.clone(),
        build_sink(&ctx),
        config.dispatcher(),
    );
    let dispatcher_handle = tokio::spawn(async move {
        dispatcher
            .run_until(async move {
                let _ = stop_rx.changed().await;
            })
            .await;
    });

    // Maintenance jobs
    let scheduler = JobScheduler::with_config(
        ctx.pool.clone(),
        ctx.outbox.clone(),
        JobSchedulerConfig {
            archive_after_days: config.outbox_archive_after_days,
            lag_warn_after: config.outbox_lag_warn,
            ..Default::default()
        },
    );
    let scheduler_handle = scheduler.start();

    // Health and backlog endpoints
    let app = api::build_router(ApiState {
        outbox: ctx.outbox.clone(),
        lag_warn_after: config.outbox_lag_warn,
    });
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup
    tracing::info!("Shutting down...");
    let _ = stop_tx.send(true);
    if let Err(e) = dispatcher_handle.await {
        tracing::error!(error = %e, "Dispatcher task ended abnormally");
    }
    scheduler_handle.abort();

    ctx.pool.close().await;
    tracing::info!("Database connections closed. Goodbye!");

    Ok(())
}

/// Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
