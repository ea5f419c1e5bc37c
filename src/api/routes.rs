//! API Routes
//!
//! Operational endpoints of the dispatcher process: liveness and outbox
//! backlog figures. The end-user ledger API lives elsewhere.

use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

use crate::error::AppError;
use crate::outbox::OutboxSource;

/// Shared state of the operational router
#[derive(Clone)]
pub struct ApiState {
    pub outbox: Arc<dyn OutboxSource>,
    /// Backlog age from which `/outbox/stats` reports `lagging`
    pub lag_warn_after: Duration,
}

// =========================================================================
// Response types
// =========================================================================

#[derive(Debug, Serialize)]
pub struct OutboxStatsResponse {
    pub pending: i64,
    pub oldest_pending_at: Option<DateTime<Utc>>,
    pub oldest_pending_age_secs: Option<i64>,
    pub lagging: bool,
}

// =========================================================================
// Router
// =========================================================================

/// Create the API router
pub fn create_router() -> Router<ApiState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/outbox/stats", get(outbox_stats))
}

/// Router with state and request tracing applied
pub fn build_router(state: ApiState) -> Router {
    create_router()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

/// Backlog of undelivered outbox rows
async fn outbox_stats(
    State(state): State<ApiState>,
) -> Result<Json<OutboxStatsResponse>, AppError> {
    let stats = state.outbox.stats().await?;
    let age = stats.oldest_pending_age_secs(Utc::now());

    Ok(Json(OutboxStatsResponse {
        pending: stats.pending,
        oldest_pending_at: stats.oldest_pending_at,
        oldest_pending_age_secs: age,
        lagging: age.is_some_and(|age| age as u64 >= state.lag_warn_after.as_secs()),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AccountEvent;
    use crate::outbox::NewOutboxEvent;
    use crate::store::{InMemoryStore, UnitOfWorkFactory};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;
    use uuid::Uuid;

    fn router(store: &InMemoryStore, lag_warn_after: Duration) -> Router {
        build_router(ApiState {
            outbox: Arc::new(store.outbox_source()),
            lag_warn_after,
        })
    }

    #[tokio::test]
    async fn test_health_check() {
        let response = router(&InMemoryStore::new(), Duration::from_secs(300))
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test]
    async fn test_outbox_stats_reports_pending_rows() {
        let store = InMemoryStore::new();
        let mut uow = store.begin().await.unwrap();
        uow.collect_events(vec![NewOutboxEvent::from_event(&AccountEvent::AccountClosed {
            account_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
        })
        .unwrap()]);
        uow.commit().await.unwrap();

        let response = router(&store, Duration::ZERO)
            .oneshot(Request::get("/outbox/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["pending"], 1);
        assert_eq!(json["lagging"], true);
    }

    #[tokio::test]
    async fn test_outbox_stats_empty() {
        let response = router(&InMemoryStore::new(), Duration::from_secs(300))
            .oneshot(Request::get("/outbox/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["pending"], 0);
        assert_eq!(json["lagging"], false);
        assert!(json["oldest_pending_at"].is_null());
    }
}
