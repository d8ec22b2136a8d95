//! Operator surface: status query and manual trigger.

use crate::scheduler::{FullRefreshReport, TickReport};
use crate::store::CanonicalStore;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};
use tracing::{info, warn};

/// Consecutive failed cycles before the service reports itself degraded.
const DEGRADED_AFTER: usize = 5;
/// Consecutive failed cycles before the health check fails outright.
const UNAVAILABLE_AFTER: usize = 10;

#[derive(Clone, Default)]
pub struct HealthState {
    pub last_full_refresh: Arc<RwLock<Option<DateTime<Utc>>>>,
    pub last_full_refresh_report: Arc<RwLock<Option<FullRefreshReport>>>,
    pub last_tick: Arc<RwLock<Option<DateTime<Utc>>>>,
    pub last_tick_report: Arc<RwLock<Option<TickReport>>>,
    /// Full refreshes that failed outright or left part of the data stale.
    pub full_refresh_failures: Arc<RwLock<usize>>,
    pub tick_failures: Arc<RwLock<usize>>,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    /// A refresh where one half failed still counts against the full-refresh
    /// streak, so a source that stays down shows up as degraded.
    pub async fn record_full_refresh(&self, report: FullRefreshReport) {
        let partial = !report.failures.is_empty();
        *self.last_full_refresh.write().await = Some(Utc::now());
        *self.last_full_refresh_report.write().await = Some(report);
        let mut failures = self.full_refresh_failures.write().await;
        *failures = if partial { *failures + 1 } else { 0 };
    }

    pub async fn record_full_refresh_failure(&self) {
        *self.full_refresh_failures.write().await += 1;
    }

    /// A tick that ran counts as healthy even if some matchups failed; those
    /// failures are listed in the report.
    pub async fn record_tick(&self, report: TickReport) {
        *self.last_tick.write().await = Some(Utc::now());
        *self.last_tick_report.write().await = Some(report);
        *self.tick_failures.write().await = 0;
    }

    pub async fn record_tick_failure(&self) {
        *self.tick_failures.write().await += 1;
    }

    /// The worse of the two failure streaks.
    pub async fn consecutive_failures(&self) -> usize {
        let full = *self.full_refresh_failures.read().await;
        let tick = *self.tick_failures.read().await;
        full.max(tick)
    }
}

/// Status label and HTTP status for a run of consecutive failures.
pub fn status_for(consecutive_failures: usize) -> (&'static str, StatusCode) {
    let status = if consecutive_failures > DEGRADED_AFTER {
        "degraded"
    } else {
        "ok"
    };

    let http_status = if consecutive_failures > UNAVAILABLE_AFTER {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (status, http_status)
}

#[derive(Clone)]
struct AppState {
    health: HealthState,
    trigger: Arc<Notify>,
    store: Arc<dyn CanonicalStore>,
}

pub fn router(health: HealthState, trigger: Arc<Notify>, store: Arc<dyn CanonicalStore>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/trigger", post(trigger_handler))
        .with_state(AppState {
            health,
            trigger,
            store,
        })
}

/// Health check handler
async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let health = &state.health;
    let failures = health.consecutive_failures().await;
    let (mut status, mut http_status) = status_for(failures);

    let store_reachable = match state.store.ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!("Health check could not reach the store: {}", e);
            status = "store_unreachable";
            http_status = StatusCode::SERVICE_UNAVAILABLE;
            false
        }
    };

    (
        http_status,
        Json(json!({
            "service": "ncaam-ingestion",
            "version": env!("CARGO_PKG_VERSION"),
            "status": status,
            "last_full_refresh": health.last_full_refresh.read().await.map(|t| t.to_rfc3339()),
            "last_full_refresh_report": *health.last_full_refresh_report.read().await,
            "last_tick": health.last_tick.read().await.map(|t| t.to_rfc3339()),
            "last_tick_report": *health.last_tick_report.read().await,
            "store_reachable": store_reachable,
            "full_refresh_failures": *health.full_refresh_failures.read().await,
            "tick_failures": *health.tick_failures.read().await,
            "consecutive_failures": failures,
        })),
    )
}

/// Request an immediate full refresh.
async fn trigger_handler(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    info!("Full refresh requested via /trigger");
    state.trigger.notify_one();
    (StatusCode::ACCEPTED, Json(json!({ "status": "queued" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn app_state(health: HealthState, store: &MemoryStore) -> AppState {
        AppState {
            health,
            trigger: Arc::new(Notify::new()),
            store: Arc::new(store.clone()),
        }
    }

    #[test]
    fn status_thresholds() {
        assert_eq!(status_for(0), ("ok", StatusCode::OK));
        assert_eq!(status_for(6), ("degraded", StatusCode::OK));
        assert_eq!(status_for(11), ("degraded", StatusCode::SERVICE_UNAVAILABLE));
    }

    #[tokio::test]
    async fn success_resets_its_own_streak() {
        let health = HealthState::new();
        health.record_tick_failure().await;
        health.record_tick_failure().await;
        assert_eq!(health.consecutive_failures().await, 2);

        health.record_tick(TickReport::default()).await;
        assert_eq!(health.consecutive_failures().await, 0);
        assert!(health.last_tick.read().await.is_some());
    }

    #[tokio::test]
    async fn healthy_ticks_do_not_hide_failing_full_refreshes() {
        let health = HealthState::new();
        for _ in 0..20 {
            health.record_full_refresh_failure().await;
            health.record_tick(TickReport::default()).await;
        }

        let failures = health.consecutive_failures().await;
        assert_eq!(failures, 20);
        assert_eq!(status_for(failures), ("degraded", StatusCode::SERVICE_UNAVAILABLE));
    }

    #[tokio::test]
    async fn partial_full_refresh_extends_the_streak() {
        let health = HealthState::new();
        let partial = FullRefreshReport {
            failures: vec!["ratings: upstream unavailable".to_string()],
            ..FullRefreshReport::default()
        };
        health.record_full_refresh(partial.clone()).await;
        health.record_full_refresh(partial).await;
        assert_eq!(*health.full_refresh_failures.read().await, 2);
        assert!(health.last_full_refresh.read().await.is_some());

        health.record_full_refresh(FullRefreshReport::default()).await;
        assert_eq!(*health.full_refresh_failures.read().await, 0);
    }

    #[tokio::test]
    async fn health_handler_reports_last_cycle() {
        let health = HealthState::new();
        health.record_full_refresh(FullRefreshReport::default()).await;
        let store = MemoryStore::new();

        let (status, Json(body)) = health_handler(State(app_state(health, &store))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["store_reachable"], true);
        assert!(body["last_full_refresh"].is_string());
        assert!(body["last_tick"].is_null());
    }

    #[tokio::test]
    async fn unreachable_store_fails_health_check() {
        let store = MemoryStore::new();
        store.set_unavailable(true);

        let (status, Json(body)) =
            health_handler(State(app_state(HealthState::new(), &store))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "store_unreachable");
        assert_eq!(body["store_reachable"], false);
    }

    #[tokio::test]
    async fn trigger_wakes_waiter() {
        let store = MemoryStore::new();
        let state = app_state(HealthState::new(), &store);
        let trigger = state.trigger.clone();

        let (status, _) = trigger_handler(State(state)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        // The permit is stored, so a later waiter returns immediately.
        tokio::time::timeout(std::time::Duration::from_secs(1), trigger.notified())
            .await
            .unwrap();
    }
}
