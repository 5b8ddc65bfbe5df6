//! REST API handlers

use axum::{extract::State, http::StatusCode, Json};
use sensorhub_core::{HealthStatus, ReadinessStatus};
use sensorhub_telemetry::Sample;
use serde::Serialize;

use super::AppState;

pub async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(state.health("aggregator", env!("CARGO_PKG_VERSION")))
}

pub async fn ready_check(State(state): State<AppState>) -> (StatusCode, Json<ReadinessStatus>) {
    let status = state.readiness().await;
    let code = if status.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub uptime_seconds: u64,
    pub window_ms: i64,
    pub active_windows: usize,
    pub subscribers: usize,
    pub metrics_published: u64,
    pub metrics_dropped: u64,
    pub counters: Vec<Sample>,
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        uptime_seconds: state.start_time.elapsed().as_secs(),
        window_ms: state.aggregator.window_ms(),
        active_windows: state.aggregator.key_count(),
        subscribers: state.hub.subscriber_count(),
        metrics_published: state.hub.published_total(),
        metrics_dropped: state.hub.dropped_total(),
        counters: state.stats.samples(),
    })
}
