//! REST API handlers

use axum::{extract::State, http::StatusCode, Json};
use sensorhub_core::{HealthStatus, ReadinessStatus};
use sensorhub_telemetry::Sample;
use serde::Serialize;

use super::AppState;
use crate::evaluator::{EvaluatorState, Thresholds};

pub async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(state.health("alerter", env!("CARGO_PKG_VERSION")))
}

pub async fn ready_check(State(state): State<AppState>) -> (StatusCode, Json<ReadinessStatus>) {
    let status = state.readiness();
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
    pub evaluator_state: EvaluatorState,
    pub thresholds: Thresholds,
    pub subscribers: usize,
    pub alerts_published: u64,
    pub alerts_dropped: u64,
    pub counters: Vec<Sample>,
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        uptime_seconds: state.start_time.elapsed().as_secs(),
        evaluator_state: state.evaluator.state(),
        thresholds: state.evaluator.thresholds(),
        subscribers: state.hub.subscriber_count(),
        alerts_published: state.hub.published_total(),
        alerts_dropped: state.hub.dropped_total(),
        counters: state.stats.samples(),
    })
}
