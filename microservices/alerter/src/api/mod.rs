//! API module - REST probes and the alert subscription socket

pub mod rest;
pub mod websocket;

use axum::{routing::get, Router};
use sensorhub_core::{Alert, DependencyStatus, FanoutHub, HealthStatus, ReadinessStatus};
use std::sync::Arc;
use std::time::Instant;

use crate::evaluator::{AlertEvaluator, EvaluatorState};
use crate::stats::AlerterStats;

#[derive(Clone)]
pub struct AppState {
    pub hub: FanoutHub<Alert>,
    pub evaluator: Arc<AlertEvaluator>,
    pub stats: AlerterStats,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(hub: FanoutHub<Alert>, evaluator: Arc<AlertEvaluator>, stats: AlerterStats) -> Self {
        Self {
            hub,
            evaluator,
            stats,
            start_time: Instant::now(),
        }
    }

    pub fn health(&self, service_id: &str, version: &str) -> HealthStatus {
        HealthStatus {
            healthy: !self.hub.is_shutdown(),
            service_id: service_id.to_string(),
            version: version.to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Ready while the metric subscription is live.
    pub fn readiness(&self) -> ReadinessStatus {
        let state = self.evaluator.state();
        let subscribed = state == EvaluatorState::Subscribed;
        ReadinessStatus {
            ready: subscribed && !self.hub.is_shutdown(),
            dependencies: vec![DependencyStatus {
                name: "metric-stream".to_string(),
                available: subscribed,
                detail: Some(format!("{:?}", state).to_lowercase()),
            }],
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(rest::health_check))
        .route("/ready", get(rest::ready_check))
        .route("/v1/stats", get(rest::stats))
        // Alert subscriptions
        .route("/v1/alerts/subscribe", get(websocket::subscribe_alerts))
        .with_state(state)
}
