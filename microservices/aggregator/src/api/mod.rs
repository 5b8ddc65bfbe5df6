//! API module - REST probes and the metric subscription socket

pub mod rest;
pub mod websocket;

use axum::{routing::get, Router};
use sensorhub_core::{DependencyStatus, FanoutHub, HealthStatus, Metric, ReadinessStatus};
use std::sync::Arc;
use std::time::Instant;

use crate::log::DurableLog;
use crate::stats::AggregatorStats;
use crate::window::WindowedAggregator;

/// Shared handles every handler needs
#[derive(Clone)]
pub struct AppState {
    pub hub: FanoutHub<Metric>,
    pub aggregator: Arc<WindowedAggregator>,
    pub log: Arc<dyn DurableLog>,
    pub stats: AggregatorStats,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        hub: FanoutHub<Metric>,
        aggregator: Arc<WindowedAggregator>,
        log: Arc<dyn DurableLog>,
        stats: AggregatorStats,
    ) -> Self {
        Self {
            hub,
            aggregator,
            log,
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

    /// Ready once the durable log has answered a read.
    pub async fn readiness(&self) -> ReadinessStatus {
        let log_up = self.log.is_healthy().await;
        ReadinessStatus {
            ready: log_up && !self.hub.is_shutdown(),
            dependencies: vec![DependencyStatus {
                name: self.log.describe(),
                available: log_up,
                detail: None,
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
        // Metric subscriptions
        .route("/v1/metrics/subscribe", get(websocket::subscribe_metrics))
        .with_state(state)
}
