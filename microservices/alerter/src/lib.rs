//! Alerter Microservice
//!
//! Watches the aggregator's metric stream and raises threshold alerts:
//! - Single unfiltered metric subscription with fixed-delay reconnect
//! - Independent temperature and humidity checks per metric
//! - Filtered, non-blocking fan-out of alerts to WebSocket subscribers

pub mod api;
pub mod config;
pub mod evaluator;
pub mod source;
pub mod stats;

use async_trait::async_trait;
use parking_lot::Mutex;
use sensorhub_core::{
    Alert, FanoutHub, HealthStatus, PipelineError, PipelineService, ReadinessStatus, Result,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::info;

pub use api::AppState;
pub use config::AlerterConfig;
pub use evaluator::{AlertEvaluator, EvaluatorState, Thresholds};
pub use source::{MetricSource, MetricStream, WsMetricSource};
pub use stats::AlerterStats;

pub struct AlerterService {
    config: AlerterConfig,
    state: AppState,
    evaluator_task: Mutex<Option<JoinHandle<()>>>,
}

impl AlerterService {
    /// Build the service against the aggregator named in `config`.
    pub fn new(config: AlerterConfig) -> Self {
        let source = Arc::new(WsMetricSource::new(config.aggregator_url.clone()));
        Self::with_source(config, source)
    }

    /// Build the service against any metric source.
    pub fn with_source(config: AlerterConfig, source: Arc<dyn MetricSource>) -> Self {
        let hub = FanoutHub::with_capacity("alerts", config.subscriber_buffer);
        let stats = AlerterStats::new();
        let evaluator = Arc::new(AlertEvaluator::new(
            source,
            hub.clone(),
            config.thresholds,
            config.reconnect_delay,
            stats.clone(),
        ));

        Self {
            config,
            state: AppState::new(hub, evaluator, stats),
            evaluator_task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn hub(&self) -> &FanoutHub<Alert> {
        &self.state.hub
    }

    pub fn evaluator(&self) -> &Arc<AlertEvaluator> {
        &self.state.evaluator
    }

    /// Start evaluating and serve the API on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let evaluator = self.state.evaluator.clone();
        let handle = tokio::spawn(async move { evaluator.run().await });
        if let Some(previous) = self.evaluator_task.lock().replace(handle) {
            previous.abort();
        }

        let app = api::create_router(self.state.clone());
        axum::serve(listener, app).await?;
        Ok(())
    }
}

#[async_trait]
impl PipelineService for AlerterService {
    fn service_id(&self) -> &'static str {
        "alerter"
    }

    async fn health(&self) -> HealthStatus {
        self.state.health(self.service_id(), self.version())
    }

    async fn ready(&self) -> ReadinessStatus {
        self.state.readiness()
    }

    async fn shutdown(&self) -> Result<()> {
        info!("Shutting down Alerter service");
        if let Some(handle) = self.evaluator_task.lock().take() {
            handle.abort();
        }
        self.state.hub.shutdown();
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        info!(
            http = %self.config.http_bind,
            aggregator = %self.config.aggregator_url,
            "Starting Alerter server"
        );

        let listener = TcpListener::bind(&self.config.http_bind)
            .await
            .map_err(|e| PipelineError::Network(format!("bind {}: {}", self.config.http_bind, e)))?;
        self.serve(listener).await
    }
}
