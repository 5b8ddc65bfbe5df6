//! Aggregator Microservice
//!
//! Turns the raw readings stream into rolling per-sensor metrics:
//! - Consumer-group pull from the durable log, ack after publish
//! - Sliding-window averages per sensor/site pair
//! - Filtered, non-blocking fan-out of metrics to WebSocket subscribers

pub mod api;
pub mod config;
pub mod consumer;
pub mod log;
pub mod stats;
pub mod window;

use async_trait::async_trait;
use parking_lot::Mutex;
use sensorhub_core::{
    FanoutHub, HealthStatus, Metric, PipelineError, PipelineService, ReadinessStatus, Result,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::info;

pub use api::AppState;
pub use config::{AggregatorConfig, LogConfig};
pub use consumer::{BatchOutcome, ConsumerSettings, ReadingConsumer};
pub use log::{DurableLog, LogError, LogRecord, RedisStreamLog};
pub use stats::AggregatorStats;
pub use window::{WindowedAggregator, DEFAULT_WINDOW_MS};

pub struct AggregatorService {
    config: AggregatorConfig,
    state: AppState,
    consumer: Arc<ReadingConsumer>,
    consumer_task: Mutex<Option<JoinHandle<()>>>,
}

impl AggregatorService {
    /// Build the service against the Redis stream named in `config`.
    pub fn new(config: AggregatorConfig) -> Result<Self> {
        let log = RedisStreamLog::new(config.log.clone()).map_err(PipelineError::from)?;
        Ok(Self::with_log(config, Arc::new(log)))
    }

    /// Build the service against any durable log implementation.
    pub fn with_log(config: AggregatorConfig, log: Arc<dyn DurableLog>) -> Self {
        let aggregator = Arc::new(WindowedAggregator::new(config.window_ms));
        let hub = FanoutHub::with_capacity("metrics", config.subscriber_buffer);
        let stats = AggregatorStats::new();

        let consumer = Arc::new(ReadingConsumer::new(
            log.clone(),
            aggregator.clone(),
            hub.clone(),
            stats.clone(),
            ConsumerSettings {
                batch_count: config.log.batch_count,
                block: config.log.block,
                retry_delay: config.log.retry_delay,
            },
        ));

        Self {
            config,
            state: AppState::new(hub, aggregator, log, stats),
            consumer,
            consumer_task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn hub(&self) -> &FanoutHub<Metric> {
        &self.state.hub
    }

    /// Start consuming and serve the API on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let consumer = self.consumer.clone();
        let handle = tokio::spawn(async move { consumer.run().await });
        if let Some(previous) = self.consumer_task.lock().replace(handle) {
            previous.abort();
        }

        let app = api::create_router(self.state.clone());
        axum::serve(listener, app).await?;
        Ok(())
    }
}

#[async_trait]
impl PipelineService for AggregatorService {
    fn service_id(&self) -> &'static str {
        "aggregator"
    }

    async fn health(&self) -> HealthStatus {
        self.state.health(self.service_id(), self.version())
    }

    async fn ready(&self) -> ReadinessStatus {
        self.state.readiness().await
    }

    async fn shutdown(&self) -> Result<()> {
        info!("Shutting down Aggregator service");
        if let Some(handle) = self.consumer_task.lock().take() {
            handle.abort();
        }
        self.state.hub.shutdown();
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        info!(
            http = %self.config.http_bind,
            log = %self.state.log.describe(),
            window_ms = self.config.window_ms,
            "Starting Aggregator server"
        );

        let listener = TcpListener::bind(&self.config.http_bind)
            .await
            .map_err(|e| PipelineError::Network(format!("bind {}: {}", self.config.http_bind, e)))?;
        self.serve(listener).await
    }
}
