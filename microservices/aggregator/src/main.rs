//! Aggregator binary

use aggregator::{AggregatorConfig, AggregatorService};
use sensorhub_core::{PipelineError, Result, ServiceRuntime};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let _telemetry = sensorhub_telemetry::init("aggregator")
        .map_err(|e| PipelineError::Config(e.to_string()))?;

    info!("Starting Aggregator microservice");

    let config = AggregatorConfig::from_env()?;
    let service = Arc::new(AggregatorService::new(config)?);
    ServiceRuntime::run(service).await
}
