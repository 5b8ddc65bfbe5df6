//! Alerter binary

use alerter::{AlerterConfig, AlerterService};
use sensorhub_core::{PipelineError, Result, ServiceRuntime};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let _telemetry = sensorhub_telemetry::init("alerter")
        .map_err(|e| PipelineError::Config(e.to_string()))?;

    info!("Starting Alerter microservice");

    let config = AlerterConfig::from_env()?;
    let service = Arc::new(AlerterService::new(config));
    ServiceRuntime::run(service).await
}
