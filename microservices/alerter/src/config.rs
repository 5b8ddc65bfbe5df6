//! Alerter Configuration

use sensorhub_core::{env_millis, env_or, env_string, require_positive, Result, DEFAULT_SUBSCRIBER_BUFFER};
use std::time::Duration;

use crate::evaluator::Thresholds;

#[derive(Debug, Clone)]
pub struct AlerterConfig {
    pub http_bind: String,
    pub aggregator_url: String,
    pub thresholds: Thresholds,
    pub reconnect_delay: Duration,
    pub subscriber_buffer: usize,
}

impl Default for AlerterConfig {
    fn default() -> Self {
        Self {
            http_bind: "0.0.0.0:50054".to_string(),
            aggregator_url: "ws://aggregator:50053/v1/metrics/subscribe".to_string(),
            thresholds: Thresholds::default(),
            reconnect_delay: Duration::from_millis(2000),
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
        }
    }
}

impl AlerterConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            http_bind: env_string("HTTP_BIND", &defaults.http_bind),
            aggregator_url: env_string("AGGREGATOR_URL", &defaults.aggregator_url),
            thresholds: Thresholds {
                temperature: env_or("THRESHOLD_TEMP", defaults.thresholds.temperature)?,
                humidity: env_or("THRESHOLD_HUM", defaults.thresholds.humidity)?,
            },
            reconnect_delay: env_millis("RECONNECT_DELAY_MS", 2000)?,
            subscriber_buffer: require_positive(
                "SUBSCRIBER_BUFFER",
                env_or("SUBSCRIBER_BUFFER", defaults.subscriber_buffer)?,
            )?,
        })
    }
}
