//! Aggregator Configuration

use sensorhub_core::{env_millis, env_or, env_string, require_positive, Result, DEFAULT_SUBSCRIBER_BUFFER};
use std::time::Duration;

use crate::window::DEFAULT_WINDOW_MS;

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub http_bind: String,
    pub log: LogConfig,
    pub window_ms: i64,
    pub subscriber_buffer: usize,
}

/// Durable log addressing and pull sizing
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub redis_addr: String,
    pub stream: String,
    pub group: String,
    pub consumer: String,
    pub batch_count: usize,
    pub block: Duration,
    pub retry_delay: Duration,
}

impl LogConfig {
    /// Connection URL; a bare `host:port` gets the `redis://` scheme.
    pub fn redis_url(&self) -> String {
        if self.redis_addr.contains("://") {
            self.redis_addr.clone()
        } else {
            format!("redis://{}", self.redis_addr)
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            redis_addr: "redis:6379".to_string(),
            stream: "readings".to_string(),
            group: "agggrp".to_string(),
            consumer: "agg-1".to_string(),
            batch_count: 200,
            block: Duration::from_millis(5000),
            retry_delay: Duration::from_millis(1000),
        }
    }
}

impl AggregatorConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = LogConfig::default();

        let log = LogConfig {
            redis_addr: env_string("REDIS_ADDR", &defaults.redis_addr),
            stream: env_string("READINGS_STREAM", &defaults.stream),
            group: env_string("CONSUMER_GROUP", &defaults.group),
            consumer: env_string("CONSUMER_NAME", &defaults.consumer),
            batch_count: require_positive("BATCH_COUNT", env_or("BATCH_COUNT", defaults.batch_count)?)?,
            block: env_millis("BLOCK_MS", 5000)?,
            retry_delay: env_millis("LOG_RETRY_MS", 1000)?,
        };

        let window_ms: i64 = env_or("WINDOW_MS", DEFAULT_WINDOW_MS)?;
        if window_ms <= 0 {
            return Err(sensorhub_core::PipelineError::Config(
                "WINDOW_MS must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            http_bind: env_string("HTTP_BIND", "0.0.0.0:50053"),
            log,
            window_ms,
            subscriber_buffer: require_positive(
                "SUBSCRIBER_BUFFER",
                env_or("SUBSCRIBER_BUFFER", DEFAULT_SUBSCRIBER_BUFFER)?,
            )?,
        })
    }
}
