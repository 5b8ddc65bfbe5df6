//! Alerter counters reported on `/v1/stats`

use sensorhub_telemetry::{Counter, Gauge, Sample};

#[derive(Clone)]
pub struct AlerterStats {
    pub metrics_received: Counter,
    pub alerts_emitted: Counter,
    pub connect_failures: Counter,
    pub stream_errors: Counter,
    pub reconnects: Counter,
    /// 1 while the metric subscription is live.
    pub subscribed: Gauge,
}

impl AlerterStats {
    pub fn new() -> Self {
        Self {
            metrics_received: Counter::new("metrics_received_total"),
            alerts_emitted: Counter::new("alerts_emitted_total"),
            connect_failures: Counter::new("connect_failures_total"),
            stream_errors: Counter::new("stream_errors_total"),
            reconnects: Counter::new("reconnects_total"),
            subscribed: Gauge::new("metric_stream_subscribed"),
        }
    }

    pub fn samples(&self) -> Vec<Sample> {
        vec![
            self.metrics_received.sample(),
            self.alerts_emitted.sample(),
            self.connect_failures.sample(),
            self.stream_errors.sample(),
            self.reconnects.sample(),
            self.subscribed.sample(),
        ]
    }
}

impl Default for AlerterStats {
    fn default() -> Self {
        Self::new()
    }
}
