//! Alert Evaluator
//!
//! Holds one unfiltered metric subscription, checks every metric against the
//! fixed thresholds and publishes the resulting alerts. When the
//! subscription cannot be opened or ends, the evaluator waits a fixed delay
//! and reconnects, forever.

use futures_util::StreamExt;
use sensorhub_core::{Alert, AlertReason, FanoutHub, Metric, SubscriptionFilter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::source::MetricSource;
use crate::stats::AlerterStats;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub temperature: f64,
    pub humidity: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            temperature: 28.0,
            humidity: 70.0,
        }
    }
}

impl Thresholds {
    /// Alerts for one metric; both checks are independent and strict.
    pub fn evaluate(&self, metric: &Metric) -> Vec<Alert> {
        let mut alerts = Vec::with_capacity(2);
        if metric.avg_temperature > self.temperature {
            alerts.push(Alert::from_metric(
                metric,
                AlertReason::TemperatureHigh,
                metric.avg_temperature,
                self.temperature,
            ));
        }
        if metric.avg_humidity > self.humidity {
            alerts.push(Alert::from_metric(
                metric,
                AlertReason::HumidityHigh,
                metric.avg_humidity,
                self.humidity,
            ));
        }
        alerts
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluatorState {
    Disconnected,
    Connecting,
    Subscribed,
}

pub struct AlertEvaluator {
    source: Arc<dyn MetricSource>,
    hub: FanoutHub<Alert>,
    thresholds: Thresholds,
    reconnect_delay: Duration,
    stats: AlerterStats,
    state: watch::Sender<EvaluatorState>,
}

impl AlertEvaluator {
    pub fn new(
        source: Arc<dyn MetricSource>,
        hub: FanoutHub<Alert>,
        thresholds: Thresholds,
        reconnect_delay: Duration,
        stats: AlerterStats,
    ) -> Self {
        let (state, _) = watch::channel(EvaluatorState::Disconnected);
        Self {
            source,
            hub,
            thresholds,
            reconnect_delay,
            stats,
            state,
        }
    }

    pub fn state(&self) -> EvaluatorState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<EvaluatorState> {
        self.state.subscribe()
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Evaluate until the task is cancelled.
    pub async fn run(&self) {
        info!(
            source = %self.source.describe(),
            temperature = self.thresholds.temperature,
            humidity = self.thresholds.humidity,
            "Alert evaluator started"
        );

        loop {
            self.run_session().await;
            self.transition(EvaluatorState::Disconnected);
            tokio::time::sleep(self.reconnect_delay).await;
            self.stats.reconnects.inc();
        }
    }

    /// One subscribe-and-consume cycle; returns when the subscription fails
    /// to open or ends.
    async fn run_session(&self) {
        self.transition(EvaluatorState::Connecting);

        let mut metrics = match self.source.subscribe(&SubscriptionFilter::all()).await {
            Ok(metrics) => metrics,
            Err(e) => {
                self.stats.connect_failures.inc();
                warn!(
                    source = %self.source.describe(),
                    error = %e,
                    retry_in_ms = self.reconnect_delay.as_millis() as u64,
                    "Metric subscription failed"
                );
                return;
            }
        };

        self.transition(EvaluatorState::Subscribed);
        self.stats.subscribed.set(1);

        while let Some(item) = metrics.next().await {
            match item {
                Ok(metric) => {
                    self.handle_metric(&metric);
                }
                Err(e) => {
                    self.stats.stream_errors.inc();
                    warn!(
                        error = %e,
                        retry_in_ms = self.reconnect_delay.as_millis() as u64,
                        "Metric stream failed"
                    );
                    break;
                }
            }
        }

        self.stats.subscribed.set(0);
        info!("Metric stream ended");
    }

    /// Check one metric and publish its alerts before returning.
    pub fn handle_metric(&self, metric: &Metric) -> usize {
        self.stats.metrics_received.inc();
        let alerts = self.thresholds.evaluate(metric);
        let emitted = alerts.len();

        for alert in alerts {
            self.stats.alerts_emitted.inc();
            info!(
                sensor_id = %alert.sensor_id,
                site = %alert.site,
                reason = %alert.reason,
                value = alert.value,
                threshold = alert.threshold,
                "Alert raised"
            );
            let delivered = self.hub.publish(alert);
            debug!(delivered, "Alert published");
        }

        emitted
    }

    fn transition(&self, next: EvaluatorState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            info!(from = ?previous, to = ?next, "Evaluator state changed");
        }
    }
}
