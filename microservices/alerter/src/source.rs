//! Metric source
//!
//! Client side of the metric subscription protocol: one WebSocket per
//! subscription, one JSON text frame per metric.

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use sensorhub_core::{Metric, PipelineError, Result, SubscriptionFilter};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

/// Live metric sequence; ends when the server closes, yields `Err` on a
/// receive failure.
pub type MetricStream = BoxStream<'static, Result<Metric>>;

#[async_trait]
pub trait MetricSource: Send + Sync {
    async fn subscribe(&self, filter: &SubscriptionFilter) -> Result<MetricStream>;

    /// Endpoint name used in logs and readiness output.
    fn describe(&self) -> String;
}

/// Subscribes to the aggregator's WebSocket endpoint
pub struct WsMetricSource {
    url: String,
}

impl WsMetricSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Endpoint URL with the filter encoded as query parameters.
    pub fn subscribe_url(&self, filter: &SubscriptionFilter) -> String {
        let params: Vec<String> = [("sensor_id", &filter.sensor_id), ("site", &filter.site)]
            .into_iter()
            .filter_map(|(name, value)| {
                value
                    .as_deref()
                    .filter(|v| !v.is_empty())
                    .map(|v| format!("{}={}", name, urlencoding::encode(v)))
            })
            .collect();

        if params.is_empty() {
            self.url.clone()
        } else {
            let separator = if self.url.contains('?') { '&' } else { '?' };
            format!("{}{}{}", self.url, separator, params.join("&"))
        }
    }
}

#[async_trait]
impl MetricSource for WsMetricSource {
    async fn subscribe(&self, filter: &SubscriptionFilter) -> Result<MetricStream> {
        let url = self.subscribe_url(filter);
        let (socket, _) = connect_async(url.as_str())
            .await
            .map_err(|e| PipelineError::Subscription(format!("connect {}: {}", url, e)))?;
        debug!(%url, "Metric subscription opened");

        let metrics = stream::unfold(Some(socket), |socket| async move {
            let mut socket = socket?;
            loop {
                match socket.next().await {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<Metric>(&text) {
                        Ok(metric) => return Some((Ok(metric), Some(socket))),
                        Err(e) => warn!(error = %e, "Skipping undecodable metric frame"),
                    },
                    Some(Ok(Message::Close(_))) | None => return None,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let err = PipelineError::Subscription(format!("receive: {}", e));
                        return Some((Err(err), None));
                    }
                }
            }
        });

        Ok(metrics.boxed())
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}
