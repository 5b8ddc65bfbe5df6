//! Durable-log consumption loop
//!
//! Pulls bounded batches from the log, feeds each reading through the
//! window table, publishes the resulting metric and only then acknowledges
//! the entry, which gives at-least-once processing.

use sensorhub_core::{now_ms, FanoutHub, Metric, PipelineError, Reading, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::log::{DurableLog, LogRecord};
use crate::stats::AggregatorStats;
use crate::window::WindowedAggregator;

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub batch_count: usize,
    pub block: Duration,
    pub retry_delay: Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            batch_count: 200,
            block: Duration::from_secs(5),
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// What one pull from the log produced
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    pub records: usize,
    pub metrics: usize,
    pub malformed: usize,
}

pub struct ReadingConsumer {
    log: Arc<dyn DurableLog>,
    aggregator: Arc<WindowedAggregator>,
    hub: FanoutHub<Metric>,
    stats: AggregatorStats,
    settings: ConsumerSettings,
}

impl ReadingConsumer {
    pub fn new(
        log: Arc<dyn DurableLog>,
        aggregator: Arc<WindowedAggregator>,
        hub: FanoutHub<Metric>,
        stats: AggregatorStats,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            log,
            aggregator,
            hub,
            stats,
            settings,
        }
    }

    /// Consume forever. Transport errors are logged and retried after the
    /// configured delay; nothing here is fatal.
    pub async fn run(&self) {
        loop {
            match self.poll_once().await {
                Ok(outcome) if outcome.records == 0 => {
                    self.aggregator.prune_idle(now_ms());
                }
                Ok(outcome) => {
                    debug!(
                        records = outcome.records,
                        metrics = outcome.metrics,
                        malformed = outcome.malformed,
                        "Batch processed"
                    );
                }
                Err(e) => {
                    self.stats.log_errors.inc();
                    warn!(
                        log = %self.log.describe(),
                        error = %e,
                        retry_in_ms = self.settings.retry_delay.as_millis() as u64,
                        "Durable log read failed"
                    );
                    tokio::time::sleep(self.settings.retry_delay).await;
                }
            }
        }
    }

    /// Pull and process a single batch.
    pub async fn poll_once(&self) -> Result<BatchOutcome> {
        let records = self
            .log
            .read_batch(self.settings.batch_count, self.settings.block)
            .await
            .map_err(PipelineError::from)?;

        let mut outcome = BatchOutcome {
            records: records.len(),
            ..BatchOutcome::default()
        };
        self.stats.records_read.add(records.len() as u64);

        for record in records {
            match self.handle_record(&record) {
                Ok(Some(_)) => outcome.metrics += 1,
                Ok(None) => {}
                Err(e) => {
                    // Redelivery cannot fix a record that does not parse.
                    outcome.malformed += 1;
                    self.stats.malformed_records.inc();
                    warn!(record_id = %record.id, error = %e, "Dropping malformed record");
                }
            }

            if let Err(e) = self.log.ack(&record.id).await {
                self.stats.ack_failures.inc();
                warn!(record_id = %record.id, error = %e, "Acknowledge failed, entry will be redelivered");
            }
        }

        Ok(outcome)
    }

    fn handle_record(&self, record: &LogRecord) -> Result<Option<usize>> {
        let reading = Reading::from_fields(&record.fields)?;
        self.stats.readings_ingested.inc();

        let Some(metric) = self.aggregator.ingest(reading) else {
            return Ok(None);
        };
        self.stats.metrics_emitted.inc();
        Ok(Some(self.hub.publish(metric)))
    }
}
