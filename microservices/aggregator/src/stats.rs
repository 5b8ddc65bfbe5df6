//! Aggregator counters reported on `/v1/stats`

use sensorhub_telemetry::{Counter, Sample};

#[derive(Clone)]
pub struct AggregatorStats {
    pub records_read: Counter,
    pub readings_ingested: Counter,
    pub malformed_records: Counter,
    pub metrics_emitted: Counter,
    pub ack_failures: Counter,
    pub log_errors: Counter,
}

impl AggregatorStats {
    pub fn new() -> Self {
        Self {
            records_read: Counter::new("records_read_total"),
            readings_ingested: Counter::new("readings_ingested_total"),
            malformed_records: Counter::new("malformed_records_total"),
            metrics_emitted: Counter::new("metrics_emitted_total"),
            ack_failures: Counter::new("ack_failures_total"),
            log_errors: Counter::new("log_errors_total"),
        }
    }

    pub fn samples(&self) -> Vec<Sample> {
        vec![
            self.records_read.sample(),
            self.readings_ingested.sample(),
            self.malformed_records.sample(),
            self.metrics_emitted.sample(),
            self.ack_failures.sample(),
            self.log_errors.sample(),
        ]
    }
}

impl Default for AggregatorStats {
    fn default() -> Self {
        Self::new()
    }
}
