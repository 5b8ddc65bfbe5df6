//! Core domain types shared by the aggregator and the alerter

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::{PipelineError, Result};

/// Durable-log field names, as written by the ingestion service.
pub mod fields {
    pub const SENSOR_ID: &str = "sensor_id";
    pub const SITE: &str = "site";
    pub const TIMESTAMP_MS: &str = "ts_unix_ms";
    pub const TEMPERATURE: &str = "temperature";
    pub const HUMIDITY: &str = "humidity";
    pub const SEQUENCE: &str = "seq";
}

/// Milliseconds since the Unix epoch, wall clock.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Anything a fan-out hub can route by sensor and site.
pub trait Routable: Clone + Send + Sync + 'static {
    fn sensor_id(&self) -> &str;
    fn site(&self) -> &str;
}

/// A single sensor sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub sensor_id: String,
    pub site: String,
    #[serde(rename = "ts_unix_ms")]
    pub timestamp_ms: i64,
    pub temperature: f64,
    pub humidity: f64,
    #[serde(rename = "seq")]
    pub sequence: u64,
}

impl Reading {
    pub fn new(sensor_id: impl Into<String>, site: impl Into<String>, timestamp_ms: i64) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            site: site.into(),
            timestamp_ms,
            temperature: 0.0,
            humidity: 0.0,
            sequence: 0,
        }
    }

    pub fn with_values(mut self, temperature: f64, humidity: f64) -> Self {
        self.temperature = temperature;
        self.humidity = humidity;
        self
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn key(&self) -> WindowKey {
        WindowKey::new(&self.sensor_id, &self.site)
    }

    /// Build a reading from the string fields of a durable-log record.
    ///
    /// `site` and `seq` are optional; every other field must be present and
    /// parse, and `sensor_id` must be non-empty.
    pub fn from_fields(values: &HashMap<String, String>) -> Result<Self> {
        let sensor_id = values
            .get(fields::SENSOR_ID)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| PipelineError::Malformed("missing sensor_id".to_string()))?;

        let site = values
            .get(fields::SITE)
            .map(|s| s.trim().to_string())
            .unwrap_or_default();

        let sequence = match values.get(fields::SEQUENCE) {
            Some(raw) => parse_field(fields::SEQUENCE, raw)?,
            None => 0,
        };

        Ok(Self {
            sensor_id,
            site,
            timestamp_ms: required(values, fields::TIMESTAMP_MS)?,
            temperature: required_finite(values, fields::TEMPERATURE)?,
            humidity: required_finite(values, fields::HUMIDITY)?,
            sequence,
        })
    }
}

fn required<T>(values: &HashMap<String, String>, name: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    let raw = values
        .get(name)
        .ok_or_else(|| PipelineError::Malformed(format!("missing {}", name)))?;
    parse_field(name, raw)
}

/// NaN and infinities parse as `f64` but would poison every average they join.
fn required_finite(values: &HashMap<String, String>, name: &str) -> Result<f64> {
    let value: f64 = required(values, name)?;
    if !value.is_finite() {
        return Err(PipelineError::Malformed(format!("{} = {}: not a finite number", name, value)));
    }
    Ok(value)
}

fn parse_field<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| PipelineError::Malformed(format!("{} = {:?}: {}", name, raw, e)))
}

/// Aggregation bucket identity: one window per sensor/site pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowKey {
    pub sensor_id: String,
    pub site: String,
}

impl WindowKey {
    pub fn new(sensor_id: &str, site: &str) -> Self {
        Self {
            sensor_id: sensor_id.to_string(),
            site: site.to_string(),
        }
    }
}

impl fmt::Display for WindowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.sensor_id, self.site)
    }
}

/// Rolling average over one key's window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub sensor_id: String,
    pub site: String,
    pub window_ms: i64,
    #[serde(rename = "avg_temp")]
    pub avg_temperature: f64,
    pub avg_humidity: f64,
    #[serde(rename = "ts_unix_ms")]
    pub emitted_at_ms: i64,
}

impl Routable for Metric {
    fn sensor_id(&self) -> &str {
        &self.sensor_id
    }

    fn site(&self) -> &str {
        &self.site
    }
}

/// Threshold violation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertReason {
    #[serde(rename = "TEMP_HIGH")]
    TemperatureHigh,
    #[serde(rename = "HUMID_HIGH")]
    HumidityHigh,
}

impl AlertReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TemperatureHigh => "TEMP_HIGH",
            Self::HumidityHigh => "HUMID_HIGH",
        }
    }
}

impl fmt::Display for AlertReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub sensor_id: String,
    pub site: String,
    pub reason: AlertReason,
    pub value: f64,
    pub threshold: f64,
    #[serde(rename = "ts_unix_ms")]
    pub emitted_at_ms: i64,
}

impl Alert {
    pub fn from_metric(metric: &Metric, reason: AlertReason, value: f64, threshold: f64) -> Self {
        Self {
            sensor_id: metric.sensor_id.clone(),
            site: metric.site.clone(),
            reason,
            value,
            threshold,
            emitted_at_ms: now_ms(),
        }
    }
}

impl Routable for Alert {
    fn sensor_id(&self) -> &str {
        &self.sensor_id
    }

    fn site(&self) -> &str {
        &self.site
    }
}

/// Subscription filter; an absent or empty field matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionFilter {
    #[serde(default)]
    pub sensor_id: Option<String>,
    #[serde(default)]
    pub site: Option<String>,
}

impl SubscriptionFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn sensor(sensor_id: impl Into<String>) -> Self {
        Self {
            sensor_id: Some(sensor_id.into()),
            site: None,
        }
    }

    pub fn with_site(mut self, site: impl Into<String>) -> Self {
        self.site = Some(site.into());
        self
    }

    pub fn matches<T: Routable>(&self, item: &T) -> bool {
        field_matches(self.sensor_id.as_deref(), item.sensor_id())
            && field_matches(self.site.as_deref(), item.site())
    }
}

fn field_matches(filter: Option<&str>, value: &str) -> bool {
    match filter {
        None | Some("") => true,
        Some(expected) => expected == value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn metric(sensor_id: &str, site: &str) -> Metric {
        Metric {
            sensor_id: sensor_id.to_string(),
            site: site.to_string(),
            window_ms: 10_000,
            avg_temperature: 20.0,
            avg_humidity: 40.0,
            emitted_at_ms: 0,
        }
    }

    #[test]
    fn test_reading_from_fields() {
        let values = record(&[
            ("sensor_id", "sensor-01"),
            ("site", "lab-1"),
            ("ts_unix_ms", "1700000000000"),
            ("temperature", "25.5"),
            ("humidity", "61"),
            ("seq", "7"),
        ]);

        let reading = Reading::from_fields(&values).unwrap();
        assert_eq!(reading.sensor_id, "sensor-01");
        assert_eq!(reading.site, "lab-1");
        assert_eq!(reading.timestamp_ms, 1_700_000_000_000);
        assert_eq!(reading.temperature, 25.5);
        assert_eq!(reading.humidity, 61.0);
        assert_eq!(reading.sequence, 7);
    }

    #[test]
    fn test_reading_optional_fields() {
        let values = record(&[
            ("sensor_id", "s"),
            ("ts_unix_ms", "1"),
            ("temperature", "1"),
            ("humidity", "2"),
        ]);

        let reading = Reading::from_fields(&values).unwrap();
        assert_eq!(reading.site, "");
        assert_eq!(reading.sequence, 0);
    }

    #[test]
    fn test_reading_rejects_malformed() {
        let empty_id = record(&[
            ("sensor_id", " "),
            ("ts_unix_ms", "1"),
            ("temperature", "1"),
            ("humidity", "2"),
        ]);
        assert!(matches!(
            Reading::from_fields(&empty_id),
            Err(PipelineError::Malformed(_))
        ));

        let bad_temp = record(&[
            ("sensor_id", "s"),
            ("ts_unix_ms", "1"),
            ("temperature", "hot"),
            ("humidity", "2"),
        ]);
        assert!(Reading::from_fields(&bad_temp).is_err());

        let missing_ts = record(&[("sensor_id", "s"), ("temperature", "1"), ("humidity", "2")]);
        assert!(Reading::from_fields(&missing_ts).is_err());
    }

    #[test]
    fn test_filter_matching() {
        let all = SubscriptionFilter::all();
        assert!(all.matches(&metric("S1", "lab")));

        let s1 = SubscriptionFilter::sensor("S1");
        assert!(s1.matches(&metric("S1", "lab")));
        assert!(!s1.matches(&metric("S2", "lab")));

        let s1_site = SubscriptionFilter::sensor("S1").with_site("lab");
        assert!(s1_site.matches(&metric("S1", "lab")));
        assert!(!s1_site.matches(&metric("S1", "plant")));

        let blank = SubscriptionFilter {
            sensor_id: Some(String::new()),
            site: Some(String::new()),
        };
        assert!(blank.matches(&metric("anything", "anywhere")));
    }

    #[test]
    fn test_alert_wire_format() {
        let alert = Alert::from_metric(&metric("S1", "lab"), AlertReason::TemperatureHigh, 29.0, 28.0);
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["reason"], "TEMP_HIGH");
        assert_eq!(json["sensor_id"], "S1");
        assert!(json.get("ts_unix_ms").is_some());
    }

    #[test]
    fn test_reading_rejects_non_finite() {
        for bad in ["NaN", "inf", "-inf", "infinity"] {
            let temp = record(&[
                ("sensor_id", "S1"),
                ("ts_unix_ms", "1000"),
                ("temperature", bad),
                ("humidity", "50"),
            ]);
            assert!(
                matches!(Reading::from_fields(&temp), Err(PipelineError::Malformed(_))),
                "temperature {}",
                bad
            );

            let humid = record(&[
                ("sensor_id", "S1"),
                ("ts_unix_ms", "1000"),
                ("temperature", "20"),
                ("humidity", bad),
            ]);
            assert!(
                matches!(Reading::from_fields(&humid), Err(PipelineError::Malformed(_))),
                "humidity {}",
                bad
            );
        }
    }

    #[test]
    fn test_window_key_display() {
        assert_eq!(WindowKey::new("sensor-01", "lab-1").to_string(), "sensor-01|lab-1");
    }
}
