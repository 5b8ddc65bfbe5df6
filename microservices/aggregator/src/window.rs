//! Windowed Aggregator
//!
//! Keeps one sliding window of readings per sensor/site pair and turns every
//! insert into a rolling average over what the window still holds.
//!
//! Windows live in a concurrent map from key to an independently locked
//! window, so inserts for different keys run in parallel while inserts for
//! the same key are serialized across the whole append/evict/average step.

use dashmap::DashMap;
use parking_lot::Mutex;
use sensorhub_core::{now_ms, Metric, Reading, WindowKey};
use std::sync::Arc;
use tracing::{debug, warn};

/// Window duration W in milliseconds.
pub const DEFAULT_WINDOW_MS: i64 = 10_000;

#[derive(Debug, Default)]
struct Window {
    readings: Vec<Reading>,
    /// Set when the window was removed from the table; inserters that raced
    /// with the removal must look the key up again.
    retired: bool,
}

impl Window {
    fn insert(&mut self, reading: Reading, cutoff_ms: i64) {
        self.readings.push(reading);
        self.evict(cutoff_ms);
    }

    fn evict(&mut self, cutoff_ms: i64) {
        self.readings.retain(|r| r.timestamp_ms >= cutoff_ms);
    }

    fn averages(&self) -> Option<(f64, f64)> {
        if self.readings.is_empty() {
            return None;
        }
        let n = self.readings.len() as f64;
        let (temperature, humidity) = self
            .readings
            .iter()
            .fold((0.0, 0.0), |(t, h), r| (t + r.temperature, h + r.humidity));
        Some((temperature / n, humidity / n))
    }
}

pub struct WindowedAggregator {
    windows: DashMap<WindowKey, Arc<Mutex<Window>>>,
    window_ms: i64,
}

impl WindowedAggregator {
    pub fn new(window_ms: i64) -> Self {
        Self {
            windows: DashMap::new(),
            window_ms,
        }
    }

    pub fn window_ms(&self) -> i64 {
        self.window_ms
    }

    /// Insert a reading using the wall clock as "now".
    pub fn ingest(&self, reading: Reading) -> Option<Metric> {
        self.ingest_at(reading, now_ms())
    }

    /// Insert a reading, evict everything older than `now_ms - W` and return
    /// the key's rolling average, or `None` when the window ends up empty.
    pub fn ingest_at(&self, reading: Reading, now_ms: i64) -> Option<Metric> {
        if reading.sensor_id.is_empty() {
            warn!(site = %reading.site, "Reading without sensor_id ignored");
            return None;
        }

        let key = reading.key();
        let cutoff = now_ms - self.window_ms;
        let mut reading = Some(reading);

        loop {
            let window = Arc::clone(self.windows.entry(key.clone()).or_default().value());
            let mut window = window.lock();
            if window.retired {
                continue;
            }

            if let Some(reading) = reading.take() {
                window.insert(reading, cutoff);
            }

            let (avg_temperature, avg_humidity) = window.averages()?;
            return Some(Metric {
                sensor_id: key.sensor_id,
                site: key.site,
                window_ms: self.window_ms,
                avg_temperature,
                avg_humidity,
                emitted_at_ms: now_ms,
            });
        }
    }

    /// Number of readings currently retained for `key`.
    pub fn window_len(&self, key: &WindowKey) -> usize {
        self.windows
            .get(key)
            .map(|w| w.value().lock().readings.len())
            .unwrap_or(0)
    }

    /// Timestamps retained for `key`, oldest first.
    pub fn window_timestamps(&self, key: &WindowKey) -> Vec<i64> {
        self.windows
            .get(key)
            .map(|w| w.value().lock().readings.iter().map(|r| r.timestamp_ms).collect())
            .unwrap_or_default()
    }

    pub fn key_count(&self) -> usize {
        self.windows.len()
    }

    /// Evict stale readings from every window and drop the ones left empty.
    ///
    /// Never emits a metric. Returns the number of windows removed.
    pub fn prune_idle(&self, now_ms: i64) -> usize {
        let cutoff = now_ms - self.window_ms;
        let before = self.windows.len();

        self.windows.retain(|_, window| {
            let mut window = window.lock();
            window.evict(cutoff);
            if window.readings.is_empty() {
                window.retired = true;
                false
            } else {
                true
            }
        });

        let removed = before.saturating_sub(self.windows.len());
        if removed > 0 {
            debug!(removed, remaining = self.windows.len(), "Pruned idle windows");
        }
        removed
    }
}

impl Default for WindowedAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(sensor_id: &str, ts: i64, temperature: f64, humidity: f64) -> Reading {
        Reading::new(sensor_id, "lab-1", ts).with_values(temperature, humidity)
    }

    fn key(sensor_id: &str) -> WindowKey {
        WindowKey::new(sensor_id, "lab-1")
    }

    #[test]
    fn test_rolling_average() {
        let agg = WindowedAggregator::default();
        let temps = [25.0, 26.0, 27.0, 28.0, 29.0];
        let mut last = None;

        for (i, t) in temps.iter().enumerate() {
            let ts = i as i64 * 1000;
            last = agg.ingest_at(reading("sensor-01", ts, *t, 50.0 + i as f64), ts);
        }

        let metric = last.unwrap();
        assert_eq!(metric.sensor_id, "sensor-01");
        assert_eq!(metric.site, "lab-1");
        assert_eq!(metric.window_ms, 10_000);
        assert!((metric.avg_temperature - 27.0).abs() < 1e-9);
        assert!((metric.avg_humidity - 52.0).abs() < 1e-9);
        assert_eq!(metric.emitted_at_ms, 4000);
    }

    #[test]
    fn test_eviction_keeps_exactly_recent_readings() {
        let agg = WindowedAggregator::default();
        let timestamps = [0, 2_000, 5_000, 9_999, 10_000, 12_000, 15_500, 21_000];

        for &ts in &timestamps {
            agg.ingest_at(reading("s", ts, 20.0, 40.0), ts);
            let expected: Vec<i64> = timestamps
                .iter()
                .copied()
                .filter(|&t| t <= ts && t >= ts - 10_000)
                .collect();
            assert_eq!(agg.window_timestamps(&key("s")), expected, "after insert at {}", ts);
        }
    }

    #[test]
    fn test_metric_is_mean_of_retained() {
        let agg = WindowedAggregator::default();
        agg.ingest_at(reading("s", 0, 100.0, 100.0), 0);
        agg.ingest_at(reading("s", 5_000, 10.0, 20.0), 5_000);

        // The reading at t=0 falls out of the window at t=10_001.
        let metric = agg.ingest_at(reading("s", 10_001, 30.0, 40.0), 10_001).unwrap();
        assert_eq!(agg.window_len(&key("s")), 2);
        assert!((metric.avg_temperature - 20.0).abs() < 1e-9);
        assert!((metric.avg_humidity - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_stale_reading_yields_no_metric() {
        let agg = WindowedAggregator::default();
        assert!(agg.ingest_at(reading("s", 0, 20.0, 40.0), 60_000).is_none());
        assert_eq!(agg.window_len(&key("s")), 0);
    }

    #[test]
    fn test_other_keys_never_emit_for_expired_window() {
        let agg = WindowedAggregator::default();
        assert!(agg.ingest_at(reading("a", 0, 20.0, 40.0), 0).is_some());

        let metric = agg.ingest_at(reading("b", 30_000, 22.0, 44.0), 30_000).unwrap();
        assert_eq!(metric.sensor_id, "b");

        // Window "a" is untouched by inserts on "b".
        assert_eq!(agg.window_len(&key("a")), 1);
        assert_eq!(agg.key_count(), 2);
    }

    #[test]
    fn test_sites_are_separate_keys() {
        let agg = WindowedAggregator::default();
        agg.ingest_at(Reading::new("s", "lab-1", 0).with_values(10.0, 0.0), 0);
        let metric = agg
            .ingest_at(Reading::new("s", "lab-2", 0).with_values(30.0, 0.0), 0)
            .unwrap();
        assert_eq!(metric.avg_temperature, 30.0);
    }

    #[test]
    fn test_empty_sensor_id_ignored() {
        let agg = WindowedAggregator::default();
        assert!(agg.ingest_at(reading("", 0, 20.0, 40.0), 0).is_none());
        assert_eq!(agg.key_count(), 0);
    }

    #[test]
    fn test_prune_idle() {
        let agg = WindowedAggregator::default();
        agg.ingest_at(reading("old", 0, 20.0, 40.0), 0);
        agg.ingest_at(reading("fresh", 15_000, 20.0, 40.0), 15_000);

        assert_eq!(agg.prune_idle(15_000), 1);
        assert_eq!(agg.key_count(), 1);
        assert_eq!(agg.window_len(&key("fresh")), 1);

        // A pruned key starts a fresh window on its next reading.
        let metric = agg.ingest_at(reading("old", 16_000, 30.0, 50.0), 16_000).unwrap();
        assert_eq!(metric.avg_temperature, 30.0);
    }

    #[test]
    fn test_concurrent_inserts_same_key() {
        let agg = Arc::new(WindowedAggregator::default());

        std::thread::scope(|scope| {
            for t in 0..8 {
                let agg = agg.clone();
                scope.spawn(move || {
                    for i in 0..250 {
                        let metric = agg
                            .ingest_at(reading("hot", 1_000, (t * 250 + i) as f64, 50.0), 1_000)
                            .unwrap();
                        assert!(metric.avg_humidity == 50.0);
                    }
                });
            }
        });

        assert_eq!(agg.window_len(&key("hot")), 2000);
        let metric = agg.ingest_at(reading("hot", 1_000, 0.0, 50.0), 1_000).unwrap();
        let expected = (0..2000).sum::<i64>() as f64 / 2001.0;
        assert!((metric.avg_temperature - expected).abs() < 1e-6);
    }

    #[test]
    fn test_concurrent_inserts_with_pruning() {
        let agg = Arc::new(WindowedAggregator::default());

        std::thread::scope(|scope| {
            for t in 0..4 {
                let agg = agg.clone();
                scope.spawn(move || {
                    for i in 0..500 {
                        agg.ingest_at(reading(&format!("k{}", i % 5), 50_000, t as f64, 1.0), 50_000);
                    }
                });
            }
            let agg = agg.clone();
            scope.spawn(move || {
                for _ in 0..200 {
                    agg.prune_idle(50_000);
                }
            });
        });

        // Nothing was ever stale, so no insert can have been lost.
        let total: usize = (0..5).map(|k| agg.window_len(&key(&format!("k{}", k)))).sum();
        assert_eq!(total, 2000);
    }
}
