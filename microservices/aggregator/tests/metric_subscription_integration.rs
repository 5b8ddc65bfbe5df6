//! Metric Subscription Integration Tests
//!
//! Drives the aggregator end to end: records pushed into an in-memory log
//! come out as metrics on a WebSocket subscription.

use aggregator::{AggregatorConfig, AggregatorService, DurableLog, LogConfig, LogError, LogRecord};
use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use sensorhub_core::{now_ms, Metric, PipelineService};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};

// In-memory durable log
#[derive(Default)]
struct MemoryLog {
    entries: Mutex<VecDeque<LogRecord>>,
    acked: Mutex<Vec<String>>,
    next_id: Mutex<u64>,
    healthy: AtomicBool,
}

impl MemoryLog {
    fn push(&self, sensor_id: &str, site: &str, temperature: f64, humidity: f64) {
        let mut next_id = self.next_id.lock();
        *next_id += 1;
        let mut fields = HashMap::new();
        fields.insert("sensor_id".to_string(), sensor_id.to_string());
        fields.insert("site".to_string(), site.to_string());
        fields.insert("ts_unix_ms".to_string(), now_ms().to_string());
        fields.insert("temperature".to_string(), temperature.to_string());
        fields.insert("humidity".to_string(), humidity.to_string());
        fields.insert("seq".to_string(), next_id.to_string());
        self.entries
            .lock()
            .push_back(LogRecord::new(format!("{}-0", next_id), fields));
    }
}

#[async_trait]
impl DurableLog for MemoryLog {
    async fn read_batch(&self, max: usize, block: Duration) -> Result<Vec<LogRecord>, LogError> {
        self.healthy.store(true, Ordering::SeqCst);
        let batch: Vec<LogRecord> = {
            let mut entries = self.entries.lock();
            let n = max.min(entries.len());
            entries.drain(..n).collect()
        };
        if batch.is_empty() {
            tokio::time::sleep(block).await;
        }
        Ok(batch)
    }

    async fn ack(&self, id: &str) -> Result<(), LogError> {
        self.acked.lock().push(id.to_string());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

fn test_config() -> AggregatorConfig {
    AggregatorConfig {
        http_bind: "127.0.0.1:0".to_string(),
        log: LogConfig {
            block: Duration::from_millis(20),
            retry_delay: Duration::from_millis(20),
            ..LogConfig::default()
        },
        window_ms: 10_000,
        subscriber_buffer: 256,
    }
}

async fn start_service(log: Arc<MemoryLog>) -> (Arc<AggregatorService>, SocketAddr) {
    let service = Arc::new(AggregatorService::with_log(test_config(), log));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = service.clone();
    tokio::spawn(async move { server.serve(listener).await });
    (service, addr)
}

async fn next_metric<S>(stream: &mut S) -> Metric
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let frame = timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("timed out waiting for metric")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn test_filtered_metrics_over_websocket() {
    let log = Arc::new(MemoryLog::default());
    let (service, addr) = start_service(log.clone()).await;

    let url = format!("ws://{}/v1/metrics/subscribe?sensor_id=sensor-01", addr);
    let (mut socket, _) = connect_async(url).await.unwrap();
    assert_eq!(service.hub().subscriber_count(), 1);

    log.push("sensor-02", "lab-1", 99.0, 99.0);
    log.push("sensor-01", "lab-1", 20.0, 40.0);
    log.push("sensor-02", "lab-1", 99.0, 99.0);
    log.push("sensor-01", "lab-1", 30.0, 60.0);

    let first = next_metric(&mut socket).await;
    assert_eq!(first.sensor_id, "sensor-01");
    assert_eq!(first.avg_temperature, 20.0);

    let second = next_metric(&mut socket).await;
    assert_eq!(second.sensor_id, "sensor-01");
    assert_eq!(second.avg_temperature, 25.0);
    assert_eq!(second.avg_humidity, 50.0);
    assert_eq!(second.window_ms, 10_000);

    // Every record is acknowledged, including the filtered-out ones.
    timeout(Duration::from_secs(5), async {
        while log.acked.lock().len() < 4 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert!(service.ready().await.ready);

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unfiltered_subscriber_sees_all_sensors() {
    let log = Arc::new(MemoryLog::default());
    let (service, addr) = start_service(log.clone()).await;

    let url = format!("ws://{}/v1/metrics/subscribe", addr);
    let (mut socket, _) = connect_async(url).await.unwrap();

    log.push("sensor-01", "lab-1", 21.0, 40.0);
    log.push("sensor-02", "lab-2", 22.0, 40.0);

    let a = next_metric(&mut socket).await;
    let b = next_metric(&mut socket).await;
    assert_eq!(a.sensor_id, "sensor-01");
    assert_eq!(b.sensor_id, "sensor-02");
    assert_eq!(b.site, "lab-2");

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_disconnect_unregisters_subscriber() {
    let log = Arc::new(MemoryLog::default());
    let (service, addr) = start_service(log.clone()).await;

    let url = format!("ws://{}/v1/metrics/subscribe", addr);
    let (mut socket, _) = connect_async(url).await.unwrap();
    assert_eq!(service.hub().subscriber_count(), 1);

    socket.close(None).await.unwrap();

    timeout(Duration::from_secs(5), async {
        while service.hub().subscriber_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_subscriptions() {
    let log = Arc::new(MemoryLog::default());
    let (service, addr) = start_service(log.clone()).await;

    let url = format!("ws://{}/v1/metrics/subscribe", addr);
    let (mut socket, _) = connect_async(url).await.unwrap();

    service.shutdown().await.unwrap();

    let end = timeout(Duration::from_secs(5), async {
        loop {
            match socket.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(end.is_ok());
    assert!(!service.health().await.healthy);
}
