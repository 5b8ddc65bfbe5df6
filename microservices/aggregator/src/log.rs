//! Durable Log client
//!
//! Consumer-group pull-with-acknowledge access to the raw readings stream.
//! Entries handed out by `read_batch` stay pending until acknowledged and
//! are redelivered to this consumer after a restart.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use sensorhub_core::PipelineError;
use std::collections::HashMap;
use parking_lot::Mutex as SyncMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::LogConfig;

#[derive(Debug, Error)]
pub enum LogError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl From<LogError> for PipelineError {
    fn from(err: LogError) -> Self {
        PipelineError::Log(err.to_string())
    }
}

/// One raw entry from the log, fields as strings
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub id: String,
    pub fields: HashMap<String, String>,
}

impl LogRecord {
    pub fn new(id: impl Into<String>, fields: HashMap<String, String>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }
}

#[async_trait]
pub trait DurableLog: Send + Sync {
    /// Claim up to `max` entries, waiting at most `block` for new ones.
    async fn read_batch(&self, max: usize, block: Duration) -> Result<Vec<LogRecord>, LogError>;

    /// Acknowledge a handled entry so it is not redelivered.
    async fn ack(&self, id: &str) -> Result<(), LogError>;

    /// Name used in logs and readiness output.
    fn describe(&self) -> String;

    async fn is_healthy(&self) -> bool;
}

/// Redis Streams consumer-group adapter
pub struct RedisStreamLog {
    client: redis::Client,
    config: LogConfig,
    conn: Mutex<Option<MultiplexedConnection>>,
    pending: SyncMutex<PendingCursor>,
    healthy: AtomicBool,
}

impl RedisStreamLog {
    /// Parse the address only; connecting happens on first use so that an
    /// unreachable log is retried by the consumer loop instead of failing startup.
    pub fn new(config: LogConfig) -> Result<Self, LogError> {
        let client = redis::Client::open(config.redis_url())?;
        Ok(Self {
            client,
            config,
            conn: Mutex::new(None),
            pending: SyncMutex::new(PendingCursor::new()),
            healthy: AtomicBool::new(false),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, LogError> {
        let mut slot = self.conn.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }

        let mut conn = self.client.get_multiplexed_async_connection().await?;
        self.ensure_group(&mut conn).await?;
        info!(
            stream = %self.config.stream,
            group = %self.config.group,
            consumer = %self.config.consumer,
            "Connected to durable log"
        );
        *slot = Some(conn.clone());
        Ok(conn)
    }

    async fn ensure_group(&self, conn: &mut MultiplexedConnection) -> Result<(), LogError> {
        let created: redis::RedisResult<()> = conn
            .xgroup_create_mkstream(&self.config.stream, &self.config.group, "$")
            .await;
        match created {
            Ok(()) => {
                info!(stream = %self.config.stream, group = %self.config.group, "Consumer group created");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn reset_connection(&self) {
        self.healthy.store(false, Ordering::Relaxed);
        *self.conn.lock().await = None;
    }

    fn into_records(reply: StreamReadReply) -> Vec<LogRecord> {
        reply
            .keys
            .into_iter()
            .flat_map(|key| key.ids)
            .map(|entry| {
                let fields = entry
                    .map
                    .iter()
                    .filter_map(|(name, value)| {
                        redis::from_redis_value::<String>(value)
                            .ok()
                            .map(|v| (name.clone(), v))
                    })
                    .collect();
                LogRecord::new(entry.id, fields)
            })
            .collect()
    }
}

#[async_trait]
impl DurableLog for RedisStreamLog {
    async fn read_batch(&self, max: usize, block: Duration) -> Result<Vec<LogRecord>, LogError> {
        let mut conn = self.connection().await?;

        // Entries claimed before a restart are re-read first, then only new
        // entries (">") are requested.
        let pending_from = self.pending.lock().start_id();
        let draining = pending_from.is_some();
        let start_id = pending_from.unwrap_or_else(|| ">".to_string());

        let mut opts = StreamReadOptions::default()
            .group(&self.config.group, &self.config.consumer)
            .count(max);
        if !draining {
            opts = opts.block(block.as_millis() as usize);
        }

        let reply: redis::RedisResult<Option<StreamReadReply>> = conn
            .xread_options(&[&self.config.stream], &[start_id.as_str()], &opts)
            .await;

        let records = match reply {
            Ok(reply) => reply.map(Self::into_records).unwrap_or_default(),
            Err(e) if draining && e.code().is_none() && !e.is_io_error() => {
                // Deleted-but-pending entries come back without fields and may
                // not decode; leave them behind rather than stall on them.
                warn!(error = %e, "Could not decode pending entries, skipping recovery");
                self.pending.lock().finish();
                return Ok(Vec::new());
            }
            Err(e) => {
                // A dropped group is recreated on reconnect.
                if e.is_io_error() || e.is_connection_dropped() || e.code() == Some("NOGROUP") {
                    self.reset_connection().await;
                }
                return Err(e.into());
            }
        };

        if draining {
            let mut pending = self.pending.lock();
            pending.advance(&records);
            if pending.start_id().is_none() {
                debug!(consumer = %self.config.consumer, "Pending entries drained");
            }
        }
        self.healthy.store(true, Ordering::Relaxed);
        Ok(records)
    }

    async fn ack(&self, id: &str) -> Result<(), LogError> {
        let mut conn = self.connection().await?;
        let acked: redis::RedisResult<i64> = conn
            .xack(&self.config.stream, &self.config.group, &[id])
            .await;
        match acked {
            Ok(_) => Ok(()),
            Err(e) => {
                if e.is_io_error() || e.is_connection_dropped() {
                    self.reset_connection().await;
                }
                Err(e.into())
            }
        }
    }

    fn describe(&self) -> String {
        format!("redis-stream:{}/{}", self.config.stream, self.config.group)
    }

    async fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }
}

/// Position of the one-time walk over this consumer's pending entries.
///
/// Each pass resumes after the last entry returned, so an entry whose
/// acknowledge keeps failing is re-read at most once per restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCursor {
    next: Option<String>,
}

impl PendingCursor {
    pub fn new() -> Self {
        Self {
            next: Some("0".to_string()),
        }
    }

    /// Id to read pending entries after, or `None` once drained.
    pub fn start_id(&self) -> Option<String> {
        self.next.clone()
    }

    pub fn advance(&mut self, records: &[LogRecord]) {
        self.next = records.last().map(|r| r.id.clone());
    }

    pub fn finish(&mut self) {
        self.next = None;
    }
}

impl Default for PendingCursor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_cursor_moves_past_returned_entries() {
        let mut cursor = PendingCursor::new();
        assert_eq!(cursor.start_id().as_deref(), Some("0"));

        let batch = vec![
            LogRecord::new("5-0", HashMap::new()),
            LogRecord::new("7-1", HashMap::new()),
        ];
        cursor.advance(&batch);
        assert_eq!(cursor.start_id().as_deref(), Some("7-1"));

        // Unacked entries are not offered again once the walk is past them.
        cursor.advance(&[]);
        assert_eq!(cursor.start_id(), None);
    }

    #[test]
    fn test_pending_cursor_finish() {
        let mut cursor = PendingCursor::new();
        cursor.finish();
        assert_eq!(cursor.start_id(), None);
    }

    #[test]
    fn test_new_does_not_connect() {
        let config = LogConfig {
            redis_addr: "127.0.0.1:1".to_string(),
            ..LogConfig::default()
        };
        let log = RedisStreamLog::new(config).unwrap();
        assert_eq!(log.describe(), "redis-stream:readings/agggrp");
    }

    #[test]
    fn test_rejects_bad_url() {
        let config = LogConfig {
            redis_addr: "http://not-redis".to_string(),
            ..LogConfig::default()
        };
        assert!(RedisStreamLog::new(config).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_log_is_transport_error() {
        let config = LogConfig {
            redis_addr: "127.0.0.1:1".to_string(),
            ..LogConfig::default()
        };
        let log = RedisStreamLog::new(config).unwrap();
        let err = log.read_batch(10, Duration::from_millis(10)).await.unwrap_err();
        assert!(!log.is_healthy().await);

        let err: PipelineError = err.into();
        assert!(err.is_transient());
    }
}
