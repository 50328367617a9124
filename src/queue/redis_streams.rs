//! Redis Streams adapter for [`crate::ports::DurableQueue`]. Grounded on
//! `examples/original_source/backend/app/services/cdc_consumer.py`'s direct
//! `XADD` / `XGROUP CREATE` / `XREADGROUP` / `XACK` usage, translated onto the
//! `redis` crate's async command set. Uses `ConnectionManager` for transparent
//! reconnects the same way the teacher's Postgres adapter leans on
//! `tokio_postgres`'s own retry-free-but-reconnectable connection object.

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, RedisError};
use tracing::{debug, warn};

use crate::ports::{DurableQueue, QueueMessage};
use crate::{EngineError, Result};

/// The single field name every stream entry carries; the queue itself is
/// payload-agnostic (spec §6), so one binary field is enough.
const FIELD: &str = "payload";

pub struct RedisStreamQueue {
    manager: ConnectionManager,
}

impl RedisStreamQueue {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(map_error)?;
        let manager = client.get_connection_manager().await.map_err(map_error)?;
        Ok(Self { manager })
    }

    /// Idempotently ensures the consumer group exists, creating the stream
    /// if necessary (`MKSTREAM`). Must be called before the first
    /// `read_group` for a given `(stream, group)` pair.
    pub async fn ensure_group(&self, stream: &str, group: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        let result: std::result::Result<(), RedisError> =
            conn.xgroup_create_mkstream(stream, group, "$").await;
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(map_error(e)),
        }
    }
}

#[async_trait]
impl DurableQueue for RedisStreamQueue {
    async fn append(&self, key: &str, bytes: Bytes) -> Result<String> {
        let mut conn = self.manager.clone();
        let id: String = conn
            .xadd(key, "*", &[(FIELD, bytes.as_ref())])
            .await
            .map_err(map_error)?;
        debug!(stream = key, id = %id, "enqueued message");
        Ok(id)
    }

    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        stream: &str,
        count: u32,
        block_ms: u32,
    ) -> Result<Vec<QueueMessage>> {
        let mut conn = self.manager.clone();
        let opts = StreamReadOptions::default()
            .group(group, consumer)
            .count(count as usize)
            .block(block_ms as usize);

        let reply: StreamReadReply = conn
            .xread_options(&[stream], &[">"], &opts)
            .await
            .map_err(map_error)?;

        let mut messages = Vec::new();
        for stream_key in reply.keys {
            for id in stream_key.ids {
                let payload: Vec<u8> = id
                    .map
                    .get(FIELD)
                    .and_then(|v| match v {
                        redis::Value::BulkString(bytes) => Some(bytes.clone()),
                        _ => None,
                    })
                    .unwrap_or_default();
                messages.push(QueueMessage {
                    id: id.id,
                    payload: Bytes::from(payload),
                });
            }
        }
        Ok(messages)
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        let acked: i64 = conn.xack(stream, group, &[id]).await.map_err(map_error)?;
        if acked == 0 {
            warn!(stream, group, id, "xack acknowledged zero entries; id may already be acked");
        }
        Ok(())
    }

    async fn len(&self, stream: &str) -> Result<u64> {
        let mut conn = self.manager.clone();
        let len: u64 = conn.xlen(stream).await.map_err(map_error)?;
        Ok(len)
    }
}

fn map_error(e: RedisError) -> EngineError {
    EngineError::Transport(e.to_string())
}
