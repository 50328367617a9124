//! `DurableQueue` port (spec §6, ADDED A2 in SPEC_FULL.md): the at-least-once,
//! consumer-group queue sitting between the CDC ingestion worker (C8, sole
//! producer) and the CDC consumer pool (C9, competing consumers). Production
//! adapter is `queue::redis_streams`, grounded on
//! `examples/original_source/backend/app/services/cdc_consumer.py`'s XADD/
//! XREADGROUP/XACK usage.

use async_trait::async_trait;
use bytes::Bytes;

use crate::Result;

/// One delivered message: a stream-assigned id plus the raw frame bytes
/// C8 enqueued (frame bytes + LSN + instance id, already concatenated by the
/// caller — the queue itself is payload-agnostic).
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub id: String,
    pub payload: Bytes,
}

#[async_trait]
pub trait DurableQueue: Send + Sync {
    async fn append(&self, key: &str, bytes: Bytes) -> Result<String>;

    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        stream: &str,
        count: u32,
        block_ms: u32,
    ) -> Result<Vec<QueueMessage>>;

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<()>;

    async fn len(&self, stream: &str) -> Result<u64>;
}
