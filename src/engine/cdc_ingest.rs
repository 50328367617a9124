//! CDC ingestion worker (C8) — spec §4.8. One long-running instance per
//! active source instance. Ported from
//! `examples/original_source/backend/app/services/cdc.py::CDCService.run`;
//! the Python original shells out to `psycopg2`'s `consume_stream` callback,
//! here it's a plain `tokio::select!` loop over the decoded-frame stream from
//! `SourceDB::open_replication` and a cooperative stop signal.

use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::context::EngineContext;
use crate::decoder::Frame;
use crate::model::{Cursor, CursorDiscriminator, CursorScope, CursorType};
use crate::Result;

/// Namespace used for the checkpoint cursor's `sync_def_id` slot. The
/// checkpoint is per source instance, not per sync definition (one
/// replication slot can feed several definitions), so it doesn't fit the
/// `(sync_def_id, scope, discriminator)` key the ledger/cursor store was
/// designed around; we park it under a fixed nil id rather than adding a
/// second cursor table for a single row per instance.
pub const CDC_CHECKPOINT_NS: Uuid = Uuid::nil();

/// Wire payload enqueued to the durable queue: an already-decoded frame plus
/// the LSN it was observed at and the instance it came from, so the consumer
/// doesn't need its own connection back to the source to know provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdcEnvelope {
    pub instance_id: Uuid,
    pub lsn: i64,
    pub frame: Frame,
}

fn format_lsn(lsn: i64) -> String {
    format!("{:08X}/{:08X}", (lsn as u64) >> 32, (lsn as u64) & 0xFFFF_FFFF)
}

fn parse_lsn(text: &str) -> i64 {
    let Some((hi, lo)) = text.split_once('/') else {
        return 0;
    };
    let hi = u32::from_str_radix(hi, 16).unwrap_or(0) as u64;
    let lo = u32::from_str_radix(lo, 16).unwrap_or(0) as u64;
    ((hi << 32) | lo) as i64
}

/// Runs the ingestion worker until the stream ends, a hard error occurs, or
/// `stop` is signalled. The caller (orchestrator/supervisor) is responsible
/// for restarting it on error — it resumes from the last checkpointed LSN
/// because that checkpoint, not an in-memory cursor, is the source of truth.
pub async fn run_cdc_ingest(
    ctx: &EngineContext,
    instance_id: Uuid,
    slot_name: &str,
    mut stop: watch::Receiver<bool>,
) -> Result<()> {
    let source_db = ctx.source_dbs.resolve(instance_id).await?;

    let discriminator = CursorDiscriminator::SourceInstance(instance_id);
    let checkpoint = ctx
        .ledger
        .get_cursor(CDC_CHECKPOINT_NS, CursorScope::Source, &discriminator)
        .await?;
    let start_lsn = checkpoint.as_ref().map(|c| parse_lsn(&c.cursor_value)).unwrap_or(0);

    let known_slots = source_db.list_slots().await?;
    if !known_slots.iter().any(|s| s == slot_name) {
        if let Err(e) = source_db.create_slot(slot_name).await {
            warn!(slot_name, error = %e, "replication slot creation failed, assuming it already exists");
        }
    }

    info!(instance_id = %instance_id, slot_name, start_lsn = format_lsn(start_lsn), "starting CDC ingestion");

    let mut stream = source_db.open_replication(slot_name, start_lsn).await?;
    let stream_key = &ctx.config.cdc.stream_key;
    let high_water_mark = ctx.config.cdc.high_water_mark;
    let poll = Duration::from_millis(ctx.config.cdc.backpressure_poll_ms);

    loop {
        let next = tokio::select! {
            biased;
            _ = stop.changed() => {
                info!(instance_id = %instance_id, "CDC ingestion received stop signal");
                return Ok(());
            }
            item = stream.next() => item,
        };

        let Some(item) = next else {
            info!(instance_id = %instance_id, "replication stream ended");
            return Ok(());
        };
        let (frame, lsn) = item?;

        // Backpressure: don't grow the queue past the high-water mark.
        loop {
            let depth = ctx.queue.len(stream_key).await?;
            if depth <= high_water_mark {
                break;
            }
            warn!(depth, high_water_mark, "CDC queue over high-water mark, pausing ingestion");
            tokio::select! {
                biased;
                _ = stop.changed() => {
                    info!(instance_id = %instance_id, "CDC ingestion stopped while backpressured");
                    return Ok(());
                }
                _ = tokio::time::sleep(poll) => {}
            }
        }

        let envelope = CdcEnvelope { instance_id, lsn, frame };
        let payload = Bytes::from(
            serde_json::to_vec(&envelope).map_err(|e| crate::EngineError::Invariant(e.to_string()))?,
        );
        ctx.queue.append(stream_key, payload).await?;

        if let Err(e) = source_db.send_feedback(lsn).await {
            warn!(error = %e, "failed to send replication feedback");
        }

        let updated = Cursor {
            sync_def_id: CDC_CHECKPOINT_NS,
            scope: CursorScope::Source,
            discriminator: discriminator.clone(),
            cursor_type: CursorType::Lsn,
            cursor_value: format_lsn(lsn),
            updated_at: ctx.clock.now(),
        };
        if let Err(e) = ctx.ledger.upsert_cursor(updated).await {
            error!(error = %e, "failed to checkpoint CDC LSN");
        }
    }
}
