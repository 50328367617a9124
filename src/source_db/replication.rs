//! Logical-replication stream plumbing: the pgoutput-over-`COPY BOTH`
//! transport that feeds raw bytes to the crate's own `decoder::Decoder`
//! (C1). `tokio-postgres`'s `copy_both_simple` is the same entrypoint
//! `examples/kokizzu-readyset/replicators/src/postgres_connector/wal_reader.rs`
//! is built on (there via the lower-level `tokio_postgres::client::Responses`);
//! we stay one layer up and parse the replication-protocol framing (`w`/`k`)
//! ourselves since our tuple decoder is our own, not readyset's.

use bytes::{Buf, Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_postgres::Client;

use crate::decoder::{Decoder, Frame};
use crate::{EngineError, Result};

/// Server→client replication messages are tagged `w` (XLogData) or
/// `k` (PrimaryKeepaliveMessage); anything else is a protocol violation.
const XLOG_DATA: u8 = b'w';
const KEEPALIVE: u8 = b'k';

/// Handle to an open replication stream's feedback channel. `open_stream`
/// spawns the task that owns the duplex; feedback requests are funneled to
/// it over this channel rather than fighting over the duplex directly from
/// multiple callers.
pub(super) struct ReplicationHandle {
    feedback_tx: mpsc::UnboundedSender<i64>,
}

impl ReplicationHandle {
    pub(super) fn send_feedback(&self, lsn: i64) -> Result<()> {
        self.feedback_tx
            .send(lsn)
            .map_err(|_| EngineError::Transport("replication stream already closed".to_string()))
    }
}

pub(super) async fn open_stream(
    client: &Client,
    slot_name: &str,
    start_lsn: i64,
) -> Result<(
    BoxStream<'static, Result<(Frame, i64)>>,
    ReplicationHandle,
)> {
    let lsn_text = format_lsn(start_lsn);
    let query = format!(
        "START_REPLICATION SLOT {slot_name} LOGICAL {lsn_text} (proto_version '1', publication_names 'arcore_cdc_pub')"
    );

    let duplex = client
        .copy_both_simple::<Bytes>(&query)
        .await
        .map_err(|e| EngineError::Transport(e.to_string()))?;

    let (feedback_tx, mut feedback_rx) = mpsc::unbounded_channel::<i64>();

    let stream = async_stream::stream! {
        tokio::pin!(duplex);
        let mut decoder = Decoder::new();

        loop {
            tokio::select! {
                biased;

                feedback = feedback_rx.recv() => {
                    match feedback {
                        Some(lsn) => {
                            if let Err(err) = duplex.send(status_update(lsn)).await {
                                yield Err(EngineError::Transport(err.to_string()));
                                break;
                            }
                        }
                        None => break,
                    }
                }

                chunk = duplex.next() => {
                    let Some(chunk) = chunk else { break };
                    let mut bytes = match chunk {
                        Ok(bytes) => bytes,
                        Err(err) => {
                            yield Err(EngineError::Transport(err.to_string()));
                            continue;
                        }
                    };

                    if bytes.is_empty() {
                        continue;
                    }
                    let tag = bytes.get_u8();

                    match tag {
                        XLOG_DATA => {
                            if bytes.len() < 24 {
                                yield Err(EngineError::Transport("truncated XLogData header".to_string()));
                                continue;
                            }
                            let _start_lsn = bytes.get_i64();
                            let end_lsn = bytes.get_i64();
                            let _send_time = bytes.get_i64();
                            match decoder.decode(bytes) {
                                Ok(frame) => yield Ok((frame, end_lsn)),
                                Err(err) => yield Err(EngineError::Decode(err)),
                            }
                        }
                        KEEPALIVE => {
                            // Caller drives `send_feedback` on its own cadence;
                            // nothing to react to here.
                        }
                        other => {
                            yield Err(EngineError::Transport(format!(
                                "unexpected replication protocol tag {other}"
                            )));
                        }
                    }
                }
            }
        }
    };

    Ok((Box::pin(stream), ReplicationHandle { feedback_tx }))
}

/// Builds a standby status update (`r`) message, the client→server feedback
/// frame of the replication protocol.
fn status_update(lsn: i64) -> Bytes {
    let mut buf = BytesMut::with_capacity(34);
    buf.extend_from_slice(b"r");
    buf.extend_from_slice(&lsn.to_be_bytes()); // written
    buf.extend_from_slice(&lsn.to_be_bytes()); // flushed
    buf.extend_from_slice(&lsn.to_be_bytes()); // applied
    buf.extend_from_slice(&0i64.to_be_bytes()); // client system clock
    buf.extend_from_slice(&[0]); // reply not requested
    buf.freeze()
}

pub(super) async fn create_slot(client: &Client, slot_name: &str) -> Result<()> {
    let query = format!("CREATE_REPLICATION_SLOT {slot_name} LOGICAL pgoutput");
    client
        .simple_query(&query)
        .await
        .map_err(|e| EngineError::Transport(e.to_string()))?;
    Ok(())
}

fn format_lsn(lsn: i64) -> String {
    format!("{:X}/{:X}", (lsn as u64) >> 32, (lsn as u64) & 0xFFFF_FFFF)
}
