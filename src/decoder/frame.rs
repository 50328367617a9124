//! Frame parsing helpers and the typed event union (spec §4.1).
//!
//! Field layout follows the PostgreSQL logical replication message format
//! (pgoutput) as implemented by
//! `examples/original_source/backend/app/services/pgoutput.py` and
//! `pgdog/src/net/messages/replication/logical/*.rs`'s per-message structs.

use bytes::{Buf, Bytes};
use serde::{Deserialize, Serialize};

use super::error::DecodeError;
use super::tuple::RawRow;

pub(super) fn read_i32(bytes: &mut Bytes) -> Result<i32, DecodeError> {
    if bytes.len() < 4 {
        return Err(DecodeError::Truncated {
            expected: 4,
            got: bytes.len(),
        });
    }
    Ok(bytes.get_i32())
}

pub(super) fn read_i64(bytes: &mut Bytes) -> Result<i64, DecodeError> {
    if bytes.len() < 8 {
        return Err(DecodeError::Truncated {
            expected: 8,
            got: bytes.len(),
        });
    }
    Ok(bytes.get_i64())
}

pub(super) fn read_i16(bytes: &mut Bytes) -> Result<i16, DecodeError> {
    if bytes.len() < 2 {
        return Err(DecodeError::Truncated {
            expected: 2,
            got: bytes.len(),
        });
    }
    Ok(bytes.get_i16())
}

pub(super) fn c_string(bytes: &mut Bytes) -> Result<String, DecodeError> {
    let pos = bytes
        .iter()
        .position(|b| *b == 0)
        .ok_or(DecodeError::UnterminatedString)?;
    let raw = bytes.split_to(pos);
    bytes.advance(1); // consume the terminator
    String::from_utf8(raw.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Begin {
    pub final_lsn: i64,
    pub commit_timestamp: i64,
    pub xid: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub flags: i8,
    pub lsn: i64,
    pub end_lsn: i64,
    pub commit_timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowChange {
    pub schema: String,
    pub table: String,
    pub row: RawRow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateChange {
    pub schema: String,
    pub table: String,
    pub key: Option<RawRow>,
    pub old: Option<RawRow>,
    pub row: RawRow,
}

/// The typed event union a `Decoder` produces (spec §4.1). Serializable so
/// the CDC ingestion worker (C8) can hand an already-decoded frame to the
/// durable queue as its payload — `tokio_postgres::copy_both_simple` yields
/// frames to `source_db::replication` one layer above the queue boundary, so
/// there's no separate "raw bytes" form left to carry; see DESIGN.md.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Frame {
    Begin(Begin),
    Commit(Commit),
    Relation { id: i32, schema: String, table: String },
    Insert(RowChange),
    Update(UpdateChange),
    Delete(RowChange),
    /// A recognized-but-uninteresting tag (origin, type, truncate, message).
    Unknown(char),
}

impl Begin {
    pub(super) fn decode(mut bytes: Bytes) -> Result<Self, DecodeError> {
        Ok(Self {
            final_lsn: read_i64(&mut bytes)?,
            commit_timestamp: read_i64(&mut bytes)?,
            xid: read_i32(&mut bytes)?,
        })
    }
}

impl Commit {
    pub(super) fn decode(mut bytes: Bytes) -> Result<Self, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Truncated {
                expected: 1,
                got: 0,
            });
        }
        let flags = bytes.get_i8();
        Ok(Self {
            flags,
            lsn: read_i64(&mut bytes)?,
            end_lsn: read_i64(&mut bytes)?,
            commit_timestamp: read_i64(&mut bytes)?,
        })
    }
}
