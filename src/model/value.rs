//! Typed row values (spec §9, Design Note: "Dynamic row dictionaries").
//!
//! The source adapter, the decoder and the list backend all funnel into this
//! one sum type so hashing and mapping are defined once, not per language-
//! native dynamic value.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single column value. `Unchanged` only ever appears transiently while
/// decoding a TOAST-elided column out of a replication tuple; callers must
/// resolve it against previously known state before it reaches a `Row`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum Value {
    Null,
    Text(String),
    Integer(i64),
    Decimal(Decimal),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
    Binary(Vec<u8>),
}

impl Value {
    /// Canonical textual form used by the content hash (spec §4.3): ISO-8601
    /// UTC timestamps, decimals without trailing zeros, null preserved.
    pub fn canonical_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Text(s) => Some(s.clone()),
            Value::Integer(i) => Some(i.to_string()),
            Value::Decimal(d) => Some(d.normalize().to_string()),
            Value::Boolean(b) => Some(b.to_string()),
            Value::Timestamp(ts) => Some(ts.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
            Value::Binary(bytes) => Some(data_encoding_base64(bytes)),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// Avoids pulling in a base64 crate for the one binary-column edge case;
/// content hashing only needs a stable, reversible-enough text form.
fn data_encoding_base64(bytes: &[u8]) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::with_capacity((bytes.len() + 2) / 3 * 4);
    for chunk in bytes.chunks(3) {
        let b0 = chunk[0];
        let b1 = *chunk.get(1).unwrap_or(&0);
        let b2 = *chunk.get(2).unwrap_or(&0);
        let n = ((b0 as u32) << 16) | ((b1 as u32) << 8) | (b2 as u32);
        out.push(ALPHABET[((n >> 18) & 0x3f) as usize] as char);
        out.push(ALPHABET[((n >> 12) & 0x3f) as usize] as char);
        out.push(if chunk.len() > 1 {
            ALPHABET[((n >> 6) & 0x3f) as usize] as char
        } else {
            '='
        });
        out.push(if chunk.len() > 2 {
            ALPHABET[(n & 0x3f) as usize] as char
        } else {
            '='
        });
    }
    out
}

/// A mapped or source-side row: ordered so downstream display/debugging is
/// stable, keyed by column name.
pub type Row = IndexMap<String, Value>;
