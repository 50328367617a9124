//! Tuple decoding (spec §4.1): three per-column markers — null, length-
//! prefixed UTF-8 text, and "unchanged" (TOASTed, value absent). Ported from
//! `examples/original_source/backend/app/services/pgoutput.py::_decode_tuple`
//! with the text-vs-binary distinction kept intentionally caller-resolved:
//! the decoder never guesses a previous value for an unchanged column.

use bytes::{Buf, Bytes};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::error::DecodeError;
use super::frame::{read_i16, read_i32};
use super::relation::Relation;

/// A single decoded column marker, before positional alignment with a
/// `Relation`'s column names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawValue {
    Null,
    /// Text-format value as sent by pgoutput; downstream type coercion
    /// (spec §4.3's canonical form) happens in the engine, not the decoder.
    Text(String),
    /// TOASTed column whose value wasn't sent; caller must read the previous
    /// value from upstream state (spec §4.1).
    Unchanged,
}

/// A row keyed by column name, aligned positionally against the last
/// `Relation` frame seen for this relation id.
pub type RawRow = IndexMap<String, RawValue>;

pub(super) fn decode_tuple(bytes: &mut Bytes, relation: &Relation) -> Result<RawRow, DecodeError> {
    let num_columns = read_i16(bytes)?;
    let mut row = RawRow::with_capacity(num_columns.max(0) as usize);

    for i in 0..num_columns as usize {
        if bytes.is_empty() {
            return Err(DecodeError::Truncated {
                expected: 1,
                got: 0,
            });
        }
        let marker = bytes.get_u8() as char;
        let value = match marker {
            'n' => RawValue::Null,
            'u' => RawValue::Unchanged,
            't' => {
                let len = read_i32(bytes)? as usize;
                if bytes.len() < len {
                    return Err(DecodeError::Truncated {
                        expected: len,
                        got: bytes.len(),
                    });
                }
                let raw = bytes.split_to(len);
                let text = String::from_utf8(raw.to_vec()).map_err(|_| DecodeError::InvalidUtf8)?;
                RawValue::Text(text)
            }
            other => return Err(DecodeError::UnknownTag(other)),
        };

        let name = relation
            .columns
            .get(i)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| format!("col_{i}"));
        row.insert(name, value);
    }

    Ok(row)
}
