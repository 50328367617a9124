//! Identity & hashing (spec §4.3, C3).
//!
//! Grounded on `examples/original_source/backend/app/services/pusher.py`'s
//! `_compute_content_hash` (sha256 of sorted-key JSON) and the ledger's
//! `source_identity_hash` column, reimplemented over the typed `Value` sum
//! type instead of `json.dumps(..., default=str)`.

use sha2::{Digest, Sha256};

use crate::model::{KeyStrategy, Row, Value};

const IDENTITY_SEPARATOR: char = '\u{1f}'; // unit separator, never appears in printable keys

/// Printable source identity per `key_strategy` (spec §4.3).
///
/// * `PrimaryKey` — the single key column's canonical text form.
/// * `CompositeColumns` — key columns joined, ordinal-sorted by name, with a
///   fixed separator so two definitions can't collide on concatenation.
pub fn source_identity(strategy: KeyStrategy, key_values: &[(&str, &Value)]) -> String {
    let mut sorted: Vec<&(&str, &Value)> = key_values.iter().collect();
    sorted.sort_by_key(|(name, _)| *name);

    match strategy {
        KeyStrategy::PrimaryKey => sorted
            .first()
            .and_then(|(_, v)| v.canonical_text())
            .unwrap_or_default(),
        KeyStrategy::CompositeColumns => sorted
            .iter()
            .map(|(_, v)| v.canonical_text().unwrap_or_default())
            .collect::<Vec<_>>()
            .join(&IDENTITY_SEPARATOR.to_string()),
    }
}

/// SHA-256 of the UTF-8 identity string, lowercase hex.
pub fn identity_hash(identity: &str) -> String {
    hex_sha256(identity.as_bytes())
}

/// Canonical sorted-key JSON form of a mapped payload, used as the input to
/// `content_hash`. Exposed separately so tests can assert on the exact
/// serialization pgdog-style round-trip tests usually check.
pub fn canonical_payload(mapped: &Row) -> String {
    let mut keys: Vec<&String> = mapped.keys().collect();
    keys.sort();

    let mut out = String::from("{");
    for (i, key) in keys.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&serde_json::to_string(key).expect("string keys always serialize"));
        out.push(':');
        let value = &mapped[*key];
        match value {
            Value::Null => out.push_str("null"),
            other => {
                let text = other.canonical_text().unwrap_or_default();
                out.push_str(&serde_json::to_string(&text).expect("text always serializes"));
            }
        }
    }
    out.push('}');
    out
}

/// `content_hash` (spec §4.3): SHA-256 over the canonical mapped payload.
/// Identical on both sides of the boundary by construction — push computes it
/// from `map_to_target(row)`, ingress from the reverse mapping of the same
/// columns.
pub fn content_hash(mapped: &Row) -> String {
    hex_sha256(canonical_payload(mapped).as_bytes())
}

fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}
