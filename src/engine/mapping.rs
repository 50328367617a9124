//! Field mapping helpers shared by the push engine (C7), CDC consumer (C9)
//! and ingress engine (C10). Ported from the per-engine mapping loops in
//! `examples/original_source/backend/app/services/pusher.py::run_push` and
//! `.../synchronizer.py::_process_changes`, which each rebuild a
//! `{source_col: value}` / `{target_col: value}` dict by hand from
//! `field_mappings` — here it's one pair of functions instead of two
//! independent loops that can drift apart.
//!
//! Canonical hashing note: the original's two "push" producers disagreed on
//! which column-name space `content_hash` is computed over —
//! `pusher.py::_compute_content_hash` and `synchronizer.py::_compute_content_hash`
//! both hash a `{source_col: value}` dict, but `cdc_consumer.py::_apply_change`
//! hashes the SharePoint-keyed `sp_data` dict instead. Since spec §4.3
//! requires "the exact same function ... used on both sides of the
//! boundary", we pin the canonical key space to *source* column names
//! everywhere (matching the two majority implementations) and fix the CDC
//! consumer to match; see DESIGN.md.

use crate::hashing;
use crate::model::{FieldMapping, KeyStrategy, Row, SyncDefinition, Value};

/// Field mappings that participate in the canonical hashed payload: any
/// column that isn't readonly/system metadata, regardless of direction.
fn cross_mappings(def: &SyncDefinition) -> impl Iterator<Item = &FieldMapping> {
    def.field_mappings.iter().filter(|fm| !fm.is_readonly && !fm.is_system)
}

/// The canonical mapped payload, keyed by source column name, computed from
/// a source-side row. Used by the push engine before writing and by the
/// loop-suppression check after mapping an incoming CDC row.
pub fn canonical_from_source(def: &SyncDefinition, source_row: &Row) -> Row {
    let mut out = Row::new();
    for fm in cross_mappings(def) {
        if let Some(v) = source_row.get(&fm.source_name) {
            out.insert(fm.source_name.clone(), v.clone());
        }
    }
    out
}

/// The canonical mapped payload, keyed by source column name, reconstructed
/// from a target-side (list backend) row via the reverse mapping. Used by
/// the ingress engine to compare an incoming change against the ledger.
pub fn canonical_from_target(def: &SyncDefinition, target_fields: &Row) -> Row {
    let mut out = Row::new();
    for fm in cross_mappings(def) {
        if let Some(v) = target_fields.get(&fm.target_name) {
            out.insert(fm.source_name.clone(), v.clone());
        }
    }
    out
}

/// Push-side payload (spec §4.7 step 5): target-keyed, excludes pull_only,
/// readonly and system fields.
pub fn push_target_fields(def: &SyncDefinition, source_row: &Row) -> Row {
    let mut out = Row::new();
    for fm in def.push_mappings() {
        if let Some(v) = source_row.get(&fm.source_name) {
            out.insert(fm.target_name.clone(), v.clone());
        }
    }
    out
}

/// Ingress-side (reverse) payload (spec §4.10 step 3): source-keyed,
/// excludes push_only, readonly and system fields.
pub fn pull_source_fields(def: &SyncDefinition, target_fields: &Row) -> Row {
    let mut out = Row::new();
    for fm in def.pull_mappings() {
        if let Some(v) = target_fields.get(&fm.target_name) {
            out.insert(fm.source_name.clone(), v.clone());
        }
    }
    out
}

/// `source_identity` / `source_identity_hash` for a source-side row (spec
/// §4.3). Returns `None` if any key column is absent from the row (the
/// caller should treat that as a non-fatal, skip-this-row condition).
pub fn identity_for(def: &SyncDefinition, source_row: &Row) -> Option<(String, String)> {
    let key_values: Vec<(&str, &Value)> = def
        .key_mappings()
        .map(|fm| source_row.get(&fm.source_name).map(|v| (fm.source_name.as_str(), v)))
        .collect::<Option<Vec<_>>>()?;
    if key_values.is_empty() {
        return None;
    }
    let identity = hashing::source_identity(key_strategy(def), &key_values);
    let hash = hashing::identity_hash(&identity);
    Some((identity, hash))
}

fn key_strategy(def: &SyncDefinition) -> KeyStrategy {
    def.key_strategy
}
