//! LedgerEntry — the authoritative mapping for a replicated row (spec §3, §4.4).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::definition::KeyStrategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Push,
    Pull,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub sync_def_id: Uuid,
    pub source_identity_hash: String,
    pub source_identity: String,
    pub source_key_strategy: KeyStrategy,
    pub source_instance_id: Uuid,
    pub target_list_id: Uuid,
    pub target_item_id: i64,
    pub content_hash: String,
    pub last_source_ts: Option<DateTime<Utc>>,
    pub last_sync_ts: DateTime<Utc>,
    pub provenance: Provenance,
}

impl LedgerEntry {
    /// Echo suppression predicate shared by push (spec §4.7e) and ingress
    /// (spec §4.10, "echo suppression"): the incoming content is exactly what
    /// the opposite side last wrote.
    pub fn is_echo_of(&self, provenance: Provenance, content_hash: &str) -> bool {
        self.provenance == provenance && self.content_hash == content_hash
    }
}
