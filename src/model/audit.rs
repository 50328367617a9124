//! MoveAuditRecord — append-only log of target-list relocations (spec §4.11).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveStatus {
    Success,
    /// Ledger updated to point at the new item, but the old item could not
    /// be deleted: an orphan remains for reconciliation.
    SuccessOrphan,
    /// Worse: the new item was created but the ledger write failed. The
    /// logical row now exists in two lists and neither index reflects it.
    OrphanRisk,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveAuditRecord {
    pub id: Uuid,
    pub sync_def_id: Uuid,
    pub source_identity_hash: String,
    pub from_list_id: Uuid,
    pub to_list_id: Uuid,
    pub moved_at: DateTime<Utc>,
    pub status: MoveStatus,
    pub details: Option<String>,
}
