//! RunRecord / EventRecord (spec §3, §4.12, §7).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Push,
    Ingress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    /// Some rows succeeded, some failed; cursor advanced only past the
    /// contiguous successful prefix (spec §4.7 step 6g, §7).
    Partial,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: Uuid,
    pub sync_def_id: Uuid,
    pub kind: RunKind,
    pub status: RunStatus,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    pub fn new(id: Uuid, sync_def_id: Uuid, kind: RunKind, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            sync_def_id,
            kind,
            status: RunStatus::Running,
            processed: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            error: None,
            started_at,
            ended_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSeverity {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: Uuid,
    pub run_id: Uuid,
    pub severity: EventSeverity,
    pub event_type: String,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}
