//! SyncDefinition / FieldMapping / SyncSource / SyncTarget (spec §3).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shard::ShardingPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    PushOnly,
    TwoWay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    SourceWins,
    TargetWins,
    LastWriterWins,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    PrimaryKey,
    CompositeColumns,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStrategy {
    Single,
    Conditional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorStrategy {
    Timestamp,
    Lsn,
    DeltaToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldDirection {
    PushOnly,
    PullOnly,
    Bidirectional,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMapping {
    pub source_name: String,
    pub target_name: String,
    pub target_type: String,
    pub is_key: bool,
    pub is_readonly: bool,
    pub is_system: bool,
    pub direction: FieldDirection,
    pub transform_rule: Option<String>,
}

impl FieldMapping {
    /// Participates in the push-side mapping table (spec §4.7 step 5):
    /// excludes pull_only, is_readonly, is_system.
    pub fn is_push_eligible(&self) -> bool {
        self.direction != FieldDirection::PullOnly && !self.is_readonly && !self.is_system
    }

    /// Participates in the ingress-side (reverse) mapping (spec §4.10 step 3):
    /// excludes push_only, readonly and system fields in the reverse direction.
    pub fn is_pull_eligible(&self) -> bool {
        self.direction != FieldDirection::PushOnly && !self.is_readonly && !self.is_system
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceRole {
    Primary,
    Replica,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSource {
    pub sync_def_id: Uuid,
    pub database_instance_id: Uuid,
    pub role: SourceRole,
    pub priority: i32,
    pub is_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncTarget {
    pub sync_def_id: Uuid,
    pub target_list_id: Uuid,
    pub connection_id: Option<Uuid>,
    pub site_id: Option<String>,
    pub is_default: bool,
    pub priority: i32,
    pub status: TargetStatus,
}

impl SyncTarget {
    pub fn is_active(&self) -> bool {
        self.status == TargetStatus::Active
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncDefinition {
    pub id: Uuid,
    pub name: String,
    pub source_schema: String,
    pub source_table_name: String,
    pub cursor_column: String,
    pub target_list_id: Option<Uuid>,
    pub sync_mode: SyncMode,
    pub conflict_policy: ConflictPolicy,
    pub key_strategy: KeyStrategy,
    pub target_strategy: TargetStrategy,
    pub sharding_policy: Option<ShardingPolicy>,
    pub cursor_strategy: CursorStrategy,
    pub rate_limit: Option<u32>,
    pub paused: bool,
    pub cdc_enabled: bool,
    pub field_mappings: Vec<FieldMapping>,
}

impl SyncDefinition {
    pub fn key_mappings(&self) -> impl Iterator<Item = &FieldMapping> {
        self.field_mappings.iter().filter(|fm| fm.is_key)
    }

    pub fn push_mappings(&self) -> impl Iterator<Item = &FieldMapping> {
        self.field_mappings.iter().filter(|fm| fm.is_push_eligible())
    }

    pub fn pull_mappings(&self) -> impl Iterator<Item = &FieldMapping> {
        self.field_mappings.iter().filter(|fm| fm.is_pull_eligible())
    }
}
