//! Production `DefinitionRepository` (spec §6): reads the control-plane
//! tables described by
//! `examples/original_source/backend/app/models/core.py` (`sync_definitions`,
//! `sync_sources`, `sync_targets`, `field_mappings`) straight through
//! `tokio-postgres`, the same driver [`crate::source_db::PostgresSourceDb`]
//! uses, since in this deployment the control plane lives in the same
//! Postgres cluster as the data being synced.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_postgres::{Client, NoTls, Row as PgRow};
use uuid::Uuid;

use crate::model::{
    ConflictPolicy, CursorStrategy, FieldDirection, FieldMapping, KeyStrategy, SourceRole,
    SyncDefinition, SyncMode, SyncSource, SyncTarget, TargetStatus, TargetStrategy,
};
use crate::ports::{CdcBinding, DefinitionRepository};
use crate::shard::ShardingPolicy;
use crate::{EngineError, Result};

pub struct PostgresDefinitionRepository {
    client: Arc<Client>,
}

impl PostgresDefinitionRepository {
    pub async fn connect(config: &str) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(config, NoTls)
            .await
            .map_err(map_error)?;

        tokio::spawn(async move {
            if let Err(err) = connection.await {
                tracing::error!(error = %err, "definition repository connection task exited");
            }
        });

        Ok(Self { client: Arc::new(client) })
    }

    pub fn from_client(client: Arc<Client>) -> Self {
        Self { client }
    }

    async fn field_mappings(&self, sync_def_id: Uuid) -> Result<Vec<FieldMapping>> {
        let rows = self
            .client
            .query(
                "SELECT source_column_name, target_column_name, target_type, is_key, is_readonly, \
                 COALESCE(is_system, false), direction, transform_rule \
                 FROM field_mappings WHERE sync_def_id = $1",
                &[&sync_def_id],
            )
            .await
            .map_err(map_error)?;
        rows.iter().map(field_mapping_from_row).collect()
    }
}

fn map_error(err: tokio_postgres::Error) -> EngineError {
    if let Some(code) = err.code() {
        if code == &tokio_postgres::error::SqlState::INSUFFICIENT_PRIVILEGE {
            return EngineError::Permission(err.to_string());
        }
    }
    EngineError::Transport(err.to_string())
}

fn parse_enum<T: std::str::FromStr>(label: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| EngineError::Invariant(format!("unrecognized {label} value: {value}")))
}

impl std::str::FromStr for SyncMode {
    type Err = ();
    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s {
            "ONE_WAY_PUSH" | "push_only" => Ok(SyncMode::PushOnly),
            "TWO_WAY" | "two_way" => Ok(SyncMode::TwoWay),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for ConflictPolicy {
    type Err = ();
    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s {
            "SOURCE_WINS" | "source_wins" => Ok(ConflictPolicy::SourceWins),
            "TARGET_WINS" | "target_wins" => Ok(ConflictPolicy::TargetWins),
            "LAST_WRITER_WINS" | "last_writer_wins" => Ok(ConflictPolicy::LastWriterWins),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for KeyStrategy {
    type Err = ();
    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s {
            "PRIMARY_KEY" | "primary_key" => Ok(KeyStrategy::PrimaryKey),
            "COMPOSITE_COLUMNS" | "composite_columns" => Ok(KeyStrategy::CompositeColumns),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for TargetStrategy {
    type Err = ();
    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s {
            "SINGLE" | "single" => Ok(TargetStrategy::Single),
            "CONDITIONAL" | "conditional" => Ok(TargetStrategy::Conditional),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for CursorStrategy {
    type Err = ();
    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s {
            "UPDATED_AT" | "timestamp" => Ok(CursorStrategy::Timestamp),
            "LSN" | "lsn" => Ok(CursorStrategy::Lsn),
            "DELTA_TOKEN" | "delta_token" => Ok(CursorStrategy::DeltaToken),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for SourceRole {
    type Err = ();
    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s {
            "PRIMARY" | "primary" => Ok(SourceRole::Primary),
            "REPLICA" | "replica" => Ok(SourceRole::Replica),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for TargetStatus {
    type Err = ();
    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s {
            "ACTIVE" | "active" => Ok(TargetStatus::Active),
            "INACTIVE" | "inactive" => Ok(TargetStatus::Inactive),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for FieldDirection {
    type Err = ();
    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s {
            "PUSH_ONLY" | "push_only" => Ok(FieldDirection::PushOnly),
            "PULL_ONLY" | "pull_only" => Ok(FieldDirection::PullOnly),
            "BIDIRECTIONAL" | "bidirectional" => Ok(FieldDirection::Bidirectional),
            _ => Err(()),
        }
    }
}

fn field_mapping_from_row(row: &PgRow) -> Result<FieldMapping> {
    let direction: String = row.get(6);
    Ok(FieldMapping {
        source_name: row.get(0),
        target_name: row.get(1),
        target_type: row.get(2),
        is_key: row.get(3),
        is_readonly: row.get(4),
        is_system: row.get(5),
        direction: parse_enum("field_mappings.direction", &direction)?,
        transform_rule: row.get(7),
    })
}

#[async_trait]
impl DefinitionRepository for PostgresDefinitionRepository {
    async fn get(&self, sync_def_id: Uuid) -> Result<SyncDefinition> {
        let row = self
            .client
            .query_opt(
                "SELECT id, name, source_schema, source_table_name, cursor_column, target_list_id, \
                 sync_mode, conflict_policy, key_strategy, target_strategy, cursor_strategy, \
                 rate_limit, paused, cdc_enabled, sharding_policy \
                 FROM sync_definitions WHERE id = $1",
                &[&sync_def_id],
            )
            .await
            .map_err(map_error)?
            .ok_or_else(|| EngineError::NotFound(format!("sync definition {sync_def_id}")))?;

        let sync_mode: String = row.get(6);
        let conflict_policy: String = row.get(7);
        let key_strategy: String = row.get(8);
        let target_strategy: String = row.get(9);
        let cursor_strategy: String = row.get(10);
        let rate_limit: Option<i32> = row.get(11);
        let sharding_json: Option<serde_json::Value> = row.get(14);

        Ok(SyncDefinition {
            id: row.get(0),
            name: row.get(1),
            source_schema: row.get(2),
            source_table_name: row.get(3),
            cursor_column: row.get(4),
            target_list_id: row.get(5),
            sync_mode: parse_enum("sync_definitions.sync_mode", &sync_mode)?,
            conflict_policy: parse_enum("sync_definitions.conflict_policy", &conflict_policy)?,
            key_strategy: parse_enum("sync_definitions.key_strategy", &key_strategy)?,
            target_strategy: parse_enum("sync_definitions.target_strategy", &target_strategy)?,
            sharding_policy: sharding_json
                .map(|v| serde_json::from_value::<ShardingPolicy>(v))
                .transpose()
                .map_err(|e| EngineError::Invariant(format!("sharding_policy decode: {e}")))?,
            cursor_strategy: parse_enum("sync_definitions.cursor_strategy", &cursor_strategy)?,
            rate_limit: rate_limit.map(|v| v as u32),
            paused: row.get(12),
            cdc_enabled: row.get(13),
            field_mappings: self.field_mappings(sync_def_id).await?,
        })
    }

    async fn get_source_binding(&self, sync_def_id: Uuid) -> Result<Vec<SyncSource>> {
        let rows = self
            .client
            .query(
                "SELECT database_instance_id, role, priority, is_enabled \
                 FROM sync_sources WHERE sync_def_id = $1 ORDER BY priority DESC",
                &[&sync_def_id],
            )
            .await
            .map_err(map_error)?;

        rows.iter()
            .map(|row| {
                let role: String = row.get(1);
                Ok(SyncSource {
                    sync_def_id,
                    database_instance_id: row.get(0),
                    role: parse_enum("sync_sources.role", &role)?,
                    priority: row.get(2),
                    is_enabled: row.get(3),
                })
            })
            .collect()
    }

    async fn list_targets(&self, sync_def_id: Uuid) -> Result<Vec<SyncTarget>> {
        let rows = self
            .client
            .query(
                "SELECT target_list_id, sharepoint_connection_id, site_id, is_default, priority, status \
                 FROM sync_targets WHERE sync_def_id = $1 ORDER BY priority ASC",
                &[&sync_def_id],
            )
            .await
            .map_err(map_error)?;

        rows.iter()
            .map(|row| {
                let status: String = row.get(5);
                Ok(SyncTarget {
                    sync_def_id,
                    target_list_id: row.get(0),
                    connection_id: row.get(1),
                    site_id: row.get(2),
                    is_default: row.get(3),
                    priority: row.get(4),
                    status: parse_enum("sync_targets.status", &status)?,
                })
            })
            .collect()
    }

    async fn enumerate_cdc_definitions(&self) -> Result<Vec<CdcBinding>> {
        let rows = self
            .client
            .query(
                "SELECT s.database_instance_id, d.source_schema, d.source_table_name, d.id \
                 FROM sync_sources s JOIN sync_definitions d ON d.id = s.sync_def_id \
                 WHERE d.cdc_enabled AND NOT d.paused AND s.is_enabled",
                &[],
            )
            .await
            .map_err(map_error)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let def_id: Uuid = row.get(3);
            out.push(CdcBinding {
                instance_id: row.get(0),
                schema: row.get(1),
                table: row.get(2),
                definition: self.get(def_id).await?,
            });
        }
        Ok(out)
    }

    async fn list_mappings(&self, sync_def_id: Uuid) -> Result<Vec<FieldMapping>> {
        self.field_mappings(sync_def_id).await
    }
}
