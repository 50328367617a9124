//! Postgres-backed `LedgerStore`: the production adapter promised by this
//! module's own doc comment ("a real transactional database"). Schema is
//! grounded on `examples/original_source/backend/app/models/core.py`'s
//! `SyncCursor`/`SyncLedgerEntry`/`MoveAuditLog` tables (`sync_cursors`,
//! `sync_ledger`, `move_audit_log`), with columns renamed to match this
//! crate's `model` field names (e.g. `sp_list_id`/`sp_item_id` ->
//! `target_list_id`/`target_item_id`) since the port is backend-agnostic,
//! not SharePoint-specific. Uses the same bare `tokio-postgres` + hand-rolled
//! SQL style as [`crate::source_db::PostgresSourceDb`] and
//! [`crate::definition_repository::PostgresDefinitionRepository`] — no ORM
//! is used anywhere in the corpus, so none is introduced here.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_postgres::{Client, NoTls, Row as PgRow};
use uuid::Uuid;

use crate::model::{
    Cursor, CursorDiscriminator, CursorScope, CursorType, LedgerEntry, MoveAuditRecord, MoveStatus,
    Provenance,
};
use crate::{EngineError, Result};

use super::LedgerStore;

pub struct PostgresLedgerStore {
    client: Arc<Client>,
}

impl PostgresLedgerStore {
    pub async fn connect(config: &str) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(config, NoTls)
            .await
            .map_err(map_error)?;

        tokio::spawn(async move {
            if let Err(err) = connection.await {
                tracing::error!(error = %err, "ledger store connection task exited");
            }
        });

        Ok(Self { client: Arc::new(client) })
    }

    pub fn from_client(client: Arc<Client>) -> Self {
        Self { client }
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

impl std::str::FromStr for Provenance {
    type Err = ();
    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s {
            "PUSH" | "push" => Ok(Provenance::Push),
            "PULL" | "pull" => Ok(Provenance::Pull),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for CursorScope {
    type Err = ();
    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s {
            "SOURCE" | "source" => Ok(CursorScope::Source),
            "TARGET" | "target" => Ok(CursorScope::Target),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for CursorType {
    type Err = ();
    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s {
            "TIMESTAMP" | "timestamp" => Ok(CursorType::Timestamp),
            "LSN" | "lsn" => Ok(CursorType::Lsn),
            "DELTA_TOKEN" | "delta_token" => Ok(CursorType::DeltaToken),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for MoveStatus {
    type Err = ();
    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s {
            "SUCCESS" | "success" => Ok(MoveStatus::Success),
            "SUCCESS_ORPHAN" | "success_orphan" => Ok(MoveStatus::SuccessOrphan),
            "ORPHAN_RISK" | "orphan_risk" => Ok(MoveStatus::OrphanRisk),
            _ => Err(()),
        }
    }
}

fn ledger_entry_from_row(row: &PgRow) -> Result<LedgerEntry> {
    let source_key_strategy: String = row.get(3);
    let provenance: String = row.get(10);
    Ok(LedgerEntry {
        sync_def_id: row.get(0),
        source_identity_hash: row.get(1),
        source_identity: row.get(2),
        source_key_strategy: parse_enum("sync_ledger.source_key_strategy", &source_key_strategy)?,
        source_instance_id: row.get(4),
        target_list_id: row.get(5),
        target_item_id: row.get(6),
        content_hash: row.get(7),
        last_source_ts: row.get(8),
        last_sync_ts: row.get(9),
        provenance: parse_enum("sync_ledger.provenance", &provenance)?,
    })
}

/// Encodes a [`CursorDiscriminator`] as the `(kind, id)` pair `sync_cursors`
/// stores it as, since the enum itself can't be a SQL column type directly.
fn discriminator_parts(discriminator: &CursorDiscriminator) -> (&'static str, Uuid) {
    match discriminator {
        CursorDiscriminator::SourceInstance(id) => ("source_instance", *id),
        CursorDiscriminator::TargetList(id) => ("target_list", *id),
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn get_entry(&self, sync_def_id: Uuid, source_identity_hash: &str) -> Result<Option<LedgerEntry>> {
        let row = self
            .client
            .query_opt(
                "SELECT sync_def_id, source_identity_hash, source_identity, source_key_strategy, \
                 source_instance_id, target_list_id, target_item_id, content_hash, last_source_ts, \
                 last_sync_ts, provenance \
                 FROM sync_ledger WHERE sync_def_id = $1 AND source_identity_hash = $2",
                &[&sync_def_id, &source_identity_hash],
            )
            .await
            .map_err(map_error)?;
        row.as_ref().map(ledger_entry_from_row).transpose()
    }

    async fn get_entry_by_target_item(
        &self,
        sync_def_id: Uuid,
        target_list_id: Uuid,
        target_item_id: i64,
    ) -> Result<Option<LedgerEntry>> {
        let row = self
            .client
            .query_opt(
                "SELECT sync_def_id, source_identity_hash, source_identity, source_key_strategy, \
                 source_instance_id, target_list_id, target_item_id, content_hash, last_source_ts, \
                 last_sync_ts, provenance \
                 FROM sync_ledger WHERE sync_def_id = $1 AND target_list_id = $2 AND target_item_id = $3",
                &[&sync_def_id, &target_list_id, &target_item_id],
            )
            .await
            .map_err(map_error)?;
        row.as_ref().map(ledger_entry_from_row).transpose()
    }

    async fn upsert_entry(&self, entry: LedgerEntry) -> Result<()> {
        self.client
            .execute(
                "INSERT INTO sync_ledger \
                 (sync_def_id, source_identity_hash, source_identity, source_key_strategy, \
                  source_instance_id, target_list_id, target_item_id, content_hash, last_source_ts, \
                  last_sync_ts, provenance) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
                 ON CONFLICT (sync_def_id, source_identity_hash) DO UPDATE SET \
                 source_identity = EXCLUDED.source_identity, \
                 source_key_strategy = EXCLUDED.source_key_strategy, \
                 source_instance_id = EXCLUDED.source_instance_id, \
                 target_list_id = EXCLUDED.target_list_id, \
                 target_item_id = EXCLUDED.target_item_id, \
                 content_hash = EXCLUDED.content_hash, \
                 last_source_ts = EXCLUDED.last_source_ts, \
                 last_sync_ts = EXCLUDED.last_sync_ts, \
                 provenance = EXCLUDED.provenance",
                &[
                    &entry.sync_def_id,
                    &entry.source_identity_hash,
                    &entry.source_identity,
                    &serde_enum_str(entry.source_key_strategy),
                    &entry.source_instance_id,
                    &entry.target_list_id,
                    &entry.target_item_id,
                    &entry.content_hash,
                    &entry.last_source_ts,
                    &entry.last_sync_ts,
                    &serde_enum_str(entry.provenance),
                ],
            )
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn delete_entry(&self, sync_def_id: Uuid, source_identity_hash: &str) -> Result<()> {
        self.client
            .execute(
                "DELETE FROM sync_ledger WHERE sync_def_id = $1 AND source_identity_hash = $2",
                &[&sync_def_id, &source_identity_hash],
            )
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn list_entries_for_target(&self, sync_def_id: Uuid, target_list_id: Uuid) -> Result<Vec<LedgerEntry>> {
        let rows = self
            .client
            .query(
                "SELECT sync_def_id, source_identity_hash, source_identity, source_key_strategy, \
                 source_instance_id, target_list_id, target_item_id, content_hash, last_source_ts, \
                 last_sync_ts, provenance \
                 FROM sync_ledger WHERE sync_def_id = $1 AND target_list_id = $2",
                &[&sync_def_id, &target_list_id],
            )
            .await
            .map_err(map_error)?;
        rows.iter().map(ledger_entry_from_row).collect()
    }

    async fn get_cursor(
        &self,
        sync_def_id: Uuid,
        scope: CursorScope,
        discriminator: &CursorDiscriminator,
    ) -> Result<Option<Cursor>> {
        let (kind, id) = discriminator_parts(discriminator);
        let row = self
            .client
            .query_opt(
                "SELECT cursor_scope, cursor_type, cursor_value, updated_at \
                 FROM sync_cursors \
                 WHERE sync_def_id = $1 AND cursor_scope = $2 \
                 AND discriminator_kind = $3 AND discriminator_id = $4",
                &[&sync_def_id, &serde_enum_str(scope), &kind, &id],
            )
            .await
            .map_err(map_error)?;

        let Some(row) = row else { return Ok(None) };
        let cursor_type: String = row.get(1);
        Ok(Some(Cursor {
            sync_def_id,
            scope,
            discriminator: discriminator.clone(),
            cursor_type: parse_enum("sync_cursors.cursor_type", &cursor_type)?,
            cursor_value: row.get(2),
            updated_at: row.get(3),
        }))
    }

    async fn upsert_cursor(&self, cursor: Cursor) -> Result<()> {
        let existing = self.get_cursor(cursor.sync_def_id, cursor.scope, &cursor.discriminator).await?;
        if let Some(existing) = &existing {
            if !existing.advances(&cursor.cursor_value) {
                return Err(EngineError::Invariant(format!(
                    "cursor regression for {:?}/{:?}: {} does not advance past {}",
                    cursor.scope, cursor.discriminator, cursor.cursor_value, existing.cursor_value
                )));
            }
        }

        let (kind, id) = discriminator_parts(&cursor.discriminator);
        self.client
            .execute(
                "INSERT INTO sync_cursors \
                 (sync_def_id, cursor_scope, discriminator_kind, discriminator_id, cursor_type, \
                  cursor_value, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7) \
                 ON CONFLICT (sync_def_id, cursor_scope, discriminator_kind, discriminator_id) \
                 DO UPDATE SET cursor_type = EXCLUDED.cursor_type, \
                 cursor_value = EXCLUDED.cursor_value, updated_at = EXCLUDED.updated_at",
                &[
                    &cursor.sync_def_id,
                    &serde_enum_str(cursor.scope),
                    &kind,
                    &id,
                    &serde_enum_str(cursor.cursor_type),
                    &cursor.cursor_value,
                    &cursor.updated_at,
                ],
            )
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn append_move_audit(&self, record: MoveAuditRecord) -> Result<()> {
        self.client
            .execute(
                "INSERT INTO move_audit_log \
                 (id, sync_def_id, source_identity_hash, from_list_id, to_list_id, moved_at, \
                  status, details) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                &[
                    &record.id,
                    &record.sync_def_id,
                    &record.source_identity_hash,
                    &record.from_list_id,
                    &record.to_list_id,
                    &record.moved_at,
                    &serde_enum_str(record.status),
                    &record.details,
                ],
            )
            .await
            .map_err(map_error)?;
        Ok(())
    }
}

/// `snake_case` rendering of a `Copy` model enum, matching each type's own
/// `#[serde(rename_all = "snake_case")]` so stored values round-trip through
/// both this adapter's `FromStr` impls and `serde_json` alike.
fn serde_enum_str<T: serde::Serialize>(value: T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => s,
        other => unreachable!("model enum must serialize to a string: {other:?}"),
    }
}
