//! Postgres-backed `RunStore`: durable run/event history, matching this
//! module's requirement that run rows survive a restart (spec §3 "Ownership:
//! the engine exclusively owns Ledger, Cursor, Run, Event, MoveAudit rows";
//! spec.md:283 indexes run/event by start-time desc). The `sync_runs` table
//! is grounded on `examples/original_source/backend/alembic/versions/008_run_history.py`'s
//! `sync_runs` table; that migration has no per-event table, so
//! `sync_run_events` is an addition needed to back `RunStore::append_event`/
//! `list_events`, shaped the same way as `sync_runs` itself.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_postgres::{Client, NoTls, Row as PgRow};
use uuid::Uuid;

use crate::model::{EventRecord, EventSeverity, RunKind, RunRecord, RunStatus};
use crate::{EngineError, Result};

use super::RunStore;

pub struct PostgresRunStore {
    client: Arc<Client>,
}

impl PostgresRunStore {
    pub async fn connect(config: &str) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(config, NoTls)
            .await
            .map_err(map_error)?;

        tokio::spawn(async move {
            if let Err(err) = connection.await {
                tracing::error!(error = %err, "run store connection task exited");
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

fn serde_enum_str<T: serde::Serialize>(value: T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => s,
        other => unreachable!("model enum must serialize to a string: {other:?}"),
    }
}

impl std::str::FromStr for RunKind {
    type Err = ();
    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s {
            "PUSH" | "push" => Ok(RunKind::Push),
            "INGRESS" | "ingress" => Ok(RunKind::Ingress),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = ();
    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s {
            "RUNNING" | "running" => Ok(RunStatus::Running),
            "COMPLETED" | "completed" => Ok(RunStatus::Completed),
            "FAILED" | "failed" => Ok(RunStatus::Failed),
            "PARTIAL" | "partial" => Ok(RunStatus::Partial),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for EventSeverity {
    type Err = ();
    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s {
            "INFO" | "info" => Ok(EventSeverity::Info),
            "WARN" | "warn" => Ok(EventSeverity::Warn),
            "ERROR" | "error" => Ok(EventSeverity::Error),
            _ => Err(()),
        }
    }
}

fn run_from_row(row: &PgRow) -> Result<RunRecord> {
    let kind: String = row.get(2);
    let status: String = row.get(3);
    Ok(RunRecord {
        id: row.get(0),
        sync_def_id: row.get(1),
        kind: parse_enum("sync_runs.kind", &kind)?,
        status: parse_enum("sync_runs.status", &status)?,
        processed: row.get::<_, i64>(4) as u64,
        succeeded: row.get::<_, i64>(5) as u64,
        failed: row.get::<_, i64>(6) as u64,
        skipped: row.get::<_, i64>(7) as u64,
        error: row.get(8),
        started_at: row.get(9),
        ended_at: row.get(10),
    })
}

#[async_trait]
impl RunStore for PostgresRunStore {
    async fn create_run(&self, run: RunRecord) -> Result<()> {
        self.client
            .execute(
                "INSERT INTO sync_runs \
                 (id, sync_def_id, kind, status, processed, succeeded, failed, skipped, error, \
                  started_at, ended_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
                &[
                    &run.id,
                    &run.sync_def_id,
                    &serde_enum_str(run.kind),
                    &serde_enum_str(run.status),
                    &(run.processed as i64),
                    &(run.succeeded as i64),
                    &(run.failed as i64),
                    &(run.skipped as i64),
                    &run.error,
                    &run.started_at,
                    &run.ended_at,
                ],
            )
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn update_run(&self, run: RunRecord) -> Result<()> {
        self.client
            .execute(
                "UPDATE sync_runs SET status = $2, processed = $3, succeeded = $4, failed = $5, \
                 skipped = $6, error = $7, ended_at = $8 WHERE id = $1",
                &[
                    &run.id,
                    &serde_enum_str(run.status),
                    &(run.processed as i64),
                    &(run.succeeded as i64),
                    &(run.failed as i64),
                    &(run.skipped as i64),
                    &run.error,
                    &run.ended_at,
                ],
            )
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<RunRecord>> {
        let row = self
            .client
            .query_opt(
                "SELECT id, sync_def_id, kind, status, processed, succeeded, failed, skipped, \
                 error, started_at, ended_at FROM sync_runs WHERE id = $1",
                &[&run_id],
            )
            .await
            .map_err(map_error)?;
        row.as_ref().map(run_from_row).transpose()
    }

    async fn append_event(&self, event: EventRecord) -> Result<()> {
        self.client
            .execute(
                "INSERT INTO sync_run_events (id, run_id, severity, event_type, message, occurred_at) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
                &[
                    &event.id,
                    &event.run_id,
                    &serde_enum_str(event.severity),
                    &event.event_type,
                    &event.message,
                    &event.occurred_at,
                ],
            )
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn list_events(&self, run_id: Uuid) -> Result<Vec<EventRecord>> {
        let rows = self
            .client
            .query(
                "SELECT id, run_id, severity, event_type, message, occurred_at \
                 FROM sync_run_events WHERE run_id = $1 ORDER BY occurred_at ASC",
                &[&run_id],
            )
            .await
            .map_err(map_error)?;

        rows.iter()
            .map(|row| {
                let severity: String = row.get(2);
                Ok(EventRecord {
                    id: row.get(0),
                    run_id: row.get(1),
                    severity: parse_enum("sync_run_events.severity", &severity)?,
                    event_type: row.get(3),
                    message: row.get(4),
                    occurred_at: row.get(5),
                })
            })
            .collect()
    }
}
