//! Orchestrator (C12) — spec §4.12, §5 "one orchestrator serving synchronous
//! push/ingress requests; serialized per `(sync_def_id, kind)`". Ported in
//! spirit from `examples/original_source/backend/app/services/synchronizer.py`,
//! whose `Synchronizer.run` wraps a single push/pull invocation with run-row
//! bookkeeping; the per-key serialization itself has no equivalent in the
//! original (it relied on a single-threaded worker per definition) and is
//! added here because async Rust can otherwise run two requests for the same
//! definition concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info};
use uuid::Uuid;

use crate::context::EngineContext;
use crate::engine::{ingress, push, RowEvent};
use crate::model::{EventRecord, RunKind, RunRecord, RunStatus};
use crate::Result;

/// Keyed locks, one per `(sync_def_id, kind)`, created lazily. Mirrors the
/// `DashMap`-of-handles pattern used by [`crate::ledger_store::InMemoryLedgerStore`]
/// but over async mutexes since a run can await across a suspension point.
#[derive(Default)]
pub struct Orchestrator {
    locks: SyncMutex<HashMap<(Uuid, RunKind), Arc<AsyncMutex<()>>>>,
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, sync_def_id: Uuid, kind: RunKind) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .entry((sync_def_id, kind))
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Dispatches one run request, serialized against any other in-flight
    /// request for the same `(sync_def_id, kind)`.
    pub async fn dispatch(&self, ctx: &EngineContext, sync_def_id: Uuid, kind: RunKind) -> Result<RunRecord> {
        let lock = self.lock_for(sync_def_id, kind);
        let _guard = lock.lock().await;
        run_one(ctx, sync_def_id, kind).await
    }
}

async fn run_one(ctx: &EngineContext, sync_def_id: Uuid, kind: RunKind) -> Result<RunRecord> {
    let run_id = Uuid::new_v4();
    let started_at = ctx.clock.now();
    let mut run = RunRecord::new(run_id, sync_def_id, kind, started_at);
    ctx.runs.create_run(run.clone()).await?;
    info!(run_id = %run_id, sync_def_id = %sync_def_id, kind = ?kind, "run started");

    let (processed, succeeded, failed, skipped, events, outcome) = match kind {
        RunKind::Push => match push::run_push(ctx, sync_def_id).await {
            Ok(o) => (o.processed, o.succeeded, o.failed, o.skipped, o.events, Ok(())),
            Err(e) => (0, 0, 0, 0, Vec::new(), Err(e)),
        },
        RunKind::Ingress => match ingress::run_ingress(ctx, sync_def_id).await {
            Ok(o) => (o.processed, o.succeeded, o.failed, o.skipped, o.events, Ok(())),
            Err(e) => (0, 0, 0, 0, Vec::new(), Err(e)),
        },
    };

    run.processed = processed;
    run.succeeded = succeeded;
    run.failed = failed;
    run.skipped = skipped;
    run.ended_at = Some(ctx.clock.now());
    run.status = match &outcome {
        Err(_) => RunStatus::Failed,
        Ok(()) if failed > 0 && succeeded > 0 => RunStatus::Partial,
        Ok(()) if failed > 0 => RunStatus::Failed,
        Ok(()) => RunStatus::Completed,
    };
    run.error = outcome.as_ref().err().map(|e| e.to_string());

    for event in &events {
        append_event(ctx, run_id, event).await;
    }
    if let Err(e) = &outcome {
        error!(run_id = %run_id, sync_def_id = %sync_def_id, error = %e, "run failed");
        append_event(ctx, run_id, &RowEvent::error("run_failed", e.to_string())).await;
    }

    ctx.runs.update_run(run.clone()).await?;
    info!(
        run_id = %run_id, sync_def_id = %sync_def_id, status = ?run.status,
        processed, succeeded, failed, skipped, "run finished"
    );

    outcome?;
    Ok(run)
}

async fn append_event(ctx: &EngineContext, run_id: Uuid, event: &RowEvent) {
    let record = EventRecord {
        id: Uuid::new_v4(),
        run_id,
        severity: event.severity,
        event_type: event.event_type.clone(),
        message: event.message.clone(),
        occurred_at: ctx.clock.now(),
    };
    if let Err(e) = ctx.runs.append_event(record).await {
        error!(run_id = %run_id, error = %e, "failed to append run event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::config::EngineConfig;
    use crate::context::fakes::{
        FakeDefinitionRepository, FakeListBackend, FakeQueue, FakeSourceDb, SingleListBackend,
        SingleSourceDb,
    };
    use crate::ledger_store::InMemoryLedgerStore;
    use crate::model::{
        ConflictPolicy, CursorStrategy, FieldDirection, FieldMapping, KeyStrategy, SyncDefinition,
        SyncMode, SyncSource, SyncTarget, SourceRole, TargetStatus, TargetStrategy,
    };
    use crate::run_store::InMemoryRunStore;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn definition(def_id: Uuid, paused: bool) -> SyncDefinition {
        SyncDefinition {
            id: def_id,
            name: "widgets".into(),
            source_schema: "public".into(),
            source_table_name: "widgets".into(),
            cursor_column: "updated_at".into(),
            target_list_id: None,
            sync_mode: SyncMode::PushOnly,
            conflict_policy: ConflictPolicy::SourceWins,
            key_strategy: KeyStrategy::PrimaryKey,
            target_strategy: TargetStrategy::Single,
            sharding_policy: None,
            cursor_strategy: CursorStrategy::Timestamp,
            rate_limit: None,
            paused,
            cdc_enabled: false,
            field_mappings: vec![FieldMapping {
                source_name: "sku".into(),
                target_name: "SKU".into(),
                target_type: "text".into(),
                is_key: true,
                is_readonly: false,
                is_system: false,
                direction: FieldDirection::Bidirectional,
                transform_rule: None,
            }],
        }
    }

    fn ctx_with(def_id: Uuid, instance_id: Uuid) -> EngineContext {
        let defs = Arc::new(FakeDefinitionRepository::default());
        defs.definitions.lock().insert(def_id, definition(def_id, false));
        defs.sources.lock().insert(
            def_id,
            vec![SyncSource {
                sync_def_id: def_id,
                database_instance_id: instance_id,
                role: SourceRole::Primary,
                priority: 0,
                is_enabled: true,
            }],
        );
        let target_list = Uuid::new_v4();
        defs.targets.lock().insert(
            def_id,
            vec![SyncTarget {
                sync_def_id: def_id,
                target_list_id: target_list,
                connection_id: None,
                site_id: Some("site-a".into()),
                is_default: true,
                priority: 0,
                status: TargetStatus::Active,
            }],
        );
        let source_db = Arc::new(FakeSourceDb::new("sku", Vec::new()));
        let list_backend = Arc::new(FakeListBackend::new());
        EngineContext::new(
            Arc::new(EngineConfig::default()),
            defs,
            Arc::new(InMemoryLedgerStore::default()),
            Arc::new(InMemoryRunStore::default()),
            Arc::new(FakeQueue::default()),
            Arc::new(SingleSourceDb(source_db)),
            Arc::new(SingleListBackend(list_backend)),
            Arc::new(FixedClock::new(Utc::now())),
        )
    }

    #[tokio::test]
    async fn dispatch_creates_and_completes_a_run_record() {
        let def_id = Uuid::new_v4();
        let instance_id = Uuid::new_v4();
        let ctx = ctx_with(def_id, instance_id);
        let orch = Orchestrator::new();

        let run = orch.dispatch(&ctx, def_id, RunKind::Push).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);

        let fetched = ctx.runs.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, RunStatus::Completed);
        assert!(fetched.ended_at.is_some());
    }

    #[tokio::test]
    async fn concurrent_dispatch_for_same_key_all_complete_with_distinct_run_ids() {
        let def_id = Uuid::new_v4();
        let instance_id = Uuid::new_v4();
        let ctx = ctx_with(def_id, instance_id);
        let orch = Arc::new(Orchestrator::new());
        let completions = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let orch = orch.clone();
            let ctx = ctx.clone();
            let completions = completions.clone();
            handles.push(tokio::spawn(async move {
                let run = orch.dispatch(&ctx, def_id, RunKind::Push).await?;
                completions.fetch_add(1, Ordering::SeqCst);
                Result::Ok(run.id)
            }));
        }
        let mut ids = Vec::new();
        for h in handles {
            ids.push(h.await.unwrap().unwrap());
        }
        assert_eq!(completions.load(Ordering::SeqCst), 4);
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 4, "each dispatch gets its own run id");

        // The lock map keeps exactly one entry for this (sync_def_id, kind).
        assert_eq!(orch.locks.lock().len(), 1);
    }
}
