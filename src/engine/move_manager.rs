//! Move manager (C11) — spec §4.11. Ported from
//! `examples/original_source/backend/app/services/mover.py::MoveManager.move_item`,
//! generalized to take `sync_def_id` directly (the original threads a
//! pre-loaded `SyncLedgerEntry` ORM object through instead, per spec §9's
//! "reflection-based ORM mapping" design note) and to resolve site/list
//! context the same way push/ingress do, via `EngineContext`.
//!
//! Ordering rationale (spec §4.11): the ledger is the index of truth, so
//! steps run create-new -> rewrite-ledger -> delete-old. A failure after the
//! create but before the ledger write is the one state this design accepts
//! as a "critical" risk window (spec §8 move atomicity is about the ledger
//! lookup, not about the two list-backend calls straddling it).

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::context::EngineContext;
use crate::model::{LedgerEntry, MoveAuditRecord, MoveStatus, Row};
use crate::{EngineError, Result};

#[derive(Debug, Clone)]
pub struct MoveOutcome {
    pub ok: bool,
    pub new_item_id: Option<i64>,
    pub status: MoveStatus,
}

/// Relocates the logical row identified by `(sync_def_id, source_identity_hash)`
/// to `new_target_list_id`, writing `item_data` as the new list's fields.
pub async fn move_item(
    ctx: &EngineContext,
    sync_def_id: Uuid,
    source_identity_hash: &str,
    new_target_list_id: Uuid,
    item_data: &Row,
) -> Result<MoveOutcome> {
    let entry = ctx
        .ledger
        .get_entry(sync_def_id, source_identity_hash)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("ledger entry {source_identity_hash} for {sync_def_id}")))?;

    let old_target_list_id = entry.target_list_id;
    let old_item_id = entry.target_item_id;

    if old_target_list_id == new_target_list_id {
        info!(sync_def_id = %sync_def_id, source_identity_hash, "move is a no-op: already on target list");
        return Ok(MoveOutcome {
            ok: true,
            new_item_id: Some(old_item_id),
            status: MoveStatus::Success,
        });
    }

    let targets = ctx.definitions.list_targets(sync_def_id).await?;
    let old_target = targets.iter().find(|t| t.target_list_id == old_target_list_id);
    let new_target = targets.iter().find(|t| t.target_list_id == new_target_list_id);

    let old_connection = old_target.and_then(|t| t.connection_id);
    let new_connection = new_target.and_then(|t| t.connection_id);
    let old_site = old_target.and_then(|t| t.site_id.clone()).unwrap_or_default();
    let new_site = new_target.and_then(|t| t.site_id.clone()).unwrap_or(old_site.clone());

    let old_backend = ctx.list_backends.resolve(old_connection).await?;
    let new_backend = ctx.list_backends.resolve(new_connection).await?;
    let new_list = new_target_list_id.to_string();
    let old_list = old_target_list_id.to_string();

    // 1. Create in the new location. Failure aborts with no state change.
    let new_item_id = new_backend.create_item(&new_site, &new_list, item_data).await?;

    // 2. Rewrite the ledger entry to point at the new binding.
    let updated = LedgerEntry {
        target_list_id: new_target_list_id,
        target_item_id: new_item_id,
        last_sync_ts: ctx.clock.now(),
        ..entry
    };
    if let Err(e) = ctx.ledger.upsert_entry(updated).await {
        error!(
            sync_def_id = %sync_def_id, source_identity_hash, new_item_id,
            error = %e,
            "ledger write failed after creating item in new list; orphan_risk: item now exists in both lists"
        );
        append_audit(
            ctx,
            sync_def_id,
            source_identity_hash,
            old_target_list_id,
            new_target_list_id,
            MoveStatus::OrphanRisk,
            Some(format!("ledger upsert failed after create: {e}")),
        )
        .await;
        return Ok(MoveOutcome {
            ok: false,
            new_item_id: Some(new_item_id),
            status: MoveStatus::OrphanRisk,
        });
    }

    // 3. Delete from the old location. A failure here leaves a harmless
    // (ledger-correct) orphan for reconciliation, not a correctness bug.
    let status = match old_backend.delete_item(&old_site, &old_list, old_item_id).await {
        Ok(()) => MoveStatus::Success,
        Err(e) => {
            warn!(
                sync_def_id = %sync_def_id, source_identity_hash, old_item_id,
                error = %e,
                "failed to delete old item after move; orphan remains for reconciliation"
            );
            MoveStatus::SuccessOrphan
        }
    };

    // 4. Audit log.
    append_audit(
        ctx,
        sync_def_id,
        source_identity_hash,
        old_target_list_id,
        new_target_list_id,
        status,
        Some(format!("moved item {old_item_id} to {new_item_id}")),
    )
    .await;

    Ok(MoveOutcome {
        ok: true,
        new_item_id: Some(new_item_id),
        status,
    })
}

async fn append_audit(
    ctx: &EngineContext,
    sync_def_id: Uuid,
    source_identity_hash: &str,
    from_list_id: Uuid,
    to_list_id: Uuid,
    status: MoveStatus,
    details: Option<String>,
) {
    let record = MoveAuditRecord {
        id: Uuid::new_v4(),
        sync_def_id,
        source_identity_hash: source_identity_hash.to_string(),
        from_list_id,
        to_list_id,
        moved_at: ctx.clock.now(),
        status,
        details,
    };
    if let Err(e) = ctx.ledger.append_move_audit(record).await {
        error!(sync_def_id = %sync_def_id, error = %e, "failed to write move audit record");
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
    use crate::model::{KeyStrategy, Provenance, SyncTarget, TargetStatus, Value};
    use crate::run_store::InMemoryRunStore;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn ledger_entry(sync_def_id: Uuid, target_list_id: Uuid, item_id: i64) -> LedgerEntry {
        LedgerEntry {
            sync_def_id,
            source_identity_hash: "h1".into(),
            source_identity: "W-1".into(),
            source_key_strategy: KeyStrategy::PrimaryKey,
            source_instance_id: Uuid::new_v4(),
            target_list_id,
            target_item_id: item_id,
            content_hash: "deadbeef".into(),
            last_source_ts: None,
            last_sync_ts: Utc::now(),
            provenance: Provenance::Push,
        }
    }

    fn ctx_with_targets(
        def_id: Uuid,
        old_list: Uuid,
        new_list: Uuid,
    ) -> (EngineContext, Arc<FakeListBackend>) {
        let defs = Arc::new(FakeDefinitionRepository::default());
        defs.targets.lock().insert(
            def_id,
            vec![
                SyncTarget {
                    sync_def_id: def_id,
                    target_list_id: old_list,
                    connection_id: None,
                    site_id: Some("site-a".into()),
                    is_default: true,
                    priority: 0,
                    status: TargetStatus::Active,
                },
                SyncTarget {
                    sync_def_id: def_id,
                    target_list_id: new_list,
                    connection_id: None,
                    site_id: Some("site-a".into()),
                    is_default: false,
                    priority: 1,
                    status: TargetStatus::Active,
                },
            ],
        );
        let list_backend = Arc::new(FakeListBackend::new());
        let source_db = Arc::new(FakeSourceDb::new("sku", Vec::new()));
        let ctx = EngineContext::new(
            Arc::new(EngineConfig::default()),
            defs,
            Arc::new(InMemoryLedgerStore::default()),
            Arc::new(InMemoryRunStore::default()),
            Arc::new(FakeQueue::default()),
            Arc::new(SingleSourceDb(source_db)),
            Arc::new(SingleListBackend(list_backend.clone())),
            Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 1, 2, 12, 0, 0).unwrap())),
        );
        (ctx, list_backend)
    }

    #[tokio::test]
    async fn successful_move_creates_new_updates_ledger_and_deletes_old() {
        let def_id = Uuid::new_v4();
        let old_list = Uuid::new_v4();
        let new_list = Uuid::new_v4();
        let (ctx, backend) = ctx_with_targets(def_id, old_list, new_list);

        backend.items.lock().insert(7, Row::new());
        ctx.ledger.upsert_entry(ledger_entry(def_id, old_list, 7)).await.unwrap();

        let mut item_data = Row::new();
        item_data.insert("Title".into(), Value::Text("Widget".into()));

        let outcome = move_item(&ctx, def_id, "h1", new_list, &item_data).await.unwrap();
        assert!(outcome.ok);
        assert!(matches!(outcome.status, MoveStatus::Success));

        let entry = ctx.ledger.get_entry(def_id, "h1").await.unwrap().unwrap();
        assert_eq!(entry.target_list_id, new_list);
        assert_eq!(entry.target_item_id, outcome.new_item_id.unwrap());
        assert!(!backend.items.lock().contains_key(&7));
    }

    #[tokio::test]
    async fn move_to_same_list_is_a_no_op() {
        let def_id = Uuid::new_v4();
        let list = Uuid::new_v4();
        let (ctx, backend) = ctx_with_targets(def_id, list, list);
        backend.items.lock().insert(7, Row::new());
        ctx.ledger.upsert_entry(ledger_entry(def_id, list, 7)).await.unwrap();

        let outcome = move_item(&ctx, def_id, "h1", list, &Row::new()).await.unwrap();
        assert!(outcome.ok);
        assert_eq!(outcome.new_item_id, Some(7));
        assert_eq!(*backend.creates.lock(), 0);
    }

    #[tokio::test]
    async fn missing_ledger_entry_is_not_found() {
        let def_id = Uuid::new_v4();
        let old_list = Uuid::new_v4();
        let new_list = Uuid::new_v4();
        let (ctx, _backend) = ctx_with_targets(def_id, old_list, new_list);

        let err = move_item(&ctx, def_id, "missing", new_list, &Row::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }
}
