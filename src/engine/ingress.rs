//! Ingress engine (C10) — spec §4.10. Ported from
//! `examples/original_source/backend/app/services/synchronizer.py::Synchronizer.run_ingress`
//! / `_process_changes`, which leave the conflict-policy branches as TODOs;
//! here they're fully implemented against the declared `ConflictPolicy`.
//!
//! A definition with `target_strategy = conditional` can have more than one
//! active target list (spec §4.2); the original only ever reads one list
//! (`SyncTarget... .first()`). Since `run_ingress(sync_def_id)` (spec §6) is
//! definition-scoped, not target-scoped, this runs the per-target-list
//! algorithm of §4.10 once per active target and aggregates the result —
//! each target list owns an independent delta token (cursor scope=target,
//! discriminator=TargetList), so running them in sequence doesn't interleave
//! any shared state.

use tracing::warn;
use uuid::Uuid;

use crate::context::EngineContext;
use crate::hashing;
use crate::model::{
    ConflictPolicy, Cursor, CursorDiscriminator, CursorScope, CursorType, LedgerEntry, Provenance,
    SyncDefinition, SyncTarget, Value,
};
use crate::ports::DeltaReason;
use crate::Result;

use super::mapping;
use super::{IngressOutcome, RowEvent};

/// Resolves the source instance a definition writes through: highest-
/// priority enabled source, same selection rule as the push engine (spec
/// §4.7 step 2).
async fn resolve_source(ctx: &EngineContext, def: &SyncDefinition) -> Result<(Uuid, std::sync::Arc<dyn crate::ports::SourceDB>)> {
    let sources = ctx.definitions.get_source_binding(def.id).await?;
    let mut enabled: Vec<_> = sources.iter().filter(|s| s.is_enabled).collect();
    enabled.sort_by_key(|s| std::cmp::Reverse(s.priority));
    let source = enabled
        .first()
        .ok_or_else(|| crate::EngineError::NotFound(format!("no enabled source for {}", def.id)))?;
    let instance_id = source.database_instance_id;
    let db = ctx.source_dbs.resolve(instance_id).await?;
    Ok((instance_id, db))
}

pub async fn run_ingress(ctx: &EngineContext, sync_def_id: Uuid) -> Result<IngressOutcome> {
    let def = ctx.definitions.get(sync_def_id).await?;
    if def.paused {
        return Ok(IngressOutcome::default());
    }
    let targets: Vec<SyncTarget> = ctx
        .definitions
        .list_targets(sync_def_id)
        .await?
        .into_iter()
        .filter(|t| t.is_active())
        .collect();

    let (instance_id, source_db) = resolve_source(ctx, &def).await?;

    let mut outcome = IngressOutcome::default();
    for target in &targets {
        run_ingress_for_target(ctx, &def, target, instance_id, source_db.as_ref(), &mut outcome).await?;
    }
    Ok(outcome)
}

async fn run_ingress_for_target(
    ctx: &EngineContext,
    def: &SyncDefinition,
    target: &SyncTarget,
    instance_id: Uuid,
    source_db: &dyn crate::ports::SourceDB,
    outcome: &mut IngressOutcome,
) -> Result<()> {
    let list_backend = ctx.list_backends.resolve(target.connection_id).await?;
    let site = target.site_id.clone().unwrap_or_default();
    let list = target.target_list_id.to_string();

    // 1. Load current delta token.
    let discriminator = CursorDiscriminator::TargetList(target.target_list_id);
    let cursor = ctx
        .ledger
        .get_cursor(def.id, CursorScope::Target, &discriminator)
        .await?;
    let token = cursor.as_ref().map(|c| c.cursor_value.as_str());

    // 2. Fetch changes + next token (the adapter paginates internally).
    let (changes, new_token) = list_backend.delta_changes(&site, &list, token).await?;

    // 3. Process changes in arrival order. Fail-fast: stop and don't persist
    // the token if any change fails for a reason other than a deliberate
    // skip (conflict/echo).
    let mut all_ok = true;
    for change in &changes {
        outcome.processed += 1;
        match process_change(ctx, def, target, instance_id, source_db, change).await {
            Ok(ChangeOutcome::Applied) => outcome.succeeded += 1,
            Ok(ChangeOutcome::Skipped(event)) => {
                outcome.skipped += 1;
                outcome.events.push(event);
            }
            Err(e) => {
                outcome.failed += 1;
                all_ok = false;
                warn!(sync_def_id = %def.id, error = %e, "ingress change failed");
                outcome.events.push(RowEvent::error("ingress_failed", e.to_string()));
                break;
            }
        }
    }

    // 4. Persist the new token only if every change in this response was processed.
    if all_ok {
        let advances = cursor.as_ref().map(|c| c.advances(&new_token)).unwrap_or(true);
        if advances {
            ctx.ledger
                .upsert_cursor(Cursor {
                    sync_def_id: def.id,
                    scope: CursorScope::Target,
                    discriminator,
                    cursor_type: CursorType::DeltaToken,
                    cursor_value: new_token,
                    updated_at: ctx.clock.now(),
                })
                .await?;
            outcome.new_token_persisted = true;
        }
    }

    Ok(())
}

enum ChangeOutcome {
    Applied,
    Skipped(RowEvent),
}

async fn process_change(
    ctx: &EngineContext,
    def: &SyncDefinition,
    target: &SyncTarget,
    instance_id: Uuid,
    source_db: &dyn crate::ports::SourceDB,
    change: &crate::ports::DeltaItem,
) -> Result<ChangeOutcome> {
    let existing_by_item = ctx
        .ledger
        .get_entry_by_target_item(def.id, target.target_list_id, change.id)
        .await?;

    if change.reason == DeltaReason::Deleted {
        let Some(entry) = existing_by_item else {
            return Ok(ChangeOutcome::Skipped(RowEvent::info("delete_unmapped", "deleted item had no ledger entry")));
        };
        source_db
            .delete(&def.source_schema, &def.source_table_name, key_column(def), &entry.source_identity)
            .await?;
        ctx.ledger.delete_entry(def.id, &entry.source_identity_hash).await?;
        return Ok(ChangeOutcome::Applied);
    }

    // Reverse mapping: skip push_only, readonly, system fields.
    let mapped = mapping::pull_source_fields(def, &change.fields);
    if mapped.is_empty() {
        return Ok(ChangeOutcome::Skipped(RowEvent::info("unmapped_change", "change carried no mappable fields")));
    }
    // Canonical hash in the same source-keyed space push/CDC write to the
    // ledger (spec §4.3: "the exact same function is used on both sides").
    let canonical = mapping::canonical_from_target(def, &change.fields);
    let incoming_hash = hashing::content_hash(&canonical);

    let Some(entry) = existing_by_item else {
        // New item: insert, let the source assign any defaulted identity.
        let inserted = source_db.insert(&def.source_schema, &def.source_table_name, &mapped).await?;
        let Some((identity, identity_hash)) = mapping::identity_for(def, &inserted) else {
            return Ok(ChangeOutcome::Skipped(RowEvent::error("insert_missing_key", "inserted row has no resolvable key")));
        };
        ctx.ledger
            .upsert_entry(LedgerEntry {
                sync_def_id: def.id,
                source_identity_hash: identity_hash,
                source_identity: identity,
                source_key_strategy: def.key_strategy,
                source_instance_id: instance_id,
                target_list_id: target.target_list_id,
                target_item_id: change.id,
                content_hash: incoming_hash,
                last_source_ts: None,
                last_sync_ts: ctx.clock.now(),
                provenance: Provenance::Pull,
            })
            .await?;
        return Ok(ChangeOutcome::Applied);
    };

    // Echo suppression: content came from our own push, unmodified.
    if entry.is_echo_of(Provenance::Push, &incoming_hash) {
        return Ok(ChangeOutcome::Skipped(RowEvent::info("echo_suppressed", "incoming change matches our own last push")));
    }

    // Conflict detection: has the source row changed since our last write?
    let current_source_row = source_db
        .fetch_one(&def.source_schema, &def.source_table_name, key_column(def), &entry.source_identity)
        .await?;
    let source_changed = match &current_source_row {
        Some(row) => {
            let canonical = mapping::canonical_from_source(def, row);
            hashing::content_hash(&canonical) != entry.content_hash
        }
        None => false,
    };

    if source_changed {
        match def.conflict_policy {
            ConflictPolicy::SourceWins => {
                return Ok(ChangeOutcome::Skipped(RowEvent::warn("conflict_skipped", "source_wins: rejected target change")));
            }
            ConflictPolicy::TargetWins => {}
            ConflictPolicy::LastWriterWins => {
                if !target_change_is_newer(change, entry.last_sync_ts) {
                    return Ok(ChangeOutcome::Skipped(RowEvent::warn(
                        "conflict_skipped",
                        "last_writer_wins: source write is newer",
                    )));
                }
            }
        }
    }

    source_db
        .update(&def.source_schema, &def.source_table_name, key_column(def), &entry.source_identity, &mapped)
        .await?;
    ctx.ledger
        .upsert_entry(LedgerEntry {
            content_hash: incoming_hash,
            last_sync_ts: ctx.clock.now(),
            provenance: Provenance::Pull,
            ..entry
        })
        .await?;
    Ok(ChangeOutcome::Applied)
}

fn key_column(def: &SyncDefinition) -> &str {
    def.key_mappings().next().map(|fm| fm.source_name.as_str()).unwrap_or("id")
}

/// Open Question (spec §9): the target's modified-time semantics (UTC vs
/// server-local) are unconfirmed. We pin the convention that a mapped system
/// field named `Modified` carries an RFC3339 UTC timestamp — if the change
/// doesn't carry one, we can't safely arbitrate and fall back to rejecting
/// the target write (same as `source_wins`) rather than guessing; see
/// DESIGN.md.
fn target_change_is_newer(change: &crate::ports::DeltaItem, ledger_last_sync: chrono::DateTime<chrono::Utc>) -> bool {
    match change.fields.get("Modified") {
        Some(Value::Timestamp(ts)) => *ts > ledger_last_sync,
        _ => false,
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
    use crate::run_store::InMemoryRunStore;
    use crate::model::{
        CursorStrategy, FieldDirection, FieldMapping, KeyStrategy, Row, SourceRole, SyncMode,
        SyncSource, TargetStatus, TargetStrategy,
    };
    use chrono::TimeZone;
    use std::sync::Arc;

    fn definition(id: Uuid, target_list_id: Uuid, conflict_policy: ConflictPolicy) -> SyncDefinition {
        SyncDefinition {
            id,
            name: "products".into(),
            source_schema: "public".into(),
            source_table_name: "products".into(),
            cursor_column: "updated_at".into(),
            target_list_id: Some(target_list_id),
            sync_mode: SyncMode::TwoWay,
            conflict_policy,
            key_strategy: KeyStrategy::PrimaryKey,
            target_strategy: TargetStrategy::Single,
            sharding_policy: None,
            cursor_strategy: CursorStrategy::Timestamp,
            rate_limit: None,
            paused: false,
            cdc_enabled: false,
            field_mappings: vec![
                FieldMapping {
                    source_name: "sku".into(),
                    target_name: "SKU".into(),
                    target_type: "Text".into(),
                    is_key: true,
                    is_readonly: false,
                    is_system: false,
                    direction: FieldDirection::Bidirectional,
                    transform_rule: None,
                },
                FieldMapping {
                    source_name: "name".into(),
                    target_name: "Title".into(),
                    target_type: "Text".into(),
                    is_key: false,
                    is_readonly: false,
                    is_system: false,
                    direction: FieldDirection::Bidirectional,
                    transform_rule: None,
                },
            ],
        }
    }

    fn ctx_with(
        def: SyncDefinition,
        instance_id: Uuid,
        target_list_id: Uuid,
        source_rows: Vec<Row>,
    ) -> (EngineContext, Arc<FakeListBackend>) {
        let defs = Arc::new(FakeDefinitionRepository::default());
        defs.definitions.lock().insert(def.id, def.clone());
        defs.sources.lock().insert(
            def.id,
            vec![SyncSource {
                sync_def_id: def.id,
                database_instance_id: instance_id,
                role: SourceRole::Primary,
                priority: 0,
                is_enabled: true,
            }],
        );
        defs.targets.lock().insert(
            def.id,
            vec![SyncTarget {
                sync_def_id: def.id,
                target_list_id,
                connection_id: None,
                site_id: Some("site-a".into()),
                is_default: true,
                priority: 0,
                status: TargetStatus::Active,
            }],
        );

        let source_db = Arc::new(FakeSourceDb::new("sku", source_rows));
        let list_backend = Arc::new(FakeListBackend::new());

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

    fn source_row(sku: &str, name: &str) -> Row {
        let mut r = Row::new();
        r.insert("sku".into(), Value::Text(sku.into()));
        r.insert("name".into(), Value::Text(name.into()));
        r
    }

    fn delta_fields(sku: &str, name: &str) -> Row {
        let mut r = Row::new();
        r.insert("SKU".into(), Value::Text(sku.into()));
        r.insert("Title".into(), Value::Text(name.into()));
        r
    }

    #[tokio::test]
    async fn new_item_is_inserted_and_token_persisted() {
        let def_id = Uuid::new_v4();
        let instance_id = Uuid::new_v4();
        let target_list_id = Uuid::new_v4();
        let def = definition(def_id, target_list_id, ConflictPolicy::SourceWins);
        let (ctx, list_backend) = ctx_with(def, instance_id, target_list_id, Vec::new());

        list_backend.delta_pages.lock().push((
            vec![crate::ports::DeltaItem {
                id: 7,
                reason: DeltaReason::Changed,
                fields: delta_fields("W-1", "Widget"),
            }],
            "token-1".to_string(),
        ));

        let outcome = run_ingress(&ctx, def_id).await.unwrap();
        assert_eq!(outcome.succeeded, 1);
        assert_eq!(outcome.failed, 0);
        assert!(outcome.new_token_persisted);

        let discriminator = CursorDiscriminator::TargetList(target_list_id);
        let cursor = ctx
            .ledger
            .get_cursor(def_id, CursorScope::Target, &discriminator)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cursor.cursor_value, "token-1");

        let entry = ctx
            .ledger
            .get_entry_by_target_item(def_id, target_list_id, 7)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.source_identity, "W-1");
        assert_eq!(entry.provenance, Provenance::Pull);
    }

    #[tokio::test]
    async fn scenario_3_delete_change_removes_source_row_and_ledger_entry() {
        let def_id = Uuid::new_v4();
        let instance_id = Uuid::new_v4();
        let target_list_id = Uuid::new_v4();
        let def = definition(def_id, target_list_id, ConflictPolicy::SourceWins);
        let (ctx, list_backend) = ctx_with(def, instance_id, target_list_id, vec![source_row("W-1", "Widget")]);

        ctx.ledger
            .upsert_entry(LedgerEntry {
                sync_def_id: def_id,
                source_identity_hash: hashing::identity_hash("W-1"),
                source_identity: "W-1".into(),
                source_key_strategy: KeyStrategy::PrimaryKey,
                source_instance_id: instance_id,
                target_list_id,
                target_item_id: 7,
                content_hash: "irrelevant".into(),
                last_source_ts: None,
                last_sync_ts: Utc::now(),
                provenance: Provenance::Push,
            })
            .await
            .unwrap();

        list_backend.delta_pages.lock().push((
            vec![crate::ports::DeltaItem {
                id: 7,
                reason: DeltaReason::Deleted,
                fields: Row::new(),
            }],
            "token-2".to_string(),
        ));

        let outcome = run_ingress(&ctx, def_id).await.unwrap();
        assert_eq!(outcome.succeeded, 1);
        assert!(ctx
            .ledger
            .get_entry_by_target_item(def_id, target_list_id, 7)
            .await
            .unwrap()
            .is_none());
        assert!(ctx.ledger.get_entry(def_id, &hashing::identity_hash("W-1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn scenario_4_source_wins_conflict_rejects_stale_target_change() {
        let def_id = Uuid::new_v4();
        let instance_id = Uuid::new_v4();
        let target_list_id = Uuid::new_v4();
        let def = definition(def_id, target_list_id, ConflictPolicy::SourceWins);
        // Source row has already diverged from the ledger's recorded content_hash.
        let (ctx, list_backend) =
            ctx_with(def, instance_id, target_list_id, vec![source_row("W-1", "Widget Mk2")]);

        ctx.ledger
            .upsert_entry(LedgerEntry {
                sync_def_id: def_id,
                source_identity_hash: hashing::identity_hash("W-1"),
                source_identity: "W-1".into(),
                source_key_strategy: KeyStrategy::PrimaryKey,
                source_instance_id: instance_id,
                target_list_id,
                target_item_id: 7,
                content_hash: "stale-hash-from-before-the-source-edit".into(),
                last_source_ts: None,
                last_sync_ts: Utc::now(),
                provenance: Provenance::Push,
            })
            .await
            .unwrap();

        list_backend.delta_pages.lock().push((
            vec![crate::ports::DeltaItem {
                id: 7,
                reason: DeltaReason::Changed,
                fields: delta_fields("W-1", "Widget From Target"),
            }],
            "token-3".to_string(),
        ));

        let outcome = run_ingress(&ctx, def_id).await.unwrap();
        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.succeeded, 0);
        assert_eq!(*list_backend.updates.lock(), 0);

        let source_db = ctx.source_dbs.resolve(instance_id).await.unwrap();
        let row = source_db.fetch_one("public", "products", "sku", "W-1").await.unwrap().unwrap();
        assert_eq!(row.get("name"), Some(&Value::Text("Widget Mk2".into())));
    }
}
