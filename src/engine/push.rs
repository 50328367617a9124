//! Push engine (C7) — spec §4.7, the central algorithm. Ported from
//! `examples/original_source/backend/app/services/pusher.py::run_push`, with
//! the per-row mapping loop factored out into [`super::mapping`].

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::context::EngineContext;
use crate::hashing;
use crate::model::{
    Cursor, CursorDiscriminator, CursorScope, CursorType, LedgerEntry, Provenance, SyncDefinition,
    SyncTarget,
};
use crate::shard;
use crate::{EngineError, Result};

use super::mapping;
use super::{PushOutcome, RowEvent};

fn cursor_type_for(def: &SyncDefinition) -> CursorType {
    match def.cursor_strategy {
        crate::model::CursorStrategy::Timestamp => CursorType::Timestamp,
        crate::model::CursorStrategy::Lsn => CursorType::Lsn,
        crate::model::CursorStrategy::DeltaToken => CursorType::DeltaToken,
    }
}

fn resolve_target<'a>(
    def: &SyncDefinition,
    targets: &'a [SyncTarget],
    source_row: &crate::model::Row,
) -> Option<&'a SyncTarget> {
    let wanted = match &def.sharding_policy {
        Some(policy) => shard::evaluate(policy, source_row).or(def.target_list_id),
        None => def.target_list_id,
    }?;
    targets.iter().find(|t| t.target_list_id == wanted)
}

/// Runs one push cycle for `sync_def_id`. Step numbers in comments follow
/// spec §4.7.
pub async fn run_push(ctx: &EngineContext, sync_def_id: Uuid) -> Result<PushOutcome> {
    // 1. Load definition + targets + source binding.
    let def = ctx.definitions.get(sync_def_id).await?;
    if def.paused {
        return Ok(PushOutcome::default());
    }
    let targets: Vec<SyncTarget> = ctx
        .definitions
        .list_targets(sync_def_id)
        .await?
        .into_iter()
        .filter(|t| t.is_active())
        .collect();
    let sources = ctx.definitions.get_source_binding(sync_def_id).await?;

    // 2. Resolve primary source instance; fall back to highest-priority enabled source.
    let mut enabled: Vec<_> = sources.iter().filter(|s| s.is_enabled).collect();
    enabled.sort_by_key(|s| std::cmp::Reverse(s.priority));
    let source = enabled
        .first()
        .ok_or_else(|| EngineError::NotFound(format!("no enabled source for {sync_def_id}")))?;
    let instance_id = source.database_instance_id;

    let source_db = ctx.source_dbs.resolve(instance_id).await?;

    // 3. Load source cursor; absent is treated as -infinity by passing `None`.
    let discriminator = CursorDiscriminator::SourceInstance(instance_id);
    let cursor = ctx
        .ledger
        .get_cursor(sync_def_id, CursorScope::Source, &discriminator)
        .await?;
    let cursor_value = cursor.as_ref().map(|c| c.cursor_value.as_str());

    // 4. Fetch a bounded page ordered ASC by the cursor column.
    let batch_size = def.rate_limit.unwrap_or(ctx.config.push.batch_size);
    let rows = source_db
        .fetch_changed(&def.source_schema, &def.source_table_name, &def.cursor_column, cursor_value, batch_size)
        .await?;

    let mut outcome = PushOutcome::default();
    let mut max_cursor_seen: Option<String> = None;
    let mut cursor_ceiling_hit = false;

    // 6. Per-row loop, strict cursor-ASC order (guaranteed by `fetch_changed`).
    for row in &rows {
        outcome.processed += 1;
        let row_cursor = row.get(&def.cursor_column).and_then(|v| v.canonical_text());

        match process_row(ctx, &def, &targets, instance_id, row).await {
            Ok(RowResult::Written) => {
                outcome.succeeded += 1;
                if !cursor_ceiling_hit {
                    if let Some(v) = row_cursor {
                        max_cursor_seen = Some(v);
                    }
                }
            }
            Ok(RowResult::Suppressed) => {
                outcome.skipped += 1;
                if !cursor_ceiling_hit {
                    if let Some(v) = row_cursor {
                        max_cursor_seen = Some(v);
                    }
                }
            }
            Ok(RowResult::RowFailed(event)) => {
                outcome.failed += 1;
                cursor_ceiling_hit = true;
                warn!(sync_def_id = %sync_def_id, message = %event.message, "push row failed");
                outcome.events.push(event);
            }
            Err(e) => {
                // Source-side hard failure: abort the run entirely.
                return Err(e);
            }
        }
    }

    // 7. Advance the cursor to the highest successfully processed value.
    if let Some(new_value) = max_cursor_seen {
        let advances = cursor.as_ref().map(|c| c.advances(&new_value)).unwrap_or(true);
        if advances {
            let updated = Cursor {
                sync_def_id,
                scope: CursorScope::Source,
                discriminator,
                cursor_type: cursor_type_for(&def),
                cursor_value: new_value,
                updated_at: ctx.clock.now(),
            };
            ctx.ledger.upsert_cursor(updated).await?;
            outcome.cursor_advanced = true;
        }
    }

    info!(
        sync_def_id = %sync_def_id,
        processed = outcome.processed,
        succeeded = outcome.succeeded,
        failed = outcome.failed,
        skipped = outcome.skipped,
        "push run finished"
    );
    Ok(outcome)
}

enum RowResult {
    Written,
    Suppressed,
    RowFailed(RowEvent),
}

async fn process_row(
    ctx: &EngineContext,
    def: &SyncDefinition,
    targets: &[SyncTarget],
    source_instance_id: Uuid,
    source_row: &crate::model::Row,
) -> Result<RowResult> {
    // 6a. Identity + mapped payload.
    let Some((identity, identity_hash)) = mapping::identity_for(def, source_row) else {
        return Ok(RowResult::RowFailed(RowEvent::error(
            "missing_key",
            "row is missing one or more key columns",
        )));
    };

    // 6b/6c. Select target; reject if sharding produced nothing or the
    // resolved target list isn't active (our proxy for "marked deleted in
    // inventory" — list provisioning/inventory is out of scope, spec §1).
    let Some(target) = resolve_target(def, targets, source_row) else {
        return Ok(RowResult::RowFailed(RowEvent::warn(
            "no_target",
            format!("no active target resolved for identity {identity}"),
        )));
    };

    let list_backend = ctx.list_backends.resolve(target.connection_id).await?;
    let site = target.site_id.clone().unwrap_or_default();
    let list = target.target_list_id.to_string();

    // 6d. Read ledger entry; compute content_hash from the canonical,
    // source-keyed payload (see `mapping` module doc comment).
    let existing = ctx.ledger.get_entry(def.id, &identity_hash).await?;
    let canonical = mapping::canonical_from_source(def, source_row);
    let new_content_hash = hashing::content_hash(&canonical);

    // 6e. Loop suppression.
    if let Some(entry) = &existing {
        if entry.is_echo_of(Provenance::Pull, &new_content_hash) {
            return Ok(RowResult::Suppressed);
        }
    }

    // 6f. Write.
    let target_fields = mapping::push_target_fields(def, source_row);
    let item_id = match &existing {
        Some(entry) => {
            list_backend.update_item(&site, &list, entry.target_item_id, &target_fields).await?;
            entry.target_item_id
        }
        None => list_backend.create_item(&site, &list, &target_fields).await?,
    };

    let last_source_ts = source_row
        .get(&def.cursor_column)
        .and_then(|v| match v {
            crate::model::Value::Timestamp(ts) => Some(*ts),
            _ => None,
        });

    let entry = LedgerEntry {
        sync_def_id: def.id,
        source_identity_hash: identity_hash,
        source_identity: identity,
        source_key_strategy: def.key_strategy,
        source_instance_id,
        target_list_id: target.target_list_id,
        target_item_id: item_id,
        content_hash: new_content_hash,
        last_source_ts,
        last_sync_ts: ctx.clock.now(),
        provenance: Provenance::Push,
    };
    ctx.ledger.upsert_entry(entry).await?;

    Ok(RowResult::Written)
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
        ConflictPolicy, CursorStrategy, FieldDirection, FieldMapping, KeyStrategy, Row, SyncMode,
        SyncSource, SourceRole, TargetStatus, TargetStrategy, Value,
    };
    use chrono::TimeZone;
    use std::sync::Arc;

    fn definition(id: Uuid, target_list_id: Uuid) -> SyncDefinition {
        SyncDefinition {
            id,
            name: "products".into(),
            source_schema: "public".into(),
            source_table_name: "products".into(),
            cursor_column: "updated_at".into(),
            target_list_id: Some(target_list_id),
            sync_mode: SyncMode::TwoWay,
            conflict_policy: ConflictPolicy::SourceWins,
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
        rows: Vec<Row>,
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

        let source_db = Arc::new(FakeSourceDb::new("sku", rows));
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

    fn row(sku: &str, name: &str, updated_at: &str) -> Row {
        let mut r = Row::new();
        r.insert("sku".into(), Value::Text(sku.into()));
        r.insert("name".into(), Value::Text(name.into()));
        r.insert(
            "updated_at".into(),
            Value::Timestamp(updated_at.parse().unwrap()),
        );
        r
    }

    #[tokio::test]
    async fn scenario_1_push_insert_creates_item_and_advances_cursor() {
        let def_id = Uuid::new_v4();
        let instance_id = Uuid::new_v4();
        let target_list_id = Uuid::new_v4();
        let def = definition(def_id, target_list_id);
        let (ctx, backend) = ctx_with(
            def,
            instance_id,
            target_list_id,
            vec![row("W-1", "Widget", "2026-01-02T10:00:00Z")],
        );

        let outcome = run_push(&ctx, def_id).await.unwrap();
        assert_eq!(outcome.succeeded, 1);
        assert_eq!(outcome.failed, 0);
        assert!(outcome.cursor_advanced);
        assert_eq!(*backend.creates.lock(), 1);

        let cursor = ctx
            .ledger
            .get_cursor(def_id, CursorScope::Source, &CursorDiscriminator::SourceInstance(instance_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cursor.cursor_value, "2026-01-02T10:00:00Z");
    }

    #[tokio::test]
    async fn scenario_2_loop_suppression_skips_write_but_advances_cursor() {
        let def_id = Uuid::new_v4();
        let instance_id = Uuid::new_v4();
        let target_list_id = Uuid::new_v4();
        let def = definition(def_id, target_list_id);
        let r = row("W-1", "Widget", "2026-01-02T10:00:00Z");
        let (ctx, backend) = ctx_with(def.clone(), instance_id, target_list_id, vec![r.clone()]);

        let canonical = mapping::canonical_from_source(&def, &r);
        let content_hash = hashing::content_hash(&canonical);
        let (identity, identity_hash) = mapping::identity_for(&def, &r).unwrap();
        ctx.ledger
            .upsert_entry(LedgerEntry {
                sync_def_id: def_id,
                source_identity_hash: identity_hash,
                source_identity: identity,
                source_key_strategy: KeyStrategy::PrimaryKey,
                source_instance_id: instance_id,
                target_list_id,
                target_item_id: 42,
                content_hash,
                last_source_ts: None,
                last_sync_ts: Utc::now(),
                provenance: Provenance::Pull,
            })
            .await
            .unwrap();

        let outcome = run_push(&ctx, def_id).await.unwrap();
        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.succeeded, 0);
        assert_eq!(*backend.creates.lock(), 0);
        assert_eq!(*backend.updates.lock(), 0);
        assert!(outcome.cursor_advanced);
    }

    #[tokio::test]
    async fn watermark_never_advances_past_a_failed_row() {
        let def_id = Uuid::new_v4();
        let instance_id = Uuid::new_v4();
        let target_list_id = Uuid::new_v4();
        let def = definition(def_id, target_list_id);
        // Second row has no `sku`, so identity_for fails for it.
        let mut bad_row = Row::new();
        bad_row.insert("name".into(), Value::Text("Ghost".into()));
        bad_row.insert(
            "updated_at".into(),
            Value::Timestamp("2026-01-02T11:00:00Z".parse().unwrap()),
        );
        let rows = vec![row("W-1", "Widget", "2026-01-02T10:00:00Z"), bad_row];
        let (ctx, _backend) = ctx_with(def, instance_id, target_list_id, rows);

        let outcome = run_push(&ctx, def_id).await.unwrap();
        assert_eq!(outcome.succeeded, 1);
        assert_eq!(outcome.failed, 1);

        let cursor = ctx
            .ledger
            .get_cursor(def_id, CursorScope::Source, &CursorDiscriminator::SourceInstance(instance_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cursor.cursor_value, "2026-01-02T10:00:00Z");
    }
}
