//! CDC consumer (C9) — spec §4.9. A worker group competing for messages off
//! the durable queue via consumer-group discipline. Ported from
//! `examples/original_source/backend/app/services/cdc_consumer.py`'s
//! `CDCConsumer`, with the definition-cache dict replaced by
//! [`DefinitionCache`] and the three independent field-mapping/hashing steps
//! replaced by [`super::mapping`].
//!
//! Fixes one thing the original got wrong rather than reproducing it: its
//! `_apply_change` hashes `sp_data` (target-column-keyed), while `pusher.py`
//! hashes the source-column-keyed payload — so a push-then-pull round trip
//! would never actually match hashes and echo suppression silently failed.
//! This consumer hashes the source-keyed canonical payload like the push
//! engine does; see `engine::mapping` and DESIGN.md.

use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use crate::context::EngineContext;
use crate::decoder::{DecodeError, Frame, RawRow, RawValue};
use crate::hashing;
use crate::model::{LedgerEntry, Provenance, Row, SyncDefinition, Value};
use crate::ports::CdcBinding;
use crate::shard;
use crate::{EngineError, Result};

use super::cdc_ingest::CdcEnvelope;
use super::mapping;

const CACHE_TTL_SECONDS: i64 = 60;

/// `(instance_id, schema, table) -> SyncDefinition` dispatch cache (spec
/// §4.9 step 3, §5 "the definition cache is process-local, TTL 60s,
/// read-only").
pub struct DefinitionCache {
    inner: Mutex<CacheInner>,
}

struct CacheInner {
    entries: HashMap<(Uuid, String, String), CdcBinding>,
    refreshed_at: Option<DateTime<Utc>>,
}

impl Default for DefinitionCache {
    fn default() -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                refreshed_at: None,
            }),
        }
    }
}

impl DefinitionCache {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lookup(
        &self,
        ctx: &EngineContext,
        instance_id: Uuid,
        schema: &str,
        table: &str,
    ) -> Result<Option<CdcBinding>> {
        let stale = {
            let inner = self.inner.lock();
            match inner.refreshed_at {
                Some(at) => ctx.clock.now() - at > ChronoDuration::seconds(CACHE_TTL_SECONDS),
                None => true,
            }
        };
        if stale {
            let bindings = ctx.definitions.enumerate_cdc_definitions().await?;
            let mut inner = self.inner.lock();
            inner.entries = bindings
                .into_iter()
                .map(|b| ((b.instance_id, b.schema.clone(), b.table.clone()), b))
                .collect();
            inner.refreshed_at = Some(ctx.clock.now());
        }
        let key = (instance_id, schema.to_string(), table.to_string());
        Ok(self.inner.lock().entries.get(&key).cloned())
    }
}

/// Runs the consumer loop until `stop` fires. Each message is acknowledged
/// only when it was fully applied (including decode-error and paused/no-
/// binding drops, all of which are deliberate skips); a target-side failure
/// leaves the message pending for redelivery after the queue's visibility
/// timeout (spec §7).
pub async fn run_cdc_consumer(
    ctx: &EngineContext,
    consumer_name: &str,
    mut stop: watch::Receiver<bool>,
) -> Result<()> {
    let cache = DefinitionCache::new();
    let group = ctx.config.cdc.group_name.clone();
    let stream_key = ctx.config.cdc.stream_key.clone();
    let batch_count = ctx.config.cdc.batch_count;
    let block_ms = ctx.config.cdc.block_ms;

    loop {
        let messages = tokio::select! {
            biased;
            _ = stop.changed() => {
                info!(consumer_name, "CDC consumer received stop signal");
                return Ok(());
            }
            result = ctx.queue.read_group(&group, consumer_name, &stream_key, batch_count, block_ms) => result?,
        };

        for message in messages {
            match process_message(ctx, &cache, &message.payload).await {
                Ok(()) => {
                    ctx.queue.ack(&stream_key, &group, &message.id).await?;
                }
                Err(EngineError::Decode(e)) => {
                    warn!(message_id = %message.id, error = %e, "dropping malformed CDC message");
                    ctx.queue.ack(&stream_key, &group, &message.id).await?;
                }
                Err(e) => {
                    warn!(message_id = %message.id, error = %e, "CDC message processing failed, leaving for redelivery");
                }
            }
        }
    }
}

async fn process_message(ctx: &EngineContext, cache: &DefinitionCache, payload: &[u8]) -> Result<()> {
    // 1. Decode frame (already decoded by C8; here we just deserialize the
    // queue envelope it produced).
    let envelope: CdcEnvelope =
        serde_json::from_slice(payload).map_err(|e| EngineError::Decode(DecodeError::Envelope(e.to_string())))?;

    // 2. Ignore Begin/Commit/Relation/Unknown.
    let (schema, table, op) = match envelope.frame {
        Frame::Insert(change) => (change.schema, change.table, Op::Insert(change.row)),
        Frame::Update(change) => (change.schema, change.table, Op::Update(change.row)),
        Frame::Delete(change) => (change.schema, change.table, Op::Delete(change.row)),
        Frame::Begin(_) | Frame::Commit(_) | Frame::Relation { .. } | Frame::Unknown(_) => return Ok(()),
    };

    // 3. Look up (instance, schema, table) -> SyncDefinition.
    let Some(binding) = cache.lookup(ctx, envelope.instance_id, &schema, &table).await? else {
        return Ok(());
    };
    let def = binding.definition;

    // 4. Paused definitions are dropped.
    if def.paused {
        return Ok(());
    }

    let source_row = raw_row_to_row(op.raw_row());

    apply_change(ctx, &def, envelope.instance_id, op.op_kind(), &source_row).await
}

enum Op {
    Insert(RawRow),
    Update(RawRow),
    Delete(RawRow),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpKind {
    Insert,
    Update,
    Delete,
}

impl Op {
    fn raw_row(&self) -> &RawRow {
        match self {
            Op::Insert(r) | Op::Update(r) | Op::Delete(r) => r,
        }
    }

    fn op_kind(&self) -> OpKind {
        match self {
            Op::Insert(_) => OpKind::Insert,
            Op::Update(_) => OpKind::Update,
            Op::Delete(_) => OpKind::Delete,
        }
    }
}

/// `RawValue` carries no column-type information (spec §4.1: type coercion
/// is the engine's job, not the decoder's); every present value is treated
/// as already-canonical text, matching `source_db`'s own text fallback for
/// unrecognized types. `Unchanged` (TOASTed, value not sent) columns are
/// omitted entirely rather than guessed — downstream mapping simply won't
/// include that field in the write, which is the correct partial-update
/// behavior for an UPDATE whose unchanged column wasn't actually touched.
fn raw_row_to_row(raw: &RawRow) -> Row {
    let mut out = Row::new();
    for (name, value) in raw {
        match value {
            RawValue::Null => {
                out.insert(name.clone(), Value::Null);
            }
            RawValue::Text(text) => {
                out.insert(name.clone(), Value::Text(text.clone()));
            }
            RawValue::Unchanged => {}
        }
    }
    out
}

async fn apply_change(
    ctx: &EngineContext,
    def: &SyncDefinition,
    instance_id: Uuid,
    op: OpKind,
    source_row: &Row,
) -> Result<()> {
    // 5. Resolve target via sharding, then context (connection + site).
    let wanted = match &def.sharding_policy {
        Some(policy) => shard::evaluate(policy, source_row).or(def.target_list_id),
        None => def.target_list_id,
    };
    let Some(target_list_id) = wanted else {
        warn!(sync_def_id = %def.id, "no target resolved for CDC change");
        return Ok(());
    };
    let targets = ctx.definitions.list_targets(def.id).await?;
    let target = targets
        .iter()
        .find(|t| t.target_list_id == target_list_id && t.is_active())
        .or_else(|| targets.iter().find(|t| t.is_default && t.is_active()));
    let Some(target) = target else {
        return Ok(());
    };

    let Some((identity, identity_hash)) = mapping::identity_for(def, source_row) else {
        warn!(sync_def_id = %def.id, "CDC row missing key columns");
        return Ok(());
    };

    let list_backend = ctx.list_backends.resolve(target.connection_id).await?;
    let site = target.site_id.clone().unwrap_or_default();
    let list = target.target_list_id.to_string();

    let existing = ctx.ledger.get_entry(def.id, &identity_hash).await?;

    // 6. DELETE.
    if op == OpKind::Delete {
        if let Some(entry) = existing {
            match list_backend.delete_item(&site, &list, entry.target_item_id).await {
                Ok(()) => {}
                Err(EngineError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
            ctx.ledger.delete_entry(def.id, &identity_hash).await?;
        }
        return Ok(());
    }

    // 7. INSERT/UPDATE: mapped payload + content_hash, loop suppression,
    // create/update, ledger upsert.
    let canonical = mapping::canonical_from_source(def, source_row);
    let new_content_hash = hashing::content_hash(&canonical);

    if let Some(entry) = &existing {
        if entry.is_echo_of(Provenance::Pull, &new_content_hash) {
            return Ok(());
        }
    }

    let target_fields = mapping::push_target_fields(def, source_row);
    let item_id = match &existing {
        Some(entry) => {
            list_backend.update_item(&site, &list, entry.target_item_id, &target_fields).await?;
            entry.target_item_id
        }
        None => list_backend.create_item(&site, &list, &target_fields).await?,
    };

    let entry = LedgerEntry {
        sync_def_id: def.id,
        source_identity_hash: identity_hash,
        source_identity: identity,
        source_key_strategy: def.key_strategy,
        source_instance_id: instance_id,
        target_list_id: target.target_list_id,
        target_item_id: item_id,
        content_hash: new_content_hash,
        last_source_ts: None,
        last_sync_ts: ctx.clock.now(),
        provenance: Provenance::Push,
    };
    // 8. Acknowledge only happens in the caller, after this commits.
    ctx.ledger.upsert_entry(entry).await
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
    use crate::decoder::RowChange;
    use crate::ledger_store::InMemoryLedgerStore;
    use crate::run_store::InMemoryRunStore;
    use crate::model::{
        ConflictPolicy, CursorStrategy, FieldDirection, FieldMapping, KeyStrategy, SourceRole,
        SyncMode, SyncSource, SyncTarget, TargetStatus, TargetStrategy,
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
            cursor_strategy: CursorStrategy::Lsn,
            rate_limit: None,
            paused: false,
            cdc_enabled: true,
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

    fn raw_row(pairs: &[(&str, &str)]) -> RawRow {
        pairs.iter().map(|(k, v)| (k.to_string(), RawValue::Text(v.to_string()))).collect()
    }

    fn ctx_with(def: SyncDefinition, instance_id: Uuid, target_list_id: Uuid) -> (EngineContext, Arc<FakeListBackend>) {
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

        let source_db = Arc::new(FakeSourceDb::new("sku", Vec::new()));
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

    #[tokio::test]
    async fn insert_message_creates_item_and_ledger_entry() {
        let def_id = Uuid::new_v4();
        let instance_id = Uuid::new_v4();
        let target_list_id = Uuid::new_v4();
        let def = definition(def_id, target_list_id);
        let (ctx, backend) = ctx_with(def, instance_id, target_list_id);

        let envelope = CdcEnvelope {
            instance_id,
            lsn: 100,
            frame: Frame::Insert(RowChange {
                schema: "public".into(),
                table: "products".into(),
                row: raw_row(&[("sku", "W-1"), ("name", "Widget")]),
            }),
        };
        let payload = serde_json::to_vec(&envelope).unwrap();

        let cache = DefinitionCache::new();
        process_message(&ctx, &cache, &payload).await.unwrap();

        assert_eq!(*backend.creates.lock(), 1);
        let entry = ctx.ledger.get_entry(def_id, &hashing::identity_hash("W-1")).await.unwrap();
        assert!(entry.is_some());
    }

    #[tokio::test]
    async fn delete_message_removes_ledger_entry() {
        let def_id = Uuid::new_v4();
        let instance_id = Uuid::new_v4();
        let target_list_id = Uuid::new_v4();
        let def = definition(def_id, target_list_id);
        let (ctx, backend) = ctx_with(def.clone(), instance_id, target_list_id);

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
        backend.items.lock().insert(7, Row::new());

        let envelope = CdcEnvelope {
            instance_id,
            lsn: 101,
            frame: Frame::Delete(RowChange {
                schema: "public".into(),
                table: "products".into(),
                row: raw_row(&[("sku", "W-1")]),
            }),
        };
        let payload = serde_json::to_vec(&envelope).unwrap();

        let cache = DefinitionCache::new();
        process_message(&ctx, &cache, &payload).await.unwrap();

        assert_eq!(*backend.deletes.lock(), 1);
        let entry = ctx.ledger.get_entry(def_id, &hashing::identity_hash("W-1")).await.unwrap();
        assert!(entry.is_none());
    }

    #[tokio::test]
    async fn paused_definition_is_dropped_silently() {
        let def_id = Uuid::new_v4();
        let instance_id = Uuid::new_v4();
        let target_list_id = Uuid::new_v4();
        let mut def = definition(def_id, target_list_id);
        def.paused = true;
        let (ctx, backend) = ctx_with(def, instance_id, target_list_id);

        let envelope = CdcEnvelope {
            instance_id,
            lsn: 102,
            frame: Frame::Insert(RowChange {
                schema: "public".into(),
                table: "products".into(),
                row: raw_row(&[("sku", "W-1"), ("name", "Widget")]),
            }),
        };
        let payload = serde_json::to_vec(&envelope).unwrap();

        let cache = DefinitionCache::new();
        process_message(&ctx, &cache, &payload).await.unwrap();
        assert_eq!(*backend.creates.lock(), 0);
    }
}
