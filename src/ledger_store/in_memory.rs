//! In-memory `LedgerStore`: the default store for tests and for running the
//! engine without an external ledger database. `DashMap` gives per-key
//! locking, which is what the linearizability invariant in spec §4.4 and §5
//! actually requires — no coarser mutex is needed.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::model::{Cursor, CursorDiscriminator, CursorScope, LedgerEntry, MoveAuditRecord};
use crate::{EngineError, Result};

use super::LedgerStore;

type EntryKey = (Uuid, String);
type CursorKey = (Uuid, CursorScope, CursorDiscriminator);

#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    entries: DashMap<EntryKey, LedgerEntry>,
    cursors: DashMap<CursorKey, Cursor>,
    move_audits: Mutex<Vec<MoveAuditRecord>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/ops helper: snapshot of recorded move audits in append order.
    pub fn move_audits(&self) -> Vec<MoveAuditRecord> {
        self.move_audits.lock().clone()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn get_entry(&self, sync_def_id: Uuid, source_identity_hash: &str) -> Result<Option<LedgerEntry>> {
        let key = (sync_def_id, source_identity_hash.to_string());
        Ok(self.entries.get(&key).map(|e| e.clone()))
    }

    async fn upsert_entry(&self, entry: LedgerEntry) -> Result<()> {
        let key = (entry.sync_def_id, entry.source_identity_hash.clone());
        self.entries.insert(key, entry);
        Ok(())
    }

    async fn delete_entry(&self, sync_def_id: Uuid, source_identity_hash: &str) -> Result<()> {
        let key = (sync_def_id, source_identity_hash.to_string());
        self.entries.remove(&key);
        Ok(())
    }

    async fn list_entries_for_target(&self, sync_def_id: Uuid, target_list_id: Uuid) -> Result<Vec<LedgerEntry>> {
        Ok(self
            .entries
            .iter()
            .filter(|e| e.sync_def_id == sync_def_id && e.target_list_id == target_list_id)
            .map(|e| e.clone())
            .collect())
    }

    async fn get_entry_by_target_item(
        &self,
        sync_def_id: Uuid,
        target_list_id: Uuid,
        target_item_id: i64,
    ) -> Result<Option<LedgerEntry>> {
        Ok(self
            .entries
            .iter()
            .find(|e| {
                e.sync_def_id == sync_def_id
                    && e.target_list_id == target_list_id
                    && e.target_item_id == target_item_id
            })
            .map(|e| e.clone()))
    }

    async fn get_cursor(
        &self,
        sync_def_id: Uuid,
        scope: CursorScope,
        discriminator: &CursorDiscriminator,
    ) -> Result<Option<Cursor>> {
        let key = (sync_def_id, scope, discriminator.clone());
        Ok(self.cursors.get(&key).map(|c| c.clone()))
    }

    async fn upsert_cursor(&self, cursor: Cursor) -> Result<()> {
        let key = (cursor.sync_def_id, cursor.scope, cursor.discriminator.clone());
        if let Some(existing) = self.cursors.get(&key) {
            if !existing.advances(&cursor.cursor_value) {
                return Err(EngineError::Invariant(format!(
                    "cursor regression for {:?}: {} does not advance past {}",
                    key, cursor.cursor_value, existing.cursor_value
                )));
            }
        }
        self.cursors.insert(key, cursor);
        Ok(())
    }

    async fn append_move_audit(&self, record: MoveAuditRecord) -> Result<()> {
        self.move_audits.lock().push(record);
        Ok(())
    }
}
