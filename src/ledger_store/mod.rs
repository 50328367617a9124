//! Ledger & cursor store (spec §4.4, C4): the transactional key-value layer
//! every sync path (push, CDC consumer, ingress, move manager) mutates
//! through. The invariant that makes loop/echo suppression correct is
//! per-key linearizability, not any particular storage engine — the trait
//! boundary exists so a production adapter (a real transactional database)
//! and the in-memory reference implementation used in tests share identical
//! semantics.

mod in_memory;
mod postgres;

pub use in_memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::model::{Cursor, CursorDiscriminator, CursorScope, LedgerEntry, MoveAuditRecord};
use crate::Result;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get_entry(&self, sync_def_id: Uuid, source_identity_hash: &str) -> Result<Option<LedgerEntry>>;

    /// Reverse lookup for the ingress path (spec §4.10 step 2): a delta page
    /// carries the target's own item id, not the source identity, so ingress
    /// needs the ledger indexed the other way round before it can resolve
    /// which source row (if any) a change belongs to.
    async fn get_entry_by_target_item(
        &self,
        sync_def_id: Uuid,
        target_list_id: Uuid,
        target_item_id: i64,
    ) -> Result<Option<LedgerEntry>>;

    /// Insert-or-update; must preserve `source_identity_hash` as the entry's
    /// half of the composite key (spec §4.4).
    async fn upsert_entry(&self, entry: LedgerEntry) -> Result<()>;

    async fn delete_entry(&self, sync_def_id: Uuid, source_identity_hash: &str) -> Result<()>;

    /// All ledger entries currently bound to one target list, for the drift
    /// reporter's `ledger_validity` check (spec §6 `report`).
    async fn list_entries_for_target(&self, sync_def_id: Uuid, target_list_id: Uuid) -> Result<Vec<LedgerEntry>>;

    async fn get_cursor(
        &self,
        sync_def_id: Uuid,
        scope: CursorScope,
        discriminator: &CursorDiscriminator,
    ) -> Result<Option<Cursor>>;

    /// Must reject (spec §8 cursor monotonicity) a value that does not
    /// `advance` the stored cursor — callers check `Cursor::advances` first,
    /// but the store enforces it too since it is the linearization point.
    async fn upsert_cursor(&self, cursor: Cursor) -> Result<()>;

    async fn append_move_audit(&self, record: MoveAuditRecord) -> Result<()>;
}
