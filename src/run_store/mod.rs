//! Run / event store (spec §3, §4.12, C12): the orchestrator's own
//! persistence, kept as a separate trait from [`crate::ledger_store`] since
//! it has nothing to do with the ledger's per-key linearizability invariant
//! — a `RunRecord` is append-then-update-once, never contended across
//! engines the way a `LedgerEntry` is (spec §3 "Ownership: the engine
//! exclusively owns Ledger, Cursor, Run, Event, MoveAudit rows").

mod in_memory;
mod postgres;

pub use in_memory::InMemoryRunStore;
pub use postgres::PostgresRunStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::model::{EventRecord, RunRecord};
use crate::Result;

#[async_trait]
pub trait RunStore: Send + Sync {
    async fn create_run(&self, run: RunRecord) -> Result<()>;

    async fn update_run(&self, run: RunRecord) -> Result<()>;

    async fn get_run(&self, run_id: Uuid) -> Result<Option<RunRecord>>;

    async fn append_event(&self, event: EventRecord) -> Result<()>;

    async fn list_events(&self, run_id: Uuid) -> Result<Vec<EventRecord>>;
}
