//! In-memory `RunStore`, mirroring [`crate::ledger_store::InMemoryLedgerStore`]'s
//! `DashMap`-per-key approach: the default for tests and for running the
//! engine without an external run-history database.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::model::{EventRecord, RunRecord};
use crate::Result;

use super::RunStore;

#[derive(Default)]
pub struct InMemoryRunStore {
    runs: DashMap<Uuid, RunRecord>,
    events: Mutex<Vec<EventRecord>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn create_run(&self, run: RunRecord) -> Result<()> {
        self.runs.insert(run.id, run);
        Ok(())
    }

    async fn update_run(&self, run: RunRecord) -> Result<()> {
        self.runs.insert(run.id, run);
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<RunRecord>> {
        Ok(self.runs.get(&run_id).map(|r| r.clone()))
    }

    async fn append_event(&self, event: EventRecord) -> Result<()> {
        self.events.lock().push(event);
        Ok(())
    }

    async fn list_events(&self, run_id: Uuid) -> Result<Vec<EventRecord>> {
        Ok(self.events.lock().iter().filter(|e| e.run_id == run_id).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EventSeverity, RunKind, RunStatus};
    use chrono::Utc;

    #[tokio::test]
    async fn create_then_update_preserves_id() {
        let store = InMemoryRunStore::new();
        let run_id = Uuid::new_v4();
        let def_id = Uuid::new_v4();
        let run = RunRecord::new(run_id, def_id, RunKind::Push, Utc::now());
        store.create_run(run.clone()).await.unwrap();

        let mut updated = run;
        updated.status = RunStatus::Completed;
        updated.succeeded = 3;
        store.update_run(updated).await.unwrap();

        let fetched = store.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(fetched.status, RunStatus::Completed);
        assert_eq!(fetched.succeeded, 3);
    }

    #[tokio::test]
    async fn events_filter_by_run_id() {
        let store = InMemoryRunStore::new();
        let run_a = Uuid::new_v4();
        let run_b = Uuid::new_v4();
        store
            .append_event(EventRecord {
                id: Uuid::new_v4(),
                run_id: run_a,
                severity: EventSeverity::Info,
                event_type: "skip".into(),
                message: "m".into(),
                occurred_at: Utc::now(),
            })
            .await
            .unwrap();
        store
            .append_event(EventRecord {
                id: Uuid::new_v4(),
                run_id: run_b,
                severity: EventSeverity::Warn,
                event_type: "skip".into(),
                message: "n".into(),
                occurred_at: Utc::now(),
            })
            .await
            .unwrap();

        let events = store.list_events(run_a).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message, "m");
    }
}
