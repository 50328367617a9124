//! `ListBackend` port (spec §4.5, §6): the remote-list side of the bridge.
//! Production adapter lives in `list_backend::http`; token caching and the
//! OData delta-query shape are internal to that adapter, not this port.

use async_trait::async_trait;

use crate::model::Row;
use crate::Result;

/// One row of a delta page (spec §4.5, §6's wire contract).
#[derive(Debug, Clone)]
pub struct DeltaItem {
    pub id: i64,
    pub reason: DeltaReason,
    pub fields: Row,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaReason {
    Changed,
    Deleted,
}

#[async_trait]
pub trait ListBackend: Send + Sync {
    async fn create_item(&self, site: &str, list: &str, fields: &Row) -> Result<i64>;

    async fn update_item(&self, site: &str, list: &str, item_id: i64, fields: &Row) -> Result<()>;

    async fn delete_item(&self, site: &str, list: &str, item_id: i64) -> Result<()>;

    async fn get_item(&self, site: &str, list: &str, item_id: i64) -> Result<Option<Row>>;

    /// Paginates internally until the final page carrying the new delta
    /// token (spec §4.5: "the adapter internally paginates").
    async fn delta_changes(
        &self,
        site: &str,
        list: &str,
        delta_token: Option<&str>,
    ) -> Result<(Vec<DeltaItem>, String)>;
}
