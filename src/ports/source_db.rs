//! `SourceDB` port (spec §4.6, §6): the row-store side of the bridge.
//!
//! Mirrors `tokio_postgres`'s own split between the row-query surface and the
//! `copy_both`-driven replication stream — see
//! `source_db::postgres::PostgresSourceDb` for the production adapter and
//! `examples/kokizzu-readyset/replicators/src/postgres_connector/wal_reader.rs`
//! for the idiom that `open_replication` follows.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::decoder::Frame;
use crate::model::Row;
use crate::Result;

#[async_trait]
pub trait SourceDB: Send + Sync {
    async fn fetch_changed(
        &self,
        schema: &str,
        table: &str,
        cursor_col: &str,
        cursor_value: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Row>>;

    async fn fetch_one(&self, schema: &str, table: &str, key_col: &str, key_value: &str) -> Result<Option<Row>>;

    async fn insert(&self, schema: &str, table: &str, fields: &Row) -> Result<Row>;

    async fn update(
        &self,
        schema: &str,
        table: &str,
        key_col: &str,
        key_value: &str,
        fields: &Row,
    ) -> Result<Option<Row>>;

    async fn delete(&self, schema: &str, table: &str, key_col: &str, key_value: &str) -> Result<bool>;

    /// Opens the logical-replication stream at `start_lsn`, yielding decoded
    /// frames paired with their LSN so the caller can checkpoint (spec §4.8).
    async fn open_replication(
        &self,
        slot_name: &str,
        start_lsn: i64,
    ) -> Result<BoxStream<'static, Result<(Frame, i64)>>>;

    async fn send_feedback(&self, lsn: i64) -> Result<()>;

    async fn create_slot(&self, slot_name: &str) -> Result<()>;

    async fn drop_slot(&self, slot_name: &str) -> Result<()>;

    async fn list_slots(&self) -> Result<Vec<String>>;
}
