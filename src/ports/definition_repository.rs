//! `DefinitionRepository` port (spec §6): read-mostly access to sync
//! definitions, source bindings and targets. Backed in production by the
//! control-plane database; out of scope here beyond this interface.

use async_trait::async_trait;
use uuid::Uuid;

use crate::model::{FieldMapping, SyncDefinition, SyncSource, SyncTarget};
use crate::Result;

/// One row of `enumerate_cdc_definitions`: which `(instance, schema, table)`
/// a CDC consumer should dispatch to which definition.
#[derive(Debug, Clone)]
pub struct CdcBinding {
    pub instance_id: Uuid,
    pub schema: String,
    pub table: String,
    pub definition: SyncDefinition,
}

#[async_trait]
pub trait DefinitionRepository: Send + Sync {
    async fn get(&self, sync_def_id: Uuid) -> Result<SyncDefinition>;

    /// All configured sources for a definition, highest-priority first.
    async fn get_source_binding(&self, sync_def_id: Uuid) -> Result<Vec<SyncSource>>;

    async fn list_targets(&self, sync_def_id: Uuid) -> Result<Vec<SyncTarget>>;

    /// Feeds the CDC consumer's `(instance, schema, table) -> definition`
    /// dispatch cache (spec §4.9 step 3).
    async fn enumerate_cdc_definitions(&self) -> Result<Vec<CdcBinding>>;

    /// Mapping table for a definition. Usually just `definition.field_mappings`,
    /// but kept as its own call so callers don't need a full definition fetch
    /// when all they need is the mapping table (e.g. drift reports).
    async fn list_mappings(&self, sync_def_id: Uuid) -> Result<Vec<FieldMapping>>;
}
