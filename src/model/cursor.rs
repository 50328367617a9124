//! Cursor / watermark (spec §3, §4.4).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorScope {
    Source,
    Target,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorType {
    Timestamp,
    Lsn,
    DeltaToken,
}

/// Discriminates cursors within a (sync_def, scope): either the source
/// instance (for `Scope::Source`) or the target list (for `Scope::Target`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CursorDiscriminator {
    SourceInstance(Uuid),
    TargetList(Uuid),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cursor {
    pub sync_def_id: Uuid,
    pub scope: CursorScope,
    pub discriminator: CursorDiscriminator,
    pub cursor_type: CursorType,
    pub cursor_value: String,
    pub updated_at: DateTime<Utc>,
}

impl Cursor {
    /// Cursor monotonicity (spec §8): reject a value that would move the
    /// watermark backwards. Lexicographic comparison is valid for ISO-8601
    /// timestamps, zero-padded LSNs and opaque delta tokens alike only if the
    /// caller already normalized them; timestamp/LSN cursors are normalized by
    /// `hashing`/`source_db`, delta tokens are never compared (the backend is
    /// the sole authority for their ordering, so target-scope cursors always
    /// advance unconditionally).
    pub fn advances(&self, new_value: &str) -> bool {
        match self.cursor_type {
            CursorType::DeltaToken => true,
            CursorType::Timestamp | CursorType::Lsn => new_value > self.cursor_value.as_str(),
        }
    }
}
