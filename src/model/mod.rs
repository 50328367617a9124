//! The data model (spec §3): typed rows, definitions, cursors, ledger,
//! move audit and run/event records.

pub mod audit;
pub mod cursor;
pub mod definition;
pub mod ledger;
pub mod run;
pub mod value;

pub use audit::{MoveAuditRecord, MoveStatus};
pub use cursor::{Cursor, CursorDiscriminator, CursorScope, CursorType};
pub use definition::{
    ConflictPolicy, FieldDirection, FieldMapping, KeyStrategy, SourceRole, SyncDefinition,
    SyncMode, SyncSource, SyncTarget, TargetStatus, TargetStrategy,
};
pub use ledger::{LedgerEntry, Provenance};
pub use run::{EventRecord, EventSeverity, RunKind, RunRecord, RunStatus};
pub use value::{Row, Value};
