//! The five sync engines (C7, C9, C10, C11) plus the orchestrator (C12) and
//! the drift reporter (SPEC_FULL ADDED). Each engine is a free function
//! taking `&EngineContext` and a `sync_def_id`; none hold mutable state
//! between calls, so the orchestrator's per-`(sync_def_id, kind)`
//! serialization is the only place concurrency is actually managed (spec
//! §4.12, §5).

pub mod cdc_consumer;
pub mod cdc_ingest;
pub mod drift;
pub mod ingress;
pub mod mapping;
pub mod move_manager;
pub mod orchestrator;
pub mod push;

use crate::model::EventSeverity;

/// A per-row outcome, not yet attached to a `RunRecord` id — the
/// orchestrator (C12) is the one that knows the run id and assigns one.
#[derive(Debug, Clone)]
pub struct RowEvent {
    pub severity: EventSeverity,
    pub event_type: String,
    pub message: String,
}

impl RowEvent {
    pub fn info(event_type: &str, message: impl Into<String>) -> Self {
        Self {
            severity: EventSeverity::Info,
            event_type: event_type.to_string(),
            message: message.into(),
        }
    }

    pub fn warn(event_type: &str, message: impl Into<String>) -> Self {
        Self {
            severity: EventSeverity::Warn,
            event_type: event_type.to_string(),
            message: message.into(),
        }
    }

    pub fn error(event_type: &str, message: impl Into<String>) -> Self {
        Self {
            severity: EventSeverity::Error,
            event_type: event_type.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PushOutcome {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub cursor_advanced: bool,
    pub events: Vec<RowEvent>,
}

#[derive(Debug, Clone, Default)]
pub struct IngressOutcome {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub new_token_persisted: bool,
    pub events: Vec<RowEvent>,
}
