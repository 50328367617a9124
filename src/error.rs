//! Crate-wide error taxonomy (spec §7).
//!
//! Every port and engine boundary returns `Result<T, EngineError>`. Component
//! modules define their own local error enums and convert into this one via
//! `#[from]`, the way `pgdog::backend::replication::Error` rolls up into
//! `pgdog::backend::Error`.

use thiserror::Error;

use crate::decoder::DecodeError;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Definition/target/source/ledger key missing. Not retried.
    #[error("not found: {0}")]
    NotFound(String),

    /// Auth/authorization denial from either backend. Non-retriable.
    #[error("permission denied: {0}")]
    Permission(String),

    /// Connectivity/timeout. Adapters retry internally before surfacing this.
    #[error("transport error: {0}")]
    Transport(String),

    /// Explicit 429/Retry-After exhausted its retry budget.
    #[error("throttled: {0}")]
    Throttle(String),

    /// Malformed replication frame or delta payload.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Ledger present but policy forbids the incoming write. Not fatal, just
    /// a skipped-with-reason outcome callers should log as an event.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Internal contract violation (e.g. two ledger entries for one key).
    /// Fatal; the run that observed it aborts.
    #[error("invariant violation: {0}")]
    Invariant(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// True if a caller may legitimately retry the operation that produced
    /// this error (as opposed to surfacing it to the run record).
    pub fn is_retriable(&self) -> bool {
        matches!(self, EngineError::Transport(_) | EngineError::Throttle(_))
    }
}
