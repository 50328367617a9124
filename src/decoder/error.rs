use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("truncated frame: expected at least {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    #[error("unknown replication message tag: {0:?}")]
    UnknownTag(char),

    #[error("string without a null terminator")]
    UnterminatedString,

    #[error("invalid utf-8 in frame payload")]
    InvalidUtf8,

    #[error("tuple references unknown relation id {0}")]
    UnknownRelation(i32),

    #[error("unchanged (TOASTed) column at position {0} has no previous value available")]
    UnresolvedUnchangedColumn(usize),

    #[error("empty frame")]
    Empty,

    /// The CDC consumer's queue envelope (C8's serialized `Frame` + LSN +
    /// instance id) failed to deserialize — a malformed durable-queue payload
    /// rather than a malformed replication frame, but the same taxonomy
    /// bucket applies (spec §7: "logged, message acknowledged, skipped").
    #[error("malformed queue envelope: {0}")]
    Envelope(String),
}
