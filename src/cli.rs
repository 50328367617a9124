//! Command-line surface (ADDED A5), shaped the way the teacher's own
//! `cli.rs` is: a `Parser` root carrying global paths/flags plus a
//! `Subcommand` enum, and free functions (not methods on `Cli`) doing the
//! actual work so `main.rs` stays a thin dispatcher.

use std::fs::read_to_string;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use thiserror::Error;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::engine::drift::DriftCheckKind;
use crate::model::{RunKind, Value};

/// syncbridge replicates rows between relational tables and list-backed
/// REST collections.
#[derive(Parser, Debug)]
#[command(name = "syncbridge", version)]
pub struct Cli {
    /// Path to the engine configuration file.
    #[arg(short, long, default_value = "syncbridge.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run one synchronous push or ingress cycle for a sync definition.
    Run {
        #[arg(long)]
        sync_def_id: Uuid,
        #[arg(long, value_enum)]
        kind: RunKindArg,
    },

    /// CDC lifecycle: ingestion (source -> queue) or consumption (queue -> ledger).
    Cdc {
        #[command(subcommand)]
        action: CdcAction,
    },

    /// Relocate a logical row to a different target list.
    Move {
        #[arg(long)]
        sync_def_id: Uuid,
        #[arg(long)]
        source_identity_hash: String,
        #[arg(long)]
        new_target_list_id: Uuid,
        /// Path to a JSON file containing the new list item's fields,
        /// keyed and typed the way `Row` serializes.
        #[arg(long)]
        item_file: PathBuf,
    },

    /// Run a drift reconciliation check.
    Report {
        #[arg(long)]
        sync_def_id: Uuid,
        #[arg(long, value_enum)]
        kind: DriftKindArg,
    },

    /// Validate the configuration file without starting anything.
    ConfigCheck,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CdcAction {
    /// Start the CDC ingestion worker for one source instance.
    Ingest {
        #[arg(long)]
        instance_id: Uuid,
        #[arg(long)]
        slot_name: String,
    },
    /// Start a CDC consumer reading the shared durable queue.
    Consume {
        #[arg(long)]
        consumer_name: String,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum RunKindArg {
    Push,
    Ingress,
}

impl From<RunKindArg> for RunKind {
    fn from(value: RunKindArg) -> Self {
        match value {
            RunKindArg::Push => RunKind::Push,
            RunKindArg::Ingress => RunKind::Ingress,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum DriftKindArg {
    LedgerValidity,
    FullReconcile,
}

impl From<DriftKindArg> for DriftCheckKind {
    fn from(value: DriftKindArg) -> Self {
        match value {
            DriftKindArg::LedgerValidity => DriftCheckKind::LedgerValidity,
            DriftKindArg::FullReconcile => DriftCheckKind::FullReconcile,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigCheckError {
    #[error("I/O error on `{0}`: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("TOML parse error in `{0}`: {1}")]
    Parse(PathBuf, #[source] toml::de::Error),

    #[error("JSON parse error in `{0}`: {1}")]
    Json(PathBuf, #[source] serde_json::Error),
}

/// Confirm that the configuration file parses. Mirrors the teacher's
/// `config_check`, minus the separate users file this crate doesn't have.
pub fn config_check(config_path: &PathBuf) -> Result<(), ConfigCheckError> {
    let text = read_to_string(config_path).map_err(|e| ConfigCheckError::Io(config_path.clone(), e))?;
    toml::from_str::<EngineConfig>(&text).map_err(|e| ConfigCheckError::Parse(config_path.clone(), e))?;
    Ok(())
}

/// Parses a move's `item_file` into a `Row`. The file is expected to be a
/// JSON object whose values are `{"kind": ..., "value": ...}` tagged the
/// same way `Value`'s `Serialize` impl produces.
pub fn load_item_file(path: &PathBuf) -> Result<crate::model::Row, ConfigCheckError> {
    let text = read_to_string(path).map_err(|e| ConfigCheckError::Io(path.clone(), e))?;
    let raw: indexmap::IndexMap<String, Value> =
        serde_json::from_str(&text).map_err(|e| ConfigCheckError::Json(path.clone(), e))?;
    Ok(raw)
}
