//! Engine configuration (SPEC_FULL A1): a single TOML document plus a
//! handful of env-sourced secrets, loaded once into an explicit
//! `EngineConfig` and handed to `EngineContext`. Deliberately has no
//! `ArcSwap`/`Lazy` global the way `pgdog::config` does — the design note
//! in spec §9 ("Global module-level state ... explicit dependency
//! injection") applies to our own ambient config too, not just the ported
//! Python globals.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{EngineError, Result};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EngineConfig {
    /// Postgres connection string for the control-plane / source database.
    #[serde(default = "EngineConfig::default_database_url")]
    pub database_url: String,

    /// Base URL of the list backend (e.g. `https://graph.example.com/v1.0`).
    #[serde(default = "EngineConfig::default_list_backend_url")]
    pub list_backend_url: String,

    /// `redis://` URL for the durable CDC event queue.
    #[serde(default = "EngineConfig::default_redis_url")]
    pub redis_url: String,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub push: PushConfig,

    #[serde(default)]
    pub cdc: CdcConfig,

    #[serde(default)]
    pub health: HealthConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive string, e.g. `"info,syncbridge=debug"`.
    #[serde(default = "LoggingConfig::default_filter")]
    pub filter: String,
    /// Emit newline-delimited JSON instead of the human-readable format.
    #[serde(default)]
    pub json: bool,
}

impl LoggingConfig {
    fn default_filter() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: Self::default_filter(),
            json: false,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PushConfig {
    /// Rows fetched per push run, absent a definition-level override.
    #[serde(default = "PushConfig::default_batch_size")]
    pub batch_size: u32,
}

impl PushConfig {
    fn default_batch_size() -> u32 {
        500
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            batch_size: Self::default_batch_size(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CdcConfig {
    /// High-water backpressure mark on the durable queue (spec §4.8).
    #[serde(default = "CdcConfig::default_high_water_mark")]
    pub high_water_mark: u64,
    /// How long the ingestion worker sleeps between backpressure checks.
    #[serde(default = "CdcConfig::default_backpressure_poll_ms")]
    pub backpressure_poll_ms: u64,
    /// Redis stream key carrying raw CDC frames.
    #[serde(default = "CdcConfig::default_stream_key")]
    pub stream_key: String,
    /// Consumer-group name shared by all CDC consumer workers.
    #[serde(default = "CdcConfig::default_group_name")]
    pub group_name: String,
    /// `block_ms` passed to `XREADGROUP`.
    #[serde(default = "CdcConfig::default_block_ms")]
    pub block_ms: u32,
    /// Messages requested per `XREADGROUP` call.
    #[serde(default = "CdcConfig::default_batch_count")]
    pub batch_count: u32,
}

impl CdcConfig {
    fn default_high_water_mark() -> u64 {
        10_000
    }
    fn default_backpressure_poll_ms() -> u64 {
        1_000
    }
    fn default_stream_key() -> String {
        "syncbridge:cdc:events".to_string()
    }
    fn default_group_name() -> String {
        "syncbridge_cdc_group".to_string()
    }
    fn default_block_ms() -> u32 {
        5_000
    }
    fn default_batch_count() -> u32 {
        10
    }
}

impl Default for CdcConfig {
    fn default() -> Self {
        Self {
            high_water_mark: Self::default_high_water_mark(),
            backpressure_poll_ms: Self::default_backpressure_poll_ms(),
            stream_key: Self::default_stream_key(),
            group_name: Self::default_group_name(),
            block_ms: Self::default_block_ms(),
            batch_count: Self::default_batch_count(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HealthConfig {
    /// `/healthz` port. `None` disables the endpoint.
    pub port: Option<u16>,
    /// `/metrics` port. `None` disables the endpoint.
    pub metrics_port: Option<u16>,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            port: Some(9090),
            metrics_port: Some(9091),
        }
    }
}

impl EngineConfig {
    fn default_database_url() -> String {
        "postgres://localhost:5432/syncbridge".to_string()
    }

    fn default_list_backend_url() -> String {
        "https://graph.microsoft.com/v1.0".to_string()
    }

    fn default_redis_url() -> String {
        "redis://localhost:6379/0".to_string()
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    /// Reads and parses a TOML config file. Secrets (client secrets, bearer
    /// tokens) are intentionally not part of this struct; they are read
    /// from the environment at the point of use (`AZURE_CLIENT_SECRET`
    /// etc.), matching the ported service's own convention.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("reading {}: {e}", path.display())))?;
        toml::from_str(&text)
            .map_err(|e| EngineError::Config(format!("parsing {}: {e}", path.display())))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: Self::default_database_url(),
            list_backend_url: Self::default_list_backend_url(),
            redis_url: Self::default_redis_url(),
            logging: LoggingConfig::default(),
            push: PushConfig::default(),
            cdc: CdcConfig::default(),
            health: HealthConfig::default(),
        }
    }
}
