//! Server configuration for lightd.
//!
//! [`ServerConfig`] holds the data directory, JSON-RPC binding, node
//! connection file and cache settings. Values are layered: built-in
//! defaults, then an optional TOML file, then `LIGHTD_*` environment
//! variables (`LIGHTD_RPC_PORT=9100`). The binary applies its command-line
//! flags on top.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use lightd_core::constants::{DEFAULT_RETENTION_LIMIT, DEFAULT_RPC_PORT, RANGE_STREAM_TIMEOUT};

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "LIGHTD";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config: {0}")] Load(#[from] config::ConfigError),
    #[error("config: {0}")] Invalid(String),
}

/// Configuration for a lightd server instance.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Root directory for all persistent data.
    pub data_dir: PathBuf,
    /// IP address for the JSON-RPC server to bind to.
    pub rpc_bind: String,
    /// Port for the JSON-RPC server.
    pub rpc_port: u16,
    /// Path to the full node's `zcash.conf`.
    pub node_conf: PathBuf,
    /// Timeout for a single request to the full node, in seconds.
    pub node_timeout_secs: u64,
    /// Maximum number of compact blocks kept in the cache.
    pub retention_limit: u64,
    /// Height to begin ingesting at when the cache is empty.
    pub start_height: Option<u64>,
    /// Ceiling on a whole block range stream, in seconds.
    pub range_timeout_secs: u64,
    /// Log level filter string (e.g. "info", "lightd_server_lib=debug").
    pub log_level: String,
    /// Log output format, "text" or "json".
    pub log_format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lightd");

        Self {
            node_conf: data_dir.join("zcash.conf"),
            data_dir,
            rpc_bind: "127.0.0.1".to_string(),
            rpc_port: DEFAULT_RPC_PORT,
            node_timeout_secs: 30,
            retention_limit: DEFAULT_RETENTION_LIMIT,
            start_height: None,
            range_timeout_secs: RANGE_STREAM_TIMEOUT.as_secs(),
            log_level: "info".to_string(),
            log_format: "text".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load defaults, then `file` if given, then `LIGHTD_*` variables.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let cfg: Self = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.retention_limit == 0 {
            return Err(ConfigError::Invalid("retention_limit must be at least 1".into()));
        }
        if self.range_timeout_secs == 0 {
            return Err(ConfigError::Invalid("range_timeout_secs must be at least 1".into()));
        }
        Ok(())
    }

    /// Path to the RocksDB block cache directory.
    pub fn cache_path(&self) -> PathBuf {
        self.data_dir.join("blockcache")
    }

    /// Socket address string for the RPC server.
    pub fn rpc_addr(&self) -> String {
        format!("{}:{}", self.rpc_bind, self.rpc_port)
    }

    pub fn node_timeout(&self) -> Duration {
        Duration::from_secs(self.node_timeout_secs)
    }

    pub fn range_timeout(&self) -> Duration {
        Duration::from_secs(self.range_timeout_secs)
    }
}
