//! Transfer configuration consumed by the download core.
//!
//! The configuration is a read-only input: loading it (TOML here, other
//! front ends elsewhere) never participates in engine correctness. Every
//! field carries a serde default so partial files work.

use crate::humanize::ByteSize;
use crate::probe::CapabilityProbe;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransferConfig {
    /// Staging buffer for network-to-disk writes, per connection.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: ByteSize,
    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_max_connections_per_file")]
    pub max_connections_per_file: usize,
    /// Global cap on simultaneous network connections across all
    /// transfers. Defaults to downloads x connections-per-file.
    #[serde(default)]
    pub max_total_connections: Option<usize>,
    #[serde(default = "default_true")]
    pub verify_tls: bool,
    #[serde(default = "default_true")]
    pub follow_redirects: bool,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub proxy: Option<String>,
    /// Block size for file reads (checksum verification).
    #[serde(default = "default_buffer_size")]
    pub buffer_size: ByteSize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_concurrent_downloads: default_max_concurrent_downloads(),
            max_retries: default_max_retries(),
            connect_timeout_secs: default_timeout_secs(),
            read_timeout_secs: default_timeout_secs(),
            max_connections_per_file: default_max_connections_per_file(),
            max_total_connections: None,
            verify_tls: true,
            follow_redirects: true,
            user_agent: default_user_agent(),
            proxy: None,
            buffer_size: default_buffer_size(),
        }
    }
}

impl TransferConfig {
    /// Load from a TOML file, filling omitted fields with defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    /// Defaults with the chunk size tuned to the host's available memory.
    pub fn tuned(probe: &CapabilityProbe) -> Self {
        Self {
            chunk_size: ByteSize(probe.optimal_chunk_size()),
            ..Self::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// Budget for the global connection semaphore.
    pub fn total_connection_budget(&self) -> usize {
        self.max_total_connections
            .unwrap_or(self.max_concurrent_downloads * self.max_connections_per_file)
            .max(1)
    }
}

fn default_chunk_size() -> ByteSize {
    ByteSize(1024 * 1024) // 1 MiB
}

fn default_max_concurrent_downloads() -> usize {
    3
}

fn default_max_retries() -> u32 {
    3
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_connections_per_file() -> usize {
    16
}

fn default_true() -> bool {
    true
}

fn default_user_agent() -> String {
    format!("FetchKit/{}", env!("CARGO_PKG_VERSION"))
}

fn default_buffer_size() -> ByteSize {
    ByteSize(8 * 1024) // 8 KiB
}
