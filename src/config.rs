//! Node-local settings.
//!
//! Unlike [`Genesis`](crate::genesis::Genesis) these values only affect how
//! this node schedules work, so they may differ between nodes.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Maximum number of pending transactions
    pub mempool_size: usize,
    pub build_interval_ms: u64,
    /// How long the build loop waits for a requested block before gossiping anyway
    pub build_timeout_ms: u64,
    pub regossip_interval_ms: u64,
    pub regossip_max_txs: usize,
    pub prune_interval_ms: u64,
    pub compact_interval_ms: u64,
    /// Accepted transactions kept for the recent-activity query
    pub activity_cache_size: usize,
    /// Return a rejected block's transactions to the mempool
    pub readd_rejected_txs: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            mempool_size: 1024,
            build_interval_ms: 500,
            build_timeout_ms: 1_000,
            regossip_interval_ms: 30_000,
            regossip_max_txs: 32,
            prune_interval_ms: 60_000,
            compact_interval_ms: 600_000,
            activity_cache_size: 128,
            readd_rejected_txs: false,
        }
    }
}

impl VmConfig {
    pub fn from_json(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config: VmConfig = serde_json::from_slice(bytes)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path)?;
        Self::from_json(&bytes)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mempool_size == 0 {
            return Err(ConfigError::Invalid("mempool_size must be non-zero".into()));
        }
        let intervals = [
            ("build_interval_ms", self.build_interval_ms),
            ("regossip_interval_ms", self.regossip_interval_ms),
            ("prune_interval_ms", self.prune_interval_ms),
            ("compact_interval_ms", self.compact_interval_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be non-zero", name)));
            }
        }
        Ok(())
    }

    pub fn build_interval(&self) -> Duration {
        Duration::from_millis(self.build_interval_ms)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_millis(self.build_timeout_ms)
    }

    pub fn regossip_interval(&self) -> Duration {
        Duration::from_millis(self.regossip_interval_ms)
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_millis(self.prune_interval_ms)
    }

    pub fn compact_interval(&self) -> Duration {
        Duration::from_millis(self.compact_interval_ms)
    }
}
