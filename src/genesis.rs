//! Network-wide economic constants.
//!
//! A [`Genesis`] is loaded exactly once when a chain is created. Every node on
//! a network must run with identical values: they drive fee-market
//! retargeting, namespace rent and transaction size limits.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::PublicKey;

#[derive(Debug, Error)]
pub enum GenesisError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid genesis: {0}")]
    Invalid(String),
    #[error("Invalid allocation key: {0}")]
    InvalidAllocation(String),
}

/// Initial balance credited to a key when the chain is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    /// Hex-encoded ed25519 public key
    pub public_key: String,
    pub balance: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Genesis {
    /// Network identifier
    pub magic: u64,

    /// Minimum price per fee unit
    pub min_price: u64,
    /// Floor for the per-block cost
    pub min_block_cost: u64,
    /// Floor for the per-block difficulty
    pub min_difficulty: u64,

    /// Fee units every transaction pays
    pub base_tx_units: u64,
    /// Extra fee units charged for a claim
    pub claim_fee_units: u64,
    /// Bytes per value unit
    pub value_unit_size: u64,

    pub max_namespace_size: u64,
    pub max_key_size: u64,
    pub max_value_size: u64,

    /// Seconds of ownership granted by a claim
    pub claim_reward: u64,
    /// Seconds of expiry purchased by one lifeline unit on a one-unit namespace
    pub lifeline_unit_reward: u64,

    /// Target seconds between blocks
    pub target_block_rate: u64,
    /// Target transactions per block
    pub target_block_size: u64,
    /// Seconds of history tracked for replay protection and retargeting
    pub lookback_window: u64,

    pub allocations: Vec<Allocation>,
}

impl Default for Genesis {
    fn default() -> Self {
        Genesis {
            magic: 0,
            min_price: 1,
            min_block_cost: 0,
            min_difficulty: 1,
            base_tx_units: 1,
            claim_fee_units: 10,
            value_unit_size: 256,
            max_namespace_size: 256,
            max_key_size: 256,
            max_value_size: 64 * 1024,
            claim_reward: 60 * 60 * 24 * 30,
            lifeline_unit_reward: 60 * 60 * 24,
            target_block_rate: 1,
            target_block_size: 225,
            lookback_window: 60,
            allocations: Vec::new(),
        }
    }
}

impl Genesis {
    /// Parse and validate a genesis document.
    pub fn from_json(bytes: &[u8]) -> Result<Self, GenesisError> {
        let genesis: Genesis = serde_json::from_slice(bytes)?;
        genesis.validate()?;
        Ok(genesis)
    }

    /// Read and validate a genesis file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GenesisError> {
        let bytes = std::fs::read(path)?;
        Self::from_json(&bytes)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, GenesisError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), GenesisError> {
        let non_zero = [
            ("value_unit_size", self.value_unit_size),
            ("target_block_rate", self.target_block_rate),
            ("target_block_size", self.target_block_size),
            ("lookback_window", self.lookback_window),
            ("min_difficulty", self.min_difficulty),
            ("max_namespace_size", self.max_namespace_size),
            ("max_key_size", self.max_key_size),
            ("max_value_size", self.max_value_size),
        ];
        for (name, value) in non_zero {
            if value == 0 {
                return Err(GenesisError::Invalid(format!("{} must be non-zero", name)));
            }
        }
        self.parsed_allocations()?;
        Ok(())
    }

    /// Allocations with their keys decoded.
    pub fn parsed_allocations(&self) -> Result<Vec<(PublicKey, u64)>, GenesisError> {
        self.allocations
            .iter()
            .map(|a| {
                PublicKey::from_hex(&a.public_key)
                    .map(|pk| (pk, a.balance))
                    .map_err(|_| GenesisError::InvalidAllocation(a.public_key.clone()))
            })
            .collect()
    }

    /// Number of transactions the lookback window should hold when blocks
    /// arrive at the target rate and size.
    pub fn target_transactions(&self) -> u64 {
        self.target_block_size
            .saturating_mul(self.lookback_window)
            / self.target_block_rate.max(1)
    }

    /// Size units of a value: one unit per started `value_unit_size` bytes.
    pub fn value_units(&self, len: usize) -> u64 {
        len as u64 / self.value_unit_size.max(1) + 1
    }
}
