//! Read-only queries over accepted state.
//!
//! Queries never see processing blocks. Expiry is judged against the
//! timestamp of the last accepted block so every node answers the same way.

use serde::{Deserialize, Serialize};

use crate::chain::{ChainError, Vm};
use crate::ledger::{self, NamespaceRecord, ValueRecord};
use crate::storage::keys;
use crate::types::{CryptoError, Hash, PublicKey};

/// One accepted transaction, as reported by [`Vm::recent_activity`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub block_id: Hash,
    pub timestamp: u64,
    pub tx_id: Hash,
    pub sender: PublicKey,
    /// Transaction kind, e.g. `"claim"`
    pub op: String,
    pub namespace: Option<String>,
}

/// What a client must mine against to have a transaction included soon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiningTarget {
    /// Block the transaction should reference
    pub block_id: Hash,
    pub difficulty: u64,
    pub cost: u64,
    pub min_price: u64,
}

impl Vm {
    fn accepted_time(&self) -> Result<u64, ChainError> {
        Ok(self.last_accepted()?.timestamp())
    }

    /// Owner record of a live namespace. Expired namespaces read as `None`.
    pub fn namespace_info(&self, namespace: &str) -> Result<Option<NamespaceRecord>, ChainError> {
        let now = self.accepted_time()?;
        Ok(ledger::get_live_namespace(self.inner.storage.as_ref(), namespace, now)?)
    }

    pub fn resolve(&self, namespace: &str, key: &[u8]) -> Result<Option<ValueRecord>, ChainError> {
        if self.namespace_info(namespace)?.is_none() {
            return Ok(None);
        }
        Ok(ledger::get_value(self.inner.storage.as_ref(), namespace, key)?)
    }

    /// Every value stored under a live namespace, in key order.
    pub fn range(&self, namespace: &str) -> Result<Vec<(Vec<u8>, ValueRecord)>, ChainError> {
        if self.namespace_info(namespace)?.is_none() {
            return Ok(Vec::new());
        }
        Ok(ledger::get_values(self.inner.storage.as_ref(), namespace)?)
    }

    pub fn balance(&self, owner: &PublicKey) -> Result<u64, ChainError> {
        Ok(ledger::get_balance(self.inner.storage.as_ref(), owner)?)
    }

    /// Block that included transaction `tx_id`, if it has been accepted.
    pub fn confirmed_in(&self, tx_id: &Hash) -> Result<Option<Hash>, ChainError> {
        match self.inner.storage.get(&keys::transaction(tx_id))? {
            Some(bytes) => {
                let block_id: Hash =
                    bytes.as_slice().try_into().map_err(|_| CryptoError::HashConversionError)?;
                Ok(Some(block_id))
            }
            None => Ok(None),
        }
    }

    /// Target for a transaction built now on top of the preferred block.
    pub fn mining_target(&self) -> Result<MiningTarget, ChainError> {
        let state = self.lock_state()?;
        let parent = self.preferred_block(&state)?;
        let now = self.inner.clock.now().max(parent.timestamp() + 1);
        let context = self.context_for(&state, &parent, now)?;
        Ok(MiningTarget {
            block_id: parent.id(),
            difficulty: context.next_difficulty,
            cost: context.next_cost,
            min_price: self.inner.genesis.min_price,
        })
    }

    /// Recently accepted transactions, newest first.
    pub fn recent_activity(&self) -> Result<Vec<Activity>, ChainError> {
        let activity = self.inner.activity.lock().map_err(|_| ChainError::LockPoisoned)?;
        Ok(activity.iter().rev().cloned().collect())
    }
}
