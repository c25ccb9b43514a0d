//! Fixtures shared by unit tests.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use ed25519_dalek::SigningKey;
use tokio::sync::mpsc;

use crate::chain::Vm;
use crate::config::VmConfig;
use crate::consensus::{ChannelConsensus, NoopConsensus};
use crate::genesis::{Allocation, Genesis};
use crate::pow;
use crate::storage::SledStorage;
use crate::transaction::{BaseTx, ClaimTx, Transaction, UnsignedTransaction};
use crate::types::{Hash, ManualClock, PublicKey};

/// Balance every [`TestChain`] funds its key with.
pub const RICH: u64 = 1_000_000;

/// Local time a [`TestChain`] starts at.
pub const START: u64 = 100;

pub fn signing_key() -> SigningKey {
    SigningKey::from_bytes(&rand::random::<[u8; 32]>())
}

pub fn public_key(key: &SigningKey) -> PublicKey {
    PublicKey::from(key.verifying_key())
}

/// Base fields referencing a placeholder block at the minimum price.
pub fn base(key: &SigningKey) -> BaseTx {
    BaseTx::new(public_key(key), [1u8; 32], 1)
}

pub fn claim(key: &SigningKey, namespace: &str, block_id: Hash) -> UnsignedTransaction {
    UnsignedTransaction::Claim(ClaimTx {
        base: BaseTx::new(public_key(key), block_id, 1),
        namespace: namespace.to_string(),
    })
}

/// Mine `unsigned` to at least `target` and sign it with `key`.
pub fn mined(mut unsigned: UnsignedTransaction, key: &SigningKey, target: u64) -> Transaction {
    pow::mine(&mut unsigned, target, &AtomicBool::new(false)).unwrap();
    unsigned.sign(key).unwrap()
}

/// Search graffiti until `unsigned` scores exactly `difficulty`.
pub fn exact_difficulty(
    mut unsigned: UnsignedTransaction,
    key: &SigningKey,
    difficulty: u64,
) -> Transaction {
    while unsigned.difficulty().unwrap() != difficulty {
        unsigned.base_mut().graffiti += 1;
    }
    unsigned.sign(key).unwrap()
}

/// An engine over temporary storage with one funded key and a manual clock.
pub struct TestChain {
    pub vm: Vm,
    pub clock: Arc<ManualClock>,
    pub key: SigningKey,
    pub storage: Arc<SledStorage>,
    pub pending: mpsc::Receiver<()>,
}

impl TestChain {
    pub fn new() -> Self {
        Self::with(Genesis::default(), VmConfig::default())
    }

    pub fn with(mut genesis: Genesis, config: VmConfig) -> Self {
        let key = signing_key();
        genesis
            .allocations
            .push(Allocation { public_key: public_key(&key).to_hex(), balance: RICH });
        let storage = Arc::new(SledStorage::temporary().unwrap());
        let clock = Arc::new(ManualClock::new(START));
        let (consensus, pending) = ChannelConsensus::new();
        let vm =
            Vm::new(genesis, config, storage.clone(), clock.clone(), Arc::new(consensus)).unwrap();
        TestChain { vm, clock, key, storage, pending }
    }

    pub fn genesis_id(&self) -> Hash {
        self.vm.last_accepted().unwrap().id()
    }

    /// A funded claim comfortably above the minimum difficulty.
    pub fn claim(&self, namespace: &str, block_id: Hash) -> Transaction {
        mined(claim(&self.key, namespace, block_id), &self.key, 3)
    }

    /// A second engine opened on the same store.
    pub fn reopen(&self, genesis: Genesis) -> Vm {
        Vm::new(
            genesis,
            VmConfig::default(),
            self.storage.clone(),
            self.clock.clone(),
            Arc::new(NoopConsensus),
        )
        .unwrap()
    }
}
