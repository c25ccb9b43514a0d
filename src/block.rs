//! Block payload and identity.

use serde::{Deserialize, Serialize};

use crate::codec::{Codec, CodecError};
use crate::genesis::Genesis;
use crate::transaction::Transaction;
use crate::types::{format_hex, sha256, Hash, EMPTY_HASH};

/// Exclusive bound on how far past the local clock a block timestamp may be.
pub const FUTURE_BOUND_SECS: u64 = 10;

/// The replicated part of a block. Field order is part of the wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatefulBlock {
    pub parent_id: Hash,
    /// Unix timestamp in seconds
    pub timestamp: u64,
    pub height: u64,
    /// Minimum difficulty every transaction must meet
    pub difficulty: u64,
    /// Surplus work, in multiples of `difficulty`, the block must carry
    pub cost: u64,
    pub txs: Vec<Transaction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockStatus {
    Processing,
    Accepted,
    Rejected,
}

impl BlockStatus {
    pub fn is_decided(&self) -> bool {
        !matches!(self, BlockStatus::Processing)
    }
}

/// A [`StatefulBlock`] together with its encoded bytes and id.
#[derive(Debug, Clone)]
pub struct Block {
    stateful: StatefulBlock,
    id: Hash,
    bytes: Vec<u8>,
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Block {}

impl Block {
    pub fn new(stateful: StatefulBlock, codec: &Codec) -> Result<Self, CodecError> {
        let bytes = codec.encode(&stateful)?;
        Ok(Block { id: sha256(&bytes), stateful, bytes })
    }

    /// Decode a block received from a peer or read back from storage.
    pub fn parse(bytes: &[u8], codec: &Codec) -> Result<Self, CodecError> {
        let stateful = codec.decode(bytes)?;
        Ok(Block { id: sha256(bytes), stateful, bytes: bytes.to_vec() })
    }

    /// Height-zero block every chain with these parameters starts from.
    pub fn genesis(genesis: &Genesis, codec: &Codec) -> Result<Self, CodecError> {
        Self::new(
            StatefulBlock {
                parent_id: EMPTY_HASH,
                timestamp: 0,
                height: 0,
                difficulty: genesis.min_difficulty,
                cost: genesis.min_block_cost,
                txs: Vec::new(),
            },
            codec,
        )
    }

    pub fn id(&self) -> Hash {
        self.id
    }

    pub fn parent_id(&self) -> Hash {
        self.stateful.parent_id
    }

    pub fn timestamp(&self) -> u64 {
        self.stateful.timestamp
    }

    pub fn height(&self) -> u64 {
        self.stateful.height
    }

    pub fn difficulty(&self) -> u64 {
        self.stateful.difficulty
    }

    pub fn cost(&self) -> u64 {
        self.stateful.cost
    }

    pub fn txs(&self) -> &[Transaction] {
        &self.stateful.txs
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn stateful(&self) -> &StatefulBlock {
        &self.stateful
    }

    pub fn hex_id(&self) -> String {
        format_hex(&self.id)
    }
}
