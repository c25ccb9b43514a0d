//! Block state machine.
//!
//! Blocks that consensus has not decided yet live in an arena keyed by id.
//! Verifying a block executes it into an overlay owned by its arena entry;
//! the overlay records which block it was stacked on. Accept commits the
//! overlay to the durable store and repoints the overlays of already-verified
//! children at the durable base. Reject drops the entry and its overlay.
//!
//! Every state-mutating path (verify, accept, reject, build, submit, prune)
//! runs under one lock around [`ChainState`]. Read-only queries go straight
//! to the durable store.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::block::{Block, BlockStatus, FUTURE_BOUND_SECS};
use crate::codec::{Codec, CodecError};
use crate::config::VmConfig;
use crate::consensus::{ChainBlock, ConsensusEngine};
use crate::fee_market::{self, ExecutionContext};
use crate::genesis::{Genesis, GenesisError};
use crate::gossip;
use crate::ledger::{self, ExecutionError, TxContext};
use crate::mempool::Mempool;
use crate::overlay::{StackView, VersionDb};
use crate::query::Activity;
use crate::storage::{keys, Changes, Database, StorageError, WriteState};
use crate::transaction::Transaction;
use crate::types::{format_hex, Clock, CryptoError, Hash};

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Parent block not found: {}", format_hex(.0))]
    ParentNotFound(Hash),
    #[error("Parent block has not been verified")]
    ParentNotVerified,
    #[error("Parent block has not been accepted")]
    ParentNotAccepted,
    #[error("Parent block {} is accepted but no longer the tip", format_hex(.0))]
    StaleParent(Hash),
    #[error("Block has no transactions")]
    NoTxs,
    #[error("Block timestamp {timestamp} is not after parent timestamp {parent}")]
    TimestampTooEarly { timestamp: u64, parent: u64 },
    #[error("Block timestamp {timestamp} is too far ahead of local time {now}")]
    TimestampTooLate { timestamp: u64, now: u64 },
    #[error("Block height {found}, expected {expected}")]
    InvalidHeight { expected: u64, found: u64 },
    #[error("Block cost {found}, expected {expected}")]
    InvalidCost { expected: u64, found: u64 },
    #[error("Block difficulty {found}, expected {expected}")]
    InvalidDifficulty { expected: u64, found: u64 },
    #[error("Transaction {} references a block outside the lookback window", format_hex(.0))]
    InvalidBlockId(Hash),
    #[error("Duplicate transaction {}", format_hex(.0))]
    DuplicateTx(Hash),
    #[error("Transaction {} has difficulty {found}, below {required}", format_hex(.tx_id))]
    TxDifficultyTooLow { tx_id: Hash, required: u64, found: u64 },
    #[error("Invalid signature on transaction {}", format_hex(.0))]
    InvalidSignature(Hash),
    #[error("Transaction {} failed: {source}", format_hex(.tx_id))]
    Execution {
        tx_id: Hash,
        #[source]
        source: ExecutionError,
    },
    #[error("Insufficient surplus difficulty: need {required}, found {found}")]
    InsufficientSurplus { required: u64, found: u64 },
    #[error("Block not found: {}", format_hex(.0))]
    BlockNotFound(Hash),
    #[error("Block has not been verified: {}", format_hex(.0))]
    BlockNotVerified(Hash),
    #[error("Block {} is already {status:?}", format_hex(.id))]
    AlreadyDecided { id: Hash, status: BlockStatus },
    #[error("Built block failed its own verification: {0}")]
    BuildSelfCheck(#[source] Box<ChainError>),
    #[error("No transactions to build a block with")]
    NothingToBuild,
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("Genesis error: {0}")]
    Genesis(#[from] GenesisError),
    #[error("Chain state lock poisoned")]
    LockPoisoned,
}

/// What a verified block's staged writes sit on top of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OverlayBase {
    Durable,
    Block(Hash),
}

#[derive(Debug)]
pub(crate) struct Overlay {
    pub(crate) base: OverlayBase,
    pub(crate) changes: Changes,
}

#[derive(Debug)]
pub(crate) struct BlockEntry {
    pub(crate) block: Arc<Block>,
    /// Present once the block has been verified
    pub(crate) overlay: Option<Overlay>,
    /// Verified children
    pub(crate) children: Vec<Hash>,
}

impl BlockEntry {
    fn new(block: Arc<Block>) -> Self {
        BlockEntry { block, overlay: None, children: Vec::new() }
    }
}

/// Overlays from `tip` down to the durable store, nearest first. Empty when
/// `tip` is not in the arena, i.e. already accepted.
pub(crate) fn overlay_layers<'s>(
    blocks: &'s HashMap<Hash, BlockEntry>,
    tip: &Hash,
) -> Result<Vec<&'s Changes>, ChainError> {
    let mut layers = Vec::new();
    let mut entry = match blocks.get(tip) {
        Some(entry) => entry,
        None => return Ok(layers),
    };
    loop {
        let overlay = entry.overlay.as_ref().ok_or(ChainError::ParentNotVerified)?;
        layers.push(&overlay.changes);
        match overlay.base {
            OverlayBase::Durable => return Ok(layers),
            OverlayBase::Block(parent) => {
                entry = blocks.get(&parent).ok_or(ChainError::ParentNotVerified)?;
            }
        }
    }
}

pub(crate) struct ChainState {
    pub(crate) mempool: Mempool,
    pub(crate) blocks: HashMap<Hash, BlockEntry>,
    pub(crate) last_accepted: Arc<Block>,
    /// Block new blocks are built on
    pub(crate) preferred: Hash,
    /// Rejected block ids and their heights, kept until a block at that
    /// height or above is accepted
    pub(crate) rejected: HashMap<Hash, u64>,
    /// Admitted since the last gossip round, oldest dropped past the
    /// mempool size
    pub(crate) new_txs: VecDeque<Transaction>,
}

pub(crate) struct VmInner {
    pub(crate) genesis: Genesis,
    pub(crate) codec: Codec,
    pub(crate) config: VmConfig,
    pub(crate) storage: Arc<dyn Database>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) consensus: Arc<dyn ConsensusEngine>,
    pub(crate) state: Mutex<ChainState>,
    pub(crate) activity: Mutex<VecDeque<Activity>>,
    pub(crate) built: Notify,
}

/// The execution engine. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Vm {
    pub(crate) inner: Arc<VmInner>,
}

impl fmt::Debug for Vm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vm").field("magic", &self.inner.genesis.magic).finish_non_exhaustive()
    }
}

fn load_block(
    storage: &dyn Database,
    codec: &Codec,
    id: &Hash,
) -> Result<Option<Arc<Block>>, ChainError> {
    match storage.get(&keys::block(id))? {
        Some(bytes) => Ok(Some(Arc::new(Block::parse(&bytes, codec)?))),
        None => Ok(None),
    }
}

fn read_hash(bytes: &[u8]) -> Result<Hash, ChainError> {
    bytes.try_into().map_err(|_| ChainError::Crypto(CryptoError::HashConversionError))
}

impl Vm {
    /// Open the engine on `storage`, writing the genesis state on first use.
    ///
    /// Once a store has been initialised its persisted genesis wins; a
    /// different `genesis` passed on a later start is ignored.
    pub fn new(
        genesis: Genesis,
        config: VmConfig,
        storage: Arc<dyn Database>,
        clock: Arc<dyn Clock>,
        consensus: Arc<dyn ConsensusEngine>,
    ) -> Result<Self, ChainError> {
        let codec = Codec::default();

        let (genesis, last_accepted) = if storage.has(&keys::initialized())? {
            let stored = storage.get(&keys::genesis())?.ok_or(StorageError::NotFound)?;
            let stored = Genesis::from_json(&stored)?;
            if stored != genesis {
                warn!("store already initialised with a different genesis, keeping the stored one");
            }
            let pointer = storage.get(&keys::last_accepted())?.ok_or(StorageError::NotFound)?;
            let tip = load_block(storage.as_ref(), &codec, &read_hash(&pointer)?)?
                .ok_or(StorageError::NotFound)?;
            info!(block_id = %tip.hex_id(), height = tip.height(), "resuming chain");
            (stored, tip)
        } else {
            genesis.validate()?;
            let block = Arc::new(Block::genesis(&genesis, &codec)?);
            let changes = {
                let view = StackView::durable(storage.as_ref());
                let mut vdb = VersionDb::new(&view);
                for (owner, balance) in genesis.parsed_allocations()? {
                    ledger::set_balance(&mut vdb, &owner, balance)?;
                }
                vdb.put(keys::block(&block.id()), block.bytes().to_vec());
                vdb.put(keys::last_accepted(), block.id().to_vec());
                vdb.put(keys::genesis(), genesis.to_json()?);
                vdb.put(keys::initialized(), vec![1]);
                vdb.into_changes()
            };
            storage.commit(&changes)?;
            info!(
                block_id = %block.hex_id(),
                allocations = genesis.allocations.len(),
                "initialised chain from genesis"
            );
            (genesis, block)
        };

        let state = ChainState {
            mempool: Mempool::new(config.mempool_size),
            blocks: HashMap::new(),
            preferred: last_accepted.id(),
            last_accepted,
            rejected: HashMap::new(),
            new_txs: VecDeque::new(),
        };
        Ok(Vm {
            inner: Arc::new(VmInner {
                genesis,
                codec,
                config,
                storage,
                clock,
                consensus,
                state: Mutex::new(state),
                activity: Mutex::new(VecDeque::new()),
                built: Notify::new(),
            }),
        })
    }

    pub fn genesis(&self) -> &Genesis {
        &self.inner.genesis
    }

    pub fn config(&self) -> &VmConfig {
        &self.inner.config
    }

    pub fn codec(&self) -> &Codec {
        &self.inner.codec
    }

    pub(crate) fn lock_state(&self) -> Result<MutexGuard<'_, ChainState>, ChainError> {
        self.inner.state.lock().map_err(|_| ChainError::LockPoisoned)
    }

    pub fn last_accepted(&self) -> Result<Arc<Block>, ChainError> {
        Ok(Arc::clone(&self.lock_state()?.last_accepted))
    }

    pub fn preferred(&self) -> Result<Hash, ChainError> {
        Ok(self.lock_state()?.preferred)
    }

    /// Choose the block new blocks are built on.
    pub fn set_preference(&self, id: &Hash) -> Result<(), ChainError> {
        let mut state = self.lock_state()?;
        if !state.blocks.contains_key(id) && state.last_accepted.id() != *id {
            return Err(ChainError::BlockNotFound(*id));
        }
        state.preferred = *id;
        debug!(block_id = %format_hex(id), "preference updated");
        Ok(())
    }

    /// Resolve a block from the arena or the durable store.
    pub(crate) fn lookup_block(
        &self,
        state: &ChainState,
        id: &Hash,
    ) -> Result<Option<Arc<Block>>, ChainError> {
        if let Some(entry) = state.blocks.get(id) {
            return Ok(Some(Arc::clone(&entry.block)));
        }
        if state.last_accepted.id() == *id {
            return Ok(Some(Arc::clone(&state.last_accepted)));
        }
        load_block(self.inner.storage.as_ref(), &self.inner.codec, id)
    }

    pub(crate) fn preferred_block(&self, state: &ChainState) -> Result<Arc<Block>, ChainError> {
        self.lookup_block(state, &state.preferred)?
            .ok_or(ChainError::BlockNotFound(state.preferred))
    }

    pub(crate) fn context_for(
        &self,
        state: &ChainState,
        parent: &Arc<Block>,
        now: u64,
    ) -> Result<ExecutionContext, ChainError> {
        fee_market::compute_context(&self.inner.genesis, now, parent, |id| {
            self.lookup_block(state, id)
        })
    }

    /// Context a child of `parent_id` timestamped `now` must satisfy.
    pub fn execution_context(
        &self,
        parent_id: &Hash,
        now: u64,
    ) -> Result<ExecutionContext, ChainError> {
        let state = self.lock_state()?;
        let parent = self
            .lookup_block(&state, parent_id)?
            .ok_or(ChainError::BlockNotFound(*parent_id))?;
        self.context_for(&state, &parent, now)
    }

    fn status_locked(&self, state: &ChainState, id: &Hash) -> Result<BlockStatus, ChainError> {
        if state.blocks.contains_key(id) {
            return Ok(BlockStatus::Processing);
        }
        if state.rejected.contains_key(id) {
            return Ok(BlockStatus::Rejected);
        }
        if self.inner.storage.has(&keys::block(id))? {
            return Ok(BlockStatus::Accepted);
        }
        Err(ChainError::BlockNotFound(*id))
    }

    pub fn status(&self, id: &Hash) -> Result<BlockStatus, ChainError> {
        let state = self.lock_state()?;
        self.status_locked(&state, id)
    }

    /// Decode a block from consensus or a peer and track it until decided.
    pub fn parse_block(&self, bytes: &[u8]) -> Result<BlockHandle, ChainError> {
        let block = Arc::new(Block::parse(bytes, &self.inner.codec)?);
        let id = block.id();
        let mut state = self.lock_state()?;
        let block = match state.blocks.get(&id) {
            Some(entry) => Arc::clone(&entry.block),
            None => {
                if !state.rejected.contains_key(&id)
                    && !self.inner.storage.has(&keys::block(&id))?
                {
                    state.blocks.insert(id, BlockEntry::new(Arc::clone(&block)));
                    debug!(
                        block_id = %block.hex_id(),
                        height = block.height(),
                        "tracking parsed block"
                    );
                }
                block
            }
        };
        Ok(BlockHandle { vm: self.clone(), block })
    }

    pub fn get_block(&self, id: &Hash) -> Result<BlockHandle, ChainError> {
        let state = self.lock_state()?;
        let block = self.lookup_block(&state, id)?.ok_or(ChainError::BlockNotFound(*id))?;
        Ok(BlockHandle { vm: self.clone(), block })
    }

    pub fn verify_block(&self, block: &Arc<Block>) -> Result<(), ChainError> {
        let mut state = self.lock_state()?;
        self.verify_locked(&mut state, block)
    }

    pub(crate) fn verify_locked(
        &self,
        state: &mut ChainState,
        block: &Arc<Block>,
    ) -> Result<(), ChainError> {
        let id = block.id();
        if state.rejected.contains_key(&id) {
            return Err(ChainError::AlreadyDecided { id, status: BlockStatus::Rejected });
        }
        if !state.blocks.contains_key(&id) && self.inner.storage.has(&keys::block(&id))? {
            return Ok(());
        }

        let parent = self
            .lookup_block(state, &block.parent_id())?
            .ok_or(ChainError::ParentNotFound(block.parent_id()))?;
        if !state.blocks.contains_key(&parent.id()) && parent.id() != state.last_accepted.id() {
            return Err(ChainError::StaleParent(parent.id()));
        }
        if block.txs().is_empty() {
            return Err(ChainError::NoTxs);
        }
        if block.timestamp() <= parent.timestamp() {
            return Err(ChainError::TimestampTooEarly {
                timestamp: block.timestamp(),
                parent: parent.timestamp(),
            });
        }
        let now = self.inner.clock.now();
        if block.timestamp() >= now.saturating_add(FUTURE_BOUND_SECS) {
            return Err(ChainError::TimestampTooLate { timestamp: block.timestamp(), now });
        }
        if block.height() != parent.height() + 1 {
            return Err(ChainError::InvalidHeight {
                expected: parent.height() + 1,
                found: block.height(),
            });
        }

        let context = self.context_for(state, &parent, block.timestamp())?;
        if block.cost() != context.next_cost {
            return Err(ChainError::InvalidCost {
                expected: context.next_cost,
                found: block.cost(),
            });
        }
        if block.difficulty() != context.next_difficulty {
            return Err(ChainError::InvalidDifficulty {
                expected: context.next_difficulty,
                found: block.difficulty(),
            });
        }

        let base = if state.blocks.contains_key(&parent.id()) {
            OverlayBase::Block(parent.id())
        } else {
            OverlayBase::Durable
        };
        let changes = self.execute_block(state, block, &context)?;

        state
            .blocks
            .entry(id)
            .or_insert_with(|| BlockEntry::new(Arc::clone(block)))
            .overlay = Some(Overlay { base, changes });
        if let Some(parent_entry) = state.blocks.get_mut(&parent.id()) {
            if !parent_entry.children.contains(&id) {
                parent_entry.children.push(id);
            }
        }
        debug!(
            block_id = %block.hex_id(),
            height = block.height(),
            txs = block.txs().len(),
            "verified block"
        );
        Ok(())
    }

    /// Execute every transaction of `block` on top of its parent's state and
    /// return the staged writes.
    fn execute_block(
        &self,
        state: &ChainState,
        block: &Block,
        context: &ExecutionContext,
    ) -> Result<Changes, ChainError> {
        let layers = overlay_layers(&state.blocks, &block.parent_id())?;
        let view = StackView::new(layers, self.inner.storage.as_ref());
        let mut vdb = VersionDb::new(&view);

        let mut seen = HashSet::new();
        let mut surplus = 0u64;
        for tx in block.txs() {
            let tx_id = tx.id();
            if !context.recent_block_ids.contains(tx.block_id()) {
                return Err(ChainError::InvalidBlockId(tx_id));
            }
            if context.recent_tx_ids.contains(&tx_id) || !seen.insert(tx_id) {
                return Err(ChainError::DuplicateTx(tx_id));
            }
            if tx.difficulty() < block.difficulty() {
                return Err(ChainError::TxDifficultyTooLow {
                    tx_id,
                    required: block.difficulty(),
                    found: tx.difficulty(),
                });
            }
            tx.verify_signature().map_err(|_| ChainError::InvalidSignature(tx_id))?;

            let ctx =
                TxContext { genesis: &self.inner.genesis, block_time: block.timestamp(), tx_id };
            ledger::execute(tx.unsigned(), &mut vdb, &ctx)
                .map_err(|source| ChainError::Execution { tx_id, source })?;
            ledger::put_transaction(&mut vdb, &tx_id, &block.id());
            surplus = surplus.saturating_add(tx.difficulty() - block.difficulty());
        }

        let required = fee_market::required_surplus(block.difficulty(), block.cost());
        if surplus < required {
            return Err(ChainError::InsufficientSurplus { required, found: surplus });
        }

        vdb.put(keys::block(&block.id()), block.bytes().to_vec());
        vdb.put(keys::last_accepted(), block.id().to_vec());
        Ok(vdb.into_changes())
    }

    pub fn accept_block(&self, id: &Hash) -> Result<(), ChainError> {
        let mut state = self.lock_state()?;
        if state.rejected.contains_key(id) {
            return Err(ChainError::AlreadyDecided { id: *id, status: BlockStatus::Rejected });
        }
        let Some(entry) = state.blocks.get(id) else {
            if self.inner.storage.has(&keys::block(id))? {
                return Ok(());
            }
            return Err(ChainError::BlockNotFound(*id));
        };
        let overlay = entry.overlay.as_ref().ok_or(ChainError::BlockNotVerified(*id))?;
        if overlay.base != OverlayBase::Durable {
            return Err(ChainError::ParentNotAccepted);
        }
        self.inner.storage.commit(&overlay.changes)?;

        let entry = state.blocks.remove(id).ok_or(ChainError::BlockNotFound(*id))?;
        for child in &entry.children {
            if let Some(overlay) = state.blocks.get_mut(child).and_then(|c| c.overlay.as_mut()) {
                overlay.base = OverlayBase::Durable;
            }
        }
        let block = entry.block;
        for tx in block.txs() {
            state.mempool.remove(&tx.id());
        }
        state.last_accepted = Arc::clone(&block);
        let height = block.height();
        state.rejected.retain(|_, rejected_at| *rejected_at > height);
        let preferred = state.preferred;
        if !state.blocks.contains_key(&preferred) {
            state.preferred = block.id();
        }
        drop(state);

        self.record_activity(&block)?;
        info!(
            block_id = %block.hex_id(),
            height = block.height(),
            txs = block.txs().len(),
            "accepted block"
        );
        self.inner.consensus.accepted(id, block.height());
        Ok(())
    }

    pub fn reject_block(&self, id: &Hash) -> Result<(), ChainError> {
        let mut state = self.lock_state()?;
        if state.rejected.contains_key(id) {
            return Ok(());
        }
        let Some(entry) = state.blocks.remove(id) else {
            if self.inner.storage.has(&keys::block(id))? {
                return Err(ChainError::AlreadyDecided { id: *id, status: BlockStatus::Accepted });
            }
            return Err(ChainError::BlockNotFound(*id));
        };

        let parent_id = entry.block.parent_id();
        if let Some(parent) = state.blocks.get_mut(&parent_id) {
            parent.children.retain(|child| child != id);
        }
        state.rejected.insert(*id, entry.block.height());
        if state.preferred == *id {
            state.preferred = if state.blocks.contains_key(&parent_id) {
                parent_id
            } else {
                state.last_accepted.id()
            };
        }
        if self.inner.config.readd_rejected_txs {
            // The block may never have been verified, so each tx is admitted
            // like a fresh submission.
            for tx in entry.block.txs() {
                match self.check_admission(&state, tx) {
                    Ok(()) => {
                        state.mempool.add(tx.clone());
                    }
                    Err(e) => debug!(
                        tx_id = %format_hex(&tx.id()),
                        error = %e,
                        "not returning rejected transaction"
                    ),
                }
            }
        }
        drop(state);

        info!(block_id = %entry.block.hex_id(), height = entry.block.height(), "rejected block");
        self.inner.consensus.rejected(id);
        Ok(())
    }

    fn record_activity(&self, block: &Block) -> Result<(), ChainError> {
        let mut activity = self.inner.activity.lock().map_err(|_| ChainError::LockPoisoned)?;
        for tx in block.txs() {
            activity.push_back(Activity {
                block_id: block.id(),
                timestamp: block.timestamp(),
                tx_id: tx.id(),
                sender: *tx.sender(),
                op: tx.unsigned().kind().to_string(),
                namespace: tx.unsigned().namespace().map(str::to_string),
            });
        }
        while activity.len() > self.inner.config.activity_cache_size {
            activity.pop_front();
        }
        Ok(())
    }

    /// Admit a transaction to the mempool after checking it would execute
    /// on top of the preferred block.
    pub fn submit(&self, tx: Transaction) -> Result<Hash, ChainError> {
        let id = tx.id();
        {
            let mut state = self.lock_state()?;
            self.check_admission(&state, &tx)?;
            if state.mempool.add(tx.clone()) {
                if state.new_txs.len() >= self.inner.config.mempool_size {
                    state.new_txs.pop_front();
                }
                state.new_txs.push_back(tx);
            } else {
                debug!(tx_id = %format_hex(&id), "transaction priced out of a full mempool");
            }
        }
        self.inner.consensus.pending_txs();
        Ok(id)
    }

    fn check_admission(&self, state: &ChainState, tx: &Transaction) -> Result<(), ChainError> {
        let tx_id = tx.id();
        if state.mempool.has(&tx_id) {
            return Err(ChainError::DuplicateTx(tx_id));
        }
        tx.verify_signature().map_err(|_| ChainError::InvalidSignature(tx_id))?;
        ledger::validate_base(tx.unsigned(), &self.inner.genesis)
            .map_err(|source| ChainError::Execution { tx_id, source })?;

        let parent = self.preferred_block(state)?;
        let now = self.inner.clock.now().max(parent.timestamp() + 1);
        let context = self.context_for(state, &parent, now)?;
        if !context.recent_block_ids.contains(tx.block_id()) {
            return Err(ChainError::InvalidBlockId(tx_id));
        }
        if context.recent_tx_ids.contains(&tx_id) {
            return Err(ChainError::DuplicateTx(tx_id));
        }
        if tx.difficulty() < context.next_difficulty {
            return Err(ChainError::TxDifficultyTooLow {
                tx_id,
                required: context.next_difficulty,
                found: tx.difficulty(),
            });
        }

        let layers = overlay_layers(&state.blocks, &parent.id())?;
        let view = StackView::new(layers, self.inner.storage.as_ref());
        if ledger::has_transaction(&view, &tx_id)? {
            return Err(ChainError::DuplicateTx(tx_id));
        }
        let mut scratch = VersionDb::new(&view);
        let ctx = TxContext { genesis: &self.inner.genesis, block_time: now, tx_id };
        ledger::execute(tx.unsigned(), &mut scratch, &ctx)
            .map_err(|source| ChainError::Execution { tx_id, source })
    }

    /// Submit every transaction of a gossip payload. Returns how many were
    /// admitted; individual failures are logged and skipped.
    pub fn app_gossip(&self, payload: &[u8]) -> Result<usize, ChainError> {
        let txs = gossip::decode_txs(&self.inner.codec, payload)?;
        let total = txs.len();
        let mut admitted = 0;
        for tx in txs {
            let tx_id = tx.id();
            match self.submit(tx) {
                Ok(_) => admitted += 1,
                Err(e) => debug!(
                    tx_id = %format_hex(&tx_id),
                    error = %e,
                    "dropping gossiped transaction"
                ),
            }
        }
        debug!(total, admitted, "processed gossip payload");
        Ok(admitted)
    }

    pub fn mempool_len(&self) -> Result<usize, ChainError> {
        Ok(self.lock_state()?.mempool.len())
    }

    /// Transactions admitted since the previous call.
    pub fn take_new_txs(&self) -> Result<Vec<Transaction>, ChainError> {
        Ok(std::mem::take(&mut self.lock_state()?.new_txs).into())
    }

    /// Highest-priority pending transactions, for periodic re-gossip.
    pub fn regossip_candidates(&self, limit: usize) -> Result<Vec<Transaction>, ChainError> {
        Ok(self.lock_state()?.mempool.top(limit))
    }

    /// Drop pending transactions whose block id fell out of the lookback
    /// window of the preferred block.
    pub fn prune_mempool(&self) -> Result<usize, ChainError> {
        let mut state = self.lock_state()?;
        let parent = self.preferred_block(&state)?;
        let now = self.inner.clock.now().max(parent.timestamp() + 1);
        let context = self.context_for(&state, &parent, now)?;
        let pruned = state.mempool.prune(&context.recent_block_ids);
        if pruned > 0 {
            debug!(pruned, remaining = state.mempool.len(), "pruned stale transactions");
        }
        Ok(pruned)
    }

    /// Ask consensus for a block if there is pending work.
    pub fn signal_pending(&self) {
        self.inner.consensus.pending_txs();
    }

    /// Completes the next time this node builds a block. Create it before
    /// signalling so a build that finishes in between is not missed.
    pub fn block_built(&self) -> Notified<'_> {
        self.inner.built.notified()
    }

    pub fn flush(&self) -> Result<(), ChainError> {
        Ok(self.inner.storage.flush()?)
    }
}

/// Handle consensus uses to drive one block.
#[derive(Clone)]
pub struct BlockHandle {
    vm: Vm,
    block: Arc<Block>,
}

impl BlockHandle {
    pub(crate) fn new(vm: Vm, block: Arc<Block>) -> Self {
        BlockHandle { vm, block }
    }

    pub fn block(&self) -> &Arc<Block> {
        &self.block
    }
}

impl fmt::Debug for BlockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockHandle")
            .field("id", &self.block.hex_id())
            .field("height", &self.block.height())
            .finish()
    }
}

impl ChainBlock for BlockHandle {
    fn id(&self) -> Hash {
        self.block.id()
    }

    fn parent_id(&self) -> Hash {
        self.block.parent_id()
    }

    fn height(&self) -> u64 {
        self.block.height()
    }

    fn timestamp(&self) -> u64 {
        self.block.timestamp()
    }

    fn bytes(&self) -> &[u8] {
        self.block.bytes()
    }

    fn status(&self) -> Result<BlockStatus, ChainError> {
        self.vm.status(&self.block.id())
    }

    fn verify(&self) -> Result<(), ChainError> {
        self.vm.verify_block(&self.block)
    }

    fn accept(&self) -> Result<(), ChainError> {
        self.vm.accept_block(&self.block.id())
    }

    fn reject(&self) -> Result<(), ChainError> {
        self.vm.reject_block(&self.block.id())
    }
}
