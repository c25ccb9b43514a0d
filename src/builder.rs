//! Block assembly.
//!
//! The builder drains the mempool from the highest difficulty down, executes
//! each transaction on a scratch overlay stacked on the candidate block, and
//! keeps the ones that succeed. The finished block goes through the same
//! verification as a block received from a peer before it is handed out.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::block::{Block, StatefulBlock, FUTURE_BOUND_SECS};
use crate::chain::{overlay_layers, BlockHandle, ChainError, ChainState, Vm};
use crate::ledger::{self, TxContext};
use crate::overlay::{StackView, VersionDb};
use crate::transaction::Transaction;
use crate::types::format_hex;

impl Vm {
    /// Build a block on the preferred block from pending transactions.
    ///
    /// A block that fails its own verification is reported as
    /// [`ChainError::BuildSelfCheck`]: it means the builder and the verifier
    /// disagree, which is a bug rather than bad input.
    pub fn build_block(&self) -> Result<BlockHandle, ChainError> {
        let mut state = self.lock_state()?;
        let parent = self.preferred_block(&state)?;

        let clock = self.inner.clock.now();
        let now = clock.max(parent.timestamp() + 1);
        if now >= clock.saturating_add(FUTURE_BOUND_SECS) {
            return Err(ChainError::TimestampTooLate { timestamp: now, now: clock });
        }
        let context = self.context_for(&state, &parent, now)?;
        let genesis = &self.inner.genesis;

        let pruned = state.mempool.prune(&context.recent_block_ids);
        if pruned > 0 {
            debug!(pruned, "pruned stale transactions before build");
        }

        let mut txs: Vec<Transaction> = Vec::new();
        let mut surplus = 0u64;
        {
            let ChainState { mempool, blocks, .. } = &mut *state;
            let layers = overlay_layers(blocks, &parent.id())?;
            let view = StackView::new(layers, self.inner.storage.as_ref());
            let mut candidate = VersionDb::new(&view);
            let mut seen = HashSet::new();

            while (txs.len() as u64) < genesis.target_block_size {
                let Some((tx, difficulty)) = mempool.pop_max() else {
                    break;
                };
                // Everything left is weaker still.
                if difficulty < context.next_difficulty {
                    mempool.add(tx);
                    break;
                }

                let tx_id = tx.id();
                if context.recent_tx_ids.contains(&tx_id) || !seen.insert(tx_id) {
                    debug!(tx_id = %format_hex(&tx_id), "dropping already included transaction");
                    continue;
                }

                let mut scratch = VersionDb::new(&candidate);
                let ctx = TxContext { genesis, block_time: now, tx_id };
                match ledger::execute(tx.unsigned(), &mut scratch, &ctx) {
                    Ok(()) => {
                        let staged = scratch.into_changes();
                        candidate.merge(staged);
                        surplus = surplus.saturating_add(difficulty - context.next_difficulty);
                        txs.push(tx);
                    }
                    Err(e) => {
                        debug!(
                            tx_id = %format_hex(&tx_id),
                            error = %e,
                            "dropping transaction that no longer executes"
                        );
                    }
                }
            }
        }

        if txs.is_empty() {
            return Err(ChainError::NothingToBuild);
        }
        let required = context.required_surplus();
        if surplus < required {
            for tx in txs {
                state.mempool.add(tx);
            }
            debug!(required, found = surplus, "not enough surplus difficulty to build");
            return Err(ChainError::InsufficientSurplus { required, found: surplus });
        }

        let stateful = StatefulBlock {
            parent_id: parent.id(),
            timestamp: now,
            height: parent.height() + 1,
            difficulty: context.next_difficulty,
            cost: context.next_cost,
            txs,
        };
        let block = Arc::new(Block::new(stateful, &self.inner.codec)?);
        if let Err(e) = self.verify_locked(&mut state, &block) {
            error!(block_id = %block.hex_id(), error = %e, "built block failed verification");
            return Err(ChainError::BuildSelfCheck(Box::new(e)));
        }
        drop(state);

        info!(
            block_id = %block.hex_id(),
            height = block.height(),
            txs = block.txs().len(),
            difficulty = block.difficulty(),
            cost = block.cost(),
            "built block"
        );
        self.inner.built.notify_waiters();
        Ok(BlockHandle::new(self.clone(), block))
    }
}
