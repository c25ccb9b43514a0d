//! Fee-market retargeting.
//!
//! Every block declares the `cost` and `difficulty` it was built under. Both
//! are recomputed from the parent and the block's own timestamp, never from
//! local wall time, so all nodes agree on them.

use std::collections::HashSet;
use std::sync::Arc;

use crate::block::Block;
use crate::genesis::Genesis;
use crate::types::Hash;

/// What a child of some parent block must satisfy at a given time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    /// Blocks a transaction may reference
    pub recent_block_ids: HashSet<Hash>,
    /// Transactions already included inside the lookback window
    pub recent_tx_ids: HashSet<Hash>,
    pub next_cost: u64,
    pub next_difficulty: u64,
}

impl ExecutionContext {
    pub fn required_surplus(&self) -> u64 {
        required_surplus(self.next_difficulty, self.next_cost)
    }
}

/// Cost rises when blocks come faster than the target rate and falls when
/// they come slower, never below `min_block_cost`.
pub fn next_cost(genesis: &Genesis, parent_cost: u64, seconds_since_last: u64) -> u64 {
    let cost = parent_cost as i128 + genesis.target_block_rate as i128 - seconds_since_last as i128;
    cost.clamp(genesis.min_block_cost as i128, u64::MAX as i128) as u64
}

pub fn next_difficulty(
    genesis: &Genesis,
    parent_difficulty: u64,
    recent_tx_count: usize,
    seconds_since_last: u64,
) -> u64 {
    if recent_tx_count as u64 > genesis.target_transactions() {
        return parent_difficulty.saturating_add(1);
    }
    let elapsed_windows = seconds_since_last / genesis.lookback_window.max(1) + 1;
    parent_difficulty
        .saturating_sub(elapsed_windows)
        .max(genesis.min_difficulty)
}

/// Aggregate surplus difficulty a block must carry.
pub fn required_surplus(difficulty: u64, cost: u64) -> u64 {
    difficulty.saturating_mul(cost)
}

/// Walk back from `parent` through the lookback window and derive the
/// context for a child timestamped `now`.
///
/// The parent is always part of the window. The walk stops at the first
/// ancestor older than the window, at the genesis block, or when `lookup`
/// cannot resolve an ancestor.
pub fn compute_context<F, E>(
    genesis: &Genesis,
    now: u64,
    parent: &Arc<Block>,
    mut lookup: F,
) -> Result<ExecutionContext, E>
where
    F: FnMut(&Hash) -> Result<Option<Arc<Block>>, E>,
{
    let mut recent_block_ids = HashSet::new();
    let mut recent_tx_ids = HashSet::new();

    let mut cursor = Some(Arc::clone(parent));
    while let Some(block) = cursor {
        if block.id() != parent.id()
            && now.saturating_sub(block.timestamp()) > genesis.lookback_window
        {
            break;
        }
        recent_block_ids.insert(block.id());
        recent_tx_ids.extend(block.txs().iter().map(|tx| tx.id()));
        if block.height() == 0 {
            break;
        }
        cursor = lookup(&block.parent_id())?;
    }

    let since = now.saturating_sub(parent.timestamp());
    Ok(ExecutionContext {
        next_cost: next_cost(genesis, parent.cost(), since),
        next_difficulty: next_difficulty(genesis, parent.difficulty(), recent_tx_ids.len(), since),
        recent_block_ids,
        recent_tx_ids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::convert::Infallible;

    use crate::block::StatefulBlock;
    use crate::codec::Codec;
    use crate::test_utils::{claim, signing_key};

    fn genesis() -> Genesis {
        Genesis {
            min_block_cost: 2,
            min_difficulty: 3,
            target_block_rate: 5,
            target_block_size: 1,
            lookback_window: 10,
            ..Genesis::default()
        }
    }

    /// Linear chain with the given timestamps; each block carries `txs_per_block` claims.
    fn chain(timestamps: &[u64], txs_per_block: usize) -> Vec<Arc<Block>> {
        let codec = Codec::default();
        let key = signing_key();
        let mut blocks: Vec<Arc<Block>> = Vec::new();
        for (height, ts) in timestamps.iter().enumerate() {
            let parent_id = blocks.last().map_or([0u8; 32], |b| b.id());
            let count = if height == 0 { 0 } else { txs_per_block };
            let txs = (0..count)
                .map(|n| claim(&key, &format!("ns{}-{}", height, n), [1u8; 32]).sign(&key).unwrap())
                .collect();
            let stateful = StatefulBlock {
                parent_id,
                timestamp: *ts,
                height: height as u64,
                difficulty: 8,
                cost: 4,
                txs,
            };
            blocks.push(Arc::new(Block::new(stateful, &codec).unwrap()));
        }
        blocks
    }

    fn context(genesis: &Genesis, now: u64, blocks: &[Arc<Block>]) -> ExecutionContext {
        let index: HashMap<Hash, Arc<Block>> =
            blocks.iter().map(|b| (b.id(), Arc::clone(b))).collect();
        let parent = blocks.last().unwrap();
        compute_context(genesis, now, parent, |id| Ok::<_, Infallible>(index.get(id).cloned()))
            .unwrap()
    }

    #[test]
    fn test_next_cost() {
        let genesis = genesis();
        assert_eq!(next_cost(&genesis, 10, 1), 14);
        assert_eq!(next_cost(&genesis, 10, 5), 10);
        assert_eq!(next_cost(&genesis, 10, 12), 3);
        assert_eq!(next_cost(&genesis, 10, 1_000), genesis.min_block_cost);
        assert_eq!(next_cost(&genesis, u64::MAX, 0), u64::MAX);
    }

    #[test]
    fn test_next_difficulty() {
        let genesis = genesis();
        let target = genesis.target_transactions() as usize;
        assert_eq!(target, 2);

        assert_eq!(next_difficulty(&genesis, 8, target + 1, 1), 9);
        // At the target the window is not busy enough to raise difficulty.
        assert_eq!(next_difficulty(&genesis, 8, target, 1), 7);
        assert_eq!(next_difficulty(&genesis, 8, 0, 25), 5);
        assert_eq!(next_difficulty(&genesis, 8, 0, 1_000), genesis.min_difficulty);
    }

    #[test]
    fn test_required_surplus() {
        assert_eq!(required_surplus(1000, 1000), 1_000_000);
        assert_eq!(required_surplus(u64::MAX, 2), u64::MAX);
        assert_eq!(required_surplus(5, 0), 0);
    }

    #[test]
    fn test_walk_stops_at_window_edge() {
        let genesis = genesis();
        let blocks = chain(&[0, 100, 105, 111, 112], 1);
        let ctx = context(&genesis, 114, &blocks);

        let ids: HashSet<Hash> = blocks[2..].iter().map(|b| b.id()).collect();
        assert_eq!(ctx.recent_block_ids, ids);
        assert_eq!(ctx.recent_tx_ids.len(), 3);
        assert_eq!(ctx.next_cost, next_cost(&genesis, 4, 2));
        assert_eq!(ctx.next_difficulty, 9);
    }

    #[test]
    fn test_parent_always_in_window() {
        let genesis = genesis();
        let blocks = chain(&[0, 100], 1);
        let ctx = context(&genesis, 500, &blocks);
        assert_eq!(ctx.recent_block_ids.len(), 1);
        assert!(ctx.recent_block_ids.contains(&blocks[1].id()));
        assert_eq!(ctx.next_difficulty, genesis.min_difficulty);
    }

    #[test]
    fn test_walk_stops_at_genesis() {
        let genesis = genesis();
        let blocks = chain(&[0, 1, 2], 0);
        let ctx = context(&genesis, 3, &blocks);
        assert_eq!(ctx.recent_block_ids.len(), 3);
        assert!(ctx.recent_tx_ids.is_empty());
    }

    #[test]
    fn test_context_is_deterministic() {
        let genesis = genesis();
        let blocks = chain(&[0, 3, 6, 9, 12], 2);
        let first = context(&genesis, 13, &blocks);
        for _ in 0..5 {
            assert_eq!(context(&genesis, 13, &blocks), first);
        }
    }

    #[test]
    fn test_lookup_error_propagates() {
        let genesis = genesis();
        let blocks = chain(&[0, 1, 2], 0);
        let result =
            compute_context(&genesis, 3, &blocks[2], |_| Err::<Option<Arc<Block>>, _>("boom"));
        assert_eq!(result.unwrap_err(), "boom");
    }
}
