//! Bounded, fee-ordered pool of pending transactions.
//!
//! Entries are indexed twice: by id for lookup and duplicate detection, and
//! by `(fee, id)` in an ordered set that serves both ends. The highest-fee
//! end feeds the block builder and the lowest-fee end is evicted under
//! capacity pressure. Ties on fee break by id, so the order is total and
//! both views always hold the same set of ids.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::transaction::Transaction;
use crate::types::{format_hex, Hash};

/// Something the pool can hold.
pub trait PoolItem: Clone {
    fn id(&self) -> Hash;
    /// Priority metric. Higher is better.
    fn fee(&self) -> u64;
    /// Block the item was built against; used for pruning.
    fn block_id(&self) -> Hash;
}

/// Transactions are prioritised by their proof-of-work difficulty: it is
/// what they contribute towards funding the block's cost.
impl PoolItem for Transaction {
    fn id(&self) -> Hash {
        Transaction::id(self)
    }

    fn fee(&self) -> u64 {
        self.difficulty()
    }

    fn block_id(&self) -> Hash {
        *Transaction::block_id(self)
    }
}

#[derive(Debug)]
pub struct Mempool<T: PoolItem = Transaction> {
    max_size: usize,
    by_id: HashMap<Hash, T>,
    by_fee: BTreeSet<(u64, Hash)>,
}

impl<T: PoolItem> Mempool<T> {
    pub fn new(max_size: usize) -> Self {
        Self { max_size, by_id: HashMap::new(), by_fee: BTreeSet::new() }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn has(&self, id: &Hash) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn get(&self, id: &Hash) -> Option<&T> {
        self.by_id.get(id)
    }

    /// Insert `item`, evicting the lowest-fee entry if the pool overflows.
    ///
    /// Returns whether `item` is in the pool afterwards: false for a
    /// duplicate, or when `item` itself was the cheapest entry and got evicted.
    pub fn add(&mut self, item: T) -> bool {
        let id = item.id();
        if self.by_id.contains_key(&id) {
            return false;
        }

        self.by_fee.insert((item.fee(), id));
        self.by_id.insert(id, item);

        if self.by_id.len() > self.max_size {
            if let Some(evicted) = self.pop_min() {
                let evicted_id = evicted.id();
                tracing::debug!(
                    tx_id = %format_hex(&evicted_id),
                    fee = evicted.fee(),
                    "mempool full, evicted cheapest entry"
                );
                return evicted_id != id;
            }
        }
        true
    }

    pub fn peek_max(&self) -> Option<(&T, u64)> {
        let (fee, id) = self.by_fee.last()?;
        self.by_id.get(id).map(|item| (item, *fee))
    }

    pub fn peek_min(&self) -> Option<(&T, u64)> {
        let (fee, id) = self.by_fee.first()?;
        self.by_id.get(id).map(|item| (item, *fee))
    }

    pub fn pop_max(&mut self) -> Option<(T, u64)> {
        let (fee, id) = self.by_fee.pop_last()?;
        self.by_id.remove(&id).map(|item| (item, fee))
    }

    pub fn pop_min(&mut self) -> Option<T> {
        let (_, id) = self.by_fee.pop_first()?;
        self.by_id.remove(&id)
    }

    pub fn remove(&mut self, id: &Hash) -> Option<T> {
        let item = self.by_id.remove(id)?;
        self.by_fee.remove(&(item.fee(), *id));
        Some(item)
    }

    /// Drop every entry whose block id is not in `valid_block_ids`.
    /// Returns the number of entries removed.
    pub fn prune(&mut self, valid_block_ids: &HashSet<Hash>) -> usize {
        let stale: Vec<Hash> = self
            .by_id
            .iter()
            .filter(|(_, item)| !valid_block_ids.contains(&item.block_id()))
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            self.remove(id);
        }
        stale.len()
    }

    /// Clones of up to `limit` entries, highest fee first.
    pub fn top(&self, limit: usize) -> Vec<T> {
        self.by_fee
            .iter()
            .rev()
            .take(limit)
            .filter_map(|(_, id)| self.by_id.get(id).cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        id: Hash,
        fee: u64,
        block_id: Hash,
    }

    impl PoolItem for Item {
        fn id(&self) -> Hash {
            self.id
        }
        fn fee(&self) -> u64 {
            self.fee
        }
        fn block_id(&self) -> Hash {
            self.block_id
        }
    }

    fn item(n: u8, fee: u64) -> Item {
        Item { id: [n; 32], fee, block_id: [1; 32] }
    }

    #[test]
    fn test_capacity_keeps_highest_fees() {
        let mut pool = Mempool::new(3);
        for (n, fee) in [100, 200, 220, 250].into_iter().enumerate() {
            assert!(pool.add(item(n as u8 + 1, fee)));
        }
        assert_eq!(pool.len(), 3);
        assert!(!pool.has(&[1; 32]));
        assert_eq!(pool.peek_max().map(|(_, fee)| fee), Some(250));
        assert_eq!(pool.peek_min().map(|(_, fee)| fee), Some(200));
    }

    #[test]
    fn test_add_below_floor_when_full_is_not_retained() {
        let mut pool = Mempool::new(2);
        pool.add(item(1, 50));
        pool.add(item(2, 60));
        assert!(!pool.add(item(3, 10)));
        assert_eq!(pool.len(), 2);
        assert!(!pool.has(&[3; 32]));
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut pool = Mempool::new(10);
        assert!(pool.add(item(1, 5)));
        assert!(!pool.add(item(1, 5)));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_pop_order_and_tie_break() {
        let mut pool = Mempool::new(10);
        pool.add(item(3, 7));
        pool.add(item(1, 7));
        pool.add(item(2, 9));

        let (first, fee) = pool.pop_max().unwrap();
        assert_eq!((first.id, fee), ([2; 32], 9));
        // Equal fees: larger id ranks higher.
        assert_eq!(pool.pop_max().unwrap().0.id, [3; 32]);
        assert_eq!(pool.pop_min().unwrap().id, [1; 32]);
        assert!(pool.pop_max().is_none());
        assert!(pool.pop_min().is_none());
    }

    #[test]
    fn test_remove_and_prune() {
        let mut pool = Mempool::new(10);
        pool.add(item(1, 1));
        pool.add(Item { id: [2; 32], fee: 2, block_id: [9; 32] });
        pool.add(Item { id: [3; 32], fee: 3, block_id: [9; 32] });

        assert_eq!(pool.remove(&[1; 32]).map(|i| i.fee), Some(1));
        assert!(pool.remove(&[1; 32]).is_none());

        let valid: HashSet<Hash> = [[1u8; 32]].into_iter().collect();
        assert_eq!(pool.prune(&valid), 2);
        assert!(pool.is_empty());
        assert!(pool.peek_max().is_none());
    }

    #[test]
    fn test_top() {
        let mut pool = Mempool::new(10);
        for n in 1..=5u8 {
            pool.add(item(n, n as u64 * 10));
        }
        let fees: Vec<u64> = pool.top(3).iter().map(|i| i.fee).collect();
        assert_eq!(fees, vec![50, 40, 30]);
        assert_eq!(pool.len(), 5);
    }

    #[test]
    fn test_views_stay_consistent_under_random_ops() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut pool = Mempool::new(16);
        for _ in 0..2_000 {
            match rng.gen_range(0..4) {
                0 | 1 => {
                    let id: Hash = rng.gen();
                    let block_id = [rng.gen_range(0..4u8); 32];
                    pool.add(Item { id, fee: rng.gen_range(0..50), block_id });
                }
                2 => {
                    if let Some((top, _)) = pool.peek_max() {
                        let id = top.id;
                        pool.remove(&id);
                    }
                }
                _ => {
                    let valid: HashSet<Hash> = (0..3u8).map(|b| [b; 32]).collect();
                    pool.prune(&valid);
                }
            }

            assert!(pool.len() <= pool.max_size());
            assert_eq!(pool.len(), pool.by_fee.len());
            assert!(pool.by_fee.iter().all(|(_, id)| pool.get(id).is_some()));
            if let (Some((_, max)), Some((_, min))) = (pool.peek_max(), pool.peek_min()) {
                assert!(max >= min);
            }
        }
    }
}
