//! Boundary with the external consensus protocol.
//!
//! Consensus drives the engine through [`ChainBlock`] handles and learns
//! about engine-side events through a [`ConsensusEngine`]. The engine never
//! decides finality itself.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::block::BlockStatus;
use crate::chain::ChainError;
use crate::types::{format_hex, Hash};

/// A block as seen by the consensus protocol.
pub trait ChainBlock {
    fn id(&self) -> Hash;
    fn parent_id(&self) -> Hash;
    fn height(&self) -> u64;
    fn timestamp(&self) -> u64;
    fn bytes(&self) -> &[u8];
    fn status(&self) -> Result<BlockStatus, ChainError>;
    fn verify(&self) -> Result<(), ChainError>;
    fn accept(&self) -> Result<(), ChainError>;
    fn reject(&self) -> Result<(), ChainError>;
}

/// Notifications the engine sends to the consensus protocol.
pub trait ConsensusEngine: Send + Sync {
    /// The mempool holds work; consensus should ask for a block soon.
    /// Repeated calls before the request is served may be coalesced.
    fn pending_txs(&self);

    fn accepted(&self, _block_id: &Hash, _height: u64) {}

    fn rejected(&self, _block_id: &Hash) {}
}

/// Forwards the pending-tx signal over a channel with room for one message,
/// so any number of signals raised before the receiver wakes collapse into one.
#[derive(Debug, Clone)]
pub struct ChannelConsensus {
    pending: mpsc::Sender<()>,
}

impl ChannelConsensus {
    pub fn new() -> (Self, mpsc::Receiver<()>) {
        let (pending, rx) = mpsc::channel(1);
        (ChannelConsensus { pending }, rx)
    }
}

impl ConsensusEngine for ChannelConsensus {
    fn pending_txs(&self) {
        match self.pending.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Closed(())) => tracing::trace!("pending-tx receiver closed"),
        }
    }

    fn accepted(&self, block_id: &Hash, height: u64) {
        tracing::debug!(block_id = %format_hex(block_id), height, "consensus notified of accept");
    }

    fn rejected(&self, block_id: &Hash) {
        tracing::debug!(block_id = %format_hex(block_id), "consensus notified of reject");
    }
}

/// Ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopConsensus;

impl ConsensusEngine for NoopConsensus {
    fn pending_txs(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pending_signal_coalesces() {
        let (consensus, mut rx) = ChannelConsensus::new();
        for _ in 0..5 {
            consensus.pending_txs();
        }
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());

        consensus.pending_txs();
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_closed_receiver_is_ignored() {
        let (consensus, rx) = ChannelConsensus::new();
        drop(rx);
        consensus.pending_txs();
        NoopConsensus.pending_txs();
    }
}
