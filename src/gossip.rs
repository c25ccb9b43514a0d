//! Transaction gossip.
//!
//! The engine does not own a network. It hands encoded transaction batches
//! to a [`Gossiper`] and accepts batches from peers through
//! [`Vm::app_gossip`](crate::chain::Vm::app_gossip).

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::codec::{Codec, CodecError};
use crate::transaction::Transaction;

#[derive(Debug, Error)]
pub enum GossipError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Outbound side of the peer network.
#[async_trait]
pub trait Gossiper: Send + Sync {
    /// Send one encoded batch to peers.
    async fn gossip(&self, payload: Vec<u8>) -> Result<(), GossipError>;
}

/// Gossiper for nodes that run without peers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopGossiper;

#[async_trait]
impl Gossiper for NoopGossiper {
    async fn gossip(&self, _payload: Vec<u8>) -> Result<(), GossipError> {
        Ok(())
    }
}

/// Hands payloads to an in-process receiver, e.g. a transport task or
/// another engine.
#[derive(Debug, Clone)]
pub struct ChannelGossiper {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl ChannelGossiper {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelGossiper { tx }, rx)
    }
}

#[async_trait]
impl Gossiper for ChannelGossiper {
    async fn gossip(&self, payload: Vec<u8>) -> Result<(), GossipError> {
        self.tx
            .send(payload)
            .map_err(|_| GossipError::Transport("gossip receiver closed".to_string()))
    }
}

pub fn encode_txs(codec: &Codec, txs: &[Transaction]) -> Result<Vec<u8>, CodecError> {
    codec.encode(txs)
}

pub fn decode_txs(codec: &Codec, payload: &[u8]) -> Result<Vec<Transaction>, CodecError> {
    codec.decode(payload)
}
