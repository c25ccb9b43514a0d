//! Background work around a [`Vm`].
//!
//! The runtime owns four periodic loops (build, regossip, prune, compact)
//! and optionally a dev finalizer that stands in for consensus. Every task
//! watches one shutdown channel.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::chain::{ChainError, Vm};
use crate::consensus::ChainBlock;
use crate::gossip::{self, Gossiper};
use crate::transaction::Transaction;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),
    #[error("Task failed: {0}")]
    Join(#[from] JoinError),
}

pub struct Runtime {
    vm: Vm,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Runtime {
    /// Spawn the periodic loops. Must be called inside a Tokio runtime.
    pub fn start(vm: Vm, gossiper: Arc<dyn Gossiper>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let config = vm.config().clone();
        let mut tasks = Vec::new();

        let (build_vm, build_gossiper) = (vm.clone(), Arc::clone(&gossiper));
        let build_timeout = config.build_timeout();
        tasks.push((
            "build",
            spawn_loop("build", config.build_interval(), shutdown_tx.subscribe(), move || {
                let vm = build_vm.clone();
                let gossiper = Arc::clone(&build_gossiper);
                async move { build_tick(&vm, gossiper.as_ref(), build_timeout).await }
            }),
        ));

        let (regossip_vm, regossip_gossiper) = (vm.clone(), gossiper);
        tasks.push((
            "regossip",
            spawn_loop("regossip", config.regossip_interval(), shutdown_tx.subscribe(), move || {
                let vm = regossip_vm.clone();
                let gossiper = Arc::clone(&regossip_gossiper);
                async move {
                    match vm.regossip_candidates(vm.config().regossip_max_txs) {
                        Ok(txs) => send_batches(&vm, gossiper.as_ref(), txs).await,
                        Err(e) => warn!(error = %e, "failed to collect regossip candidates"),
                    }
                }
            }),
        ));

        let prune_vm = vm.clone();
        tasks.push((
            "prune",
            spawn_loop("prune", config.prune_interval(), shutdown_tx.subscribe(), move || {
                let vm = prune_vm.clone();
                async move {
                    if let Err(e) = vm.prune_mempool() {
                        warn!(error = %e, "mempool prune failed");
                    }
                }
            }),
        ));

        let compact_vm = vm.clone();
        tasks.push((
            "compact",
            spawn_loop("compact", config.compact_interval(), shutdown_tx.subscribe(), move || {
                let vm = compact_vm.clone();
                async move {
                    if let Err(e) = vm.flush() {
                        warn!(error = %e, "storage flush failed");
                    }
                }
            }),
        ));

        info!(loops = tasks.len(), "runtime started");
        Runtime { vm, shutdown_tx, tasks }
    }

    pub fn vm(&self) -> &Vm {
        &self.vm
    }

    /// Finalize every block this node can build, driven by pending-tx
    /// signals from a [`ChannelConsensus`](crate::consensus::ChannelConsensus).
    pub fn spawn_dev_finalizer(&mut self, pending: mpsc::Receiver<()>) {
        let finalizer = DevFinalizer::new(self.vm.clone(), pending);
        let handle = tokio::spawn(finalizer.run(self.shutdown_tx.subscribe()));
        self.tasks.push(("dev-finalizer", handle));
        info!("dev finalizer started");
    }

    /// Stop every task, wait for them to exit, then flush storage.
    pub async fn shutdown(self) -> Result<(), RuntimeError> {
        info!("initiating graceful shutdown");
        if self.shutdown_tx.send(true).is_err() {
            debug!("no task was listening for shutdown");
        }
        for (name, handle) in self.tasks {
            handle.await?;
            debug!(task = name, "task stopped");
        }
        self.vm.flush()?;
        info!("shutdown complete");
        Ok(())
    }
}

fn spawn_loop<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => tick().await,
            }
        }
        debug!(task = name, "loop exited");
    })
}

/// Ask consensus for a block when work is pending, give it `wait` to
/// build one, then gossip whatever arrived since the last tick.
async fn build_tick(vm: &Vm, gossiper: &dyn Gossiper, wait: Duration) {
    match vm.mempool_len() {
        Ok(0) => {}
        Ok(pending) => {
            let built = vm.block_built();
            vm.signal_pending();
            if time::timeout(wait, built).await.is_err() {
                debug!(pending, "no block built before timeout");
            }
        }
        Err(e) => warn!(error = %e, "failed to read mempool"),
    }
    match vm.take_new_txs() {
        Ok(txs) => send_batches(vm, gossiper, txs).await,
        Err(e) => warn!(error = %e, "failed to collect new transactions"),
    }
}

async fn send_batches(vm: &Vm, gossiper: &dyn Gossiper, txs: Vec<Transaction>) {
    for batch in txs.chunks(vm.config().regossip_max_txs.max(1)) {
        let payload = match gossip::encode_txs(vm.codec(), batch) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, txs = batch.len(), "failed to encode gossip batch");
                continue;
            }
        };
        match gossiper.gossip(payload).await {
            Ok(()) => debug!(txs = batch.len(), "gossiped transactions"),
            Err(e) => warn!(error = %e, "gossip failed"),
        }
    }
}

/// Single-node stand-in for consensus: builds and accepts blocks as soon as
/// the engine reports pending transactions.
pub struct DevFinalizer {
    vm: Vm,
    pending: mpsc::Receiver<()>,
}

impl DevFinalizer {
    pub fn new(vm: Vm, pending: mpsc::Receiver<()>) -> Self {
        DevFinalizer { vm, pending }
    }

    /// Build and accept blocks until nothing more can be built right now.
    /// Returns how many blocks were finalized.
    pub fn finalize_pending(&self) -> Result<usize, ChainError> {
        let mut finalized = 0;
        loop {
            let block = match self.vm.build_block() {
                Ok(block) => block,
                Err(ChainError::NothingToBuild)
                | Err(ChainError::InsufficientSurplus { .. })
                | Err(ChainError::TimestampTooLate { .. }) => return Ok(finalized),
                Err(e) => return Err(e),
            };
            block.accept()?;
            self.vm.set_preference(&block.id())?;
            finalized += 1;
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                signal = self.pending.recv() => {
                    if signal.is_none() {
                        break;
                    }
                    match self.finalize_pending() {
                        Ok(0) => {}
                        Ok(blocks) => debug!(blocks, "dev finalizer accepted blocks"),
                        Err(e) => warn!(error = %e, "dev finalizer failed"),
                    }
                }
            }
        }
        debug!("dev finalizer exited");
    }
}
