use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use spacevm::chain::Vm;
use spacevm::config::VmConfig;
use spacevm::consensus::ChannelConsensus;
use spacevm::genesis::Genesis;
use spacevm::gossip::NoopGossiper;
use spacevm::runtime::Runtime;
use spacevm::storage::SledStorage;
use spacevm::types::SystemClock;

#[derive(Debug, Parser)]
#[command(name = "spacevm", about = "Key-value namespace chain node")]
struct Args {
    /// Directory for the sled database
    #[arg(long, default_value = "spacevm_data")]
    data_dir: PathBuf,

    /// Genesis document (JSON). Defaults are used when omitted.
    #[arg(long)]
    genesis: Option<PathBuf>,

    /// Node config (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Build and accept blocks locally without an external consensus engine
    #[arg(long)]
    dev: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();

    let genesis = match &args.genesis {
        Some(path) => Genesis::load(path)?,
        None => Genesis::default(),
    };
    let config = match &args.config {
        Some(path) => VmConfig::load(path)?,
        None => VmConfig::default(),
    };

    let storage = Arc::new(SledStorage::new(&args.data_dir)?);
    let (consensus, pending) = ChannelConsensus::new();
    let vm = Vm::new(genesis, config, storage, Arc::new(SystemClock), Arc::new(consensus))?;
    let tip = vm.last_accepted()?;
    info!(
        data_dir = %args.data_dir.display(),
        height = tip.height(),
        block_id = %tip.hex_id(),
        "node opened"
    );

    let mut runtime = Runtime::start(vm, Arc::new(NoopGossiper));
    if args.dev {
        runtime.spawn_dev_finalizer(pending);
    } else {
        // Signals go unanswered until an external engine is attached.
        drop(pending);
    }

    info!("node is running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    runtime.shutdown().await?;
    Ok(())
}
