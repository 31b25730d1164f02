use flexi_logger::{Duplicate, FileSpec, Logger, LoggerHandle};
use log::{info, warn};
use std::sync::{
    Arc, Once, OnceLock,
    atomic::{AtomicBool, Ordering},
};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::{
    config::NodeConfig,
    core::{
        block::Block,
        blockchain::{AppendOutcome, Blockchain, BlockchainError},
        transaction::Transaction,
    },
    node::network::{NetworkError, SharedNetwork},
};

pub type SharedBlockchain = Arc<Blockchain>;

static LOGGER_INIT: Once = Once::new();
static LOGGER_HANDLE: OnceLock<LoggerHandle> = OnceLock::new();

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Blockchain error: {0}")]
    Blockchain(#[from] BlockchainError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("No known peers to relay to")]
    NoPeers,

    #[error("Worker failed: {0}")]
    Worker(String),
}

/// Start file logging under the configured data directory, duplicated to stderr.
/// Only the first call in a process has any effect.
pub fn init_logger(config: &NodeConfig) {
    LOGGER_INIT.call_once(|| {
        let log_path = config.log_path();
        if let Err(e) = std::fs::create_dir_all(&log_path) {
            eprintln!("Failed to create log directory {}: {e}", log_path.display());
            return;
        }

        let started = Logger::try_with_str(&config.log_level).and_then(|logger| {
            logger
                .log_to_file(FileSpec::default().directory(&log_path))
                .duplicate_to_stderr(Duplicate::Info)
                .start()
        });
        match started {
            Ok(handle) => {
                let _ = LOGGER_HANDLE.set(handle);
                info!("Logger initialized for node {} at {:?}", config.node_id, log_path);
            }
            Err(e) => eprintln!("Failed to start logger: {e}"),
        }
    });
}

struct MiningJob {
    height: u64,
    cancel: Arc<AtomicBool>,
}

pub struct Node {
    pub config: NodeConfig,
    pub blockchain: SharedBlockchain,
    network: SharedNetwork,
    mining: RwLock<Option<MiningJob>>,
}

impl Node {
    /// Open the ledger named by `config`. The ledger must already exist.
    pub fn new(config: NodeConfig, network: SharedNetwork) -> Result<Node, NodeError> {
        init_logger(&config);
        let blockchain = Blockchain::open(&config.ledger_path())?;
        Ok(Self::with_blockchain(config, Arc::new(blockchain), network))
    }

    pub fn with_blockchain(
        config: NodeConfig,
        blockchain: SharedBlockchain,
        network: SharedNetwork,
    ) -> Node {
        Node {
            config,
            blockchain,
            network,
            mining: RwLock::new(None),
        }
    }

    pub async fn is_mining(&self) -> bool {
        self.mining.read().await.is_some()
    }

    /// Mine `transactions` behind a coinbase paying `miner_address`, then announce the block
    pub async fn mine(
        &self,
        transactions: Vec<Transaction>,
        miner_address: &str,
    ) -> Result<Block, NodeError> {
        let coinbase =
            Transaction::new_coinbase(miner_address, &[]).map_err(BlockchainError::from)?;
        let mut candidates = Vec::with_capacity(transactions.len() + 1);
        candidates.push(coinbase);
        candidates.extend(transactions);

        let height = self.blockchain.get_best_height()? + 1;
        let cancel = Arc::new(AtomicBool::new(false));
        *self.mining.write().await = Some(MiningJob {
            height,
            cancel: cancel.clone(),
        });
        info!("Mining {} transactions at height {height}", candidates.len());

        let blockchain = self.blockchain.clone();
        let threads = self.config.mining_threads;
        let worker_cancel = cancel.clone();
        let mined = tokio::task::spawn_blocking(move || {
            blockchain.mine_block_with(candidates, threads, &worker_cancel)
        })
        .await;

        {
            let mut job = self.mining.write().await;
            if job.as_ref().is_some_and(|j| Arc::ptr_eq(&j.cancel, &cancel)) {
                *job = None;
            }
        }

        let block = mined.map_err(|e| NodeError::Worker(e.to_string()))??;
        if let Err(e) = self.network.broadcast_block(&block).await {
            warn!("Failed to broadcast block {}: {e}", block.hash);
        }
        Ok(block)
    }

    /// Stop the current mining job, if any. Returns true if one was running.
    pub async fn cancel_mining(&self) -> bool {
        match self.mining.read().await.as_ref() {
            Some(job) => {
                job.cancel.store(true, Ordering::Relaxed);
                info!("Mining at height {} cancelled", job.height);
                true
            }
            None => false,
        }
    }

    /// Take a block from the network. Mining that the block makes obsolete is cancelled first.
    pub async fn accept_block(&self, block: Block) -> Result<AppendOutcome, NodeError> {
        if let Some(job) = self.mining.read().await.as_ref()
            && block.height >= job.height
        {
            info!(
                "Block {} at height {} arrived, cancelling mining at height {}",
                block.hash, block.height, job.height
            );
            job.cancel.store(true, Ordering::Relaxed);
        }

        let blockchain = self.blockchain.clone();
        let outcome = tokio::task::spawn_blocking(move || blockchain.accept_block(&block))
            .await
            .map_err(|e| NodeError::Worker(e.to_string()))??;
        Ok(outcome)
    }

    /// Verify a transaction and relay it to the first known peer
    pub async fn submit_transaction(&self, transaction: &Transaction) -> Result<String, NodeError> {
        self.blockchain.verify_transaction(transaction)?;

        let peers = self.network.known_peers().await;
        let peer = peers.first().ok_or(NodeError::NoPeers)?;
        self.network.send_transaction(peer, transaction).await?;

        info!("Transaction {} sent to {peer}", transaction.id);
        Ok(peer.clone())
    }
}
