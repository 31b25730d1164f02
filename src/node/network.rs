use std::sync::Arc;

use thiserror::Error;

use crate::core::{block::Block, transaction::Transaction};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NetworkError {
    #[error("Peer {0} is unreachable")]
    Unreachable(String),

    #[error("Peer rejected message: {0}")]
    Rejected(String),
}

/// Whatever carries blocks and transactions between nodes. The ledger knows nothing about peers.
#[async_trait::async_trait]
pub trait Network: Send + Sync {
    /// Hand a transaction to one peer for mining
    async fn send_transaction(&self, peer: &str, transaction: &Transaction) -> Result<(), NetworkError>;

    /// Announce a freshly mined block to every peer
    async fn broadcast_block(&self, block: &Block) -> Result<(), NetworkError>;

    async fn known_peers(&self) -> Vec<String>;
}

pub type SharedNetwork = Arc<dyn Network>;

/// A network with no peers. Broadcasts go nowhere and transactions cannot be relayed.
pub struct Offline;

impl Offline {
    pub fn shared() -> SharedNetwork {
        Arc::new(Offline)
    }
}

#[async_trait::async_trait]
impl Network for Offline {
    async fn send_transaction(&self, peer: &str, _transaction: &Transaction) -> Result<(), NetworkError> {
        Err(NetworkError::Unreachable(peer.to_string()))
    }

    async fn broadcast_block(&self, _block: &Block) -> Result<(), NetworkError> {
        Ok(())
    }

    async fn known_peers(&self) -> Vec<String> {
        vec![]
    }
}
