use std::{io::ErrorKind, path::Path, thread, time::Duration};

use log::{error, info, warn};

use crate::core::blockchain::BlockchainError;

/// Blocks by hash
pub const BLOCKS_TREE: &str = "blocks";

/// Ledger metadata, currently only the head pointer
pub const META_TREE: &str = "meta";

/// Unspent outputs by transaction id
pub const UTXO_TREE: &str = "utxo";

/// Key of the head pointer in the meta tree
pub const HEAD_KEY: &[u8] = b"lh";

/// How long to wait before the single retry of a locked store
pub const LOCK_RETRY_DELAY: Duration = Duration::from_millis(250);

fn is_lock_error(err: &sled::Error) -> bool {
    match err {
        sled::Error::Io(io) => {
            io.kind() == ErrorKind::WouldBlock || io.to_string().to_lowercase().contains("lock")
        }
        _ => false,
    }
}

/// Open (or create) the store at `path`. If its lock is held, wait once and retry before giving up.
pub fn open_db(path: &Path) -> Result<sled::Db, BlockchainError> {
    match sled::open(path) {
        Ok(db) => Ok(db),
        Err(e) if is_lock_error(&e) => {
            warn!("Store at {} is locked ({e}), retrying once", path.display());
            thread::sleep(LOCK_RETRY_DELAY);
            match sled::open(path) {
                Ok(db) => {
                    info!("Store at {} unlocked", path.display());
                    Ok(db)
                }
                Err(e) => {
                    error!("Could not unlock store at {}: {e}", path.display());
                    Err(BlockchainError::StoreUnavailable(e.to_string()))
                }
            }
        }
        Err(e) => Err(BlockchainError::StoreUnavailable(e.to_string())),
    }
}

pub struct Trees {
    pub blocks: sled::Tree,
    pub meta: sled::Tree,
    pub utxo: sled::Tree,
}

pub fn open_trees(db: &sled::Db) -> Result<Trees, BlockchainError> {
    Ok(Trees {
        blocks: db.open_tree(BLOCKS_TREE)?,
        meta: db.open_tree(META_TREE)?,
        utxo: db.open_tree(UTXO_TREE)?,
    })
}
