use std::{
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use num_bigint::BigUint;
use sha2::{Digest, Sha256};

use crate::{
    core::{block::Block, transaction::Transaction, utils},
    crypto::Hash,
};

/// Fixed network difficulty: a valid block hash is below 2^(256 - DIFFICULTY)
pub const DIFFICULTY: u32 = 12;

/// Nonces are searched in [0, MAX_NONCE)
pub const MAX_NONCE: u64 = i64::MAX as u64;

/// Flat, order-sensitive digest of the transaction ids of a block
pub fn hash_transactions(transactions: &[Transaction]) -> Hash {
    let mut hasher = Sha256::new();
    for tx in transactions {
        hasher.update(tx.id.as_ref());
    }
    Hash::new_from_buf(hasher.finalize().into())
}

/// Nonce search and validation over a block's previous hash and transactions
pub struct ProofOfWork {
    prefix: Vec<u8>,
    target: BigUint,
}

impl ProofOfWork {
    pub fn new(prev_hash: Option<&Hash>, transactions: &[Transaction]) -> Self {
        let mut prefix = Vec::with_capacity(64);
        if let Some(prev_hash) = prev_hash {
            prefix.extend_from_slice(prev_hash.as_ref());
        }
        prefix.extend_from_slice(hash_transactions(transactions).as_ref());

        ProofOfWork {
            prefix,
            target: utils::target_from_difficulty(DIFFICULTY),
        }
    }

    pub fn for_block(block: &Block) -> Self {
        Self::new(block.prev_hash.as_ref(), &block.transactions)
    }

    /// prev_hash || tx_digest || BE64(nonce) || BE64(difficulty)
    pub fn digest_input(&self, nonce: u64) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.prefix.len() + 16);
        data.extend_from_slice(&self.prefix);
        data.extend_from_slice(&nonce.to_be_bytes());
        data.extend_from_slice(&(DIFFICULTY as u64).to_be_bytes());
        data
    }

    pub fn hash_with_nonce(&self, nonce: u64) -> Hash {
        Hash::new(&self.digest_input(nonce))
    }

    pub fn meets_target(&self, hash: &Hash) -> bool {
        utils::hash_to_bui(hash) < self.target
    }

    /// Sequential search, returns the first nonce whose hash is below the target
    pub fn run(&self) -> Option<(u64, Hash)> {
        self.run_cancellable(&AtomicBool::new(false))
    }

    /// Sequential search that gives up (returns None) once `cancel` is set
    pub fn run_cancellable(&self, cancel: &AtomicBool) -> Option<(u64, Hash)> {
        let mut nonce = 0u64;
        while nonce < MAX_NONCE {
            if cancel.load(Ordering::Relaxed) {
                return None;
            }
            let hash = self.hash_with_nonce(nonce);
            if self.meets_target(&hash) {
                return Some((nonce, hash));
            }
            nonce += 1;
        }
        None
    }

    /// Search with `threads` workers, worker k trying nonces k, k + threads, k + 2 * threads...
    /// Any valid nonce may be returned.
    pub fn run_parallel(&self, threads: usize, cancel: &AtomicBool) -> Option<(u64, Hash)> {
        let threads = threads.max(1);
        if threads == 1 {
            return self.run_cancellable(cancel);
        }
        let stride = threads as u64;
        let found = AtomicBool::new(false);
        let result: Mutex<Option<(u64, Hash)>> = Mutex::new(None);

        thread::scope(|scope| {
            for offset in 0..stride {
                let found = &found;
                let result = &result;
                scope.spawn(move || {
                    let mut nonce = offset;
                    while nonce < MAX_NONCE {
                        if cancel.load(Ordering::Relaxed) || found.load(Ordering::Relaxed) {
                            return;
                        }
                        let hash = self.hash_with_nonce(nonce);
                        if self.meets_target(&hash) {
                            found.store(true, Ordering::Relaxed);
                            let mut best = result.lock().unwrap_or_else(PoisonError::into_inner);
                            match *best {
                                Some((existing, _)) if existing <= nonce => {}
                                _ => *best = Some((nonce, hash)),
                            }
                            return;
                        }
                        nonce += stride;
                    }
                });
            }
        });

        result.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    /// Recompute the hash from the stored nonce; it must equal the stored hash and be below the target
    pub fn validate(block: &Block) -> bool {
        let pow = Self::for_block(block);
        let hash = pow.hash_with_nonce(block.nonce);
        hash == block.hash && pow.meets_target(&hash)
    }
}
