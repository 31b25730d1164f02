use std::sync::atomic::{AtomicBool, Ordering};

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::{
    core::{
        blockchain::BlockchainError,
        pow::{self, ProofOfWork},
        transaction::Transaction,
        utils,
    },
    crypto::Hash,
};

/// A mined block. Only the genesis block has no previous hash and height 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct Block {
    pub hash: Hash,
    pub prev_hash: Option<Hash>,
    pub transactions: Vec<Transaction>,
    pub nonce: u64,
    pub height: u64,
}

impl Block {
    /// Run proof of work over `transactions` and return the finished block.
    /// `threads > 1` splits the nonce space between worker threads.
    pub fn mine(
        transactions: Vec<Transaction>,
        prev_hash: Option<Hash>,
        height: u64,
        threads: usize,
        cancel: &AtomicBool,
    ) -> Result<Block, BlockchainError> {
        let pow = ProofOfWork::new(prev_hash.as_ref(), &transactions);
        let (nonce, hash) = match pow.run_parallel(threads, cancel) {
            Some(found) => found,
            None if cancel.load(Ordering::Relaxed) => return Err(BlockchainError::MiningCancelled),
            None => {
                return Err(BlockchainError::InvalidBlock(
                    "nonce space exhausted".to_string(),
                ));
            }
        };

        Ok(Block {
            hash,
            prev_hash,
            transactions,
            nonce,
            height,
        })
    }

    pub fn genesis(coinbase: Transaction) -> Result<Block, BlockchainError> {
        Self::mine(vec![coinbase], None, 0, 1, &AtomicBool::new(false))
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_hash.is_none()
    }

    pub fn hash_transactions(&self) -> Hash {
        pow::hash_transactions(&self.transactions)
    }

    pub fn validate_block_hash(&self) -> Result<(), BlockchainError> {
        if ProofOfWork::validate(self) {
            Ok(())
        } else {
            Err(BlockchainError::InvalidProof(self.hash))
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, BlockchainError> {
        Ok(utils::encode(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Block, BlockchainError> {
        Ok(utils::decode(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::Private;

    fn mined_child() -> Block {
        let address = Private::new_random().unwrap().to_public().to_address();
        let genesis = Block::genesis(Transaction::new_coinbase(&address, b"genesis").unwrap()).unwrap();
        let txs = vec![
            Transaction::new_coinbase(&address, b"one").unwrap(),
            Transaction::new_coinbase(&address, b"two").unwrap(),
        ];
        Block::mine(txs, Some(genesis.hash), 1, 1, &AtomicBool::new(false)).unwrap()
    }

    #[test]
    fn test_genesis_shape() {
        let address = Private::new_random().unwrap().to_public().to_address();
        let genesis = Block::genesis(Transaction::new_coinbase(&address, b"g").unwrap()).unwrap();

        assert!(genesis.is_genesis());
        assert_eq!(genesis.height, 0);
        assert!(genesis.validate_block_hash().is_ok());
    }

    #[test]
    fn test_mined_block_validates() {
        assert!(mined_child().validate_block_hash().is_ok());
    }

    #[test]
    fn test_flipped_prev_hash_fails_validation() {
        let mut block = mined_child();
        let mut prev = block.prev_hash.unwrap().dump_buf();
        prev[0] ^= 0xFF;
        block.prev_hash = Some(Hash::new_from_buf(prev));

        assert!(matches!(
            block.validate_block_hash(),
            Err(BlockchainError::InvalidProof(_))
        ));
    }

    #[test]
    fn test_flipped_transaction_bytes_fail_validation() {
        for tx_index in 0..2 {
            for byte in [0usize, 17, 31] {
                let mut block = mined_child();
                let mut id = block.transactions[tx_index].id.dump_buf();
                id[byte] ^= 0x01;
                block.transactions[tx_index].id = Hash::new_from_buf(id);
                assert!(!ProofOfWork::validate(&block));
            }
        }
    }

    #[test]
    fn test_reordered_transactions_fail_validation() {
        let mut block = mined_child();
        block.transactions.swap(0, 1);
        assert!(!ProofOfWork::validate(&block));
    }

    #[test]
    fn test_wrong_nonce_fails_validation() {
        let mut block = mined_child();
        block.nonce += 1;
        assert!(!ProofOfWork::validate(&block));
    }

    #[test]
    fn test_encode_decode() {
        let block = mined_child();
        let decoded = Block::decode(&block.encode().unwrap()).unwrap();
        assert_eq!(decoded, block);
        assert!(matches!(
            Block::decode(&[0xFF, 0x00]),
            Err(BlockchainError::Decode(_))
        ));
    }
}
