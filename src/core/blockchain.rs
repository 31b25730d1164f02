use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError, atomic::AtomicBool},
};

use bincode::error::{DecodeError, EncodeError};
use log::{debug, info, warn};
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult,
    TransactionError as SledTransactionError, Transactional,
};
use thiserror::Error;

use crate::{
    core::{
        block::Block,
        economics::GENESIS_MEMO,
        store::{self, HEAD_KEY, Trees},
        transaction::{Transaction, TransactionError, TransactionId, TxInput},
        utxo::{self, TxOutputs, UTXOError, UTXOs},
    },
    crypto::{Hash, keys::Private},
};

#[derive(Error, Debug)]
pub enum BlockchainError {
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("A ledger already exists at {0}")]
    AlreadyExists(PathBuf),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid proof of work for block {0}")]
    InvalidProof(Hash),

    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("Mining cancelled")]
    MiningCancelled,

    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("UTXO error: {0}")]
    UTXOs(#[from] UTXOError),

    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("Encoding error: {0}")]
    Encode(#[from] EncodeError),

    #[error("Decoding error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Corrupt store: {0}")]
    Corrupt(String),
}

impl From<SledTransactionError<BlockchainError>> for BlockchainError {
    fn from(err: SledTransactionError<BlockchainError>) -> Self {
        match err {
            SledTransactionError::Abort(e) => e,
            SledTransactionError::Storage(e) => BlockchainError::Storage(e),
        }
    }
}

/// What `add_block` did with a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The block was already stored, nothing changed
    Duplicate,
    /// Stored, but not higher than the current head
    Stored,
    /// Stored and adopted as the new head
    NewHead { previous: Hash },
}

/// Backward cursor over the chain, one store lookup per step.
/// The genesis block is the last block it yields; stepping past it fails with `NotFound`.
pub struct BlockIterator {
    blocks: sled::Tree,
    current: Option<Hash>,
}

impl BlockIterator {
    pub fn new(blocks: sled::Tree, start: Hash) -> Self {
        BlockIterator {
            blocks,
            current: Some(start),
        }
    }

    pub fn current_hash(&self) -> Option<Hash> {
        self.current
    }

    pub fn next_block(&mut self) -> Result<Block, BlockchainError> {
        let hash = self
            .current
            .ok_or_else(|| BlockchainError::NotFound("block before genesis".to_string()))?;
        let bytes = self
            .blocks
            .get(hash.as_ref())?
            .ok_or_else(|| BlockchainError::NotFound(format!("block {hash}")))?;
        let block = Block::decode(&bytes)?;
        self.current = block.prev_hash;
        Ok(block)
    }
}

impl Iterator for BlockIterator {
    type Item = Result<Block, BlockchainError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.current?;
        let result = self.next_block();
        if result.is_err() {
            self.current = None;
        }
        Some(result)
    }
}

/// The block ledger: blocks by hash, a persisted head pointer, and the derived UTXO index
pub struct Blockchain {
    path: PathBuf,
    db: sled::Db,
    blocks: sled::Tree,
    meta: sled::Tree,
    utxos: UTXOs,
    writer: Mutex<()>,
}

impl Blockchain {
    fn from_parts(path: &Path, db: sled::Db, trees: Trees) -> Self {
        Blockchain {
            path: path.to_path_buf(),
            db,
            blocks: trees.blocks,
            meta: trees.meta,
            utxos: UTXOs::new(trees.utxo),
            writer: Mutex::new(()),
        }
    }

    /// Create a new ledger at `path` whose genesis coinbase pays `reward_address`.
    /// Fails if a ledger already exists there.
    pub fn init(path: &Path, reward_address: &str) -> Result<Self, BlockchainError> {
        let coinbase = Transaction::new_coinbase(reward_address, GENESIS_MEMO.as_bytes())?;

        let db = store::open_db(path)?;
        let trees = store::open_trees(&db)?;
        if trees.meta.contains_key(HEAD_KEY)? {
            return Err(BlockchainError::AlreadyExists(path.to_path_buf()));
        }

        let genesis = Block::genesis(coinbase)?;
        let encoded = genesis.encode()?;
        (&trees.blocks, &trees.meta).transaction(
            |(blocks, meta)| -> ConflictableTransactionResult<(), BlockchainError> {
                if meta.get(HEAD_KEY)?.is_some() {
                    return Err(ConflictableTransactionError::Abort(
                        BlockchainError::AlreadyExists(path.to_path_buf()),
                    ));
                }
                blocks.insert(genesis.hash.as_ref(), encoded.as_slice())?;
                meta.insert(HEAD_KEY, genesis.hash.as_ref())?;
                Ok(())
            },
        )?;
        info!("Genesis created: {}", genesis.hash);

        let chain = Self::from_parts(path, db, trees);
        chain.reindex_utxos()?;
        Ok(chain)
    }

    /// Open an existing ledger
    pub fn open(path: &Path) -> Result<Self, BlockchainError> {
        if !path.exists() {
            return Err(BlockchainError::NotFound(format!(
                "no ledger at {}",
                path.display()
            )));
        }
        let db = store::open_db(path)?;
        let trees = store::open_trees(&db)?;
        let chain = Self::from_parts(path, db, trees);

        let head = chain.head_hash()?;
        info!("Opened ledger at {}, head {head}", path.display());
        Ok(chain)
    }

    /// Flush and release the store
    pub fn close(self) -> Result<(), BlockchainError> {
        self.db.flush()?;
        info!("Closed ledger at {}", self.path.display());
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get_utxos(&self) -> &UTXOs {
        &self.utxos
    }

    fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hash of the adopted tip, read from the store
    pub fn head_hash(&self) -> Result<Hash, BlockchainError> {
        let bytes = self
            .meta
            .get(HEAD_KEY)?
            .ok_or_else(|| BlockchainError::NotFound("head pointer".to_string()))?;
        Hash::new_from_slice(&bytes)
            .ok_or_else(|| BlockchainError::Corrupt("head pointer is not a hash".to_string()))
    }

    pub fn get_block(&self, hash: &Hash) -> Result<Block, BlockchainError> {
        let bytes = self
            .blocks
            .get(hash.as_ref())?
            .ok_or_else(|| BlockchainError::NotFound(format!("block {hash}")))?;
        Block::decode(&bytes)
    }

    pub fn get_best_height(&self) -> Result<u64, BlockchainError> {
        Ok(self.get_block(&self.head_hash()?)?.height)
    }

    /// Iterate from the head back to genesis
    pub fn iter(&self) -> Result<BlockIterator, BlockchainError> {
        Ok(BlockIterator::new(self.blocks.clone(), self.head_hash()?))
    }

    /// Iterate from `start` back to genesis
    pub fn iter_from(&self, start: Hash) -> BlockIterator {
        BlockIterator::new(self.blocks.clone(), start)
    }

    /// Hashes from head to genesis
    pub fn get_block_hashes(&self) -> Result<Vec<Hash>, BlockchainError> {
        self.iter()?.map(|block| block.map(|b| b.hash)).collect()
    }

    fn invalid_block(message: String) -> ConflictableTransactionError<BlockchainError> {
        ConflictableTransactionError::Abort(BlockchainError::InvalidBlock(message))
    }

    /// Store a block and move the head to it if it is strictly higher. Idempotent.
    /// The parent must already be stored and the block must sit exactly one height above it,
    /// so every stored block links back to genesis.
    pub fn add_block(&self, block: &Block) -> Result<AppendOutcome, BlockchainError> {
        let _writer = self.lock_writer();
        self.append(block)
    }

    fn append(&self, block: &Block) -> Result<AppendOutcome, BlockchainError> {
        if self.blocks.contains_key(block.hash.as_ref())? {
            debug!("Block {} already stored", block.hash);
            return Ok(AppendOutcome::Duplicate);
        }
        block.validate_block_hash()?;
        let Some(prev_hash) = block.prev_hash else {
            return Err(BlockchainError::InvalidBlock(format!(
                "block {} has no parent, only the ledger's own genesis may",
                block.hash
            )));
        };

        let key = block.hash.as_ref();
        let encoded = block.encode()?;
        let outcome = (&self.blocks, &self.meta).transaction(
            |(blocks, meta)| -> ConflictableTransactionResult<AppendOutcome, BlockchainError> {
                if blocks.get(key)?.is_some() {
                    return Ok(AppendOutcome::Duplicate);
                }

                let parent_bytes = blocks.get(prev_hash.as_ref())?.ok_or_else(|| {
                    Self::invalid_block(format!(
                        "parent {prev_hash} of block {} is unknown",
                        block.hash
                    ))
                })?;
                let parent =
                    Block::decode(&parent_bytes).map_err(ConflictableTransactionError::Abort)?;
                if parent.height.checked_add(1) != Some(block.height) {
                    return Err(Self::invalid_block(format!(
                        "block {} has height {} but its parent has height {}",
                        block.hash, block.height, parent.height
                    )));
                }

                blocks.insert(key, encoded.as_slice())?;

                let head_hash = meta.get(HEAD_KEY)?.ok_or_else(|| {
                    ConflictableTransactionError::Abort(BlockchainError::NotFound(
                        "head pointer".to_string(),
                    ))
                })?;
                let head_bytes = blocks.get(&head_hash)?.ok_or_else(|| {
                    ConflictableTransactionError::Abort(BlockchainError::NotFound(
                        "head block".to_string(),
                    ))
                })?;
                let head = Block::decode(&head_bytes).map_err(ConflictableTransactionError::Abort)?;

                if block.height > head.height {
                    meta.insert(HEAD_KEY, key)?;
                    Ok(AppendOutcome::NewHead {
                        previous: head.hash,
                    })
                } else {
                    Ok(AppendOutcome::Stored)
                }
            },
        )?;

        match outcome {
            AppendOutcome::NewHead { .. } => {
                info!("Block {} adopted as head at height {}", block.hash, block.height)
            }
            AppendOutcome::Stored => {
                info!("Block {} stored at height {}, head unchanged", block.hash, block.height)
            }
            AppendOutcome::Duplicate => debug!("Block {} already stored", block.hash),
        }
        Ok(outcome)
    }

    /// Append a block and bring the UTXO index in line with the resulting head
    pub fn accept_block(&self, block: &Block) -> Result<AppendOutcome, BlockchainError> {
        let _writer = self.lock_writer();
        let outcome = self.append(block)?;

        match outcome {
            AppendOutcome::NewHead { previous } if block.prev_hash == Some(previous) => {
                self.utxos.update(block)?;
            }
            AppendOutcome::NewHead { previous } => {
                warn!(
                    "Head moved from {previous} to {} on another branch, rebuilding UTXO index",
                    block.hash
                );
                self.reindex_utxos()?;
            }
            AppendOutcome::Duplicate | AppendOutcome::Stored => {}
        }
        Ok(outcome)
    }

    /// Verify `transactions`, mine them on top of the head, append the block and update the index
    pub fn mine_block(&self, transactions: Vec<Transaction>) -> Result<Block, BlockchainError> {
        self.mine_block_with(transactions, 1, &AtomicBool::new(false))
    }

    /// Like `mine_block`, searching with `threads` workers until done or `cancel` is set
    pub fn mine_block_with(
        &self,
        transactions: Vec<Transaction>,
        threads: usize,
        cancel: &AtomicBool,
    ) -> Result<Block, BlockchainError> {
        let block = self.mine_candidate(transactions, threads, cancel)?;
        self.adopt_mined(&block)?;
        Ok(block)
    }

    /// Verify `transactions` and run proof of work on top of the current head. Nothing is stored.
    pub fn mine_candidate(
        &self,
        transactions: Vec<Transaction>,
        threads: usize,
        cancel: &AtomicBool,
    ) -> Result<Block, BlockchainError> {
        for tx in &transactions {
            self.verify_transaction(tx)?;
        }

        let head = self.head_hash()?;
        let height = self.get_block(&head)?.height + 1;
        Block::mine(transactions, Some(head), height, threads, cancel)
    }

    /// Accept a block mined here. Fails if the head moved off its parent while it was being mined.
    pub fn adopt_mined(&self, block: &Block) -> Result<(), BlockchainError> {
        match self.accept_block(block)? {
            AppendOutcome::NewHead { previous } if block.prev_hash == Some(previous) => {
                info!(
                    "Mined block {} at height {} with {} transactions",
                    block.hash,
                    block.height,
                    block.transactions.len()
                );
                Ok(())
            }
            outcome => Err(BlockchainError::InvalidBlock(format!(
                "stale block {}: head moved while mining ({outcome:?})",
                block.hash
            ))),
        }
    }

    /// Find a transaction by id, walking back from the head
    pub fn find_transaction(&self, id: &TransactionId) -> Result<Transaction, BlockchainError> {
        for block in self.iter()? {
            if let Some(tx) = block?.transactions.into_iter().find(|tx| tx.id == *id) {
                return Ok(tx);
            }
        }
        Err(BlockchainError::NotFound(format!("transaction {id}")))
    }

    fn referenced_transactions(
        &self,
        tx: &Transaction,
    ) -> Result<HashMap<TransactionId, Transaction>, BlockchainError> {
        let mut referenced = HashMap::new();
        for (txid, _) in tx.inputs.iter().filter_map(TxInput::referenced_output) {
            if referenced.contains_key(&txid) {
                continue;
            }
            match self.find_transaction(&txid) {
                Ok(previous) => {
                    referenced.insert(txid, previous);
                }
                Err(BlockchainError::NotFound(_)) => {
                    return Err(TransactionError::NotFound(txid).into());
                }
                Err(e) => return Err(e),
            }
        }
        Ok(referenced)
    }

    pub fn sign_transaction(
        &self,
        tx: &mut Transaction,
        private: &Private,
    ) -> Result<(), BlockchainError> {
        let referenced = self.referenced_transactions(tx)?;
        tx.sign(private, &referenced)?;
        Ok(())
    }

    /// Every spent output must still be in the UTXO index, and every signature must verify
    pub fn verify_transaction(&self, tx: &Transaction) -> Result<(), BlockchainError> {
        if tx.is_coinbase() {
            return Ok(());
        }
        for (txid, index) in tx.inputs.iter().filter_map(TxInput::referenced_output) {
            if !self.utxos.contains(&txid, index)? {
                return Err(TransactionError::InvalidTransaction(format!(
                    "output {index} of {txid} is spent or unknown"
                ))
                .into());
            }
        }
        let referenced = self.referenced_transactions(tx)?;
        tx.verify(&referenced)?;
        Ok(())
    }

    /// Build and sign a transaction sending `amount` from `sender` to `to`
    pub fn new_transaction(
        &self,
        sender: &Private,
        to: &str,
        amount: u64,
    ) -> Result<Transaction, BlockchainError> {
        let public = sender.to_public();
        let spendable = self
            .utxos
            .find_spendable(&public.pub_key_hash(), amount)?;
        let mut tx = Transaction::new_spend(&public, to, amount, &spendable)?;
        self.sign_transaction(&mut tx, sender)?;
        Ok(tx)
    }

    /// Scan the whole chain for unspent outputs
    pub fn find_utxo(&self) -> Result<BTreeMap<TransactionId, TxOutputs>, BlockchainError> {
        utxo::collect_unspent(self.iter()?)
    }

    /// Rebuild the UTXO index from the chain, returns the number of indexed transactions
    pub fn reindex_utxos(&self) -> Result<usize, BlockchainError> {
        self.utxos.reindex(self.iter()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::economics::BLOCK_REWARD;
    use tempfile::TempDir;

    fn new_chain() -> (TempDir, Blockchain, Private) {
        let dir = tempfile::tempdir().unwrap();
        let owner = Private::new_random().unwrap();
        let chain = Blockchain::init(
            &dir.path().join("blocks_test"),
            &owner.to_public().to_address(),
        )
        .unwrap();
        (dir, chain, owner)
    }

    fn child_of(parent: &Block, memo: &[u8]) -> Block {
        let address = Private::new_random().unwrap().to_public().to_address();
        Block::mine(
            vec![Transaction::new_coinbase(&address, memo).unwrap()],
            Some(parent.hash),
            parent.height + 1,
            1,
            &AtomicBool::new(false),
        )
        .unwrap()
    }

    #[test]
    fn test_genesis() {
        let (_dir, chain, owner) = new_chain();
        let genesis = chain.get_block(&chain.head_hash().unwrap()).unwrap();

        assert!(genesis.is_genesis());
        assert_eq!(genesis.height, 0);
        assert_eq!(chain.get_best_height().unwrap(), 0);
        assert_eq!(chain.get_block_hashes().unwrap(), vec![genesis.hash]);
        assert_eq!(
            chain
                .get_utxos()
                .balance(&owner.to_public().pub_key_hash())
                .unwrap(),
            BLOCK_REWARD
        );
    }

    #[test]
    fn test_init_twice_fails() {
        let (dir, chain, owner) = new_chain();
        chain.close().unwrap();

        let again = Blockchain::init(
            &dir.path().join("blocks_test"),
            &owner.to_public().to_address(),
        );
        assert!(matches!(again, Err(BlockchainError::AlreadyExists(_))));
    }

    #[test]
    fn test_init_rejects_bad_address_before_creating_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocks_bad");
        assert!(matches!(
            Blockchain::init(&path, "definitely-not-base58!"),
            Err(BlockchainError::Transaction(TransactionError::InvalidAddress(_)))
        ));
        assert!(!path.exists());
    }

    #[test]
    fn test_open_missing_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Blockchain::open(&dir.path().join("nothing")),
            Err(BlockchainError::NotFound(_))
        ));
    }

    #[test]
    fn test_reopen_keeps_head() {
        let (dir, chain, _owner) = new_chain();
        let genesis = chain.get_block(&chain.head_hash().unwrap()).unwrap();
        let child = child_of(&genesis, b"child");
        chain.accept_block(&child).unwrap();
        chain.close().unwrap();

        let reopened = Blockchain::open(&dir.path().join("blocks_test")).unwrap();
        assert_eq!(reopened.head_hash().unwrap(), child.hash);
        assert_eq!(reopened.get_best_height().unwrap(), 1);
    }

    #[test]
    fn test_append_is_idempotent() {
        let (_dir, chain, _owner) = new_chain();
        let genesis = chain.get_block(&chain.head_hash().unwrap()).unwrap();
        let child = child_of(&genesis, b"once");

        assert_eq!(
            chain.accept_block(&child).unwrap(),
            AppendOutcome::NewHead {
                previous: genesis.hash
            }
        );
        let index_before = chain.get_utxos().snapshot().unwrap();

        assert_eq!(chain.accept_block(&child).unwrap(), AppendOutcome::Duplicate);
        assert_eq!(chain.add_block(&child).unwrap(), AppendOutcome::Duplicate);
        assert_eq!(chain.head_hash().unwrap(), child.hash);
        assert_eq!(chain.get_best_height().unwrap(), 1);
        assert_eq!(chain.get_utxos().snapshot().unwrap(), index_before);
    }

    #[test]
    fn test_equal_height_keeps_first_seen() {
        let (_dir, chain, _owner) = new_chain();
        let genesis = chain.get_block(&chain.head_hash().unwrap()).unwrap();
        let first = child_of(&genesis, b"first");
        let second = child_of(&genesis, b"second");

        chain.accept_block(&first).unwrap();
        assert_eq!(chain.accept_block(&second).unwrap(), AppendOutcome::Stored);
        assert_eq!(chain.head_hash().unwrap(), first.hash);
        assert_eq!(chain.get_block(&second.hash).unwrap(), second);

        // A higher block on the losing branch takes over and the index is rebuilt
        let third = child_of(&second, b"third");
        assert!(matches!(
            chain.accept_block(&third).unwrap(),
            AppendOutcome::NewHead { .. }
        ));
        assert_eq!(chain.head_hash().unwrap(), third.hash);
        assert_eq!(
            chain.get_utxos().snapshot().unwrap(),
            chain.find_utxo().unwrap()
        );
        assert!(
            chain
                .get_utxos()
                .get(&first.transactions[0].id)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_iterator_stops_at_genesis() {
        let (_dir, chain, _owner) = new_chain();
        let genesis = chain.get_block(&chain.head_hash().unwrap()).unwrap();
        let child = child_of(&genesis, b"a");
        chain.accept_block(&child).unwrap();

        let mut iter = chain.iter().unwrap();
        assert_eq!(iter.next_block().unwrap().hash, child.hash);
        let last = iter.next_block().unwrap();
        assert!(last.is_genesis());
        assert!(matches!(
            iter.next_block(),
            Err(BlockchainError::NotFound(_))
        ));

        // Restartable from any hash
        let heights: Vec<u64> = chain
            .iter_from(child.hash)
            .map(|block| block.unwrap().height)
            .collect();
        assert_eq!(heights, vec![1, 0]);
    }

    #[test]
    fn test_heights_increase_by_one() {
        let (_dir, chain, _owner) = new_chain();
        let mut parent = chain.get_block(&chain.head_hash().unwrap()).unwrap();
        for i in 0..3u8 {
            let child = child_of(&parent, &[i]);
            chain.accept_block(&child).unwrap();
            parent = child;
        }

        let blocks: Vec<Block> = chain.iter().unwrap().map(Result::unwrap).collect();
        assert_eq!(blocks.len(), 4);
        for pair in blocks.windows(2) {
            assert_eq!(pair[0].prev_hash, Some(pair[1].hash));
            assert_eq!(pair[0].height, pair[1].height + 1);
        }
        assert_eq!(blocks.last().unwrap().height, 0);
    }

    #[test]
    fn test_rejects_bad_proof_and_bad_height() {
        let (_dir, chain, _owner) = new_chain();
        let genesis = chain.get_block(&chain.head_hash().unwrap()).unwrap();

        let mut tampered = child_of(&genesis, b"tampered");
        tampered.nonce = tampered.nonce.wrapping_add(1);
        assert!(matches!(
            chain.add_block(&tampered),
            Err(BlockchainError::InvalidProof(_))
        ));

        let address = Private::new_random().unwrap().to_public().to_address();
        let too_high = Block::mine(
            vec![Transaction::new_coinbase(&address, b"high").unwrap()],
            Some(genesis.hash),
            5,
            1,
            &AtomicBool::new(false),
        )
        .unwrap();
        assert!(matches!(
            chain.add_block(&too_high),
            Err(BlockchainError::InvalidBlock(_))
        ));
        assert_eq!(chain.head_hash().unwrap(), genesis.hash);
    }

    #[test]
    fn test_orphan_never_becomes_head() {
        let (_dir, chain, owner) = new_chain();
        let genesis = chain.head_hash().unwrap();
        let address = Private::new_random().unwrap().to_public().to_address();

        let orphan = Block::mine(
            vec![Transaction::new_coinbase(&address, b"orphan").unwrap()],
            Some(Hash::new(b"nowhere")),
            1_000_000,
            1,
            &AtomicBool::new(false),
        )
        .unwrap();
        assert!(matches!(
            chain.accept_block(&orphan),
            Err(BlockchainError::InvalidBlock(_))
        ));

        let second_genesis = Block::mine(
            vec![Transaction::new_coinbase(&address, b"rival").unwrap()],
            None,
            0,
            1,
            &AtomicBool::new(false),
        )
        .unwrap();
        assert!(matches!(
            chain.accept_block(&second_genesis),
            Err(BlockchainError::InvalidBlock(_))
        ));

        assert_eq!(chain.head_hash().unwrap(), genesis);
        assert_eq!(chain.get_best_height().unwrap(), 0);
        assert!(matches!(
            chain.get_block(&orphan.hash),
            Err(BlockchainError::NotFound(_))
        ));
        assert_eq!(chain.get_block_hashes().unwrap(), vec![genesis]);
        let to = Private::new_random().unwrap().to_public().to_address();
        assert!(chain.new_transaction(&owner, &to, 10).is_ok());
    }

    #[test]
    fn test_stale_mined_block_is_not_reported_as_adopted() {
        let (_dir, chain, _owner) = new_chain();
        let genesis = chain.get_block(&chain.head_hash().unwrap()).unwrap();
        let miner = Private::new_random().unwrap().to_public().to_address();

        let candidate = chain
            .mine_candidate(
                vec![Transaction::new_coinbase(&miner, b"mine").unwrap()],
                1,
                &AtomicBool::new(false),
            )
            .unwrap();
        assert_eq!(candidate.prev_hash, Some(genesis.hash));

        let competing = child_of(&genesis, b"competing");
        chain.accept_block(&competing).unwrap();

        assert!(matches!(
            chain.adopt_mined(&candidate),
            Err(BlockchainError::InvalidBlock(_))
        ));
        assert_eq!(chain.head_hash().unwrap(), competing.hash);
        assert_eq!(chain.get_block(&candidate.hash).unwrap(), candidate);
    }

    #[test]
    fn test_find_transaction() {
        let (_dir, chain, _owner) = new_chain();
        let genesis = chain.get_block(&chain.head_hash().unwrap()).unwrap();
        let coinbase = &genesis.transactions[0];

        assert_eq!(chain.find_transaction(&coinbase.id).unwrap(), *coinbase);
        assert!(matches!(
            chain.find_transaction(&Hash::new(b"missing")),
            Err(BlockchainError::NotFound(_))
        ));
    }

    #[test]
    fn test_cancelled_mining_persists_nothing() {
        let (_dir, chain, owner) = new_chain();
        let head = chain.head_hash().unwrap();
        let coinbase = Transaction::new_coinbase(&owner.to_public().to_address(), b"c").unwrap();

        assert!(matches!(
            chain.mine_block_with(vec![coinbase], 2, &AtomicBool::new(true)),
            Err(BlockchainError::MiningCancelled)
        ));
        assert_eq!(chain.head_hash().unwrap(), head);
    }
}
