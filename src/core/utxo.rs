use std::collections::{BTreeMap, HashSet};

use bincode::{
    Decode, Encode,
    error::{DecodeError, EncodeError},
};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
};
use thiserror::Error;

use crate::{
    core::{
        block::Block,
        blockchain::BlockchainError,
        transaction::{Transaction, TransactionId, TxOutput},
        utils,
    },
    crypto::{Hash, address::PubKeyHash},
};

#[derive(Error, Debug)]
pub enum UTXOError {
    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("Encoding error: {0}")]
    Encode(#[from] EncodeError),

    #[error("Decoding error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Corrupt UTXO index: {0}")]
    Corrupt(String),
}

impl From<TransactionError<UTXOError>> for UTXOError {
    fn from(err: TransactionError<UTXOError>) -> Self {
        match err {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => UTXOError::Storage(e),
        }
    }
}

/// Outputs of one transaction, by position. Spent outputs are None so indices stay stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct TxOutputs {
    pub outputs: Vec<Option<TxOutput>>,
}

impl TxOutputs {
    pub fn from_transaction(tx: &Transaction) -> Self {
        TxOutputs {
            outputs: tx.outputs.iter().cloned().map(Some).collect(),
        }
    }

    /// True once every output has been spent
    pub fn is_empty(&self) -> bool {
        self.outputs.iter().all(Option::is_none)
    }

    pub fn unspent(&self) -> impl Iterator<Item = (usize, &TxOutput)> {
        self.outputs
            .iter()
            .enumerate()
            .filter_map(|(index, output)| output.as_ref().map(|o| (index, o)))
    }

    /// Mark output `index` as spent, returning it if it was still unspent
    pub fn spend(&mut self, index: usize) -> Option<TxOutput> {
        self.outputs.get_mut(index).and_then(Option::take)
    }

    fn encode(&self) -> Result<Vec<u8>, UTXOError> {
        Ok(utils::encode(self)?)
    }

    fn decode(bytes: &[u8]) -> Result<Self, UTXOError> {
        Ok(utils::decode(bytes)?)
    }
}

/// Outputs picked to fund a spend, and their total value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Spendable {
    pub total: u64,
    pub outputs: Vec<(TransactionId, usize)>,
}

/// Walk blocks (head to genesis) and collect every output no later input consumes
pub fn collect_unspent<I>(blocks: I) -> Result<BTreeMap<TransactionId, TxOutputs>, BlockchainError>
where
    I: IntoIterator<Item = Result<Block, BlockchainError>>,
{
    let mut spent: HashSet<(TransactionId, usize)> = HashSet::new();
    let mut seen: Vec<(TransactionId, Vec<TxOutput>)> = vec![];

    for block in blocks {
        let block = block?;
        for tx in block.transactions {
            if !tx.is_coinbase() {
                spent.extend(tx.inputs.iter().filter_map(|input| input.referenced_output()));
            }
            seen.push((tx.id, tx.outputs));
        }
    }

    let mut unspent = BTreeMap::new();
    for (txid, outputs) in seen {
        let entry = TxOutputs {
            outputs: outputs
                .into_iter()
                .enumerate()
                .map(|(index, output)| (!spent.contains(&(txid, index))).then_some(output))
                .collect(),
        };
        if !entry.is_empty() {
            unspent.insert(txid, entry);
        }
    }
    Ok(unspent)
}

/// Unspent transaction output index, keyed by transaction id. Derived from the chain and rebuildable.
pub struct UTXOs {
    pub db: sled::Tree,
}

impl UTXOs {
    pub fn new(db: sled::Tree) -> Self {
        UTXOs { db }
    }

    /// Discard the index and rebuild it from `blocks`, in one atomic batch.
    /// Returns the number of transactions with unspent outputs.
    pub fn reindex<I>(&self, blocks: I) -> Result<usize, BlockchainError>
    where
        I: IntoIterator<Item = Result<Block, BlockchainError>>,
    {
        let unspent = collect_unspent(blocks)?;

        let mut batch = sled::Batch::default();
        for key in self.db.iter().keys() {
            batch.remove(key?);
        }
        for (txid, outputs) in &unspent {
            batch.insert(txid.as_ref(), outputs.encode()?);
        }
        self.db.apply_batch(batch)?;

        info!("UTXO index rebuilt, {} transactions", unspent.len());
        Ok(unspent.len())
    }

    /// Apply a newly adopted block: drop the outputs its inputs spend, then add its own outputs
    pub fn update(&self, block: &Block) -> Result<(), UTXOError> {
        self.db.transaction(|tree| -> ConflictableTransactionResult<(), UTXOError> {
            for tx in &block.transactions {
                if !tx.is_coinbase() {
                    for (txid, index) in tx.inputs.iter().filter_map(|i| i.referenced_output()) {
                        let Some(bytes) = tree.get(txid.as_ref())? else {
                            warn!("Output {index} of {txid} spent by {} is not in the UTXO index", tx.id);
                            continue;
                        };
                        let mut entry =
                            TxOutputs::decode(&bytes).map_err(ConflictableTransactionError::Abort)?;
                        if entry.spend(index).is_none() {
                            warn!("Output {index} of {txid} spent by {} was already spent", tx.id);
                        }

                        if entry.is_empty() {
                            tree.remove(txid.as_ref())?;
                        } else {
                            let encoded = entry.encode().map_err(ConflictableTransactionError::Abort)?;
                            tree.insert(txid.as_ref(), encoded)?;
                        }
                    }
                }

                let own = TxOutputs::from_transaction(tx);
                if !own.is_empty() {
                    let encoded = own.encode().map_err(ConflictableTransactionError::Abort)?;
                    tree.insert(tx.id.as_ref(), encoded)?;
                }
            }
            Ok(())
        })?;

        debug!("UTXO index updated with block {}", block.hash);
        Ok(())
    }

    pub fn get(&self, txid: &TransactionId) -> Result<Option<TxOutputs>, UTXOError> {
        self.db
            .get(txid.as_ref())?
            .map(|bytes| TxOutputs::decode(&bytes))
            .transpose()
    }

    /// True if output `index` of `txid` is currently unspent
    pub fn contains(&self, txid: &TransactionId, index: usize) -> Result<bool, UTXOError> {
        Ok(self
            .get(txid)?
            .is_some_and(|entry| matches!(entry.outputs.get(index), Some(Some(_)))))
    }

    fn entries(&self) -> impl Iterator<Item = Result<(TransactionId, TxOutputs), UTXOError>> {
        self.db.iter().map(|item| -> Result<(TransactionId, TxOutputs), UTXOError> {
            let (key, value) = item?;
            let txid = Hash::new_from_slice(&key)
                .ok_or_else(|| UTXOError::Corrupt("invalid transaction id key".to_string()))?;
            Ok((txid, TxOutputs::decode(&value)?))
        })
    }

    /// Every unspent output locked to `pub_key_hash`
    pub fn find_utxo(&self, pub_key_hash: &PubKeyHash) -> Result<Vec<TxOutput>, UTXOError> {
        let mut found = vec![];
        for entry in self.entries() {
            let (_, outputs) = entry?;
            found.extend(
                outputs
                    .unspent()
                    .filter(|(_, output)| output.is_locked_with_key(pub_key_hash))
                    .map(|(_, output)| output.clone()),
            );
        }
        Ok(found)
    }

    /// Unspent outputs locked to `pub_key_hash`, taken in index order until they cover `amount`.
    /// The returned total is below `amount` if the owner cannot afford it.
    pub fn find_spendable(
        &self,
        pub_key_hash: &PubKeyHash,
        amount: u64,
    ) -> Result<Spendable, UTXOError> {
        let mut spendable = Spendable::default();
        for entry in self.entries() {
            if spendable.total >= amount {
                break;
            }
            let (txid, outputs) = entry?;
            for (index, output) in outputs.unspent() {
                if output.is_locked_with_key(pub_key_hash) && spendable.total < amount {
                    spendable.total = spendable.total.saturating_add(output.value);
                    spendable.outputs.push((txid, index));
                }
            }
        }
        Ok(spendable)
    }

    pub fn balance(&self, pub_key_hash: &PubKeyHash) -> Result<u64, UTXOError> {
        Ok(self
            .find_utxo(pub_key_hash)?
            .iter()
            .fold(0u64, |total, output| total.saturating_add(output.value)))
    }

    /// Number of transactions with at least one unspent output
    pub fn count_transactions(&self) -> usize {
        self.db.len()
    }

    /// Copy of the whole index
    pub fn snapshot(&self) -> Result<BTreeMap<TransactionId, TxOutputs>, UTXOError> {
        self.entries().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::transaction::TxInput,
        crypto::{address, keys::Private},
    };

    fn temp_utxos() -> UTXOs {
        let db = sled::Config::new().temporary(true).open().unwrap();
        UTXOs::new(db.open_tree("utxo").unwrap())
    }

    fn block_of(transactions: Vec<Transaction>) -> Block {
        Block {
            hash: Hash::new(b"test block"),
            prev_hash: None,
            transactions,
            nonce: 0,
            height: 0,
        }
    }

    fn paying(pub_key_hashes: &[(PubKeyHash, u64)], memo: &[u8]) -> Transaction {
        let mut tx =
            Transaction::new_coinbase(&address::encode(&pub_key_hashes[0].0), memo).unwrap();
        tx.outputs = pub_key_hashes
            .iter()
            .map(|(pub_key_hash, value)| TxOutput {
                value: *value,
                pub_key_hash: *pub_key_hash,
            })
            .collect();
        tx.id = tx.compute_id().unwrap();
        tx
    }

    fn spending(refs: &[(TransactionId, u32)], to: PubKeyHash, value: u64) -> Transaction {
        let mut tx = Transaction {
            id: Hash::new_from_buf([0u8; 32]),
            inputs: refs
                .iter()
                .map(|(txid, index)| TxInput::new_spend(*txid, *index))
                .collect(),
            outputs: vec![TxOutput {
                value,
                pub_key_hash: to,
            }],
        };
        tx.id = tx.compute_id().unwrap();
        tx
    }

    #[test]
    fn test_update_spends_and_keeps_indices() {
        let alice = Private::new_random().unwrap().to_public().pub_key_hash();
        let bob = Private::new_random().unwrap().to_public().pub_key_hash();
        let utxos = temp_utxos();

        let funding = paying(&[(alice, 10), (alice, 20), (bob, 5)], b"fund");
        utxos.update(&block_of(vec![funding.clone()])).unwrap();
        assert_eq!(utxos.count_transactions(), 1);
        assert_eq!(utxos.balance(&alice).unwrap(), 30);

        let spend = spending(&[(funding.id, 0)], bob, 10);
        utxos.update(&block_of(vec![spend.clone()])).unwrap();

        let entry = utxos.get(&funding.id).unwrap().unwrap();
        assert_eq!(entry.outputs[0], None);
        assert_eq!(entry.outputs[1].as_ref().unwrap().value, 20);
        assert!(!utxos.contains(&funding.id, 0).unwrap());
        assert!(utxos.contains(&funding.id, 1).unwrap());
        assert_eq!(utxos.balance(&alice).unwrap(), 20);
        assert_eq!(utxos.balance(&bob).unwrap(), 15);
        assert_eq!(utxos.count_transactions(), 2);
    }

    #[test]
    fn test_entry_removed_once_fully_spent() {
        let alice = Private::new_random().unwrap().to_public().pub_key_hash();
        let utxos = temp_utxos();

        let funding = paying(&[(alice, 7)], b"single");
        utxos.update(&block_of(vec![funding.clone()])).unwrap();
        utxos
            .update(&block_of(vec![spending(&[(funding.id, 0)], alice, 7)]))
            .unwrap();

        assert!(utxos.get(&funding.id).unwrap().is_none());
        assert_eq!(utxos.count_transactions(), 1);
    }

    #[test]
    fn test_double_spend_in_one_block_only_removes_once() {
        let alice = Private::new_random().unwrap().to_public().pub_key_hash();
        let bob = Private::new_random().unwrap().to_public().pub_key_hash();
        let utxos = temp_utxos();

        let funding = paying(&[(alice, 9)], b"dup");
        utxos.update(&block_of(vec![funding.clone()])).unwrap();

        let first = spending(&[(funding.id, 0)], bob, 9);
        let second = spending(&[(funding.id, 0)], alice, 9);
        utxos
            .update(&block_of(vec![first.clone(), second.clone()]))
            .unwrap();

        assert!(utxos.get(&funding.id).unwrap().is_none());
        assert!(utxos.get(&first.id).unwrap().is_some());
        assert!(utxos.get(&second.id).unwrap().is_some());
    }

    #[test]
    fn test_find_spendable_stops_at_amount() {
        let alice = Private::new_random().unwrap().to_public().pub_key_hash();
        let utxos = temp_utxos();
        utxos
            .update(&block_of(vec![
                paying(&[(alice, 10), (alice, 10)], b"a"),
                paying(&[(alice, 10)], b"b"),
            ]))
            .unwrap();

        let spendable = utxos.find_spendable(&alice, 15).unwrap();
        assert_eq!(spendable.total, 20);
        assert_eq!(spendable.outputs.len(), 2);

        let everything = utxos.find_spendable(&alice, 1_000).unwrap();
        assert_eq!(everything.total, 30);
        assert_eq!(everything.outputs.len(), 3);
        assert_eq!(utxos.find_utxo(&alice).unwrap().len(), 3);
    }

    #[test]
    fn test_totals_saturate_at_u64_max() {
        let alice = Private::new_random().unwrap().to_public().pub_key_hash();
        let utxos = temp_utxos();
        utxos
            .update(&block_of(vec![paying(&[(alice, u64::MAX), (alice, 5)], b"huge")]))
            .unwrap();

        assert_eq!(utxos.balance(&alice).unwrap(), u64::MAX);
        let spendable = utxos.find_spendable(&alice, u64::MAX).unwrap();
        assert_eq!(spendable.total, u64::MAX);
        assert_eq!(spendable.outputs.len(), 1);
    }

    #[test]
    fn test_reindex_matches_update() {
        let alice = Private::new_random().unwrap().to_public().pub_key_hash();
        let bob = Private::new_random().unwrap().to_public().pub_key_hash();

        let funding = paying(&[(alice, 10), (alice, 20)], b"f");
        let spend = spending(&[(funding.id, 1)], bob, 20);
        // Chain in head-to-genesis order, the way the block iterator yields it
        let blocks = vec![block_of(vec![spend.clone()]), block_of(vec![funding.clone()])];

        let incremental = temp_utxos();
        for block in blocks.iter().rev() {
            incremental.update(block).unwrap();
        }

        let rebuilt = temp_utxos();
        rebuilt
            .update(&block_of(vec![paying(&[(bob, 1)], b"stale")]))
            .unwrap();
        let count = rebuilt.reindex(blocks.into_iter().map(Ok)).unwrap();

        assert_eq!(count, 2);
        assert_eq!(rebuilt.snapshot().unwrap(), incremental.snapshot().unwrap());
    }
}
