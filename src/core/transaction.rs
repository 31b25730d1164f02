use std::{
    collections::{HashMap, HashSet},
    fmt,
};

use bincode::{Decode, Encode, error::EncodeError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::{
    core::{
        economics::{BLOCK_REWARD, RANDOM_MEMO_LEN},
        utils,
        utxo::Spendable,
    },
    crypto::{
        Hash,
        address::{self, AddressError, PubKeyHash},
        keys::{KeyError, Private, Public},
    },
};

pub type TransactionId = Hash;

#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Invalid address: {0}")]
    InvalidAddress(#[from] AddressError),

    #[error("Insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { available: u64, requested: u64 },

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("Referenced transaction {0} not found")]
    NotFound(TransactionId),

    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("Encoding error: {0}")]
    Encode(#[from] EncodeError),
}

/// A transaction input. Coinbase inputs carry a free-form memo instead of a spend reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum TxInput {
    Coinbase {
        memo: Vec<u8>,
    },
    Spend {
        txid: TransactionId,
        output_index: u32,
        signature: Vec<u8>,
        public_key: Vec<u8>,
    },
}

impl TxInput {
    /// Unsigned spend of output `output_index` of transaction `txid`
    pub fn new_spend(txid: TransactionId, output_index: u32) -> Self {
        TxInput::Spend {
            txid,
            output_index,
            signature: vec![],
            public_key: vec![],
        }
    }

    pub fn is_coinbase(&self) -> bool {
        matches!(self, TxInput::Coinbase { .. })
    }

    /// The (transaction id, output index) this input consumes, None for coinbase inputs
    pub fn referenced_output(&self) -> Option<(TransactionId, usize)> {
        match self {
            TxInput::Coinbase { .. } => None,
            TxInput::Spend {
                txid, output_index, ..
            } => Some((*txid, *output_index as usize)),
        }
    }

    /// True if the public key on this input hashes to `pub_key_hash`
    pub fn uses_key(&self, pub_key_hash: &PubKeyHash) -> bool {
        match self {
            TxInput::Coinbase { .. } => false,
            TxInput::Spend { public_key, .. } => {
                address::hash_pub_key(public_key) == *pub_key_hash
            }
        }
    }

    fn clear_authorization(&mut self) {
        if let TxInput::Spend {
            signature,
            public_key,
            ..
        } = self
        {
            signature.clear();
            public_key.clear();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct TxOutput {
    pub value: u64,
    pub pub_key_hash: PubKeyHash,
}

impl TxOutput {
    /// Create an output of `value` locked to `address`
    pub fn new(value: u64, address: &str) -> Result<Self, TransactionError> {
        let mut output = TxOutput {
            value,
            pub_key_hash: [0u8; address::PUB_KEY_HASH_LEN],
        };
        output.lock(address)?;
        Ok(output)
    }

    pub fn lock(&mut self, address: &str) -> Result<(), TransactionError> {
        self.pub_key_hash = address::decode(address)?;
        Ok(())
    }

    pub fn is_locked_with_key(&self, pub_key_hash: &PubKeyHash) -> bool {
        self.pub_key_hash == *pub_key_hash
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct Transaction {
    pub id: TransactionId,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    /// Create a reward transaction paying `BLOCK_REWARD` to `to`.
    /// An empty memo is replaced with random bytes so every coinbase gets a distinct id.
    pub fn new_coinbase(to: &str, memo: &[u8]) -> Result<Self, TransactionError> {
        let memo = if memo.is_empty() {
            let mut random = [0u8; RANDOM_MEMO_LEN];
            rand::rng().fill(&mut random);
            random.to_vec()
        } else {
            memo.to_vec()
        };

        Self::new_with_id(
            vec![TxInput::Coinbase { memo }],
            vec![TxOutput::new(BLOCK_REWARD, to)?],
        )
    }

    /// Build an unsigned spend of `amount` from `sender` to `to`, using the outputs in `spendable`.
    /// A change output back to the sender is added when the selected outputs exceed `amount`.
    pub fn new_spend(
        sender: &Public,
        to: &str,
        amount: u64,
        spendable: &Spendable,
    ) -> Result<Self, TransactionError> {
        if amount == 0 {
            return Err(TransactionError::InvalidTransaction(
                "amount must be positive".to_string(),
            ));
        }
        let payment = TxOutput::new(amount, to)?;

        if spendable.total < amount {
            return Err(TransactionError::InsufficientFunds {
                available: spendable.total,
                requested: amount,
            });
        }

        let inputs = spendable
            .outputs
            .iter()
            .map(|(txid, index)| TxInput::new_spend(*txid, *index as u32))
            .collect();

        let mut outputs = vec![payment];
        if spendable.total > amount {
            outputs.push(TxOutput {
                value: spendable.total - amount,
                pub_key_hash: sender.pub_key_hash(),
            });
        }

        Self::new_with_id(inputs, outputs)
    }

    fn new_with_id(
        inputs: Vec<TxInput>,
        outputs: Vec<TxOutput>,
    ) -> Result<Self, TransactionError> {
        let mut tx = Transaction {
            id: Hash::new_from_buf([0u8; 32]),
            inputs,
            outputs,
        };
        tx.id = tx.compute_id()?;
        Ok(tx)
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_coinbase()
    }

    /// Hash of the unsigned content: inputs with signatures and public keys cleared, and outputs
    pub fn compute_id(&self) -> Result<TransactionId, TransactionError> {
        let trimmed = self.trimmed_copy();
        let mut hasher = Sha256::new();
        hasher.update(utils::encode(&trimmed.inputs)?);
        hasher.update(utils::encode(&trimmed.outputs)?);
        Ok(Hash::new_from_buf(hasher.finalize().into()))
    }

    fn trimmed_copy(&self) -> Transaction {
        let mut copy = self.clone();
        for input in &mut copy.inputs {
            input.clear_authorization();
        }
        copy
    }

    fn ensure_references_present(
        &self,
        referenced: &HashMap<TransactionId, Transaction>,
    ) -> Result<(), TransactionError> {
        for input in &self.inputs {
            if let Some((txid, _)) = input.referenced_output()
                && !referenced.contains_key(&txid)
            {
                return Err(TransactionError::NotFound(txid));
            }
        }
        Ok(())
    }

    fn referenced_output<'a>(
        &self,
        input_index: usize,
        referenced: &'a HashMap<TransactionId, Transaction>,
    ) -> Result<&'a TxOutput, TransactionError> {
        let (txid, output_index) = self.inputs[input_index].referenced_output().ok_or_else(|| {
            TransactionError::InvalidTransaction(format!(
                "input {input_index} is a coinbase input inside a spend"
            ))
        })?;
        let previous = referenced
            .get(&txid)
            .ok_or(TransactionError::NotFound(txid))?;
        previous.outputs.get(output_index).ok_or_else(|| {
            TransactionError::InvalidTransaction(format!(
                "input {input_index} references output {output_index} of {txid}, which has {} outputs",
                previous.outputs.len()
            ))
        })
    }

    /// Digest signed for input `input_index`: the trimmed copy with that input's public key
    /// replaced by the locking hash of the output it spends
    fn signing_digest(
        &self,
        input_index: usize,
        referenced: &HashMap<TransactionId, Transaction>,
    ) -> Result<Hash, TransactionError> {
        let locking_hash = self.referenced_output(input_index, referenced)?.pub_key_hash;

        let mut trimmed = self.trimmed_copy();
        if let TxInput::Spend { public_key, .. } = &mut trimmed.inputs[input_index] {
            *public_key = locking_hash.to_vec();
        }
        let encoded = utils::encode(&trimmed)?;
        Ok(Hash::new(&encoded))
    }

    /// Sign every input. `referenced` must hold every transaction an input spends from.
    pub fn sign(
        &mut self,
        private: &Private,
        referenced: &HashMap<TransactionId, Transaction>,
    ) -> Result<(), TransactionError> {
        if self.is_coinbase() {
            return Ok(());
        }
        self.ensure_references_present(referenced)?;

        let signer = private.to_public().dump_buf().to_vec();
        for input_index in 0..self.inputs.len() {
            let digest = self.signing_digest(input_index, referenced)?;
            let new_signature = private.sign(digest.as_ref())?;

            if let TxInput::Spend {
                signature,
                public_key,
                ..
            } = &mut self.inputs[input_index]
            {
                *signature = new_signature;
                *public_key = signer.clone();
            }
        }
        Ok(())
    }

    /// Verify every input against the outputs it spends. Any failing input rejects the transaction.
    pub fn verify(
        &self,
        referenced: &HashMap<TransactionId, Transaction>,
    ) -> Result<(), TransactionError> {
        if self.is_coinbase() {
            return Ok(());
        }
        if self.inputs.is_empty() {
            return Err(TransactionError::InvalidTransaction(
                "transaction has no inputs".to_string(),
            ));
        }
        self.ensure_references_present(referenced)?;

        let mut spent = HashSet::with_capacity(self.inputs.len());
        for (txid, output_index) in self.inputs.iter().filter_map(TxInput::referenced_output) {
            if !spent.insert((txid, output_index)) {
                return Err(TransactionError::InvalidTransaction(format!(
                    "output {output_index} of {txid} is spent twice"
                )));
            }
        }

        if self.compute_id()? != self.id {
            return Err(TransactionError::InvalidTransaction(format!(
                "id {} does not match transaction content",
                self.id
            )));
        }

        let mut input_value: u64 = 0;
        for (input_index, input) in self.inputs.iter().enumerate() {
            let TxInput::Spend {
                signature,
                public_key,
                ..
            } = input
            else {
                return Err(TransactionError::InvalidTransaction(format!(
                    "input {input_index} is a coinbase input inside a spend"
                )));
            };
            let output = self.referenced_output(input_index, referenced)?;

            if !input.uses_key(&output.pub_key_hash) {
                return Err(TransactionError::InvalidTransaction(format!(
                    "input {input_index} is not signed by the owner of the output it spends"
                )));
            }

            let digest = self.signing_digest(input_index, referenced)?;
            if !Public::new_from_buf(public_key).verify(digest.as_ref(), signature) {
                return Err(TransactionError::InvalidTransaction(format!(
                    "invalid signature on input {input_index}"
                )));
            }

            input_value = input_value.saturating_add(output.value);
        }

        let output_value = self
            .outputs
            .iter()
            .fold(0u64, |acc, output| acc.saturating_add(output.value));
        if output_value > input_value {
            return Err(TransactionError::InvalidTransaction(format!(
                "outputs ({output_value}) exceed inputs ({input_value})"
            )));
        }

        Ok(())
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Transaction {}:", self.id)?;
        for (i, input) in self.inputs.iter().enumerate() {
            match input {
                TxInput::Coinbase { memo } => {
                    writeln!(f, "     Input {i}: coinbase")?;
                    writeln!(f, "       Memo:      {}", hex::encode(memo))?;
                }
                TxInput::Spend {
                    txid,
                    output_index,
                    signature,
                    public_key,
                } => {
                    writeln!(f, "     Input {i}:")?;
                    writeln!(f, "       TXID:      {txid}")?;
                    writeln!(f, "       Out:       {output_index}")?;
                    writeln!(f, "       Signature: {}", hex::encode(signature))?;
                    writeln!(f, "       PubKey:    {}", hex::encode(public_key))?;
                }
            }
        }
        for (i, output) in self.outputs.iter().enumerate() {
            writeln!(f, "     Output {i}:")?;
            writeln!(f, "       Value:  {}", output.value)?;
            writeln!(f, "       Script: {}", hex::encode(output.pub_key_hash))?;
        }
        Ok(())
    }
}
