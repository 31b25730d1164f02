use ripemd::Ripemd160;
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const ADDRESS_VERSION: u8 = 0x00;
pub const CHECKSUM_LEN: usize = 4;
pub const PUB_KEY_HASH_LEN: usize = 20;

/// RIPEMD160(SHA256(public key)), the locking target of an output
pub type PubKeyHash = [u8; PUB_KEY_HASH_LEN];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AddressError {
    #[error("Address is not valid base58")]
    Base58,

    #[error("Invalid address length: expected {expected}, got {actual}")]
    Length { expected: usize, actual: usize },

    #[error("Unsupported address version {0}")]
    Version(u8),

    #[error("Address checksum mismatch")]
    Checksum,
}

pub fn hash_pub_key(public_key: &[u8]) -> PubKeyHash {
    let sha = Sha256::digest(public_key);
    Ripemd160::digest(sha).into()
}

fn checksum(payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let first = Sha256::digest(payload);
    let second = Sha256::digest(first);
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&second[..CHECKSUM_LEN]);
    out
}

/// Encode a public key hash as base58(version || hash || checksum)
pub fn encode(pub_key_hash: &PubKeyHash) -> String {
    let mut payload = Vec::with_capacity(1 + PUB_KEY_HASH_LEN + CHECKSUM_LEN);
    payload.push(ADDRESS_VERSION);
    payload.extend_from_slice(pub_key_hash);
    let sum = checksum(&payload);
    payload.extend_from_slice(&sum);
    bs58::encode(payload).into_string()
}

/// Decode an address, strip the version byte and checksum, return the public key hash
pub fn decode(address: &str) -> Result<PubKeyHash, AddressError> {
    let raw = bs58::decode(address)
        .into_vec()
        .map_err(|_| AddressError::Base58)?;

    let expected = 1 + PUB_KEY_HASH_LEN + CHECKSUM_LEN;
    if raw.len() != expected {
        return Err(AddressError::Length {
            expected,
            actual: raw.len(),
        });
    }

    let (payload, sum) = raw.split_at(raw.len() - CHECKSUM_LEN);
    if checksum(payload) != sum {
        return Err(AddressError::Checksum);
    }
    if payload[0] != ADDRESS_VERSION {
        return Err(AddressError::Version(payload[0]));
    }

    let mut pub_key_hash = [0u8; PUB_KEY_HASH_LEN];
    pub_key_hash.copy_from_slice(&payload[1..]);
    Ok(pub_key_hash)
}

pub fn validate(address: &str) -> bool {
    decode(address).is_ok()
}
