use std::fmt;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// ECDSA P-256 private and public keys
pub mod keys;

/// Checksummed base58 addresses and public key hashes
pub mod address;

/// A 32 byte SHA-256 digest, used for block hashes and transaction ids
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Encode, Decode,
)]
pub struct Hash([u8; 32]);

impl Hash {
    /// Hash arbitrary bytes with SHA-256
    pub fn new(data: &[u8]) -> Self {
        Hash(Sha256::digest(data).into())
    }

    pub fn new_from_buf(buf: [u8; 32]) -> Self {
        Hash(buf)
    }

    /// Parse a hash from a raw slice, None if the slice is not exactly 32 bytes
    pub fn new_from_slice(slice: &[u8]) -> Option<Self> {
        let buf: [u8; 32] = slice.try_into().ok()?;
        Some(Hash(buf))
    }

    pub fn new_from_hex(hex_str: &str) -> Option<Self> {
        let bytes = hex::decode(hex_str).ok()?;
        Self::new_from_slice(&bytes)
    }

    pub fn dump_buf(&self) -> [u8; 32] {
        self.0
    }

    pub fn dump_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dump_hex())
    }
}
