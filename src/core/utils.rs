use bincode::{
    Decode, Encode,
    error::{DecodeError, EncodeError},
};
use num_bigint::BigUint;

use crate::crypto::Hash;

/// 2^(256 - difficulty), the exclusive upper bound a block hash must stay under
pub fn target_from_difficulty(difficulty: u32) -> BigUint {
    BigUint::from(1u8) << (256 - difficulty as usize)
}

/// Interpret a hash as an unsigned big endian 256 bit integer
pub fn hash_to_bui(hash: &Hash) -> BigUint {
    BigUint::from_bytes_be(hash.as_ref())
}

/// Encode a value with the standard bincode config used for everything we persist
pub fn encode<T: Encode>(value: &T) -> Result<Vec<u8>, EncodeError> {
    bincode::encode_to_vec(value, bincode::config::standard())
}

pub fn decode<T: Decode<()>>(bytes: &[u8]) -> Result<T, DecodeError> {
    bincode::decode_from_slice::<T, _>(bytes, bincode::config::standard()).map(|(value, _)| value)
}
