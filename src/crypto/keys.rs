use std::fmt;

use ring::{
    rand::SystemRandom,
    signature::{
        ECDSA_P256_SHA256_FIXED, ECDSA_P256_SHA256_FIXED_SIGNING, EcdsaKeyPair, KeyPair,
        UnparsedPublicKey,
    },
};
use thiserror::Error;

use crate::crypto::address::{self, PubKeyHash};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum KeyError {
    #[error("Failed to generate key pair")]
    Generation,

    #[error("Key rejected: {0}")]
    Rejected(String),

    #[error("Failed to sign message")]
    Signing,
}

/// An ECDSA P-256 private key, kept in its PKCS#8 form
pub struct Private {
    pkcs8: Vec<u8>,
    key_pair: EcdsaKeyPair,
}

impl Private {
    pub fn new_random() -> Result<Self, KeyError> {
        let rng = SystemRandom::new();
        let document = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
            .map_err(|_| KeyError::Generation)?;
        Self::from_pkcs8(document.as_ref())
    }

    pub fn from_pkcs8(pkcs8: &[u8]) -> Result<Self, KeyError> {
        let rng = SystemRandom::new();
        let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8, &rng)
            .map_err(|e| KeyError::Rejected(e.to_string()))?;
        Ok(Private {
            pkcs8: pkcs8.to_vec(),
            key_pair,
        })
    }

    pub fn dump_pkcs8(&self) -> &[u8] {
        &self.pkcs8
    }

    pub fn to_public(&self) -> Public {
        Public(self.key_pair.public_key().as_ref().to_vec())
    }

    /// Sign a message, returns the fixed width (r || s) signature
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, KeyError> {
        let rng = SystemRandom::new();
        let signature = self
            .key_pair
            .sign(&rng, message)
            .map_err(|_| KeyError::Signing)?;
        Ok(signature.as_ref().to_vec())
    }
}

impl fmt::Debug for Private {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Private")
            .field("public", &self.to_public())
            .finish_non_exhaustive()
    }
}

/// An uncompressed SEC1 encoded P-256 public key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Public(Vec<u8>);

impl Public {
    pub fn new_from_buf(buf: &[u8]) -> Self {
        Public(buf.to_vec())
    }

    pub fn dump_buf(&self) -> &[u8] {
        &self.0
    }

    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        UnparsedPublicKey::new(&ECDSA_P256_SHA256_FIXED, &self.0)
            .verify(message, signature)
            .is_ok()
    }

    pub fn pub_key_hash(&self) -> PubKeyHash {
        address::hash_pub_key(&self.0)
    }

    pub fn to_address(&self) -> String {
        address::encode(&self.pub_key_hash())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let private = Private::new_random().unwrap();
        let public = private.to_public();
        let signature = private.sign(b"spend").unwrap();

        assert!(public.verify(b"spend", &signature));
        assert!(!public.verify(b"spent", &signature));

        let other = Private::new_random().unwrap().to_public();
        assert!(!other.verify(b"spend", &signature));
    }

    #[test]
    fn test_pkcs8_reload_keeps_public_key() {
        let private = Private::new_random().unwrap();
        let reloaded = Private::from_pkcs8(private.dump_pkcs8()).unwrap();
        assert_eq!(private.to_public(), reloaded.to_public());
    }

    #[test]
    fn test_garbage_pkcs8_is_rejected() {
        assert!(matches!(
            Private::from_pkcs8(&[1, 2, 3]),
            Err(KeyError::Rejected(_))
        ));
    }
}
