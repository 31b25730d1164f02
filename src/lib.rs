/// Blocks, transactions, proof of work and the ledger itself
pub mod core;

/// Hashes, keys and addresses
pub mod crypto;

/// Node runtime around the ledger
pub mod node;

/// Node configuration
pub mod config;
