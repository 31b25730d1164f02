/// The ledger: block storage, head pointer, and the operations that mutate them
pub mod blockchain;

/// Core transaction struct, builds, signs and verifies transactions
pub mod transaction;

/// Unspent transaction outputs index, derived from the chain
pub mod utxo;

/// General utilities
pub mod utils;

/// Economic constants
pub mod economics;

/// Core block struct, defines a block and all of its parameters
pub mod block;

/// Proof of work search and validation
pub mod pow;

/// Opens the on-disk store and its trees
pub mod store;
