/// Value minted by every coinbase transaction
pub const BLOCK_REWARD: u64 = 100;

/// Memo carried by the coinbase of the genesis block
pub const GENESIS_MEMO: &str = "First Transaction from Genesis";

/// Length of the random memo used when a coinbase is created without one
pub const RANDOM_MEMO_LEN: usize = 24;
