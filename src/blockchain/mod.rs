pub mod block;
pub mod model;
pub mod pow;
pub mod submission;

pub use block::Block;
pub use model::{
    Accepted, BlockRef, Blockchain, ChainTip, MiningInfo, NetworkStats, Queued, UtxoStats,
};
pub use submission::BlockSubmission;

use crate::transaction::Amount;

/// Default Proof-of-Work difficulty (number of leading zero hex digits).
pub const DEFAULT_DIFFICULTY: u32 = 4;

/// Base block subsidy.
pub const MINING_REWARD: Amount = 10;

/// Receives the whole initial supply in block 0.
pub const GENESIS_ADDRESS: &str = "san1genesis000000000000000000000000";
pub const GENESIS_SUPPLY: Amount = 1_000_000;
/// Fixed so every node derives the same block 0.
pub const GENESIS_TIMESTAMP: i64 = 1_704_067_200_000;

/// Difficulty bounds (keep low in dev to avoid long waits)
pub const DIFF_MIN: u32 = 1;
pub const DIFF_MAX: u32 = 6;

/// Transactions pulled from the mempool per locally mined block.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Engine-level consensus knobs, fixed for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainParams {
    pub difficulty: u32,
    pub mining_reward: Amount,
    pub mempool_max_size: usize,
    pub batch_size: usize,
}

impl ChainParams {
    /// Clamp values into their supported ranges.
    pub fn normalized(self) -> Self {
        Self {
            difficulty: self.difficulty.clamp(DIFF_MIN, DIFF_MAX),
            mining_reward: self.mining_reward,
            mempool_max_size: self.mempool_max_size.max(1),
            batch_size: self.batch_size.max(1),
        }
    }
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            difficulty: DEFAULT_DIFFICULTY,
            mining_reward: MINING_REWARD,
            mempool_max_size: crate::mempool::DEFAULT_MAX_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}
