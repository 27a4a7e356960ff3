use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::pow::{self, BlockPreimage};
use crate::miner::CancelToken;
use crate::transaction::{NULL_TX_HASH, Transaction};

/// A block of transactions, coinbase first.
///
/// Fields are private so `hash` can only change together with the content
/// it covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    index: u64,
    timestamp: i64, // Unix milliseconds (UTC)
    transactions: Vec<Transaction>,
    previous_hash: String,
    nonce: u64,
    hash: String,
    merkle_root: String,
}

impl Block {
    /// Block 0: links to the all-zero hash and is not mined.
    pub fn genesis(coinbase: Transaction) -> Self {
        let timestamp = coinbase.timestamp();
        Self::from_parts(0, timestamp, vec![coinbase], NULL_TX_HASH.to_string(), 0)
    }

    /// Create a new block (not mined yet). Call `mine()` to perform PoW.
    pub fn new(index: u64, previous_hash: String, transactions: Vec<Transaction>) -> Self {
        Self::new_with_timestamp(
            index,
            previous_hash,
            transactions,
            Utc::now().timestamp_millis(),
        )
    }

    pub fn new_with_timestamp(
        index: u64,
        previous_hash: String,
        transactions: Vec<Transaction>,
        timestamp: i64,
    ) -> Self {
        Self::from_parts(index, timestamp, transactions, previous_hash, 0)
    }

    /// Rebuild a block from header fields; the hash is always recomputed.
    pub fn from_parts(
        index: u64,
        timestamp: i64,
        transactions: Vec<Transaction>,
        previous_hash: String,
        nonce: u64,
    ) -> Self {
        let hashes: Vec<&str> = transactions.iter().map(Transaction::hash).collect();
        let merkle_root = pow::merkle_root(&hashes);
        let mut block = Self {
            index,
            timestamp,
            transactions,
            previous_hash,
            nonce,
            hash: String::new(),
            merkle_root,
        };
        block.hash = block.compute_hash();
        block
    }

    pub fn compute_hash(&self) -> String {
        self.preimage().hash_with_nonce(self.nonce)
    }

    pub fn preimage(&self) -> BlockPreimage {
        BlockPreimage::new(
            self.index,
            self.timestamp,
            &self.transactions,
            &self.previous_hash,
        )
    }

    pub fn set_nonce(&mut self, nonce: u64) {
        self.nonce = nonce;
        self.hash = self.compute_hash();
    }

    /// Search for a nonce meeting `difficulty`. Returns false, leaving the
    /// block untouched, when cancelled.
    pub fn mine(&mut self, difficulty: u32, cancel: &CancelToken) -> bool {
        match pow::mine(&self.preimage(), difficulty, cancel) {
            Some((nonce, hash)) => {
                self.nonce = nonce;
                self.hash = hash;
                true
            }
            None => false,
        }
    }

    /// Cached hash matches the content and satisfies `difficulty`.
    /// Does not look at chain linkage.
    pub fn is_valid(&self, difficulty: u32) -> bool {
        self.hash == self.compute_hash() && pow::meets_threshold(&self.hash, difficulty)
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn previous_hash(&self) -> &str {
        &self.previous_hash
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn merkle_root(&self) -> &str {
        &self.merkle_root
    }
}
