//! Block hashing, merkle roots and the nonce search.
//!
//! Preimage layout (protocol constant, shared by miners and validators):
//!
//! ```text
//! "{index}:{timestamp}:{transactions_json}:{previous_hash}:{nonce}"
//! ```
//!
//! `transactions_json` is the compact serde_json encoding of the full
//! transaction list.

use sha2::{Digest, Sha256};

use crate::miner::CancelToken;
use crate::transaction::Transaction;

/// Nonces tried between two looks at the cancel flag.
const CANCEL_POLL_INTERVAL: u64 = 4_096;

pub fn sha256_hex(data: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_ref());
    hex::encode(hasher.finalize())
}

pub fn transactions_json(transactions: &[Transaction]) -> String {
    serde_json::to_string(transactions).expect("transactions always serialize")
}

/// Everything in the preimage except the nonce, with the fixed prefix
/// already absorbed into a hasher state.
#[derive(Clone)]
pub struct BlockPreimage {
    prefix: Sha256,
}

impl BlockPreimage {
    pub fn new(
        index: u64,
        timestamp: i64,
        transactions: &[Transaction],
        previous_hash: &str,
    ) -> Self {
        let mut prefix = Sha256::new();
        prefix.update(
            format!(
                "{index}:{timestamp}:{}:{previous_hash}:",
                transactions_json(transactions)
            )
            .as_bytes(),
        );
        Self { prefix }
    }

    pub fn hash_with_nonce(&self, nonce: u64) -> String {
        let mut hasher = self.prefix.clone();
        hasher.update(nonce.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

pub fn hash_block(
    index: u64,
    timestamp: i64,
    transactions: &[Transaction],
    previous_hash: &str,
    nonce: u64,
) -> String {
    BlockPreimage::new(index, timestamp, transactions, previous_hash).hash_with_nonce(nonce)
}

/// Pairwise root over hex hashes. An odd level pairs its last element with
/// itself; no hashes gives an empty string.
pub fn merkle_root<S: AsRef<str>>(hashes: &[S]) -> String {
    if hashes.is_empty() {
        return String::new();
    }
    let mut level: Vec<String> = hashes.iter().map(|h| h.as_ref().to_string()).collect();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                let left = &pair[0];
                let right = pair.get(1).unwrap_or(left);
                sha256_hex(format!("{left}{right}"))
            })
            .collect();
    }
    level.remove(0)
}

/// True when `hash` starts with `difficulty` zero hex digits.
pub fn meets_threshold(hash: &str, difficulty: u32) -> bool {
    let d = difficulty as usize;
    hash.len() >= d && hash.bytes().take(d).all(|c| c == b'0')
}

/// Search nonces from 0 upward until the hash meets `difficulty`.
/// Returns `None` if `cancel` fires first.
pub fn mine(preimage: &BlockPreimage, difficulty: u32, cancel: &CancelToken) -> Option<(u64, String)> {
    let mut nonce: u64 = 0;
    loop {
        if nonce % CANCEL_POLL_INTERVAL == 0 && cancel.is_cancelled() {
            return None;
        }
        let hash = preimage.hash_with_nonce(nonce);
        if meets_threshold(&hash, difficulty) {
            return Some((nonce, hash));
        }
        nonce = nonce.wrapping_add(1);
    }
}
