use thiserror::Error;

use crate::storage::StoreError;

/// Every way a ledger operation can fail.
///
/// Acceptance aborts on the first failing step, so callers always see the
/// kind of the earliest violated rule.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Malformed payload or transaction shape.
    #[error("invalid payload: {0}")]
    Validation(String),

    /// Candidate does not extend the current tip.
    #[error("{0}")]
    Linkage(String),

    /// PoW, hash mismatch or coinbase payout violation.
    #[error("{0}")]
    Consensus(String),

    /// A referenced output is not (or no longer) unspent.
    #[error("{0}")]
    DoubleSpend(String),

    #[error("invalid transaction signature: {0}")]
    Signature(String),

    #[error("mempool is full (max {max} transactions)")]
    Capacity { max: usize },

    #[error("transaction {hash} already queued at position {position}")]
    Duplicate { hash: String, position: usize },

    #[error("{0} not found")]
    NotFound(String),

    #[error("mining cancelled")]
    Cancelled,

    /// A blocking mining task panicked or was aborted.
    #[error("mining worker failed: {0}")]
    Worker(String),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl LedgerError {
    /// Short machine-readable label used in API error bodies and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::Validation(_) => "validation",
            LedgerError::Linkage(_) => "linkage",
            LedgerError::Consensus(_) => "consensus",
            LedgerError::DoubleSpend(_) => "double_spend",
            LedgerError::Signature(_) => "signature",
            LedgerError::Capacity { .. } => "mempool_full",
            LedgerError::Duplicate { .. } => "duplicate",
            LedgerError::NotFound(_) => "not_found",
            LedgerError::Cancelled => "cancelled",
            LedgerError::Worker(_) => "worker",
            LedgerError::Storage(_) => "storage",
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
