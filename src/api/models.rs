use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::blockchain::{Accepted, Block, BlockRef, Blockchain, ChainTip, NetworkStats};
use crate::config::SubmitMode;
use crate::mempool::MempoolEntry;
use crate::miner::{CancelToken, LocalMiner, MinerStatus};
use crate::storage::TxRecord;
use crate::sync::SyncService;
use crate::transaction::{Amount, Transaction, TransactionPayload};

/// Shared application state handed to every handler.
pub struct AppState {
    pub ledger: Arc<Blockchain>,
    /// Present when a default miner address is configured.
    pub miner: Option<Arc<LocalMiner>>,
    pub sync: Option<Arc<SyncService>>,
    /// Cancelled on shutdown; aborts request-driven nonce searches.
    pub shutdown: CancelToken,
    pub submit_mode: SubmitMode,
    pub storage: &'static str,
    pub miner_address: Option<String>,
}

impl AppState {
    pub fn new(ledger: Arc<Blockchain>) -> Self {
        Self {
            ledger,
            miner: None,
            sync: None,
            shutdown: CancelToken::new(),
            submit_mode: SubmitMode::Mempool,
            storage: "memory",
            miner_address: None,
        }
    }

    /// `requested`, else the configured default, ignoring blanks.
    pub fn miner_address_or_default(&self, requested: Option<String>) -> Option<String> {
        requested
            .or_else(|| self.miner_address.clone())
            .filter(|a| !a.trim().is_empty())
    }
}

/// `{ "success": true, "data": ... }`
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

#[derive(Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

impl LimitQuery {
    pub fn clamped(&self, default: usize, max: usize) -> usize {
        self.limit.unwrap_or(default).clamp(1, max)
    }
}

/* ---------- Mining API Models ---------- */

#[derive(Serialize)]
pub struct SubmitResponse {
    pub success: bool,
    #[serde(flatten)]
    pub accepted: Accepted,
}

#[derive(Serialize)]
pub struct PendingResponse {
    pub size: usize,
    pub transactions: Vec<MempoolEntry>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MineRequest {
    #[serde(default)]
    pub miner_address: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MineResponse {
    pub success: bool,
    pub mined: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block: Option<BlockRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_count: Option<usize>,
}

#[derive(Serialize)]
pub struct MinerControlResponse {
    pub success: bool,
    pub changed: bool,
    pub status: MinerStatus,
}

/* ---------- TX API Models ---------- */

#[derive(Deserialize)]
pub struct SubmitQuery {
    pub mine: Option<bool>,
}

/// A signed transaction plus the miner to pay if it is mined right away.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTxRequest {
    #[serde(flatten)]
    pub transaction: TransactionPayload,
    #[serde(default)]
    pub miner_address: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedTxResponse {
    pub transaction_hash: String,
    pub fee: Amount,
    pub position: usize,
    pub message: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MinedTxResponse {
    pub transaction_hash: String,
    pub block_hash: String,
    pub block_index: u64,
    pub mining_time_ms: u128,
    pub message: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Queued,
    Duplicate,
    MempoolFull,
}

#[derive(Serialize)]
pub struct EnqueueResponse {
    pub status: QueueStatus,
    pub hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
    pub size: usize,
}

#[derive(Serialize)]
pub struct DequeueResponse {
    pub transaction: Transaction,
}

/* ---------- Address / stats Models ---------- */

#[derive(Serialize)]
pub struct BalanceResponse {
    pub address: String,
    pub balance: Amount,
    pub confirmed: Amount,
    pub unconfirmed: Amount,
}

#[derive(Serialize)]
pub struct AddressTransactions {
    pub address: String,
    pub transactions: Vec<TxRecord>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatsResponse {
    #[serde(flatten)]
    pub stats: NetworkStats,
    pub latest_blocks: Vec<Block>,
    pub latest_transactions: Vec<TxRecord>,
}

/* ---------- Sync Models ---------- */

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStateResponse {
    pub success: bool,
    pub storage: &'static str,
    pub latest_block: ChainTip,
    pub mempool_size: usize,
}

#[derive(Serialize)]
pub struct SyncMempoolResponse {
    pub success: bool,
    pub transactions: Vec<TransactionPayload>,
}

/// Fields are optional so a missing one is reported as a validation error.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnounceRequest {
    pub block_index: Option<u64>,
    pub block_hash: Option<String>,
}

#[derive(Serialize)]
pub struct Ack {
    pub success: bool,
}

impl Ack {
    pub const OK: Ack = Ack { success: true };
}
