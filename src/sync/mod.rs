//! Best-effort peer gossip. Peers are untrusted: whatever they send goes
//! through the same admission checks as any other submission, and every
//! failure is logged and dropped.

use log::{debug, info, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::blockchain::Blockchain;
use crate::error::LedgerError;
use crate::miner::CancelToken;
use crate::transaction::{Transaction, TransactionPayload};

/// Most transactions exchanged per pull.
pub const SYNC_BATCH: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockAnnouncement {
    pub block_index: u64,
    pub block_hash: String,
}

#[derive(Deserialize)]
struct PeerMempool {
    #[serde(default)]
    transactions: Vec<TransactionPayload>,
}

pub struct SyncService {
    client: Client,
    peers: Vec<String>,
    interval: Duration,
}

impl SyncService {
    pub fn new(peers: Vec<String>, interval: Duration, timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            peers: peers
                .into_iter()
                .map(|p| p.trim().trim_end_matches('/').to_string())
                .filter(|p| !p.is_empty())
                .collect(),
            interval,
        })
    }

    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    /// Push a newly queued transaction to every peer.
    pub async fn broadcast_tx(&self, tx: &Transaction) {
        let payload = TransactionPayload::from(tx);
        for peer in &self.peers {
            let url = format!("{peer}/api/sync/tx");
            if let Err(e) = self.client.post(&url).json(&payload).send().await {
                debug!("[sync] broadcast of {} to {peer} failed: {e}", tx.hash());
            }
        }
    }

    /// Tell every peer about a new tip.
    pub async fn announce_block(&self, index: u64, hash: &str) {
        let body = BlockAnnouncement {
            block_index: index,
            block_hash: hash.to_string(),
        };
        for peer in &self.peers {
            let url = format!("{peer}/api/sync/announce-block");
            if let Err(e) = self.client.post(&url).json(&body).send().await {
                debug!("[sync] announce of #{index} to {peer} failed: {e}");
            }
        }
    }

    /// Pull each peer's mempool into `ledger`. Returns how many
    /// transactions were newly queued.
    pub async fn pull_peer_mempool(&self, ledger: &Blockchain) -> usize {
        let mut queued = 0;
        for peer in &self.peers {
            let url = format!("{peer}/api/sync/mempool");
            let response = self
                .client
                .get(&url)
                .query(&[("limit", SYNC_BATCH)])
                .send()
                .await;
            let mempool: PeerMempool = match response {
                Ok(r) if r.status().is_success() => match r.json().await {
                    Ok(m) => m,
                    Err(e) => {
                        warn!("[sync] bad mempool payload from {peer}: {e}");
                        continue;
                    }
                },
                Ok(r) => {
                    debug!("[sync] {peer} answered {}", r.status());
                    continue;
                }
                Err(e) => {
                    debug!("[sync] peer mempool pull failed: {peer}: {e}");
                    continue;
                }
            };

            for payload in mempool.transactions {
                match Transaction::try_from(payload).and_then(|tx| ledger.submit_transaction(tx)) {
                    Ok(_) => queued += 1,
                    Err(LedgerError::Duplicate { .. }) => {}
                    Err(e) => debug!("[sync] dropped transaction from {peer}: {e}"),
                }
            }
        }
        queued
    }

    /// Start the periodic pull loop. `None` when there are no peers.
    pub fn spawn(self: Arc<Self>, ledger: Arc<Blockchain>, cancel: CancelToken) -> Option<JoinHandle<()>> {
        if self.peers.is_empty() {
            info!("[sync] no peers configured; sync service idle");
            return None;
        }
        info!("[sync] starting sync loop with peers: {:?}", self.peers);
        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.interval) => {}
                }
                let queued = self.pull_peer_mempool(&ledger).await;
                if queued > 0 {
                    info!("[sync] queued {queued} transactions from peers");
                }
            }
        }))
    }
}
