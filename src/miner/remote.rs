use log::{debug, error, info, warn};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use thiserror::Error;

use super::CancelToken;
use crate::blockchain::{Accepted, Block, BlockSubmission, MiningInfo};
use crate::transaction::{OutPoint, Transaction, TransactionPayload};

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("backend request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend rejected the request: {0}")]
    Rejected(String),

    #[error("mining cancelled")]
    Cancelled,

    #[error("mining worker failed: {0}")]
    Worker(String),
}

/// `{success, data}` wrapper the node puts around read responses.
#[derive(Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
    #[serde(default)]
    error: Option<String>,
}

impl<T> Envelope<T> {
    fn into_data(self, what: &str) -> Result<T, RemoteError> {
        match (self.success, self.data) {
            (true, Some(data)) => Ok(data),
            _ => Err(RemoteError::Rejected(
                self.error.unwrap_or_else(|| format!("{what} failed")),
            )),
        }
    }
}

#[derive(Deserialize)]
struct PendingList {
    transactions: Vec<Pending>,
}

#[derive(Deserialize)]
struct Pending {
    transaction: TransactionPayload,
}

#[derive(Deserialize)]
struct SubmitReply {
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    accepted: Option<Accepted>,
}

/// Mines for a backend node: fetch parameters and pending transactions,
/// build and seal a candidate locally, then submit it for verification.
pub struct RemoteMiner {
    client: Client,
    backend: String,
    address: String,
    batch_size: usize,
    interval: Duration,
}

impl RemoteMiner {
    pub fn new(
        backend: impl Into<String>,
        address: impl Into<String>,
        batch_size: usize,
        interval: Duration,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            backend: backend.into().trim_end_matches('/').to_string(),
            address: address.into(),
            batch_size: batch_size.max(1),
            interval,
        })
    }

    async fn mining_info(&self) -> Result<MiningInfo, RemoteError> {
        let url = format!("{}/api/blockchain/mining-info", self.backend);
        let envelope: Envelope<MiningInfo> = self.client.get(url).send().await?.json().await?;
        envelope.into_data("mining-info")
    }

    async fn pending(&self) -> Result<Vec<TransactionPayload>, RemoteError> {
        let url = format!("{}/api/blockchain/mempool", self.backend);
        let envelope: Envelope<PendingList> = self
            .client
            .get(url)
            .query(&[("limit", self.batch_size)])
            .send()
            .await?
            .json()
            .await?;
        Ok(envelope
            .into_data("mempool")?
            .transactions
            .into_iter()
            .map(|p| p.transaction)
            .collect())
    }

    async fn submit(&self, block: &Block) -> Result<Accepted, RemoteError> {
        let url = format!("{}/api/blockchain/submit-mined-block", self.backend);
        let submission = BlockSubmission {
            index: block.index(),
            timestamp: block.timestamp(),
            previous_hash: block.previous_hash().to_string(),
            nonce: block.nonce(),
            hash: block.hash().to_string(),
            miner_address: self.address.clone(),
            transactions: block.transactions().iter().map(TransactionPayload::from).collect(),
        };
        let response = self.client.post(url).json(&submission).send().await?;
        let status = response.status();
        let reply: SubmitReply = response.json().await?;
        match reply {
            SubmitReply {
                accepted: Some(accepted),
                ..
            } if status.is_success() => Ok(accepted),
            SubmitReply { error, .. } => Err(RemoteError::Rejected(
                error.unwrap_or_else(|| format!("submit-mined-block failed: {status}")),
            )),
        }
    }

    /// One attempt. `Ok(None)` when the backend has nothing pending.
    pub async fn mine_once(&self, cancel: &CancelToken) -> Result<Option<Accepted>, RemoteError> {
        let info = self.mining_info().await?;
        let pending = self.pending().await?;
        if pending.is_empty() {
            debug!("Mempool empty. Checking again in {} ms", self.interval.as_millis());
            return Ok(None);
        }

        let height = info.latest_block.index + 1;
        let mut transactions = vec![Transaction::coinbase(&self.address, info.mining_reward, height)];
        let mut claimed: HashSet<OutPoint> = HashSet::new();
        for payload in pending.into_iter().take(self.batch_size) {
            let hash = payload.hash.clone();
            let tx = match Transaction::try_from(payload) {
                Ok(tx) => tx,
                Err(e) => {
                    warn!("Skipping malformed pending transaction {hash}: {e}");
                    continue;
                }
            };
            let outpoints: Vec<OutPoint> = tx
                .inputs()
                .iter()
                .filter(|i| !i.is_coinbase())
                .map(|i| i.outpoint())
                .collect();
            if outpoints.iter().any(|o| claimed.contains(o)) {
                debug!("Skipping {hash}: conflicts with a transaction already in the block");
                continue;
            }
            claimed.extend(outpoints);
            transactions.push(tx);
        }
        let count = transactions.len() - 1;

        info!(
            "Mining block #{height} with difficulty {} and {count} txs...",
            info.difficulty
        );
        let started = Instant::now();
        let block = Block::new(height, info.latest_block.hash, transactions);
        let block = seal(block, info.difficulty, cancel).await?;

        let accepted = self.submit(&block).await?;
        info!(
            "Submitted block #{} {} accepted after {} ms (txCount={})",
            accepted.block.index,
            accepted.block.hash,
            started.elapsed().as_millis(),
            accepted.tx_count
        );
        Ok(Some(accepted))
    }

    /// Mine until cancelled, or a single attempt when `once` is set.
    pub async fn run(&self, cancel: CancelToken, once: bool) {
        info!("Miner ready. Backend: {} | Miner: {}", self.backend, self.address);
        loop {
            let outcome = self.mine_once(&cancel).await;
            let idle = match outcome {
                Ok(Some(_)) => false,
                Ok(None) => true,
                Err(RemoteError::Cancelled) => break,
                Err(e) => {
                    error!("Miner loop error: {e}");
                    true
                }
            };
            if once || cancel.is_cancelled() {
                break;
            }
            if idle {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.interval) => {}
                }
            }
        }
    }
}

async fn seal(mut block: Block, difficulty: u32, cancel: &CancelToken) -> Result<Block, RemoteError> {
    let cancel = cancel.clone();
    let (block, found) = tokio::task::spawn_blocking(move || {
        let found = block.mine(difficulty, &cancel);
        (block, found)
    })
    .await
    .map_err(|e| RemoteError::Worker(e.to_string()))?;
    if found { Ok(block) } else { Err(RemoteError::Cancelled) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::spawn_node;
    use crate::blockchain::{GENESIS_ADDRESS, GENESIS_SUPPLY, MINING_REWARD};
    use crate::transaction::model::testutil::{secret_key, signed_transfer};
    use crate::transaction::{OutPoint, TxOutput};

    fn miner(url: &str) -> RemoteMiner {
        RemoteMiner::new(
            url,
            "remote-miner",
            100,
            Duration::from_millis(10),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[actix_web::test]
    async fn mines_and_submits_to_backend() {
        let node = spawn_node().await;
        let cancel = CancelToken::new();
        assert!(miner(&node.url).mine_once(&cancel).await.unwrap().is_none());

        let genesis = node.ledger.block_by_index(0).unwrap().unwrap();
        let tx = signed_transfer(
            &[(OutPoint::new(genesis.transactions()[0].hash(), 0), &secret_key(1))],
            vec![
                TxOutput::new(25, "bob"),
                TxOutput::new(GENESIS_SUPPLY - 26, GENESIS_ADDRESS),
            ],
            2,
        );
        node.ledger.submit_transaction(tx).unwrap();

        let accepted = miner(&node.url)
            .mine_once(&cancel)
            .await
            .unwrap()
            .expect("block accepted");
        assert_eq!(accepted.block.index, 1);
        assert_eq!(accepted.tx_count, 2);
        assert_eq!(node.ledger.tip().hash, accepted.block.hash);
        assert_eq!(node.ledger.balance("remote-miner").unwrap(), MINING_REWARD);
        assert_eq!(node.ledger.balance("bob").unwrap(), 25);
    }

    #[actix_web::test]
    async fn conflicting_pending_spends_do_not_stall_the_miner() {
        let node = spawn_node().await;
        let genesis = node.ledger.block_by_index(0).unwrap().unwrap();
        let outpoint = OutPoint::new(genesis.transactions()[0].hash(), 0);
        for (to, ts) in [("bob", 2), ("carol", 3)] {
            let tx = signed_transfer(
                &[(outpoint.clone(), &secret_key(1))],
                vec![
                    TxOutput::new(5, to),
                    TxOutput::new(GENESIS_SUPPLY - 5, GENESIS_ADDRESS),
                ],
                ts,
            );
            node.ledger.submit_transaction(tx).unwrap();
        }
        assert_eq!(node.ledger.mempool_status(0).size, 2);

        let cancel = CancelToken::new();
        let accepted = miner(&node.url)
            .mine_once(&cancel)
            .await
            .unwrap()
            .expect("block accepted");
        assert_eq!(accepted.tx_count, 2);
        assert_eq!(node.ledger.tip().index, 1);
        assert_eq!(node.ledger.balance("bob").unwrap(), 5);
        assert_eq!(node.ledger.balance("carol").unwrap(), 0);

        // The losing spend is gone, so the next attempt finds nothing to do.
        assert_eq!(node.ledger.mempool_status(0).size, 0);
        assert!(miner(&node.url).mine_once(&cancel).await.unwrap().is_none());
    }

    #[actix_web::test]
    async fn unreachable_backend_is_an_error() {
        let m = RemoteMiner::new(
            "http://127.0.0.1:1",
            "remote-miner",
            10,
            Duration::from_millis(10),
            Duration::from_millis(500),
        )
        .unwrap();
        assert!(matches!(
            m.mine_once(&CancelToken::new()).await,
            Err(RemoteError::Http(_))
        ));
    }
}
