//! Background mining workers.
//!
//! [`LocalMiner`] drives the engine's own mempool; [`remote::RemoteMiner`]
//! mines for another node over HTTP.

mod cancel;
pub mod remote;

pub use cancel::CancelToken;
pub use remote::RemoteMiner;

use log::{debug, info, warn};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::blockchain::{BlockRef, Blockchain};
use crate::error::LedgerError;
use crate::sync::SyncService;

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MinerStatus {
    pub running: bool,
    pub mining: bool,
    pub miner_address: String,
    pub interval_ms: u64,
    pub blocks_mined: u64,
    pub last_block: Option<BlockRef>,
    pub last_error: Option<String>,
}

/// Periodically mines pending transactions into blocks paying one address.
pub struct LocalMiner {
    ledger: Arc<Blockchain>,
    sync: Option<Arc<SyncService>>,
    address: String,
    interval: Duration,
    status: Arc<Mutex<MinerStatus>>,
    active: Mutex<Option<CancelToken>>,
}

impl LocalMiner {
    pub fn new(
        ledger: Arc<Blockchain>,
        address: impl Into<String>,
        interval: Duration,
        sync: Option<Arc<SyncService>>,
    ) -> Self {
        let address = address.into();
        let status = MinerStatus {
            miner_address: address.clone(),
            interval_ms: interval.as_millis() as u64,
            ..MinerStatus::default()
        };
        Self {
            ledger,
            sync,
            address,
            interval,
            status: Arc::new(Mutex::new(status)),
            active: Mutex::new(None),
        }
    }

    /// Spawn the mining loop. Returns `Ok(false)` if it is already running.
    pub fn start(&self) -> Result<bool, LedgerError> {
        if self.address.trim().is_empty() {
            return Err(LedgerError::Validation(
                "MINER_ADDRESS is required to start the miner".into(),
            ));
        }
        let mut active = self.active.lock().expect("miner mutex poisoned");
        if active.as_ref().is_some_and(|t| !t.is_cancelled()) {
            return Ok(false);
        }

        let cancel = CancelToken::new();
        *active = Some(cancel.clone());
        update(&self.status, |s| {
            s.running = true;
            s.last_error = None;
        });

        let worker = Worker {
            ledger: Arc::clone(&self.ledger),
            sync: self.sync.clone(),
            address: self.address.clone(),
            interval: self.interval,
            status: Arc::clone(&self.status),
        };
        tokio::spawn(worker.run(cancel));
        Ok(true)
    }

    /// Signal the loop to stop, aborting any nonce search in progress.
    /// Returns false if it was not running.
    pub fn stop(&self) -> bool {
        let mut active = self.active.lock().expect("miner mutex poisoned");
        match active.take() {
            Some(cancel) => {
                cancel.cancel();
                update(&self.status, |s| s.running = false);
                true
            }
            None => false,
        }
    }

    pub fn status(&self) -> MinerStatus {
        self.status.lock().expect("miner mutex poisoned").clone()
    }
}

fn update(status: &Mutex<MinerStatus>, f: impl FnOnce(&mut MinerStatus)) {
    f(&mut status.lock().expect("miner mutex poisoned"));
}

struct Worker {
    ledger: Arc<Blockchain>,
    sync: Option<Arc<SyncService>>,
    address: String,
    interval: Duration,
    status: Arc<Mutex<MinerStatus>>,
}

impl Worker {
    async fn run(self, cancel: CancelToken) {
        info!(
            "Local miner started for {} (every {} ms)",
            self.address,
            self.interval.as_millis()
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }

            update(&self.status, |s| s.mining = true);
            let outcome = self
                .ledger
                .mine_pending_transactions(&self.address, &cancel)
                .await;
            update(&self.status, |s| s.mining = false);

            match outcome {
                Ok(Some(block)) => {
                    let mined = BlockRef {
                        index: block.index(),
                        hash: block.hash().to_string(),
                    };
                    update(&self.status, |s| {
                        s.blocks_mined += 1;
                        s.last_block = Some(mined);
                        s.last_error = None;
                    });
                    if let Some(sync) = &self.sync {
                        sync.announce_block(block.index(), block.hash()).await;
                    }
                }
                Ok(None) => debug!(
                    "Mempool empty. Checking again in {} ms",
                    self.interval.as_millis()
                ),
                Err(LedgerError::Cancelled) => break,
                Err(e) => {
                    warn!("Mining attempt failed: {e} [{}]", e.kind());
                    update(&self.status, |s| s.last_error = Some(e.to_string()));
                }
            }
        }
        info!("Local miner for {} stopped", self.address);
    }
}
