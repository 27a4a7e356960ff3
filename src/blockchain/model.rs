use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use super::pow::meets_threshold;
use super::{Block, BlockSubmission, ChainParams, GENESIS_ADDRESS, GENESIS_SUPPLY, GENESIS_TIMESTAMP};
use crate::error::{LedgerError, Result};
use crate::mempool::{EnqueueOutcome, Mempool, MempoolEntry, MempoolStatus, RejectReason};
use crate::miner::CancelToken;
use crate::storage::{LedgerStore, TxRecord};
use crate::transaction::{Amount, NULL_TX_HASH, OutPoint, Transaction, Utxo, UtxoSet};

/// Summary of the highest committed block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainTip {
    pub index: u64,
    pub hash: String,
    pub previous_hash: String,
    pub timestamp: i64,
}

impl ChainTip {
    /// Synthetic tip of a chain with no blocks.
    pub fn empty() -> Self {
        Self {
            index: 0,
            hash: NULL_TX_HASH.to_string(),
            previous_hash: NULL_TX_HASH.to_string(),
            timestamp: 0,
        }
    }

    fn of(block: &Block) -> Self {
        Self {
            index: block.index(),
            hash: block.hash().to_string(),
            previous_hash: block.previous_hash().to_string(),
            timestamp: block.timestamp(),
        }
    }

    fn check_extends(&self, index: u64, previous_hash: &str) -> Result<()> {
        if index != self.index + 1 {
            return Err(LedgerError::Linkage(format!(
                "invalid index: expected {}, got {index}",
                self.index + 1
            )));
        }
        if previous_hash != self.hash {
            return Err(LedgerError::Linkage(format!(
                "invalid previousHash: expected {}, got {previous_hash}",
                self.hash
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MiningInfo {
    pub difficulty: u32,
    pub mining_reward: Amount,
    pub latest_block: ChainTip,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    pub index: u64,
    pub hash: String,
}

/// Result of a successful block acceptance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Accepted {
    pub accepted: bool,
    pub block: BlockRef,
    pub tx_count: usize,
}

impl Accepted {
    fn of(block: &Block) -> Self {
        Self {
            accepted: true,
            block: BlockRef {
                index: block.index(),
                hash: block.hash().to_string(),
            },
            tx_count: block.transactions().len(),
        }
    }
}

/// A transaction admitted to the mempool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Queued {
    pub hash: String,
    pub fee: Amount,
    pub position: usize,
    pub size: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UtxoStats {
    pub total_utxos: u64,
    pub total_value: u128,
    pub average_value: u128,
    pub largest_utxo: Option<Utxo>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStats {
    pub total_blocks: u64,
    pub total_transactions: u64,
    pub difficulty: u32,
    pub mining_reward: Amount,
    pub pending_transactions: usize,
    pub total_utxos: u64,
    pub latest_block: ChainTip,
}

/// The ledger engine: owns the chain tip and orchestrates the UTXO set,
/// the mempool and the store.
///
/// Every state change goes through [`Blockchain::commit`] while the tip
/// mutex is held, so read-tip, validate and commit form one critical
/// section for both submitted and locally mined blocks.
pub struct Blockchain {
    store: Arc<dyn LedgerStore>,
    utxos: UtxoSet,
    mempool: Mempool,
    params: ChainParams,
    tip: Mutex<ChainTip>,
}

impl Blockchain {
    /// Build the engine on `store` and bring it to a usable state.
    pub fn open(store: Arc<dyn LedgerStore>, params: ChainParams) -> Result<Self> {
        let params = params.normalized();
        let bc = Self {
            utxos: UtxoSet::new(Arc::clone(&store)),
            mempool: Mempool::new(params.mempool_max_size, Arc::clone(&store)),
            store,
            params,
            tip: Mutex::new(ChainTip::empty()),
        };
        bc.initialize()?;
        Ok(bc)
    }

    /// Create the genesis block on an empty store, load the tip and reload
    /// pending transactions.
    pub fn initialize(&self) -> Result<()> {
        let mut tip = self.lock_tip();
        match self.store.latest_block()? {
            Some(latest) => {
                *tip = ChainTip::of(&latest);
                info!(
                    "Loaded chain tip #{} ({}), difficulty={}",
                    tip.index, tip.hash, self.params.difficulty
                );
            }
            None => {
                let genesis = Block::genesis(Transaction::coinbase_at(
                    GENESIS_ADDRESS,
                    GENESIS_SUPPLY,
                    0,
                    GENESIS_TIMESTAMP,
                ));
                self.commit(&mut tip, &genesis)?;
                info!(
                    "Created genesis block {} ({} to {})",
                    genesis.hash(),
                    GENESIS_SUPPLY,
                    GENESIS_ADDRESS
                );
            }
        }
        drop(tip);

        let restored = self.mempool.restore()?;
        if restored > 0 {
            info!("Restored {restored} pending transactions");
        }
        Ok(())
    }

    pub fn params(&self) -> ChainParams {
        self.params
    }

    pub fn tip(&self) -> ChainTip {
        self.lock_tip().clone()
    }

    pub fn mining_info(&self) -> MiningInfo {
        MiningInfo {
            difficulty: self.params.difficulty,
            mining_reward: self.params.mining_reward,
            latest_block: self.tip(),
        }
    }

    /// Validate a pre-mined candidate and, if every check passes, commit it.
    /// Nothing is written unless the whole block is accepted.
    pub fn accept(&self, payload: Value) -> Result<Accepted> {
        let submission = BlockSubmission::from_value(payload)?;
        let (index, miner) = (submission.index, submission.miner_address.clone());

        match self.accept_submission(submission) {
            Ok(accepted) => {
                info!(
                    "Accepted block #{} (hash={}, txs={}, miner={})",
                    accepted.block.index, accepted.block.hash, accepted.tx_count, miner
                );
                Ok(accepted)
            }
            Err(e) => {
                warn!("Rejected block #{index} from {miner}: {e} [{}]", e.kind());
                Err(e)
            }
        }
    }

    fn accept_submission(&self, submission: BlockSubmission) -> Result<Accepted> {
        let mut tip = self.lock_tip();
        tip.check_extends(submission.index, &submission.previous_hash)?;

        let transactions = submission
            .transactions
            .into_iter()
            .map(Transaction::try_from)
            .collect::<Result<Vec<_>>>()?;

        self.validate_body(&transactions, &submission.miner_address, true)?;

        let block = Block::from_parts(
            submission.index,
            submission.timestamp,
            transactions,
            submission.previous_hash,
            submission.nonce,
        );
        if block.hash() != submission.hash {
            return Err(LedgerError::Consensus(format!(
                "block hash mismatch: provided {}, calculated {}",
                submission.hash,
                block.hash()
            )));
        }
        if !meets_threshold(block.hash(), self.params.difficulty) {
            return Err(LedgerError::Consensus(format!(
                "hash {} does not meet difficulty {}",
                block.hash(),
                self.params.difficulty
            )));
        }

        self.commit(&mut tip, &block)?;
        Ok(Accepted::of(&block))
    }

    /// Coinbase rules plus per-transfer checks against the current UTXO set.
    /// Returns the total fees. Caller holds the tip lock.
    fn validate_body(
        &self,
        transactions: &[Transaction],
        miner_address: &str,
        verify_signatures: bool,
    ) -> Result<Amount> {
        let Some((coinbase, transfers)) = transactions.split_first() else {
            return Err(LedgerError::Consensus("block has no transactions".into()));
        };
        // A committed hash would overwrite its record and outputs.
        for tx in transactions {
            if self.store.transaction(tx.hash())?.is_some() {
                return Err(LedgerError::Consensus(format!(
                    "transaction {} is already in the chain",
                    tx.hash()
                )));
            }
        }
        if !coinbase.is_coinbase() {
            return Err(LedgerError::Consensus(
                "first transaction must be a coinbase".into(),
            ));
        }
        let payout = coinbase.total_output_amount();
        let reward = u128::from(self.params.mining_reward);
        if payout < reward {
            return Err(LedgerError::Consensus(format!(
                "coinbase pays {payout}, below the mining reward {reward}"
            )));
        }
        if !coinbase.outputs().iter().any(|o| o.address == miner_address) {
            return Err(LedgerError::Consensus(format!(
                "coinbase does not pay miner {miner_address}"
            )));
        }

        let mut spent: HashSet<OutPoint> = HashSet::new();
        let mut fees: Amount = 0;
        for tx in transfers {
            if tx.is_coinbase() {
                return Err(LedgerError::Consensus(format!(
                    "unexpected second coinbase {}",
                    tx.hash()
                )));
            }
            if verify_signatures && !tx.is_valid() {
                return Err(LedgerError::Signature(tx.hash().to_string()));
            }
            let inputs = self.input_values(tx, &mut spent)?;
            let fee = tx.calculate_fee(&inputs).ok_or_else(|| {
                LedgerError::Consensus(format!("transaction {} spends more than it owns", tx.hash()))
            })?;
            fees = fees
                .checked_add(fee)
                .ok_or_else(|| LedgerError::Consensus("fee total overflows".into()))?;
        }

        if payout > reward + u128::from(fees) {
            return Err(LedgerError::Consensus(format!(
                "coinbase pays {payout}, above reward {reward} plus fees {fees}"
            )));
        }
        Ok(fees)
    }

    /// Values of the outputs `tx` spends. Each must be unspent and not
    /// already claimed by an earlier transaction in `spent`.
    fn input_values(&self, tx: &Transaction, spent: &mut HashSet<OutPoint>) -> Result<Vec<Amount>> {
        let mut values = Vec::with_capacity(tx.inputs().len());
        for input in tx.inputs().iter().filter(|i| !i.is_coinbase()) {
            let outpoint = input.outpoint();
            if !spent.insert(outpoint.clone()) {
                return Err(LedgerError::DoubleSpend(format!(
                    "{outpoint} spent twice in one block"
                )));
            }
            let utxo = self
                .utxos
                .get(&outpoint)?
                .ok_or_else(|| LedgerError::DoubleSpend(format!("UTXO not found: {outpoint}")))?;
            values.push(utxo.amount);
        }
        Ok(values)
    }

    /// Apply a validated block. Caller holds the tip lock.
    fn commit(&self, tip: &mut ChainTip, block: &Block) -> Result<()> {
        self.store.put_block(block)?;
        let mut touched = 0;
        for tx in block.transactions() {
            self.store.put_transaction(&TxRecord::new(tx, block))?;
            touched += self.utxos.apply_transaction(tx, block.index())?.len();
            self.mempool.remove(tx.hash())?;
        }
        let purged = self.purge_conflicts(block)?;
        *tip = ChainTip::of(block);
        debug!(
            "Committed block #{} ({} txs, {} balances refreshed, {} conflicts purged, mempool={})",
            block.index(),
            block.transactions().len(),
            touched,
            purged,
            self.mempool.size()
        );
        Ok(())
    }

    /// Drop queued transactions that spend an output `block` just consumed.
    fn purge_conflicts(&self, block: &Block) -> Result<usize> {
        let spent: HashSet<OutPoint> = block
            .transactions()
            .iter()
            .flat_map(|tx| tx.inputs().iter())
            .filter(|i| !i.is_coinbase())
            .map(|i| i.outpoint())
            .collect();
        if spent.is_empty() {
            return Ok(0);
        }

        let mut purged = 0;
        for entry in self.mempool.peek(self.mempool.size()) {
            let conflicts = entry
                .transaction
                .inputs()
                .iter()
                .any(|i| spent.contains(&i.outpoint()));
            if conflicts && self.mempool.remove(&entry.hash)? {
                purged += 1;
            }
        }
        Ok(purged)
    }

    /// Commit a block this node mined itself. The tip may have moved during
    /// the nonce search, so linkage and UTXO availability are checked again.
    fn commit_local(&self, block: &Block, miner_address: &str) -> Result<()> {
        let mut tip = self.lock_tip();
        tip.check_extends(block.index(), block.previous_hash())?;
        self.validate_body(block.transactions(), miner_address, false)?;
        self.commit(&mut tip, block)
    }

    /// Oldest pending transactions that still fit on the current UTXO set,
    /// with their total fee. Entries whose inputs are gone are evicted.
    fn select_transactions(&self) -> Result<(Vec<Transaction>, Amount)> {
        let mut spent = HashSet::new();
        let mut picked = Vec::new();
        let mut fees: Amount = 0;

        for entry in self.mempool.peek(self.params.batch_size) {
            let tx = entry.transaction;
            let mut trial = spent.clone();
            match self.input_values(&tx, &mut trial) {
                Ok(values) => match tx.calculate_fee(&values) {
                    Some(fee) => {
                        spent = trial;
                        fees = fees.saturating_add(fee);
                        picked.push(tx);
                    }
                    None => self.evict(tx.hash(), "spends more than it owns")?,
                },
                Err(LedgerError::DoubleSpend(reason)) => {
                    if tx
                        .inputs()
                        .iter()
                        .any(|i| !spent.contains(&i.outpoint()) && !self.utxo_exists(&i.outpoint()))
                    {
                        self.evict(tx.hash(), &reason)?;
                    } else {
                        debug!("Deferring {}: conflicts with a selected transaction", tx.hash());
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok((picked, fees))
    }

    fn utxo_exists(&self, outpoint: &OutPoint) -> bool {
        self.utxos.contains(outpoint).unwrap_or(false)
    }

    fn evict(&self, hash: &str, reason: &str) -> Result<()> {
        if self.mempool.remove(hash)? {
            debug!("Evicted stale mempool entry {hash}: {reason}");
        }
        Ok(())
    }

    fn candidate(
        &self,
        miner_address: &str,
        transfers: Vec<Transaction>,
        fees: Amount,
    ) -> Result<Block> {
        let tip = self.tip();
        let height = tip.index + 1;
        let payout = self.params.mining_reward.saturating_add(fees);

        // The coinbase hash leaves out the height; step the timestamp past
        // any earlier coinbase with the same payee and amount.
        let mut timestamp = Utc::now().timestamp_millis();
        let coinbase = loop {
            let coinbase = Transaction::coinbase_at(miner_address, payout, height, timestamp);
            if self.store.transaction(coinbase.hash())?.is_none() {
                break coinbase;
            }
            timestamp += 1;
        };

        let mut transactions = Vec::with_capacity(1 + transfers.len());
        transactions.push(coinbase);
        transactions.extend(transfers);
        Ok(Block::new(height, tip.hash, transactions))
    }

    /// Run the nonce search on the blocking pool.
    async fn seal(&self, mut block: Block, cancel: &CancelToken) -> Result<Block> {
        let difficulty = self.params.difficulty;
        let cancel = cancel.clone();
        let started = Instant::now();
        let (block, found) = tokio::task::spawn_blocking(move || {
            let found = block.mine(difficulty, &cancel);
            (block, found)
        })
        .await
        .map_err(|e| LedgerError::Worker(e.to_string()))?;

        if !found {
            return Err(LedgerError::Cancelled);
        }
        debug!(
            "Sealed block #{} in {} ms (nonce={}, difficulty={})",
            block.index(),
            started.elapsed().as_millis(),
            block.nonce(),
            difficulty
        );
        Ok(block)
    }

    /// Mine the oldest pending transactions into a new block paying
    /// `miner_address`. `Ok(None)` when nothing is pending.
    pub async fn mine_pending_transactions(
        &self,
        miner_address: &str,
        cancel: &CancelToken,
    ) -> Result<Option<Block>> {
        require_miner(miner_address)?;
        let (transfers, fees) = self.select_transactions()?;
        if transfers.is_empty() {
            return Ok(None);
        }

        let block = self.seal(self.candidate(miner_address, transfers, fees)?, cancel).await?;
        self.commit_local(&block, miner_address)?;
        info!(
            "Mined block #{} with {} transactions (hash={}, fees={})",
            block.index(),
            block.transactions().len(),
            block.hash(),
            fees
        );
        Ok(Some(block))
    }

    /// Validate one signed transfer and mine it straight into a block,
    /// bypassing the mempool queue.
    pub async fn process_signed_transaction(
        &self,
        tx: Transaction,
        miner_address: &str,
        cancel: &CancelToken,
    ) -> Result<Block> {
        require_miner(miner_address)?;
        let fee = self.check_transaction(&tx)?;
        let hash = tx.hash().to_string();

        let block = self.seal(self.candidate(miner_address, vec![tx], fee)?, cancel).await?;
        self.commit_local(&block, miner_address)?;
        info!("Transaction {hash} mined immediately in block #{}", block.index());
        Ok(block)
    }

    /// Admission checks for a loose transfer. Returns its fee.
    pub fn check_transaction(&self, tx: &Transaction) -> Result<Amount> {
        if tx.is_coinbase() {
            return Err(LedgerError::Validation(
                "coinbase transactions cannot be submitted".into(),
            ));
        }
        if !tx.is_valid() {
            return Err(LedgerError::Signature(tx.hash().to_string()));
        }
        let values = self.input_values(tx, &mut HashSet::new())?;
        tx.calculate_fee(&values).ok_or_else(|| {
            LedgerError::Consensus(format!("transaction {} spends more than it owns", tx.hash()))
        })
    }

    /// Check a transfer and queue it for mining.
    pub fn submit_transaction(&self, tx: Transaction) -> Result<Queued> {
        let fee = self.check_transaction(&tx)?;
        let hash = tx.hash().to_string();
        match self.mempool.enqueue(tx, fee)? {
            EnqueueOutcome {
                inserted: true,
                position: Some(position),
                ..
            } => {
                debug!("Queued {hash} at position {position} (fee={fee})");
                Ok(Queued {
                    hash,
                    fee,
                    position,
                    size: self.mempool.size(),
                })
            }
            EnqueueOutcome {
                reason: Some(RejectReason::Duplicate),
                position,
                ..
            } => Err(LedgerError::Duplicate {
                hash,
                position: position.unwrap_or_default(),
            }),
            _ => Err(LedgerError::Capacity {
                max: self.mempool.max_size(),
            }),
        }
    }

    pub fn dequeue(&self) -> Result<Option<Transaction>> {
        Ok(self.mempool.dequeue()?)
    }

    pub fn pending_transactions(&self, limit: usize) -> Vec<MempoolEntry> {
        self.mempool.peek(limit)
    }

    pub fn mempool_status(&self, sample: usize) -> MempoolStatus {
        self.mempool.status(sample)
    }

    pub fn balance(&self, address: &str) -> Result<Amount> {
        Ok(self.utxos.balance(address)?)
    }

    pub fn utxos(&self, address: &str) -> Result<Vec<Utxo>> {
        Ok(self.utxos.list_by_address(address)?)
    }

    pub fn transaction(&self, hash: &str) -> Result<Option<TxRecord>> {
        Ok(self.store.transaction(hash)?)
    }

    pub fn address_transactions(&self, address: &str) -> Result<Vec<TxRecord>> {
        Ok(self.store.transactions_by_address(address)?)
    }

    pub fn block_by_index(&self, index: u64) -> Result<Option<Block>> {
        Ok(self.store.block_by_index(index)?)
    }

    pub fn block_by_hash(&self, hash: &str) -> Result<Option<Block>> {
        Ok(self.store.block_by_hash(hash)?)
    }

    pub fn latest_blocks(&self, limit: usize) -> Result<Vec<Block>> {
        Ok(self.store.latest_blocks(limit)?)
    }

    pub fn latest_transactions(&self, limit: usize) -> Result<Vec<TxRecord>> {
        Ok(self.store.latest_transactions(limit)?)
    }

    pub fn utxo_stats(&self) -> Result<UtxoStats> {
        let total_utxos = self.utxos.total_count()?;
        let total_value = self.utxos.total_value()?;
        Ok(UtxoStats {
            total_utxos,
            total_value,
            average_value: total_value.checked_div(u128::from(total_utxos)).unwrap_or(0),
            largest_utxo: self.utxos.largest()?,
        })
    }

    pub fn network_stats(&self) -> Result<NetworkStats> {
        Ok(NetworkStats {
            total_blocks: self.store.block_count()?,
            total_transactions: self.store.transaction_count()?,
            difficulty: self.params.difficulty,
            mining_reward: self.params.mining_reward,
            pending_transactions: self.mempool.size(),
            total_utxos: self.utxos.total_count()?,
            latest_block: self.tip(),
        })
    }

    fn lock_tip(&self) -> MutexGuard<'_, ChainTip> {
        self.tip.lock().expect("tip mutex poisoned")
    }
}

fn require_miner(miner_address: &str) -> Result<()> {
    if miner_address.trim().is_empty() {
        return Err(LedgerError::Validation("minerAddress is required".into()));
    }
    Ok(())
}
