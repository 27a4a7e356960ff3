use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use super::{LedgerStore, Result, TxRecord, involved_addresses, output_owner};
use crate::blockchain::Block;
use crate::mempool::MempoolEntry;
use crate::transaction::{Amount, OutPoint, Utxo};

#[derive(Default)]
struct State {
    blocks: BTreeMap<u64, Block>,
    block_by_hash: HashMap<String, u64>,
    txs: HashMap<String, TxRecord>,
    tx_order: Vec<String>,
    txs_by_address: HashMap<String, Vec<String>>,
    utxos: HashMap<OutPoint, Utxo>,
    utxos_by_address: HashMap<String, BTreeSet<OutPoint>>,
    balances: HashMap<String, Amount>,
    mempool: Vec<MempoolEntry>,
}

/// Transient store. Same semantics as [`super::SledStore`], gone on restart.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for MemoryStore {
    fn put_block(&self, block: &Block) -> Result<()> {
        let mut s = self.state.write().expect("store lock poisoned");
        s.block_by_hash.insert(block.hash().to_string(), block.index());
        s.blocks.insert(block.index(), block.clone());
        Ok(())
    }

    fn block_by_index(&self, index: u64) -> Result<Option<Block>> {
        let s = self.state.read().expect("store lock poisoned");
        Ok(s.blocks.get(&index).cloned())
    }

    fn block_by_hash(&self, hash: &str) -> Result<Option<Block>> {
        let s = self.state.read().expect("store lock poisoned");
        Ok(s
            .block_by_hash
            .get(hash)
            .and_then(|i| s.blocks.get(i))
            .cloned())
    }

    fn latest_block(&self) -> Result<Option<Block>> {
        let s = self.state.read().expect("store lock poisoned");
        Ok(s.blocks.values().next_back().cloned())
    }

    fn latest_blocks(&self, limit: usize) -> Result<Vec<Block>> {
        let s = self.state.read().expect("store lock poisoned");
        Ok(s.blocks.values().rev().take(limit).cloned().collect())
    }

    fn block_count(&self) -> Result<u64> {
        let s = self.state.read().expect("store lock poisoned");
        Ok(s.blocks.len() as u64)
    }

    fn put_transaction(&self, record: &TxRecord) -> Result<()> {
        let mut s = self.state.write().expect("store lock poisoned");
        let hash = record.transaction.hash().to_string();
        let addresses = involved_addresses(&record.transaction, |op| {
            s.txs.get(&op.tx_hash).and_then(|r| output_owner(r, op))
        });
        if s.txs.insert(hash.clone(), record.clone()).is_none() {
            s.tx_order.push(hash.clone());
            for address in addresses {
                s.txs_by_address.entry(address).or_default().push(hash.clone());
            }
        }
        Ok(())
    }

    fn transaction(&self, hash: &str) -> Result<Option<TxRecord>> {
        let s = self.state.read().expect("store lock poisoned");
        Ok(s.txs.get(hash).cloned())
    }

    fn transactions_by_address(&self, address: &str) -> Result<Vec<TxRecord>> {
        let s = self.state.read().expect("store lock poisoned");
        Ok(s.txs_by_address
            .get(address)
            .map(|hashes| hashes.iter().filter_map(|h| s.txs.get(h)).cloned().collect())
            .unwrap_or_default())
    }

    fn latest_transactions(&self, limit: usize) -> Result<Vec<TxRecord>> {
        let s = self.state.read().expect("store lock poisoned");
        Ok(s.tx_order
            .iter()
            .rev()
            .take(limit)
            .filter_map(|h| s.txs.get(h))
            .cloned()
            .collect())
    }

    fn transaction_count(&self) -> Result<u64> {
        let s = self.state.read().expect("store lock poisoned");
        Ok(s.txs.len() as u64)
    }

    fn put_utxo(&self, utxo: &Utxo) -> Result<()> {
        let mut s = self.state.write().expect("store lock poisoned");
        let op = utxo.outpoint();
        s.utxos_by_address
            .entry(utxo.address.clone())
            .or_default()
            .insert(op.clone());
        s.utxos.insert(op, utxo.clone());
        Ok(())
    }

    fn utxo(&self, outpoint: &OutPoint) -> Result<Option<Utxo>> {
        let s = self.state.read().expect("store lock poisoned");
        Ok(s.utxos.get(outpoint).cloned())
    }

    fn delete_utxo(&self, outpoint: &OutPoint) -> Result<Option<Utxo>> {
        let mut s = self.state.write().expect("store lock poisoned");
        let removed = s.utxos.remove(outpoint);
        if let Some(utxo) = &removed {
            if let Some(set) = s.utxos_by_address.get_mut(&utxo.address) {
                set.remove(outpoint);
            }
        }
        Ok(removed)
    }

    fn utxos_by_address(&self, address: &str) -> Result<Vec<Utxo>> {
        let s = self.state.read().expect("store lock poisoned");
        Ok(s.utxos_by_address
            .get(address)
            .map(|ops| ops.iter().filter_map(|op| s.utxos.get(op)).cloned().collect())
            .unwrap_or_default())
    }

    fn utxo_count(&self) -> Result<u64> {
        let s = self.state.read().expect("store lock poisoned");
        Ok(s.utxos.len() as u64)
    }

    fn utxo_total_value(&self) -> Result<u128> {
        let s = self.state.read().expect("store lock poisoned");
        Ok(s.utxos.values().map(|u| u.amount as u128).sum())
    }

    fn largest_utxo(&self) -> Result<Option<Utxo>> {
        let s = self.state.read().expect("store lock poisoned");
        Ok(s.utxos.values().max_by_key(|u| u.amount).cloned())
    }

    fn balance(&self, address: &str) -> Result<Option<Amount>> {
        let s = self.state.read().expect("store lock poisoned");
        Ok(s.balances.get(address).copied())
    }

    fn set_balance(&self, address: &str, balance: Amount) -> Result<()> {
        let mut s = self.state.write().expect("store lock poisoned");
        s.balances.insert(address.to_string(), balance);
        Ok(())
    }

    fn mempool_add(&self, entry: &MempoolEntry) -> Result<bool> {
        let mut s = self.state.write().expect("store lock poisoned");
        if s.mempool.iter().any(|e| e.hash == entry.hash) {
            return Ok(false);
        }
        s.mempool.push(entry.clone());
        Ok(true)
    }

    fn mempool_remove(&self, hash: &str) -> Result<()> {
        let mut s = self.state.write().expect("store lock poisoned");
        s.mempool.retain(|e| e.hash != hash);
        Ok(())
    }

    fn mempool_list(&self, limit: usize) -> Result<Vec<MempoolEntry>> {
        let s = self.state.read().expect("store lock poisoned");
        Ok(s.mempool.iter().take(limit).cloned().collect())
    }
}
