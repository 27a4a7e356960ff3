use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, RwLock};

use super::model::{Amount, Transaction, TxOutput};
use crate::storage::{LedgerStore, StoreError};

/// Identifies a specific transaction output by its tx hash and index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutPoint {
    pub tx_hash: String,
    pub output_index: u32,
}

impl OutPoint {
    pub fn new(tx_hash: impl Into<String>, output_index: u32) -> Self {
        Self {
            tx_hash: tx_hash.into(),
            output_index,
        }
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tx_hash, self.output_index)
    }
}

/// An unspent output. Created once, destroyed once, never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Utxo {
    pub tx_hash: String,
    pub output_index: u32,
    pub amount: Amount,
    pub address: String,
    pub script_pub_key: String,
    pub block_height: u64,
}

impl Utxo {
    pub fn from_output(tx_hash: &str, output_index: u32, output: &TxOutput, block_height: u64) -> Self {
        Self {
            tx_hash: tx_hash.to_string(),
            output_index,
            amount: output.amount,
            address: output.address.clone(),
            script_pub_key: output.script_pub_key.clone(),
            block_height,
        }
    }

    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.tx_hash.clone(), self.output_index)
    }
}

/// Authoritative unspent-output index plus the derived balance cache.
///
/// Writers hold `guard` exclusively across the store mutation and the
/// balance refresh, so no reader ever sees a balance that disagrees with
/// the outputs it summarises.
pub struct UtxoSet {
    store: Arc<dyn LedgerStore>,
    guard: RwLock<()>,
}

impl UtxoSet {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            guard: RwLock::new(()),
        }
    }

    pub fn add(
        &self,
        outpoint: OutPoint,
        output: &TxOutput,
        block_height: u64,
    ) -> Result<(), StoreError> {
        let _w = self.guard.write().expect("utxo lock poisoned");
        let utxo = Utxo::from_output(&outpoint.tx_hash, outpoint.output_index, output, block_height);
        self.store.put_utxo(&utxo)?;
        self.refresh_balance(&utxo.address)?;
        Ok(())
    }

    /// Spend (remove) a single outpoint. Returns the removed output if it existed.
    pub fn remove(&self, outpoint: &OutPoint) -> Result<Option<Utxo>, StoreError> {
        let _w = self.guard.write().expect("utxo lock poisoned");
        let removed = self.store.delete_utxo(outpoint)?;
        if let Some(utxo) = &removed {
            self.refresh_balance(&utxo.address)?;
        }
        Ok(removed)
    }

    /// Spend every real input of `tx` and add all of its outputs, then
    /// refresh the balance of each touched address. Returns those addresses.
    pub fn apply_transaction(
        &self,
        tx: &Transaction,
        block_height: u64,
    ) -> Result<BTreeSet<String>, StoreError> {
        let _w = self.guard.write().expect("utxo lock poisoned");
        let mut touched = BTreeSet::new();

        if !tx.is_coinbase() {
            for input in tx.inputs().iter().filter(|i| !i.is_coinbase()) {
                if let Some(spent) = self.store.delete_utxo(&input.outpoint())? {
                    touched.insert(spent.address);
                }
            }
        }

        for (i, out) in tx.outputs().iter().enumerate() {
            let utxo = Utxo::from_output(tx.hash(), i as u32, out, block_height);
            self.store.put_utxo(&utxo)?;
            touched.insert(utxo.address);
        }

        for address in &touched {
            self.refresh_balance(address)?;
        }
        Ok(touched)
    }

    pub fn get(&self, outpoint: &OutPoint) -> Result<Option<Utxo>, StoreError> {
        let _r = self.guard.read().expect("utxo lock poisoned");
        self.store.utxo(outpoint)
    }

    pub fn contains(&self, outpoint: &OutPoint) -> Result<bool, StoreError> {
        Ok(self.get(outpoint)?.is_some())
    }

    pub fn list_by_address(&self, address: &str) -> Result<Vec<Utxo>, StoreError> {
        let _r = self.guard.read().expect("utxo lock poisoned");
        self.store.utxos_by_address(address)
    }

    /// Cached balance; computed and cached on first lookup of an address.
    pub fn balance(&self, address: &str) -> Result<Amount, StoreError> {
        {
            let _r = self.guard.read().expect("utxo lock poisoned");
            if let Some(cached) = self.store.balance(address)? {
                return Ok(cached);
            }
        }
        let _w = self.guard.write().expect("utxo lock poisoned");
        self.refresh_balance(address)
    }

    pub fn total_count(&self) -> Result<u64, StoreError> {
        let _r = self.guard.read().expect("utxo lock poisoned");
        self.store.utxo_count()
    }

    pub fn total_value(&self) -> Result<u128, StoreError> {
        let _r = self.guard.read().expect("utxo lock poisoned");
        self.store.utxo_total_value()
    }

    pub fn largest(&self) -> Result<Option<Utxo>, StoreError> {
        let _r = self.guard.read().expect("utxo lock poisoned");
        self.store.largest_utxo()
    }

    // Caller holds the write guard.
    fn refresh_balance(&self, address: &str) -> Result<Amount, StoreError> {
        let sum: u128 = self
            .store
            .utxos_by_address(address)?
            .iter()
            .map(|u| u.amount as u128)
            .sum();
        let sum = Amount::try_from(sum).unwrap_or(Amount::MAX);
        self.store.set_balance(address, sum)?;
        Ok(sum)
    }
}
