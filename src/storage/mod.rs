//! Persistence collaborator used by the ledger engine.
//!
//! The engine only ever sees `Arc<dyn LedgerStore>`; which backend sits
//! behind it is decided once in [`crate::config::Config::open_store`].

pub mod durable;
pub mod memory;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

use crate::blockchain::Block;
use crate::mempool::MempoolEntry;
use crate::transaction::{Amount, OutPoint, Transaction, Utxo};

pub use durable::SledStore;
pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sled(#[from] sled::Error),
    #[error(transparent)]
    Codec(#[from] serde_json::Error),
    #[error("corrupt record in {0}")]
    Corrupt(&'static str),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A committed transaction together with the block that carries it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxRecord {
    pub transaction: Transaction,
    pub block_index: u64,
    pub block_hash: String,
    pub block_timestamp: i64,
}

impl TxRecord {
    pub fn new(transaction: &Transaction, block: &Block) -> Self {
        Self {
            transaction: transaction.clone(),
            block_index: block.index(),
            block_hash: block.hash().to_string(),
            block_timestamp: block.timestamp(),
        }
    }
}

pub trait LedgerStore: Send + Sync {
    fn put_block(&self, block: &Block) -> Result<()>;
    fn block_by_index(&self, index: u64) -> Result<Option<Block>>;
    fn block_by_hash(&self, hash: &str) -> Result<Option<Block>>;
    fn latest_block(&self) -> Result<Option<Block>>;
    /// Newest first.
    fn latest_blocks(&self, limit: usize) -> Result<Vec<Block>>;
    fn block_count(&self) -> Result<u64>;

    fn put_transaction(&self, record: &TxRecord) -> Result<()>;
    fn transaction(&self, hash: &str) -> Result<Option<TxRecord>>;
    /// Transactions paying to, or spending from, `address`.
    fn transactions_by_address(&self, address: &str) -> Result<Vec<TxRecord>>;
    /// Newest first.
    fn latest_transactions(&self, limit: usize) -> Result<Vec<TxRecord>>;
    fn transaction_count(&self) -> Result<u64>;

    fn put_utxo(&self, utxo: &Utxo) -> Result<()>;
    fn utxo(&self, outpoint: &OutPoint) -> Result<Option<Utxo>>;
    fn delete_utxo(&self, outpoint: &OutPoint) -> Result<Option<Utxo>>;
    fn utxos_by_address(&self, address: &str) -> Result<Vec<Utxo>>;
    fn utxo_count(&self) -> Result<u64>;
    fn utxo_total_value(&self) -> Result<u128>;
    fn largest_utxo(&self) -> Result<Option<Utxo>>;

    fn balance(&self, address: &str) -> Result<Option<Amount>>;
    fn set_balance(&self, address: &str, balance: Amount) -> Result<()>;

    /// Returns false when an entry with the same hash is already stored.
    fn mempool_add(&self, entry: &MempoolEntry) -> Result<bool>;
    fn mempool_remove(&self, hash: &str) -> Result<()>;
    /// Oldest first.
    fn mempool_list(&self, limit: usize) -> Result<Vec<MempoolEntry>>;
}

/// Addresses a transaction touches: every output address, plus the owner of
/// each spent output as recorded by `prior_output`.
pub(crate) fn involved_addresses<F>(tx: &Transaction, prior_output: F) -> BTreeSet<String>
where
    F: Fn(&OutPoint) -> Option<String>,
{
    let mut addresses: BTreeSet<String> =
        tx.outputs().iter().map(|o| o.address.clone()).collect();
    for input in tx.inputs().iter().filter(|i| !i.is_coinbase()) {
        if let Some(owner) = prior_output(&input.outpoint()) {
            addresses.insert(owner);
        }
    }
    addresses
}

/// Owner of output `outpoint` if the record is the transaction that created it.
pub(crate) fn output_owner(record: &TxRecord, outpoint: &OutPoint) -> Option<String> {
    record
        .transaction
        .outputs()
        .get(outpoint.output_index as usize)
        .map(|o| o.address.clone())
}

#[cfg(test)]
pub(crate) mod contract {
    //! Behaviour every backend must share, run against each of them.

    use super::*;
    use crate::blockchain::Block;
    use crate::transaction::{TxInput, TxOutput};

    fn utxo(tx: &str, idx: u32, amount: Amount, address: &str) -> Utxo {
        Utxo::from_output(tx, idx, &TxOutput::new(amount, address), 1)
    }

    pub fn blocks(store: &dyn LedgerStore) {
        assert!(store.latest_block().unwrap().is_none());
        let genesis = Block::genesis(Transaction::coinbase_at("g", 100, 0, 1));
        let next = Block::new_with_timestamp(
            1,
            genesis.hash().to_string(),
            vec![Transaction::coinbase_at("m", 10, 1, 2)],
            2,
        );
        store.put_block(&genesis).unwrap();
        store.put_block(&next).unwrap();

        assert_eq!(store.block_count().unwrap(), 2);
        assert_eq!(store.latest_block().unwrap().unwrap(), next);
        assert_eq!(store.block_by_index(0).unwrap().unwrap(), genesis);
        assert_eq!(store.block_by_hash(next.hash()).unwrap().unwrap(), next);
        assert!(store.block_by_index(7).unwrap().is_none());
        let latest = store.latest_blocks(5).unwrap();
        assert_eq!(latest.iter().map(Block::index).collect::<Vec<_>>(), vec![1, 0]);
    }

    pub fn transactions(store: &dyn LedgerStore) {
        let block = Block::genesis(Transaction::coinbase_at("alice", 50, 0, 1));
        let funding = &block.transactions()[0];
        store.put_transaction(&TxRecord::new(funding, &block)).unwrap();

        let spend = Transaction::transfer(
            vec![TxInput::new(OutPoint::new(funding.hash(), 0))],
            vec![TxOutput::new(50, "bob")],
            9,
        );
        store.put_transaction(&TxRecord::new(&spend, &block)).unwrap();

        assert_eq!(store.transaction_count().unwrap(), 2);
        assert_eq!(
            store.transaction(spend.hash()).unwrap().unwrap().transaction,
            spend
        );
        assert_eq!(store.transactions_by_address("alice").unwrap().len(), 2);
        assert_eq!(store.transactions_by_address("bob").unwrap().len(), 1);
        let latest = store.latest_transactions(1).unwrap();
        assert_eq!(latest[0].transaction.hash(), spend.hash());
    }

    pub fn utxos(store: &dyn LedgerStore) {
        store.put_utxo(&utxo("t1", 0, 5, "a")).unwrap();
        store.put_utxo(&utxo("t1", 1, 9, "a")).unwrap();
        store.put_utxo(&utxo("t2", 0, 3, "b")).unwrap();

        assert_eq!(store.utxo_count().unwrap(), 3);
        assert_eq!(store.utxo_total_value().unwrap(), 17);
        assert_eq!(store.largest_utxo().unwrap().unwrap().amount, 9);
        assert_eq!(store.utxos_by_address("a").unwrap().len(), 2);

        let gone = store.delete_utxo(&OutPoint::new("t1", 1)).unwrap();
        assert_eq!(gone.map(|u| u.amount), Some(9));
        assert!(store.utxo(&OutPoint::new("t1", 1)).unwrap().is_none());
        assert!(store.delete_utxo(&OutPoint::new("t1", 1)).unwrap().is_none());
        assert_eq!(store.utxos_by_address("a").unwrap().len(), 1);

        assert!(store.balance("a").unwrap().is_none());
        store.set_balance("a", 5).unwrap();
        assert_eq!(store.balance("a").unwrap(), Some(5));
    }

    pub fn mempool(store: &dyn LedgerStore) {
        let entries: Vec<MempoolEntry> = (0..3)
            .map(|i| MempoolEntry {
                hash: format!("h{i}"),
                transaction: Transaction::coinbase_at("x", 1, 0, i),
                fee: 0,
                enqueued_at: i,
            })
            .collect();
        for e in &entries {
            assert!(store.mempool_add(e).unwrap());
        }
        assert!(!store.mempool_add(&entries[0]).unwrap());

        store.mempool_remove("h1").unwrap();
        store.mempool_remove("missing").unwrap();
        let hashes: Vec<String> = store
            .mempool_list(10)
            .unwrap()
            .into_iter()
            .map(|e| e.hash)
            .collect();
        assert_eq!(hashes, vec!["h0", "h2"]);
    }
}
