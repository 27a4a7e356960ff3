use serde::Serialize;
use serde::de::DeserializeOwned;
use sled::{Config, Db, Tree};
use std::path::Path;

use super::{LedgerStore, Result, StoreError, TxRecord, involved_addresses, output_owner};
use crate::blockchain::Block;
use crate::mempool::MempoolEntry;
use crate::transaction::{Amount, OutPoint, Utxo};

/// Separator between an address and the key it indexes.
const SEP: u8 = 0;

const EMPTY: &[u8] = &[];

/// Durable store on sled trees. Values are JSON; numeric keys are
/// big-endian so iteration order is numeric order.
///
/// Sled handles are Arc-wrapped internally, so cloning is cheap.
#[derive(Clone)]
pub struct SledStore {
    db: Db,
    /// index -> block
    blocks: Tree,
    /// hash -> index
    block_hashes: Tree,
    /// hash -> TxRecord
    txs: Tree,
    /// insertion sequence -> hash
    tx_seq: Tree,
    /// address ‖ SEP ‖ tx hash -> ()
    address_txs: Tree,
    /// "txhash:index" -> Utxo
    utxos: Tree,
    /// address ‖ SEP ‖ "txhash:index" -> ()
    address_utxos: Tree,
    /// address -> balance
    balances: Tree,
    /// insertion sequence -> MempoolEntry
    mempool: Tree,
    /// hash -> insertion sequence
    mempool_hashes: Tree,
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

fn u64_key(n: u64) -> [u8; 8] {
    n.to_be_bytes()
}

fn read_u64(bytes: &[u8], tree: &'static str) -> Result<u64> {
    let arr: [u8; 8] = bytes.try_into().map_err(|_| StoreError::Corrupt(tree))?;
    Ok(u64::from_be_bytes(arr))
}

fn utxo_key(outpoint: &OutPoint) -> Vec<u8> {
    outpoint.to_string().into_bytes()
}

fn address_key(address: &str, suffix: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(address.len() + 1 + suffix.len());
    key.extend_from_slice(address.as_bytes());
    key.push(SEP);
    key.extend_from_slice(suffix);
    key
}

fn address_prefix(address: &str) -> Vec<u8> {
    address_key(address, &[])
}

impl SledStore {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_db(Config::default().path(path).open()?)
    }

    /// Throwaway database removed on drop.
    pub fn temporary() -> Result<Self> {
        Self::with_db(Config::new().temporary(true).open()?)
    }

    fn with_db(db: Db) -> Result<Self> {
        Ok(Self {
            blocks: db.open_tree("blocks")?,
            block_hashes: db.open_tree("block_hashes")?,
            txs: db.open_tree("txs")?,
            tx_seq: db.open_tree("tx_seq")?,
            address_txs: db.open_tree("address_txs")?,
            utxos: db.open_tree("utxos")?,
            address_utxos: db.open_tree("address_utxos")?,
            balances: db.open_tree("balances")?,
            mempool: db.open_tree("mempool")?,
            mempool_hashes: db.open_tree("mempool_hashes")?,
            db,
        })
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn decode_all<T: DeserializeOwned>(
        iter: impl Iterator<Item = sled::Result<(sled::IVec, sled::IVec)>>,
    ) -> Result<Vec<T>> {
        iter.map(|kv| {
            let (_, v) = kv?;
            decode(&v)
        })
        .collect()
    }
}

impl LedgerStore for SledStore {
    fn put_block(&self, block: &Block) -> Result<()> {
        self.blocks.insert(u64_key(block.index()), encode(block)?)?;
        self.block_hashes
            .insert(block.hash().as_bytes(), u64_key(block.index()).to_vec())?;
        Ok(())
    }

    fn block_by_index(&self, index: u64) -> Result<Option<Block>> {
        self.blocks
            .get(u64_key(index))?
            .map(|v| decode(&v))
            .transpose()
    }

    fn block_by_hash(&self, hash: &str) -> Result<Option<Block>> {
        match self.block_hashes.get(hash.as_bytes())? {
            Some(index) => self.block_by_index(read_u64(&index, "block_hashes")?),
            None => Ok(None),
        }
    }

    fn latest_block(&self) -> Result<Option<Block>> {
        self.blocks.last()?.map(|(_, v)| decode(&v)).transpose()
    }

    fn latest_blocks(&self, limit: usize) -> Result<Vec<Block>> {
        Self::decode_all(self.blocks.iter().rev().take(limit))
    }

    fn block_count(&self) -> Result<u64> {
        Ok(self.blocks.len() as u64)
    }

    fn put_transaction(&self, record: &TxRecord) -> Result<()> {
        let hash = record.transaction.hash();
        let previous = self.txs.insert(hash.as_bytes(), encode(record)?)?;
        if previous.is_some() {
            return Ok(());
        }

        self.tx_seq
            .insert(u64_key(self.db.generate_id()?), hash.as_bytes())?;

        let addresses = involved_addresses(&record.transaction, |op| {
            self.transaction(&op.tx_hash)
                .ok()
                .flatten()
                .and_then(|r| output_owner(&r, op))
        });
        for address in addresses {
            self.address_txs
                .insert(address_key(&address, hash.as_bytes()), EMPTY)?;
        }
        Ok(())
    }

    fn transaction(&self, hash: &str) -> Result<Option<TxRecord>> {
        self.txs.get(hash.as_bytes())?.map(|v| decode(&v)).transpose()
    }

    fn transactions_by_address(&self, address: &str) -> Result<Vec<TxRecord>> {
        let prefix = address_prefix(address);
        let mut out = Vec::new();
        for kv in self.address_txs.scan_prefix(&prefix) {
            let (key, _) = kv?;
            let hash = std::str::from_utf8(&key[prefix.len()..])
                .map_err(|_| StoreError::Corrupt("address_txs"))?;
            if let Some(record) = self.transaction(hash)? {
                out.push(record);
            }
        }
        Ok(out)
    }

    fn latest_transactions(&self, limit: usize) -> Result<Vec<TxRecord>> {
        let mut out = Vec::with_capacity(limit);
        for kv in self.tx_seq.iter().rev().take(limit) {
            let (_, hash) = kv?;
            let hash = std::str::from_utf8(&hash).map_err(|_| StoreError::Corrupt("tx_seq"))?;
            if let Some(record) = self.transaction(hash)? {
                out.push(record);
            }
        }
        Ok(out)
    }

    fn transaction_count(&self) -> Result<u64> {
        Ok(self.txs.len() as u64)
    }

    fn put_utxo(&self, utxo: &Utxo) -> Result<()> {
        let key = utxo_key(&utxo.outpoint());
        self.utxos.insert(&key, encode(utxo)?)?;
        self.address_utxos
            .insert(address_key(&utxo.address, &key), EMPTY)?;
        Ok(())
    }

    fn utxo(&self, outpoint: &OutPoint) -> Result<Option<Utxo>> {
        self.utxos
            .get(utxo_key(outpoint))?
            .map(|v| decode(&v))
            .transpose()
    }

    fn delete_utxo(&self, outpoint: &OutPoint) -> Result<Option<Utxo>> {
        let key = utxo_key(outpoint);
        let removed: Option<Utxo> = self.utxos.remove(&key)?.map(|v| decode(&v)).transpose()?;
        if let Some(utxo) = &removed {
            self.address_utxos.remove(address_key(&utxo.address, &key))?;
        }
        Ok(removed)
    }

    fn utxos_by_address(&self, address: &str) -> Result<Vec<Utxo>> {
        let prefix = address_prefix(address);
        let mut out = Vec::new();
        for kv in self.address_utxos.scan_prefix(&prefix) {
            let (key, _) = kv?;
            if let Some(v) = self.utxos.get(&key[prefix.len()..])? {
                out.push(decode(&v)?);
            }
        }
        Ok(out)
    }

    fn utxo_count(&self) -> Result<u64> {
        Ok(self.utxos.len() as u64)
    }

    fn utxo_total_value(&self) -> Result<u128> {
        let all: Vec<Utxo> = Self::decode_all(self.utxos.iter())?;
        Ok(all.iter().map(|u| u.amount as u128).sum())
    }

    fn largest_utxo(&self) -> Result<Option<Utxo>> {
        let all: Vec<Utxo> = Self::decode_all(self.utxos.iter())?;
        Ok(all.into_iter().max_by_key(|u| u.amount))
    }

    fn balance(&self, address: &str) -> Result<Option<Amount>> {
        self.balances
            .get(address.as_bytes())?
            .map(|v| read_u64(&v, "balances"))
            .transpose()
    }

    fn set_balance(&self, address: &str, balance: Amount) -> Result<()> {
        self.balances
            .insert(address.as_bytes(), u64_key(balance).to_vec())?;
        Ok(())
    }

    fn mempool_add(&self, entry: &MempoolEntry) -> Result<bool> {
        if self.mempool_hashes.contains_key(entry.hash.as_bytes())? {
            return Ok(false);
        }
        let seq = u64_key(self.db.generate_id()?);
        self.mempool.insert(seq, encode(entry)?)?;
        self.mempool_hashes
            .insert(entry.hash.as_bytes(), seq.to_vec())?;
        Ok(true)
    }

    fn mempool_remove(&self, hash: &str) -> Result<()> {
        if let Some(seq) = self.mempool_hashes.remove(hash.as_bytes())? {
            self.mempool.remove(seq)?;
        }
        Ok(())
    }

    fn mempool_list(&self, limit: usize) -> Result<Vec<MempoolEntry>> {
        Self::decode_all(self.mempool.iter().take(limit))
    }
}

#[cfg(test)]
mod tests {
    use super::super::contract;
    use super::*;

    fn store() -> SledStore {
        SledStore::temporary().expect("temporary sled db")
    }

    #[test]
    fn blocks() {
        contract::blocks(&store());
    }

    #[test]
    fn transactions() {
        contract::transactions(&store());
    }

    #[test]
    fn utxos() {
        contract::utxos(&store());
    }

    #[test]
    fn mempool() {
        contract::mempool(&store());
    }

    #[test]
    fn keys_of_one_address_do_not_leak_into_another() {
        let s = store();
        let out = crate::transaction::TxOutput::new(4, "ab");
        s.put_utxo(&Utxo::from_output("t", 0, &out, 0)).unwrap();
        assert!(s.utxos_by_address("a").unwrap().is_empty());
        assert_eq!(s.utxos_by_address("ab").unwrap().len(), 1);
    }
}
