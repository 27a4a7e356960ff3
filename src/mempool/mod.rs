use chrono::Utc;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use crate::storage::{LedgerStore, StoreError};
use crate::transaction::{Amount, Transaction};

/// Default bound on queued transactions.
pub const DEFAULT_MAX_SIZE: usize = 10_000;

/// A queued transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MempoolEntry {
    pub hash: String,
    pub transaction: Transaction,
    pub fee: Amount,
    /// Unix milliseconds.
    pub enqueued_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Duplicate,
    MempoolFull,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnqueueOutcome {
    pub inserted: bool,
    pub reason: Option<RejectReason>,
    /// Queue position of the new entry, or of the existing one on duplicate.
    pub position: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MempoolSample {
    pub hash: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub timestamp: i64,
    pub fee: Amount,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MempoolStatus {
    pub size: usize,
    pub max_size: usize,
    pub sample: Vec<MempoolSample>,
}

#[derive(Default)]
struct Queue {
    entries: VecDeque<MempoolEntry>,
    hashes: HashSet<String>,
}

impl Queue {
    fn position(&self, hash: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.hash == hash)
    }
}

/// Bounded FIFO of pending transactions, unique by hash.
///
/// Every operation runs under one mutex, including the write-through to the
/// store, so concurrent dequeues never hand out the same entry.
pub struct Mempool {
    queue: Mutex<Queue>,
    max_size: usize,
    store: Arc<dyn LedgerStore>,
}

impl Mempool {
    pub fn new(max_size: usize, store: Arc<dyn LedgerStore>) -> Self {
        Self {
            queue: Mutex::new(Queue::default()),
            max_size: max_size.max(1),
            store,
        }
    }

    /// Reload whatever the store still holds (after a restart). Returns the
    /// number of restored entries.
    pub fn restore(&self) -> Result<usize, StoreError> {
        let mut q = self.queue.lock().expect("mempool mutex poisoned");
        for entry in self.store.mempool_list(self.max_size)? {
            if q.hashes.insert(entry.hash.clone()) {
                q.entries.push_back(entry);
            }
        }
        Ok(q.entries.len())
    }

    pub fn enqueue(&self, tx: Transaction, fee: Amount) -> Result<EnqueueOutcome, StoreError> {
        let mut q = self.queue.lock().expect("mempool mutex poisoned");
        if q.hashes.contains(tx.hash()) {
            return Ok(EnqueueOutcome {
                inserted: false,
                reason: Some(RejectReason::Duplicate),
                position: q.position(tx.hash()),
            });
        }
        if q.entries.len() >= self.max_size {
            return Ok(EnqueueOutcome {
                inserted: false,
                reason: Some(RejectReason::MempoolFull),
                position: None,
            });
        }

        let entry = MempoolEntry {
            hash: tx.hash().to_string(),
            transaction: tx,
            fee,
            enqueued_at: Utc::now().timestamp_millis(),
        };
        if !self.store.mempool_add(&entry)? {
            debug!("Store already held pending {}; adopting it", entry.hash);
        }
        q.hashes.insert(entry.hash.clone());
        q.entries.push_back(entry);
        Ok(EnqueueOutcome {
            inserted: true,
            reason: None,
            position: Some(q.entries.len() - 1),
        })
    }

    /// Remove and return the oldest transaction.
    pub fn dequeue(&self) -> Result<Option<Transaction>, StoreError> {
        let mut q = self.queue.lock().expect("mempool mutex poisoned");
        let Some(front) = q.entries.front() else {
            return Ok(None);
        };
        // Store first: on failure the entry stays queued in both.
        self.store.mempool_remove(&front.hash)?;
        let Some(entry) = q.entries.pop_front() else {
            return Ok(None);
        };
        q.hashes.remove(&entry.hash);
        Ok(Some(entry.transaction))
    }

    /// Drop the entry with `hash`, if queued.
    pub fn remove(&self, hash: &str) -> Result<bool, StoreError> {
        let mut q = self.queue.lock().expect("mempool mutex poisoned");
        if !q.hashes.remove(hash) {
            return Ok(false);
        }
        q.entries.retain(|e| e.hash != hash);
        self.store.mempool_remove(hash)?;
        Ok(true)
    }

    /// Oldest `n` entries, left in place.
    pub fn peek(&self, n: usize) -> Vec<MempoolEntry> {
        let q = self.queue.lock().expect("mempool mutex poisoned");
        q.entries.iter().take(n).cloned().collect()
    }

    pub fn contains(&self, hash: &str) -> bool {
        let q = self.queue.lock().expect("mempool mutex poisoned");
        q.hashes.contains(hash)
    }

    pub fn size(&self) -> usize {
        let q = self.queue.lock().expect("mempool mutex poisoned");
        q.entries.len()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        let mut q = self.queue.lock().expect("mempool mutex poisoned");
        for entry in q.entries.drain(..) {
            self.store.mempool_remove(&entry.hash)?;
        }
        q.hashes.clear();
        Ok(())
    }

    pub fn status(&self, sample: usize) -> MempoolStatus {
        let q = self.queue.lock().expect("mempool mutex poisoned");
        MempoolStatus {
            size: q.entries.len(),
            max_size: self.max_size,
            sample: q
                .entries
                .iter()
                .take(sample)
                .map(|e| MempoolSample {
                    hash: e.hash.clone(),
                    kind: e.transaction.kind(),
                    timestamp: e.transaction.timestamp(),
                    fee: e.fee,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use std::thread;

    fn tx(n: i64) -> Transaction {
        Transaction::coinbase_at("m", 1, 0, n)
    }

    fn pool(max: usize) -> Mempool {
        Mempool::new(max, Arc::new(MemoryStore::new()))
    }

    #[test]
    fn fifo_order() {
        let mp = pool(10);
        let (t1, t2, t3) = (tx(1), tx(2), tx(3));
        for t in [&t1, &t2, &t3] {
            assert!(mp.enqueue(t.clone(), 0).unwrap().inserted);
        }
        assert_eq!(mp.dequeue().unwrap().as_ref(), Some(&t1));
        assert_eq!(mp.dequeue().unwrap().as_ref(), Some(&t2));
        assert_eq!(mp.dequeue().unwrap().as_ref(), Some(&t3));
        assert_eq!(mp.dequeue().unwrap(), None);
    }

    #[test]
    fn rejects_when_full() {
        let max = 3;
        let mp = pool(max);
        for n in 0..max as i64 {
            let out = mp.enqueue(tx(n), 0).unwrap();
            assert_eq!(out.position, Some(n as usize));
        }
        let out = mp.enqueue(tx(99), 0).unwrap();
        assert!(!out.inserted);
        assert_eq!(out.reason, Some(RejectReason::MempoolFull));
        assert_eq!(mp.size(), max);
    }

    #[test]
    fn duplicate_reports_existing_position() {
        let mp = pool(10);
        mp.enqueue(tx(1), 0).unwrap();
        mp.enqueue(tx(2), 0).unwrap();
        let out = mp.enqueue(tx(2), 0).unwrap();
        assert!(!out.inserted);
        assert_eq!(out.reason, Some(RejectReason::Duplicate));
        assert_eq!(out.position, Some(1));
    }

    #[test]
    fn remove_peek_and_clear() {
        let mp = pool(10);
        let (a, b) = (tx(1), tx(2));
        mp.enqueue(a.clone(), 3).unwrap();
        mp.enqueue(b.clone(), 4).unwrap();
        assert!(mp.remove(a.hash()).unwrap());
        assert!(!mp.remove(a.hash()).unwrap());
        assert_eq!(mp.peek(5).len(), 1);
        assert_eq!(mp.status(5).sample[0].fee, 4);
        mp.clear().unwrap();
        assert_eq!(mp.size(), 0);
        assert!(!mp.contains(b.hash()));
    }

    #[test]
    fn restore_reloads_from_store() {
        let store: Arc<dyn LedgerStore> = Arc::new(MemoryStore::new());
        let first = Mempool::new(10, store.clone());
        first.enqueue(tx(1), 0).unwrap();
        first.enqueue(tx(2), 0).unwrap();
        first.dequeue().unwrap();

        let second = Mempool::new(10, store);
        assert_eq!(second.restore().unwrap(), 1);
        assert_eq!(second.dequeue().unwrap(), Some(tx(2)));
    }

    #[test]
    fn store_stays_in_step_with_the_queue() {
        let store: Arc<dyn LedgerStore> = Arc::new(MemoryStore::new());
        let leftover = MempoolEntry {
            hash: tx(1).hash().to_string(),
            transaction: tx(1),
            fee: 0,
            enqueued_at: 0,
        };
        store.mempool_add(&leftover).unwrap();

        // Not restored, so the queue takes it again without a second copy.
        let mp = Mempool::new(10, Arc::clone(&store));
        assert!(mp.enqueue(tx(1), 0).unwrap().inserted);
        mp.enqueue(tx(2), 0).unwrap();
        assert_eq!(store.mempool_list(10).unwrap().len(), 2);

        assert_eq!(mp.dequeue().unwrap(), Some(tx(1)));
        let left: Vec<String> = store
            .mempool_list(10)
            .unwrap()
            .into_iter()
            .map(|e| e.hash)
            .collect();
        assert_eq!(left, vec![tx(2).hash().to_string()]);
    }

    #[test]
    fn concurrent_dequeues_hand_out_each_entry_once() {
        let mp = Arc::new(pool(1_000));
        for n in 0..500 {
            mp.enqueue(tx(n), 0).unwrap();
        }
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let mp = Arc::clone(&mp);
                thread::spawn(move || {
                    let mut got = Vec::new();
                    while let Some(t) = mp.dequeue().unwrap() {
                        got.push(t.hash().to_string());
                    }
                    got
                })
            })
            .collect();
        let mut all: Vec<String> = workers
            .into_iter()
            .flat_map(|w| w.join().unwrap())
            .collect();
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(total, 500);
        assert_eq!(all.len(), 500);
    }
}
