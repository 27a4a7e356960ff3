//! Process configuration read from the environment (after `.env` is loaded).

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::blockchain::{ChainParams, DEFAULT_BATCH_SIZE, DEFAULT_DIFFICULTY, MINING_REWARD};
use crate::mempool::DEFAULT_MAX_SIZE;
use crate::storage::{LedgerStore, MemoryStore, SledStore, StoreError};
use crate::transaction::Amount;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    /// Validating node with the HTTP API.
    Server,
    /// Standalone miner working for a remote backend.
    Miner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Memory,
    Sled,
}

impl StorageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageKind::Memory => "memory",
            StorageKind::Sled => "sled",
        }
    }
}

/// What `submit-signed-transaction` does when the caller does not say.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitMode {
    Mempool,
    Immediate,
}

impl FromStr for NodeRole {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "server" | "node" => Ok(NodeRole::Server),
            "miner" => Ok(NodeRole::Miner),
            _ => Err(()),
        }
    }
}

impl FromStr for StorageKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageKind::Memory),
            "sled" | "disk" => Ok(StorageKind::Sled),
            _ => Err(()),
        }
    }
}

impl FromStr for SubmitMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mempool" => Ok(SubmitMode::Mempool),
            "immediate" => Ok(SubmitMode::Immediate),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub role: NodeRole,
    pub storage: StorageKind,
    pub data_dir: PathBuf,
    pub difficulty: u32,
    pub mining_reward: Amount,
    pub mempool_max_size: usize,
    pub batch_size: usize,
    pub miner_address: Option<String>,
    pub miner_enabled: bool,
    pub miner_interval: Duration,
    pub miner_once: bool,
    pub backend_url: String,
    pub peers: Vec<String>,
    pub sync_interval: Duration,
    pub submit_mode: SubmitMode,
    pub http_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
            role: NodeRole::Server,
            storage: StorageKind::Memory,
            data_dir: PathBuf::from("data"),
            difficulty: DEFAULT_DIFFICULTY,
            mining_reward: MINING_REWARD,
            mempool_max_size: DEFAULT_MAX_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            miner_address: None,
            miner_enabled: false,
            miner_interval: Duration::from_millis(4000),
            miner_once: false,
            backend_url: "http://localhost:3001".to_string(),
            peers: Vec::new(),
            sync_interval: Duration::from_millis(15_000),
            submit_mode: SubmitMode::Mempool,
            http_timeout: Duration::from_millis(10_000),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Missing or unparsable values keep their
    /// defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let millis = |key: &str, default: Duration| {
            get(key)
                .and_then(parse::<u64>)
                .map(Duration::from_millis)
                .unwrap_or(default)
        };

        Self {
            host: get("HOST").unwrap_or(d.host),
            port: get("PORT").and_then(parse).unwrap_or(d.port),
            role: get("NODE_ROLE").and_then(parse).unwrap_or(d.role),
            storage: get("STORAGE").and_then(parse).unwrap_or(d.storage),
            data_dir: get("DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            difficulty: get("DIFFICULTY").and_then(parse).unwrap_or(d.difficulty),
            mining_reward: get("MINING_REWARD").and_then(parse).unwrap_or(d.mining_reward),
            mempool_max_size: get("MEMPOOL_MAX_SIZE").and_then(parse).unwrap_or(d.mempool_max_size),
            batch_size: get("MINE_BATCH_SIZE").and_then(parse).unwrap_or(d.batch_size),
            miner_address: get("MINER_ADDRESS"),
            miner_enabled: get("MINER_ENABLED").is_some_and(|v| truthy(&v)),
            miner_interval: millis("MINER_INTERVAL_MS", d.miner_interval),
            miner_once: get("MINER_ONCE").is_some_and(|v| truthy(&v)),
            backend_url: get("BACKEND_URL").unwrap_or(d.backend_url),
            peers: get("PEERS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|p| !p.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            sync_interval: millis("SYNC_INTERVAL_MS", d.sync_interval),
            submit_mode: get("SUBMIT_TX_MODE").and_then(parse).unwrap_or(d.submit_mode),
            http_timeout: millis("HTTP_TIMEOUT_MS", d.http_timeout),
        }
    }

    pub fn chain_params(&self) -> ChainParams {
        ChainParams {
            difficulty: self.difficulty,
            mining_reward: self.mining_reward,
            mempool_max_size: self.mempool_max_size,
            batch_size: self.batch_size,
        }
        .normalized()
    }

    pub fn open_store(&self) -> Result<Arc<dyn LedgerStore>, StoreError> {
        Ok(match self.storage {
            StorageKind::Memory => Arc::new(MemoryStore::new()),
            StorageKind::Sled => Arc::new(SledStore::open(self.data_dir.join("ledger"))?),
        })
    }
}

fn parse<T: FromStr>(v: String) -> Option<T> {
    v.parse().ok()
}

fn truthy(v: &str) -> bool {
    matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
