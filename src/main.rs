mod api;
mod blockchain;
mod config;
mod error;
mod mempool;
mod miner;
mod storage;
mod sync;
mod transaction;
mod wallet;

use actix_web::{App, HttpServer, web};
use dotenvy::dotenv;
use log::{error, info, warn};
use std::io;
use std::sync::Arc;

use api::AppState;
use blockchain::Blockchain;
use config::{Config, NodeRole};
use miner::{CancelToken, LocalMiner, RemoteMiner};
use sync::SyncService;

#[actix_web::main]
async fn main() -> io::Result<()> {
    let _ = dotenv();
    env_logger::init();

    let config = Config::from_env();
    match config.role {
        NodeRole::Server => run_server(config).await,
        NodeRole::Miner => run_miner(config).await,
    }
}

async fn run_server(config: Config) -> io::Result<()> {
    let store = config.open_store().map_err(io::Error::other)?;
    let ledger = Blockchain::open(store, config.chain_params()).map_err(io::Error::other)?;
    let ledger = Arc::new(ledger);
    let shutdown = CancelToken::new();

    let sync = if config.peers.is_empty() {
        None
    } else {
        let service = SyncService::new(
            config.peers.clone(),
            config.sync_interval,
            config.http_timeout,
        )
        .map_err(io::Error::other)?;
        Some(Arc::new(service))
    };
    if let Some(sync) = &sync {
        Arc::clone(sync).spawn(Arc::clone(&ledger), shutdown.clone());
    }

    let miner = config.miner_address.clone().map(|address| {
        Arc::new(LocalMiner::new(
            Arc::clone(&ledger),
            address,
            config.miner_interval,
            sync.clone(),
        ))
    });
    if config.miner_enabled {
        match &miner {
            Some(m) => {
                if let Err(e) = m.start() {
                    warn!("Local miner not started: {e}");
                }
            }
            None => warn!("MINER_ENABLED is set but MINER_ADDRESS is missing; local miner not started"),
        }
    }

    let state = web::Data::new(AppState {
        ledger: Arc::clone(&ledger),
        miner: miner.clone(),
        sync,
        shutdown: shutdown.clone(),
        submit_mode: config.submit_mode,
        storage: config.storage.as_str(),
        miner_address: config.miner_address.clone(),
    });

    let tip = ledger.tip();
    info!(
        "⛓️ Starting ledger node at http://{}:{} (storage={}, difficulty={}, tip=#{})",
        config.host,
        config.port,
        config.storage.as_str(),
        ledger.params().difficulty,
        tip.index
    );

    let result = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(api::init_routes)
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await;

    shutdown.cancel();
    if let Some(m) = miner {
        m.stop();
    }
    info!("Ledger node stopped");
    result
}

async fn run_miner(config: Config) -> io::Result<()> {
    let Some(address) = config.miner_address.clone() else {
        error!("MINER_ADDRESS is required when NODE_ROLE=miner");
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "MINER_ADDRESS is required",
        ));
    };
    let miner = RemoteMiner::new(
        config.backend_url.as_str(),
        address,
        config.batch_size,
        config.miner_interval,
        config.http_timeout,
    )
    .map_err(io::Error::other)?;

    let cancel = CancelToken::new();
    let on_signal = cancel.clone();
    actix_web::rt::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down miner...");
            on_signal.cancel();
        }
    });

    miner.run(cancel, config.miner_once).await;
    Ok(())
}
