mod balance;
mod chain;
mod error;
mod health;
mod mining;
pub mod models;
mod stats;
mod sync;
mod tx;

use actix_web::web::{self, ServiceConfig};

use crate::error::LedgerError;
pub use models::AppState;

const JSON_LIMIT: usize = 1 << 20;

/// Malformed JSON bodies get the same error shape as ledger rejections.
fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(JSON_LIMIT)
        .error_handler(|err, _req| LedgerError::Validation(err.to_string()).into())
}

pub fn init_routes(cfg: &mut ServiceConfig) {
    cfg.app_data(json_config())
        .service(health::health_check)
        .service(mining::mine_now)
        .service(
            web::scope("/api/blockchain")
                .service(mining::mining_info)
                .service(mining::submit_mined_block)
                .service(mining::pending)
                .service(tx::submit_signed_transaction)
                .service(tx::get_transaction)
                .service(chain::block_by_index)
                .service(chain::block_by_hash)
                .service(chain::latest_blocks)
                .service(chain::latest_transactions)
                .service(balance::get_balance)
                .service(balance::get_utxos)
                .service(balance::get_transactions)
                .service(stats::utxo_stats)
                .service(stats::network_stats),
        )
        .service(
            web::scope("/api/mempool")
                .service(tx::enqueue)
                .service(tx::dequeue)
                .service(tx::mempool_status),
        )
        .service(
            web::scope("/api/miner")
                .service(mining::start_miner)
                .service(mining::stop_miner)
                .service(mining::miner_status),
        )
        .service(
            web::scope("/api/sync")
                .service(sync::sync_state)
                .service(sync::sync_mempool)
                .service(sync::sync_tx)
                .service(sync::announce_block),
        );
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-process nodes for handler and HTTP client tests.

    use actix_web::dev::{ServiceFactory, ServiceRequest, ServiceResponse};
    use actix_web::{App, HttpServer, web};
    use std::net::TcpListener;
    use std::sync::Arc;

    use super::{AppState, init_routes};
    use crate::blockchain::{Blockchain, ChainParams};
    use crate::storage::MemoryStore;

    /// Fresh in-memory ledger at difficulty 1.
    pub(crate) fn ledger() -> Arc<Blockchain> {
        let params = ChainParams {
            difficulty: 1,
            ..ChainParams::default()
        };
        Arc::new(Blockchain::open(Arc::new(MemoryStore::new()), params).unwrap())
    }

    pub(crate) fn app(
        state: AppState,
    ) -> App<
        impl ServiceFactory<
            ServiceRequest,
            Config = (),
            Response = ServiceResponse,
            Error = actix_web::Error,
            InitError = (),
        >,
    > {
        App::new()
            .app_data(web::Data::new(state))
            .configure(init_routes)
    }

    pub(crate) struct Node {
        pub url: String,
        pub ledger: Arc<Blockchain>,
    }

    /// Serve a fresh ledger on an ephemeral localhost port.
    pub(crate) async fn spawn_node() -> Node {
        let ledger = ledger();
        let state = web::Data::new(AppState::new(Arc::clone(&ledger)));
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = HttpServer::new(move || {
            App::new()
                .app_data(state.clone())
                .configure(init_routes)
        })
        .workers(1)
        .disable_signals()
        .listen(listener)
        .unwrap()
        .run();
        actix_web::rt::spawn(server);
        Node {
            url: format!("http://127.0.0.1:{port}"),
            ledger,
        }
    }
}
