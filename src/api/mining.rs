use actix_web::{HttpResponse, Responder, get, post, web};
use log::{debug, info};
use serde_json::Value;
use std::sync::Arc;

use super::models::{
    ApiResponse, AppState, LimitQuery, MineRequest, MineResponse, MinerControlResponse,
    PendingResponse, SubmitResponse,
};
use crate::blockchain::BlockRef;
use crate::error::LedgerError;
use crate::miner::{LocalMiner, MinerStatus};

const MAX_PENDING_LIMIT: usize = 1_000;

fn announce(state: &AppState, block: &BlockRef) {
    if let Some(sync) = state.sync.clone() {
        let (index, hash) = (block.index, block.hash.clone());
        actix_web::rt::spawn(async move { sync.announce_block(index, &hash).await });
    }
}

/// Difficulty, reward and the tip a miner should build on.
#[get("/mining-info")]
pub async fn mining_info(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(ApiResponse::ok(state.ledger.mining_info()))
}

/// Verify and commit a block mined elsewhere.
#[post("/submit-mined-block")]
pub async fn submit_mined_block(
    state: web::Data<AppState>,
    body: web::Json<Value>,
) -> Result<HttpResponse, LedgerError> {
    let accepted = state.ledger.accept(body.into_inner())?;
    announce(&state, &accepted.block);
    Ok(HttpResponse::Ok().json(SubmitResponse {
        success: true,
        accepted,
    }))
}

/// Oldest pending transactions, for remote miners.
#[get("/mempool")]
pub async fn pending(state: web::Data<AppState>, query: web::Query<LimitQuery>) -> impl Responder {
    let limit = query.clamped(state.ledger.params().batch_size, MAX_PENDING_LIMIT);
    let transactions = state.ledger.pending_transactions(limit);
    debug!("Serving {} pending transactions to a miner", transactions.len());
    HttpResponse::Ok().json(ApiResponse::ok(PendingResponse {
        size: state.ledger.mempool_status(0).size,
        transactions,
    }))
}

/// Mine one block from the mempool right now.
#[post("/api/mine")]
pub async fn mine_now(
    state: web::Data<AppState>,
    body: Option<web::Json<MineRequest>>,
) -> Result<HttpResponse, LedgerError> {
    let requested = body.map(|b| b.into_inner()).unwrap_or_default();
    let miner = state
        .miner_address_or_default(requested.miner_address)
        .ok_or_else(|| LedgerError::Validation("Missing minerAddress".into()))?;

    let mined = state
        .ledger
        .mine_pending_transactions(&miner, &state.shutdown)
        .await?;

    let Some(block) = mined else {
        return Ok(HttpResponse::Ok().json(MineResponse {
            success: true,
            mined: false,
            reason: Some("mempool_empty"),
            block: None,
            tx_count: None,
        }));
    };

    let mined = BlockRef {
        index: block.index(),
        hash: block.hash().to_string(),
    };
    announce(&state, &mined);
    Ok(HttpResponse::Ok().json(MineResponse {
        success: true,
        mined: true,
        reason: None,
        block: Some(mined),
        tx_count: Some(block.transactions().len()),
    }))
}

fn local_miner(state: &AppState) -> Result<&Arc<LocalMiner>, LedgerError> {
    state.miner.as_ref().ok_or_else(|| {
        LedgerError::Validation("no miner configured; set MINER_ADDRESS to enable it".into())
    })
}

#[post("/start")]
pub async fn start_miner(state: web::Data<AppState>) -> Result<HttpResponse, LedgerError> {
    let miner = local_miner(&state)?;
    let changed = miner.start()?;
    if changed {
        info!("Local miner started via API");
    }
    Ok(HttpResponse::Ok().json(MinerControlResponse {
        success: true,
        changed,
        status: miner.status(),
    }))
}

#[post("/stop")]
pub async fn stop_miner(state: web::Data<AppState>) -> Result<HttpResponse, LedgerError> {
    let miner = local_miner(&state)?;
    let changed = miner.stop();
    if changed {
        info!("Local miner stopped via API");
    }
    Ok(HttpResponse::Ok().json(MinerControlResponse {
        success: true,
        changed,
        status: miner.status(),
    }))
}

#[get("/status")]
pub async fn miner_status(state: web::Data<AppState>) -> impl Responder {
    let status = state
        .miner
        .as_ref()
        .map(|m| m.status())
        .unwrap_or_else(MinerStatus::default);
    HttpResponse::Ok().json(ApiResponse::ok(status))
}

#[cfg(test)]
mod tests {
    use super::super::testing::{app, ledger};
    use super::*;
    use crate::blockchain::{GENESIS_ADDRESS, GENESIS_SUPPLY};
    use crate::transaction::model::testutil::{secret_key, signed_transfer};
    use crate::transaction::{OutPoint, TransactionPayload, TxOutput};
    use actix_web::test;

    #[actix_web::test]
    async fn mining_info_reports_tip() {
        let ledger = ledger();
        let app = test::init_service(app(AppState::new(Arc::clone(&ledger)))).await;
        let req = test::TestRequest::get()
            .uri("/api/blockchain/mining-info")
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["difficulty"], 1);
        assert_eq!(body["data"]["latestBlock"]["index"], 0);
        assert_eq!(body["data"]["latestBlock"]["hash"], ledger.tip().hash.as_str());
    }

    #[actix_web::test]
    async fn rejected_block_gets_error_body() {
        let app = test::init_service(app(AppState::new(ledger()))).await;
        let req = test::TestRequest::post()
            .uri("/api/blockchain/submit-mined-block")
            .set_json(serde_json::json!({ "index": 5 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status().as_u16(), 400);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["kind"], "validation");
    }

    #[actix_web::test]
    async fn mine_endpoint_reports_empty_then_mines() {
        let ledger = ledger();
        let app = test::init_service(app(AppState::new(Arc::clone(&ledger)))).await;

        let req = test::TestRequest::post()
            .uri("/api/mine")
            .set_json(serde_json::json!({ "minerAddress": "m1" }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["mined"], false);
        assert_eq!(body["reason"], "mempool_empty");

        let genesis = ledger.block_by_index(0).unwrap().unwrap();
        let tx = signed_transfer(
            &[(OutPoint::new(genesis.transactions()[0].hash(), 0), &secret_key(1))],
            vec![TxOutput::new(GENESIS_SUPPLY - 4, GENESIS_ADDRESS)],
            2,
        );
        ledger.submit_transaction(tx).unwrap();

        let req = test::TestRequest::get()
            .uri("/api/blockchain/mempool?limit=5")
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["size"], 1);
        assert_eq!(body["data"]["transactions"][0]["fee"], 4);
        let payload: TransactionPayload =
            serde_json::from_value(body["data"]["transactions"][0]["transaction"].clone()).unwrap();
        assert_eq!(payload.kind.as_deref(), Some("transfer"));

        let req = test::TestRequest::post()
            .uri("/api/mine")
            .set_json(serde_json::json!({ "minerAddress": "m1" }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["mined"], true);
        assert_eq!(body["block"]["index"], 1);
        assert_eq!(body["txCount"], 2);
        assert_eq!(ledger.balance("m1").unwrap(), 10 + 4);
    }

    #[actix_web::test]
    async fn mine_requires_an_address() {
        let app = test::init_service(app(AppState::new(ledger()))).await;
        let req = test::TestRequest::post()
            .uri("/api/mine")
            .set_json(serde_json::json!({}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status().as_u16(), 400);
    }

    #[actix_web::test]
    async fn miner_controls() {
        let ledger = ledger();
        let app = test::init_service(app(AppState::new(Arc::clone(&ledger)))).await;
        let req = test::TestRequest::post().uri("/api/miner/start").to_request();
        assert_eq!(test::call_service(&app, req).await.status().as_u16(), 400);

        let mut state = AppState::new(Arc::clone(&ledger));
        state.miner = Some(Arc::new(LocalMiner::new(
            ledger,
            "m1",
            std::time::Duration::from_secs(60),
            None,
        )));
        let app = test::init_service(super::super::testing::app(state)).await;

        let req = test::TestRequest::post().uri("/api/miner/start").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["changed"], true);
        assert_eq!(body["status"]["running"], true);

        let req = test::TestRequest::get().uri("/api/miner/status").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["minerAddress"], "m1");

        let req = test::TestRequest::post().uri("/api/miner/stop").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["changed"], true);
        assert_eq!(body["status"]["running"], false);
    }
}
