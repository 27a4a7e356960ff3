use actix_web::{HttpResponse, Responder, get, post, web};
use log::{info, warn};
use std::time::Instant;

use super::models::{
    ApiResponse, AppState, DequeueResponse, EnqueueResponse, MinedTxResponse, QueueStatus,
    QueuedTxResponse, SignedTxRequest, SubmitQuery,
};
use crate::config::SubmitMode;
use crate::error::LedgerError;
use crate::transaction::{Transaction, TransactionPayload};

const STATUS_SAMPLE: usize = 10;

fn broadcast(state: &AppState, tx: Transaction) {
    if let Some(sync) = state.sync.clone() {
        actix_web::rt::spawn(async move { sync.broadcast_tx(&tx).await });
    }
}

/// Submit a signed transfer. Queued by default; `?mine=true` (or
/// `SUBMIT_TX_MODE=immediate`) mines it into a block before answering.
#[post("/submit-signed-transaction")]
pub async fn submit_signed_transaction(
    state: web::Data<AppState>,
    query: web::Query<SubmitQuery>,
    body: web::Json<SignedTxRequest>,
) -> Result<HttpResponse, LedgerError> {
    let SignedTxRequest {
        transaction,
        miner_address,
    } = body.into_inner();
    let tx = Transaction::try_from(transaction)?;
    let immediate = query
        .mine
        .unwrap_or(state.submit_mode == SubmitMode::Immediate);

    if immediate {
        let miner = state.miner_address_or_default(miner_address).ok_or_else(|| {
            LedgerError::Validation(
                "Immediate mining requested but minerAddress missing. Provide minerAddress or set SUBMIT_TX_MODE=mempool."
                    .into(),
            )
        })?;
        let hash = tx.hash().to_string();
        info!("Processing signed transaction {hash} immediately for {miner}");

        let started = Instant::now();
        let block = state
            .ledger
            .process_signed_transaction(tx, &miner, &state.shutdown)
            .await?;
        return Ok(HttpResponse::Ok().json(ApiResponse::ok(MinedTxResponse {
            transaction_hash: hash,
            block_hash: block.hash().to_string(),
            block_index: block.index(),
            mining_time_ms: started.elapsed().as_millis(),
            message: "Transaction processed and mined successfully",
        })));
    }

    let queued = state.ledger.submit_transaction(tx.clone())?;
    info!("Signed transaction {} added to mempool", queued.hash);
    broadcast(&state, tx);
    Ok(HttpResponse::Ok().json(ApiResponse::ok(QueuedTxResponse {
        transaction_hash: queued.hash,
        fee: queued.fee,
        position: queued.position,
        message: "Transaction added to mempool. It will be mined by a miner shortly.",
    })))
}

/// Queue a transaction. 202 when queued, 200 when already present,
/// 503 when the pool is full. Each answer carries the current size.
#[post("/tx")]
pub async fn enqueue(
    state: web::Data<AppState>,
    body: web::Json<TransactionPayload>,
) -> Result<HttpResponse, LedgerError> {
    let tx = Transaction::try_from(body.into_inner())?;
    match state.ledger.submit_transaction(tx.clone()) {
        Ok(queued) => {
            broadcast(&state, tx);
            Ok(HttpResponse::Accepted().json(EnqueueResponse {
                status: QueueStatus::Queued,
                hash: queued.hash,
                position: Some(queued.position),
                size: queued.size,
            }))
        }
        Err(LedgerError::Duplicate { hash, position }) => {
            Ok(HttpResponse::Ok().json(EnqueueResponse {
                status: QueueStatus::Duplicate,
                hash,
                position: Some(position),
                size: state.ledger.mempool_status(0).size,
            }))
        }
        Err(LedgerError::Capacity { max }) => {
            warn!("Mempool full ({max}); rejected {}", tx.hash());
            Ok(HttpResponse::ServiceUnavailable().json(EnqueueResponse {
                status: QueueStatus::MempoolFull,
                hash: tx.hash().to_string(),
                position: None,
                size: state.ledger.mempool_status(0).size,
            }))
        }
        Err(e) => {
            warn!("Mempool rejected {}: {e}", tx.hash());
            Err(e)
        }
    }
}

/// Pop the oldest pending transaction. 204 when empty.
#[post("/dequeue")]
pub async fn dequeue(state: web::Data<AppState>) -> Result<HttpResponse, LedgerError> {
    Ok(match state.ledger.dequeue()? {
        Some(transaction) => HttpResponse::Ok().json(DequeueResponse { transaction }),
        None => HttpResponse::NoContent().finish(),
    })
}

#[get("/status")]
pub async fn mempool_status(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(state.ledger.mempool_status(STATUS_SAMPLE))
}

#[get("/transaction/{hash}")]
pub async fn get_transaction(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, LedgerError> {
    let hash = path.into_inner();
    let record = state
        .ledger
        .transaction(&hash)?
        .ok_or_else(|| LedgerError::NotFound(format!("transaction {hash}")))?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(record)))
}

#[cfg(test)]
mod tests {
    use super::super::testing::{app, ledger};
    use super::*;
    use crate::blockchain::{GENESIS_ADDRESS, GENESIS_SUPPLY};
    use crate::transaction::model::testutil::{secret_key, signed_transfer};
    use crate::transaction::{OutPoint, TxOutput};
    use actix_web::test;
    use serde_json::{Value, json};
    use std::sync::Arc;

    fn spend_genesis(ledger: &crate::blockchain::Blockchain, ts: i64) -> Transaction {
        let genesis = ledger.block_by_index(0).unwrap().unwrap();
        signed_transfer(
            &[(OutPoint::new(genesis.transactions()[0].hash(), 0), &secret_key(1))],
            vec![
                TxOutput::new(100, "alice"),
                TxOutput::new(GENESIS_SUPPLY - 101, GENESIS_ADDRESS),
            ],
            ts,
        )
    }

    #[actix_web::test]
    async fn enqueue_then_duplicate_then_dequeue() {
        let ledger = ledger();
        let app = test::init_service(app(AppState::new(Arc::clone(&ledger)))).await;
        let tx = spend_genesis(&ledger, 2);
        let payload = TransactionPayload::from(&tx);

        let req = test::TestRequest::post()
            .uri("/api/mempool/tx")
            .set_json(&payload)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status().as_u16(), 202);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "queued");
        assert_eq!(body["position"], 0);
        assert_eq!(body["size"], 1);

        let req = test::TestRequest::post()
            .uri("/api/mempool/tx")
            .set_json(&payload)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status().as_u16(), 200);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "duplicate");

        let req = test::TestRequest::get().uri("/api/mempool/status").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["size"], 1);
        assert_eq!(body["sample"][0]["hash"], tx.hash());

        let req = test::TestRequest::post().uri("/api/mempool/dequeue").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["transaction"]["hash"], tx.hash());

        let req = test::TestRequest::post().uri("/api/mempool/dequeue").to_request();
        assert_eq!(test::call_service(&app, req).await.status().as_u16(), 204);
    }

    #[actix_web::test]
    async fn full_mempool_reports_its_size() {
        let ledger = Arc::new(
            crate::blockchain::Blockchain::open(
                Arc::new(crate::storage::MemoryStore::new()),
                crate::blockchain::ChainParams {
                    difficulty: 1,
                    mempool_max_size: 1,
                    ..Default::default()
                },
            )
            .unwrap(),
        );
        let app = test::init_service(app(AppState::new(Arc::clone(&ledger)))).await;
        ledger.submit_transaction(spend_genesis(&ledger, 2)).unwrap();

        let req = test::TestRequest::post()
            .uri("/api/mempool/tx")
            .set_json(TransactionPayload::from(&spend_genesis(&ledger, 3)))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status().as_u16(), 503);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "mempool_full");
        assert_eq!(body["size"], 1);
        assert!(body.get("position").is_none());
    }

    #[actix_web::test]
    async fn tampered_transaction_is_rejected() {
        let ledger = ledger();
        let app = test::init_service(app(AppState::new(Arc::clone(&ledger)))).await;
        let mut payload = TransactionPayload::from(&spend_genesis(&ledger, 2));
        payload.outputs[0].amount += 1;

        let req = test::TestRequest::post()
            .uri("/api/mempool/tx")
            .set_json(&payload)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status().as_u16(), 400);
        assert_eq!(ledger.mempool_status(0).size, 0);
    }

    #[actix_web::test]
    async fn signed_submission_queues_by_default() {
        let ledger = ledger();
        let app = test::init_service(app(AppState::new(Arc::clone(&ledger)))).await;
        let tx = spend_genesis(&ledger, 2);

        let req = test::TestRequest::post()
            .uri("/api/blockchain/submit-signed-transaction")
            .set_json(TransactionPayload::from(&tx))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["transactionHash"], tx.hash());
        assert_eq!(body["data"]["fee"], 1);
        assert_eq!(ledger.tip().index, 0);
    }

    #[actix_web::test]
    async fn signed_submission_mines_on_request() {
        let ledger = ledger();
        let app = test::init_service(app(AppState::new(Arc::clone(&ledger)))).await;
        let tx = spend_genesis(&ledger, 2);

        let mut body = serde_json::to_value(TransactionPayload::from(&tx)).unwrap();
        let req = test::TestRequest::post()
            .uri("/api/blockchain/submit-signed-transaction?mine=true")
            .set_json(&body)
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status().as_u16(), 400);

        body["minerAddress"] = json!("m1");
        let req = test::TestRequest::post()
            .uri("/api/blockchain/submit-signed-transaction?mine=true")
            .set_json(&body)
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["blockIndex"], 1);
        assert_eq!(ledger.balance("alice").unwrap(), 100);

        let req = test::TestRequest::get()
            .uri(&format!("/api/blockchain/transaction/{}", tx.hash()))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["blockIndex"], 1);

        let req = test::TestRequest::get()
            .uri("/api/blockchain/transaction/nope")
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status().as_u16(), 404);
    }
}
