//! Routes peers call on each other. Nothing received here is trusted more
//! than a client submission.

use actix_web::{HttpResponse, Responder, get, post, web};
use log::{debug, info};

use super::models::{
    Ack, AnnounceRequest, AppState, LimitQuery, SyncMempoolResponse, SyncStateResponse,
};
use crate::error::LedgerError;
use crate::sync::SYNC_BATCH;
use crate::transaction::{Transaction, TransactionPayload};

#[get("/state")]
pub async fn sync_state(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(SyncStateResponse {
        success: true,
        storage: state.storage,
        latest_block: state.ledger.tip(),
        mempool_size: state.ledger.mempool_status(0).size,
    })
}

#[get("/mempool")]
pub async fn sync_mempool(
    state: web::Data<AppState>,
    query: web::Query<LimitQuery>,
) -> impl Responder {
    let limit = query.clamped(SYNC_BATCH, SYNC_BATCH);
    let transactions = state
        .ledger
        .pending_transactions(limit)
        .iter()
        .map(|entry| TransactionPayload::from(&entry.transaction))
        .collect();
    HttpResponse::Ok().json(SyncMempoolResponse {
        success: true,
        transactions,
    })
}

/// Transaction pushed by a peer. Not re-broadcast.
#[post("/tx")]
pub async fn sync_tx(
    state: web::Data<AppState>,
    body: web::Json<TransactionPayload>,
) -> Result<HttpResponse, LedgerError> {
    let tx = Transaction::try_from(body.into_inner())?;
    match state.ledger.submit_transaction(tx) {
        Ok(queued) => debug!("[sync] queued {} from peer", queued.hash),
        Err(LedgerError::Duplicate { .. }) => {}
        Err(e) => return Err(e),
    }
    Ok(HttpResponse::Ok().json(Ack::OK))
}

#[post("/announce-block")]
pub async fn announce_block(
    state: web::Data<AppState>,
    body: web::Json<AnnounceRequest>,
) -> Result<HttpResponse, LedgerError> {
    let AnnounceRequest {
        block_index: Some(index),
        block_hash: Some(hash),
    } = body.into_inner()
    else {
        return Err(LedgerError::Validation(
            "Missing blockIndex or blockHash".into(),
        ));
    };
    if hash.is_empty() {
        return Err(LedgerError::Validation("Missing blockIndex or blockHash".into()));
    }

    let tip = state.ledger.tip();
    if index > tip.index {
        info!("[sync] peer announced block #{index} ({hash}); local tip is #{}", tip.index);
    } else {
        debug!("[sync] peer announced block #{index} ({hash})");
    }
    Ok(HttpResponse::Ok().json(Ack::OK))
}
