use actix_web::{HttpResponse, get, web};

use super::models::{ApiResponse, AppState, NetworkStatsResponse};
use crate::error::LedgerError;

#[get("/utxo-stats")]
pub async fn utxo_stats(state: web::Data<AppState>) -> Result<HttpResponse, LedgerError> {
    Ok(HttpResponse::Ok().json(ApiResponse::ok(state.ledger.utxo_stats()?)))
}

/// Counters plus the five newest blocks and ten newest transactions.
#[get("/network/stats")]
pub async fn network_stats(state: web::Data<AppState>) -> Result<HttpResponse, LedgerError> {
    let ledger = &state.ledger;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(NetworkStatsResponse {
        stats: ledger.network_stats()?,
        latest_blocks: ledger.latest_blocks(5)?,
        latest_transactions: ledger.latest_transactions(10)?,
    })))
}
