use actix_web::{HttpResponse, get, web};

use super::models::{ApiResponse, AppState, LimitQuery};
use crate::error::LedgerError;

const DEFAULT_LATEST: usize = 10;
const MAX_LATEST: usize = 100;

#[get("/block/{index}")]
pub async fn block_by_index(
    state: web::Data<AppState>,
    path: web::Path<u64>,
) -> Result<HttpResponse, LedgerError> {
    let index = path.into_inner();
    let block = state
        .ledger
        .block_by_index(index)?
        .ok_or_else(|| LedgerError::NotFound(format!("block #{index}")))?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(block)))
}

#[get("/block/hash/{hash}")]
pub async fn block_by_hash(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, LedgerError> {
    let hash = path.into_inner();
    let block = state
        .ledger
        .block_by_hash(&hash)?
        .ok_or_else(|| LedgerError::NotFound(format!("block {hash}")))?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(block)))
}

/// Newest first.
#[get("/blocks/latest")]
pub async fn latest_blocks(
    state: web::Data<AppState>,
    query: web::Query<LimitQuery>,
) -> Result<HttpResponse, LedgerError> {
    let blocks = state
        .ledger
        .latest_blocks(query.clamped(DEFAULT_LATEST, MAX_LATEST))?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(blocks)))
}

#[get("/transactions/latest")]
pub async fn latest_transactions(
    state: web::Data<AppState>,
    query: web::Query<LimitQuery>,
) -> Result<HttpResponse, LedgerError> {
    let records = state
        .ledger
        .latest_transactions(query.clamped(DEFAULT_LATEST, MAX_LATEST))?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(records)))
}

#[cfg(test)]
mod tests {
    use super::super::testing::{app, ledger};
    use super::*;
    use actix_web::test;
    use serde_json::Value;
    use std::sync::Arc;

    #[actix_web::test]
    async fn genesis_is_served_by_index_and_hash() {
        let ledger = ledger();
        let app = test::init_service(app(AppState::new(Arc::clone(&ledger)))).await;
        let hash = ledger.tip().hash;

        let req = test::TestRequest::get().uri("/api/blockchain/block/0").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["hash"], hash.as_str());
        assert_eq!(body["data"]["transactions"][0]["type"], "coinbase");

        let req = test::TestRequest::get()
            .uri(&format!("/api/blockchain/block/hash/{hash}"))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["index"], 0);

        let req = test::TestRequest::get().uri("/api/blockchain/block/7").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status().as_u16(), 404);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["kind"], "not_found");
    }

    #[actix_web::test]
    async fn latest_listings() {
        let app = test::init_service(app(AppState::new(ledger()))).await;
        let req = test::TestRequest::get()
            .uri("/api/blockchain/blocks/latest?limit=5")
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"].as_array().map(Vec::len), Some(1));

        let req = test::TestRequest::get()
            .uri("/api/blockchain/transactions/latest")
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"][0]["blockIndex"], 0);
    }
}
