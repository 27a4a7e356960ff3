use actix_web::{HttpResponse, get, web};

use super::models::{AddressTransactions, ApiResponse, AppState, BalanceResponse};
use crate::error::LedgerError;

#[get("/address/{address}/balance")]
pub async fn get_balance(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, LedgerError> {
    let address = path.into_inner();
    let balance = state.ledger.balance(&address)?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(BalanceResponse {
        address,
        balance,
        confirmed: balance,
        unconfirmed: 0,
    })))
}

#[get("/address/{address}/utxos")]
pub async fn get_utxos(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, LedgerError> {
    let utxos = state.ledger.utxos(&path.into_inner())?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(utxos)))
}

#[get("/address/{address}/transactions")]
pub async fn get_transactions(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, LedgerError> {
    let address = path.into_inner();
    let transactions = state.ledger.address_transactions(&address)?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(AddressTransactions {
        address,
        transactions,
    })))
}
