use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;

use crate::error::LedgerError;

#[derive(Serialize)]
struct ErrorBody<'a> {
    success: bool,
    kind: &'a str,
    error: String,
}

impl ResponseError for LedgerError {
    fn status_code(&self) -> StatusCode {
        match self {
            LedgerError::Validation(_)
            | LedgerError::Linkage(_)
            | LedgerError::Consensus(_)
            | LedgerError::DoubleSpend(_)
            | LedgerError::Signature(_) => StatusCode::BAD_REQUEST,
            LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
            LedgerError::Duplicate { .. } => StatusCode::CONFLICT,
            LedgerError::Capacity { .. } | LedgerError::Cancelled => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            LedgerError::Worker(_) | LedgerError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody {
            success: false,
            kind: self.kind(),
            error: self.to_string(),
        })
    }
}
