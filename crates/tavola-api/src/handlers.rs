//! API request handlers

pub mod email;
pub mod health;

use axum::{http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use tavola_common::Error;

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Map a domain error onto its status code and body
pub fn error_response(err: &Error) -> (StatusCode, Json<ErrorResponse>) {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(ErrorResponse {
            error: err.code().to_lowercase(),
            message: err.to_string(),
        }),
    )
}
