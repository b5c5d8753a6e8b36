//! Email delivery handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tavola_common::types::EmailAddress;
use tavola_common::Error;
use tavola_core::{BacklogStats, EmailSendRequest, SubmitOutcome, SweepReport};
use tracing::info;
use uuid::Uuid;

use super::{error_response, ErrorResponse};
use crate::state::AppState;

type ApiResult<T> = Result<T, (StatusCode, Json<ErrorResponse>)>;

/// Response after submitting an email
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// `dispatched` or `deferred`
    pub status: String,
    /// Retry queue row when the request was deferred
    pub queue_id: Option<Uuid>,
}

/// Response after a cancel request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    pub id: Uuid,
    pub cancelled: bool,
}

/// Submit an email through the outbox
pub async fn send_email(
    State(state): State<Arc<AppState>>,
    Json(input): Json<EmailSendRequest>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    if input.template_key.trim().is_empty() {
        return Err(error_response(&Error::Validation(
            "template_key is required".to_string(),
        )));
    }
    if EmailAddress::parse(&input.recipient_email).is_none() {
        return Err(error_response(&Error::Validation(
            "Invalid recipient email address".to_string(),
        )));
    }

    match state.outbox.submit(input).await {
        SubmitOutcome::Dispatched => Ok((
            StatusCode::ACCEPTED,
            Json(SubmitResponse {
                status: "dispatched".to_string(),
                queue_id: None,
            }),
        )),
        SubmitOutcome::Deferred(queue_id) => Ok((
            StatusCode::ACCEPTED,
            Json(SubmitResponse {
                status: "deferred".to_string(),
                queue_id: Some(queue_id),
            }),
        )),
        SubmitOutcome::Dropped => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: "queue_error".to_string(),
                message: "Email could not be dispatched or queued".to_string(),
            }),
        )),
    }
}

/// Queue and delivery log counts by status
pub async fn backlog_stats(State(state): State<Arc<AppState>>) -> ApiResult<Json<BacklogStats>> {
    state
        .service
        .backlog_stats()
        .await
        .map(Json)
        .map_err(|e| error_response(&e))
}

/// Run both reconciliation sweeps now
pub async fn process_stuck(State(state): State<Arc<AppState>>) -> Json<SweepReport> {
    let report = state.service.process_stuck_emails().await;
    info!(
        processed = report.processed,
        success = report.success,
        failed = report.failed,
        "Maintenance sweep triggered"
    );
    Json(report)
}

/// Cancel a pending queue row
pub async fn cancel_queued(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<CancelResponse>> {
    let cancelled = state
        .service
        .cancel_queued(id)
        .await
        .map_err(|e| error_response(&e))?;

    if !cancelled {
        return Err(error_response(&Error::NotFound(format!(
            "No pending queued email {}",
            id
        ))));
    }

    Ok(Json(CancelResponse { id, cancelled }))
}
