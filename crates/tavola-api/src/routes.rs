//! API routes

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::handlers::{email, health};
use crate::state::AppState;

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    // Health check routes
    let health_routes = Router::new()
        .route("/", get(health::health))
        .route("/live", get(health::liveness))
        .route("/ready", get(health::readiness));

    // Email delivery routes
    let email_routes = Router::new()
        .route("/send", post(email::send_email))
        .route("/stats", get(email::backlog_stats))
        .route("/maintenance/process-stuck", post(email::process_stuck))
        .route("/queue/:id/cancel", post(email::cancel_queued));

    Router::new()
        .nest("/health", health_routes)
        .nest("/email", email_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::email::{CancelResponse, SubmitResponse};
    use crate::handlers::health::HealthResponse;
    use crate::handlers::ErrorResponse;
    use axum::body::{to_bytes, Body, Bytes};
    use axum::http::{Request, StatusCode};
    use pretty_assertions::assert_eq;
    use serde::de::DeserializeOwned;
    use tavola_common::config::OutboxConfig;
    use tavola_common::Config;
    use tavola_core::{
        BacklogStats, EmailSendRequest, EmailService, MemoryTransport, Outbox, OutboxWorker,
        ServiceOptions, StaticTransportFactory, Stores, SweepReport,
    };
    use tower::ServiceExt;

    fn test_state(capacity: usize) -> (Arc<AppState>, OutboxWorker) {
        let service = Arc::new(EmailService::new(
            Stores::in_memory(),
            Arc::new(StaticTransportFactory::new(Arc::new(
                MemoryTransport::accepting(),
            ))),
            ServiceOptions::from_config(&Config::default()),
        ));
        let config = OutboxConfig {
            capacity,
            ..Default::default()
        };
        let (outbox, worker) = Outbox::new(service.clone(), &config);
        let state = Arc::new(AppState {
            service,
            outbox,
            db_pool: None,
        });
        (state, worker)
    }

    async fn call(router: Router, request: Request<Body>) -> (StatusCode, Bytes) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body)
    }

    fn json<T: DeserializeOwned>(body: &[u8]) -> T {
        serde_json::from_slice(body).unwrap()
    }

    fn post_json(uri: &str, value: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(value.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoints() {
        let (state, _worker) = test_state(4);

        let (status, body) = call(
            create_router(state.clone()),
            Request::get("/health").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json::<HealthResponse>(&body).status, "healthy");

        let (status, _) = call(
            create_router(state.clone()),
            Request::get("/health/live").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        // No pool configured, so readiness has nothing to ping
        let (status, _) = call(
            create_router(state),
            Request::get("/health/ready").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_send_dispatches_then_defers_when_full() {
        let (state, _worker) = test_state(1);
        let body = serde_json::json!({
            "template_key": "booking_confirmation",
            "recipient_email": "guest@example.com",
            "data": { "guest_name": "Ada" }
        });

        let (status, first) = call(
            create_router(state.clone()),
            post_json("/email/send", body.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let first: SubmitResponse = json(&first);
        assert_eq!(first.status, "dispatched");
        assert_eq!(first.queue_id, None);

        // The worker is not running, so the single slot is still taken
        let (status, second) =
            call(create_router(state.clone()), post_json("/email/send", body)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let second: SubmitResponse = json(&second);
        assert_eq!(second.status, "deferred");
        assert!(second.queue_id.is_some());

        let stats = state.service.backlog_stats().await.unwrap();
        assert_eq!(stats.queue.pending, 1);
    }

    #[tokio::test]
    async fn test_send_rejects_invalid_recipient() {
        let (state, _worker) = test_state(4);

        let (status, body) = call(
            create_router(state),
            post_json(
                "/email/send",
                serde_json::json!({
                    "template_key": "booking_confirmation",
                    "recipient_email": "not-an-address"
                }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let error: ErrorResponse = json(&body);
        assert_eq!(error.error, "validation_error");
        assert_eq!(
            error.message,
            "Validation error: Invalid recipient email address"
        );
    }

    #[tokio::test]
    async fn test_cancel_queued_email() {
        let (state, _worker) = test_state(4);
        let row = state
            .service
            .enqueue_deferred(&EmailSendRequest::new(
                "booking_reminder",
                "guest@example.com",
            ))
            .await
            .unwrap();
        let uri = format!("/email/queue/{}/cancel", row.id);

        let (status, body) = call(
            create_router(state.clone()),
            Request::post(&uri).body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let cancelled: CancelResponse = json(&body);
        assert_eq!(cancelled.id, row.id);
        assert!(cancelled.cancelled);

        // Already cancelled, nothing pending left
        let (status, body) = call(
            create_router(state),
            Request::post(&uri).body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let error: ErrorResponse = json(&body);
        assert_eq!(error.error, "not_found");
        assert_eq!(
            error.message,
            format!("Not found: No pending queued email {}", row.id)
        );
    }

    #[tokio::test]
    async fn test_stats_and_maintenance_sweep() {
        let (state, _worker) = test_state(4);

        let (status, body) = call(
            create_router(state.clone()),
            Request::get("/email/stats").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json::<BacklogStats>(&body), BacklogStats::default());

        let (status, body) = call(
            create_router(state),
            Request::post("/email/maintenance/process-stuck")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json::<SweepReport>(&body), SweepReport::default());
    }
}
