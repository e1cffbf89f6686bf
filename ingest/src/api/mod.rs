//! HTTP surface of the ingestion service.

pub mod security;
pub mod store;

use crate::errors::DecodeError;
use crate::pipeline::EventProcessor;
use axum::Router;
use axum::extract::Request;
use axum::routing::post;
use bytes::Bytes;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<EventProcessor>,
}

/// Builds the application router. Every path is registered with and
/// without a trailing slash; SDK configurations disagree on which to use.
/// `/api/store` predates project-scoped paths, and `/csp-report` is the
/// pre-standard name of the security endpoint.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/store",
            post(store::store_event_unscoped).get(store::store_event_unscoped),
        )
        .route(
            "/api/store/",
            post(store::store_event_unscoped).get(store::store_event_unscoped),
        )
        .route(
            "/api/{project_id}/store",
            post(store::store_event).get(store::store_event),
        )
        .route(
            "/api/{project_id}/store/",
            post(store::store_event).get(store::store_event),
        )
        .route("/api/{project_id}/security", post(security::security_report))
        .route(
            "/api/{project_id}/security/",
            post(security::security_report),
        )
        .route(
            "/api/{project_id}/csp-report",
            post(security::security_report),
        )
        .route(
            "/api/{project_id}/csp-report/",
            post(security::security_report),
        )
        .with_state(state)
}

/// Reads the request body up to the wire cap. A compressed body larger
/// than the decompressed cap cannot decode to anything admissible, so one
/// limit serves both.
pub(crate) async fn read_body(request: Request, limit: usize) -> Result<Bytes, DecodeError> {
    axum::body::to_bytes(request.into_body(), limit)
        .await
        .map_err(|_| DecodeError::SizeExceeded)
}
