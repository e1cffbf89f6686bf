//! The event store endpoint.

use super::{AppState, read_body};
use crate::auth;
use crate::errors::Result;
use crate::origin;
use crate::pipeline::{StoreRequest, Transport};
use axum::Json;
use axum::extract::{Path, Request, State};
use axum::http::{Method, header};
use bytes::Bytes;
use serde::Serialize;
use time::OffsetDateTime;

#[derive(Serialize)]
pub struct StoreResponse {
    pub id: String,
}

/// Accepts one event, POSTed in the body or GET-delivered through the
/// `sentry_data` query parameter. Responds with the event id, which for a
/// redelivered event is the previously accepted id.
pub async fn store_event(
    State(state): State<AppState>,
    Path(project_id): Path<u64>,
    request: Request,
) -> Result<Json<StoreResponse>> {
    handle_store(state, Some(project_id), request).await
}

/// The legacy unscoped form: the project is the one the key belongs to.
pub async fn store_event_unscoped(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<StoreResponse>> {
    handle_store(state, None, request).await
}

async fn handle_store(
    state: AppState,
    project_id: Option<u64>,
    request: Request,
) -> Result<Json<StoreResponse>> {
    let received_at = OffsetDateTime::now_utc();
    let query = request.uri().query().unwrap_or_default().to_string();

    let headers = request.headers();
    // Old SDKs put the structured header on Authorization instead.
    let auth_header = headers
        .get(auth::AUTH_HEADER)
        .or_else(|| headers.get(header::AUTHORIZATION))
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let content_encoding = headers
        .get(header::CONTENT_ENCODING)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_ascii_lowercase())
        .filter(|value| !value.is_empty());
    let origin = origin::request_origin(headers);

    let (transport, body) = if request.method() == &Method::GET {
        let data = sentry_data_param(&query).map(Bytes::from).unwrap_or_default();
        (Transport::Query, data)
    } else {
        let body = read_body(request, state.processor.max_event_bytes()).await?;
        (Transport::Body, body)
    };

    let outcome = state
        .processor
        .process_store(StoreRequest {
            project_id,
            query,
            auth_header,
            content_encoding,
            origin,
            transport,
            body,
            received_at,
        })
        .await?;

    Ok(Json(StoreResponse {
        id: outcome.event_id().simple().to_string(),
    }))
}

fn sentry_data_param(query: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "sentry_data")
        .map(|(_, value)| value.into_owned())
}
