//! The browser security report endpoint.

use super::{AppState, read_body};
use crate::errors::{Result, ValidationError};
use crate::origin;
use crate::pipeline::SecurityRequest;
use axum::extract::{Path, Request, State};
use axum::http::{StatusCode, header};
use time::OffsetDateTime;

/// Accepts a CSP violation report posted by a browser. Browsers expect a
/// 201 and send `application/csp-report` as the content type.
pub async fn security_report(
    State(state): State<AppState>,
    Path(project_id): Path<u64>,
    request: Request,
) -> Result<StatusCode> {
    let received_at = OffsetDateTime::now_utc();
    let query = request.uri().query().unwrap_or_default().to_string();

    let headers = request.headers();
    let origin = origin::request_origin(headers);
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();
    if !content_type.starts_with("application/csp-report")
        && !content_type.starts_with("application/json")
    {
        return Err(ValidationError::InvalidType {
            field: "content-type",
            expected: "application/csp-report",
        }
        .into());
    }

    let body = read_body(request, state.processor.max_event_bytes()).await?;
    state
        .processor
        .process_security_report(SecurityRequest {
            project_id,
            query,
            origin,
            body,
            received_at,
        })
        .await?;

    Ok(StatusCode::CREATED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::create_router;
    use crate::testutils::{self, PROJECT_ID, PUBLIC_KEY, TestHarness, csp_document};
    use axum::Router;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use serde_json::{Value, json};
    use store::types::ProjectKey;
    use tower::ServiceExt;

    fn router(harness: &TestHarness) -> Router {
        create_router(AppState {
            processor: harness.processor.clone(),
        })
    }

    fn post_report(key: &str, document: &Value) -> HttpRequest<Body> {
        HttpRequest::builder()
            .method("POST")
            .uri(format!("/api/{PROJECT_ID}/security/?sentry_key={key}"))
            .header(header::CONTENT_TYPE, "application/csp-report")
            .body(Body::from(document.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_report_created() {
        let harness = testutils::harness();
        let response = router(&harness)
            .oneshot(post_report(PUBLIC_KEY, &csp_document()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(harness.events.len(), 1);
        assert_eq!(harness.groups.len(), 1);
        assert!(
            harness
                .tags
                .get_tag_value(PROJECT_ID, "effective-directive", "img-src")
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_report_without_effective_directive_rejected() {
        let harness = testutils::harness();
        // Firefox's legacy format, which omits effective-directive.
        let document = json!({"csp-report": {
            "blocked-uri": "self",
            "document-uri": "http://45.55.25.245:8123/csp",
            "original-policy": "default-src https://45.55.25.245:8123/",
            "referrer": "",
            "violated-directive": "default-src https://45.55.25.245:8123/",
        }});

        let response = router(&harness)
            .oneshot(post_report(PUBLIC_KEY, &document))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(harness.events.len(), 0);
        assert_eq!(harness.groups.len(), 0);
    }

    #[tokio::test]
    async fn test_report_requires_csp_content_type() {
        let harness = testutils::harness();
        let request = HttpRequest::builder()
            .method("POST")
            .uri(format!("/api/{PROJECT_ID}/security/?sentry_key={PUBLIC_KEY}"))
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from(csp_document().to_string()))
            .unwrap();

        let response = router(&harness).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_report_requires_known_key() {
        let harness = testutils::harness();
        let response = router(&harness)
            .oneshot(post_report("deadbeef", &csp_document()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_report_origin_checked_against_key() {
        let harness = testutils::harness();
        harness.keys.insert(
            ProjectKey::new(PROJECT_ID, "csp-key").with_origins(["app.example.com"]),
        );

        let mut request = post_report("csp-key", &csp_document());
        request.headers_mut().insert(
            header::ORIGIN,
            "https://evil.example.net".parse().unwrap(),
        );
        let response = router(&harness).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(harness.events.len(), 0);
    }
}
