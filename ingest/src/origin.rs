//! Browser origin checks.
//!
//! Requests carrying an `Origin` header (or, failing that, a `Referer`)
//! are checked against the union of the server-wide and per-project
//! allow-lists. An empty combined list means no restriction.

use crate::errors::OriginError;
use axum::http::HeaderMap;
use axum::http::header::{ORIGIN, REFERER};
use url::Url;

/// The logical origin of a request: the `Origin` header when present,
/// else the origin of the `Referer` URL. Non-browser requests have none.
pub fn request_origin(headers: &HeaderMap) -> Option<String> {
    let origin = headers
        .get(ORIGIN)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|origin| !origin.is_empty());
    if let Some(origin) = origin {
        return Some(origin.to_string());
    }

    let referer = headers.get(REFERER).and_then(|value| value.to_str().ok())?;
    let url = Url::parse(referer.trim()).ok()?;
    let origin = url.origin();
    // Opaque origins (data:, file:) carry no usable identity.
    if !origin.is_tuple() {
        return None;
    }
    Some(origin.ascii_serialization())
}

/// Checks an origin against an allow-list. Entries may be a full origin
/// (`https://example.com`), a bare host (`example.com`), a wildcard host
/// pattern (`*.example.com`), or `*` for everything. Host comparisons are
/// case-insensitive. An empty list allows everything.
pub fn is_valid_origin(origin: &str, allowed: &[String]) -> bool {
    if allowed.is_empty() {
        return true;
    }
    let host = Url::parse(origin)
        .ok()
        .and_then(|url| url.host_str().map(str::to_ascii_lowercase));
    allowed
        .iter()
        .any(|entry| matches_entry(origin, host.as_deref(), entry))
}

/// Applies the project and server allow-lists. Requests without a browser
/// origin pass; the secret-key requirement covers those clients instead.
pub fn check_origin(
    origin: Option<&str>,
    project_origins: &[String],
    server_origins: &[String],
) -> Result<(), OriginError> {
    let Some(origin) = origin else {
        return Ok(());
    };
    let mut allowed = server_origins.to_vec();
    allowed.extend(project_origins.iter().cloned());
    if is_valid_origin(origin, &allowed) {
        Ok(())
    } else {
        tracing::debug!(%origin, "request origin not in allow-list");
        Err(OriginError {
            origin: origin.to_string(),
        })
    }
}

fn matches_entry(origin: &str, host: Option<&str>, entry: &str) -> bool {
    if entry == "*" {
        return true;
    }
    let entry = entry.trim_end_matches('/');
    if entry.contains("://") {
        return origin.trim_end_matches('/').eq_ignore_ascii_case(entry);
    }
    let Some(host) = host else {
        return false;
    };
    let entry = entry.to_ascii_lowercase();
    if let Some(suffix) = entry.strip_prefix("*.") {
        return host == suffix || host.ends_with(&format!(".{suffix}"));
    }
    host == entry
}
