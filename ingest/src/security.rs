//! Content-Security-Policy violation reports.
//!
//! Browsers post these as `{"csp-report": {...}}` documents with
//! dasherized field names. They are normalized into regular events with a
//! derived title like `Blocked 'image' from 'evil.com'`.

use crate::errors::ValidationError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

/// Directive-to-noun table for derived titles. Directives outside the
/// table read as themselves.
fn directive_noun(directive: &str) -> &str {
    match directive {
        "child-src" => "child",
        "connect-src" => "connect",
        "font-src" => "font",
        "form-action" => "form action",
        "frame-src" => "frame",
        "img-src" => "image",
        "manifest-src" => "manifest",
        "media-src" => "media",
        "object-src" => "object",
        "script-src" => "script",
        "style-src" => "style",
        other => other,
    }
}

/// Wire shape, before required fields are enforced. Snake_case aliases
/// cover SDKs that pre-normalize reports.
#[derive(Deserialize)]
struct RawCspReport {
    #[serde(rename = "effective-directive", alias = "effective_directive")]
    effective_directive: Option<String>,
    #[serde(rename = "document-uri", alias = "document_uri")]
    document_uri: Option<String>,
    #[serde(rename = "blocked-uri", alias = "blocked_uri")]
    blocked_uri: Option<String>,
    #[serde(rename = "violated-directive", alias = "violated_directive")]
    violated_directive: Option<String>,
    #[serde(rename = "original-policy", alias = "original_policy")]
    original_policy: Option<String>,
    #[serde(rename = "source-file", alias = "source_file")]
    source_file: Option<String>,
    #[serde(rename = "line-number", alias = "line_number")]
    line_number: Option<u64>,
    #[serde(rename = "status-code", alias = "status_code")]
    status_code: Option<u64>,
    referrer: Option<String>,
}

/// A validated violation report. Serializes back to the dasherized wire
/// names so the stored document matches what the browser sent.
#[derive(Clone, Debug, Serialize)]
pub struct CspReport {
    #[serde(rename = "effective-directive")]
    pub effective_directive: String,
    #[serde(rename = "document-uri")]
    pub document_uri: String,
    #[serde(rename = "blocked-uri")]
    pub blocked_uri: String,
    #[serde(rename = "violated-directive", skip_serializing_if = "Option::is_none")]
    pub violated_directive: Option<String>,
    #[serde(rename = "original-policy", skip_serializing_if = "Option::is_none")]
    pub original_policy: Option<String>,
    #[serde(rename = "source-file", skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    #[serde(rename = "line-number", skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u64>,
    #[serde(rename = "status-code", skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
}

impl CspReport {
    pub fn from_value(value: Value) -> Result<Self, ValidationError> {
        let raw: RawCspReport =
            serde_json::from_value(value).map_err(|_| ValidationError::InvalidType {
                field: "csp",
                expected: "a csp-report object",
            })?;
        let effective_directive = raw
            .effective_directive
            .filter(|s| !s.is_empty())
            .ok_or(ValidationError::MissingRequiredField("effective-directive"))?;
        let document_uri = raw
            .document_uri
            .filter(|s| !s.is_empty())
            .ok_or(ValidationError::MissingRequiredField("document-uri"))?;

        Ok(CspReport {
            effective_directive,
            document_uri,
            blocked_uri: normalize_blocked_uri(raw.blocked_uri),
            violated_directive: raw.violated_directive,
            original_policy: raw.original_policy,
            source_file: raw.source_file,
            line_number: raw.line_number,
            status_code: raw.status_code,
            referrer: raw.referrer,
        })
    }

    /// Inline violations report no blocked resource.
    pub fn is_local(&self) -> bool {
        self.blocked_uri == "self"
    }

    pub fn message(&self) -> String {
        let noun = directive_noun(&self.effective_directive);
        if self.is_local() {
            format!("Blocked inline '{noun}'")
        } else {
            format!("Blocked '{noun}' from '{}'", self.blocked_host())
        }
    }

    /// The culprit is the violated directive with each source expression
    /// reduced, so equivalent policies written differently land on the
    /// same string.
    pub fn culprit(&self) -> Option<String> {
        self.violated_directive
            .as_deref()
            .map(normalize_directive)
            .filter(|directive| !directive.is_empty())
    }

    /// Tags synthesized for every report, indexed alongside client tags.
    pub fn tag_contribution(&self) -> Vec<(String, String)> {
        vec![
            (
                "effective-directive".to_string(),
                self.effective_directive.clone(),
            ),
            ("blocked-uri".to_string(), self.blocked_uri.clone()),
        ]
    }

    fn blocked_host(&self) -> String {
        match Url::parse(&self.blocked_uri) {
            Ok(url) => match url.host_str() {
                Some(host) => match url.port() {
                    Some(port) => format!("{host}:{port}"),
                    None => host.to_string(),
                },
                // Non-hierarchical URIs (data:, blob:) reduce to their scheme.
                None => format!("{}:", url.scheme()),
            },
            Err(_) => self.blocked_uri.clone(),
        }
    }
}

fn normalize_directive(directive: &str) -> String {
    let mut parts = directive.split_whitespace();
    let Some(name) = parts.next() else {
        return String::new();
    };
    let mut normalized = vec![name.to_string()];
    normalized.extend(parts.map(normalize_source));
    normalized.join(" ")
}

/// One source expression from a policy directive. URLs shrink to their
/// host (plus any explicit port), self-references in either spelling
/// become `self`, and keyword sources pass through untouched.
fn normalize_source(value: &str) -> String {
    let unquoted = value.trim_matches('\'');
    if unquoted.is_empty() || unquoted == "self" {
        return "self".to_string();
    }
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {
            let host = url.host_str().unwrap_or_default();
            match url.port() {
                Some(port) => format!("{host}:{port}"),
                None => host.to_string(),
            }
        }
        _ => value.to_string(),
    }
}

/// Browsers send `''`, `'self'`, or nothing at all for inline violations.
fn normalize_blocked_uri(raw: Option<String>) -> String {
    match raw.as_deref().map(str::trim) {
        None | Some("") => "self".to_string(),
        Some(uri) => uri.trim_matches('\'').to_string(),
    }
}
