//! Client credential parsing and verification.
//!
//! Credentials arrive in the `X-Sentry-Auth` header:
//!
//! ```text
//! Sentry sentry_version=7, sentry_key=<public>, sentry_secret=<secret>
//! ```
//!
//! or, for transports that cannot set headers, as `sentry_*` query
//! parameters. Trusted clients may prove possession of the secret without
//! sending it by signing the body with HMAC-SHA256 instead.

use crate::errors::AuthError;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;
use std::fmt;
use time::{Duration, OffsetDateTime};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying structured credentials.
pub const AUTH_HEADER: &str = "x-sentry-auth";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProtocolVersion {
    V2,
    V3,
    V4,
    V5,
    V6,
    V7,
}

impl ProtocolVersion {
    pub fn parse(value: &str) -> Result<Self, AuthError> {
        match value {
            "2.0" => Ok(ProtocolVersion::V2),
            "3" => Ok(ProtocolVersion::V3),
            "4" => Ok(ProtocolVersion::V4),
            "5" => Ok(ProtocolVersion::V5),
            "6" => Ok(ProtocolVersion::V6),
            "7" => Ok(ProtocolVersion::V7),
            other => Err(AuthError::UnsupportedProtocol(other.to_string())),
        }
    }

    /// From protocol 3 on, server-side clients must prove possession of the
    /// secret. Browser clients are recognized by their Origin header and
    /// exempted.
    pub fn requires_secret(self) -> bool {
        self >= ProtocolVersion::V3
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProtocolVersion::V2 => "2.0",
            ProtocolVersion::V3 => "3",
            ProtocolVersion::V4 => "4",
            ProtocolVersion::V5 => "5",
            ProtocolVersion::V6 => "6",
            ProtocolVersion::V7 => "7",
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credentials extracted from one request.
#[derive(Clone, Debug)]
pub struct Auth {
    pub version: ProtocolVersion,
    pub public_key: String,
    pub secret_key: Option<String>,
    pub signature: Option<String>,
    /// Signature timestamp, kept verbatim: the signed message embeds the
    /// exact string the client sent.
    pub timestamp: Option<String>,
    pub client: Option<String>,
}

impl Auth {
    pub fn timestamp_secs(&self) -> Option<f64> {
        self.timestamp.as_deref().and_then(|raw| raw.parse().ok())
    }
}

/// Parses credentials from the auth header, falling back to `sentry_*`
/// query parameters when the header is absent or malformed. A request that
/// carries a parseable header and `sentry_*` parameters at the same time is
/// ambiguous and rejected.
pub fn auth_from_request(header: Option<&str>, query: &str) -> Result<Auth, AuthError> {
    let query_pairs: HashMap<String, String> = url::form_urlencoded::parse(query.as_bytes())
        .filter(|(key, _)| key.starts_with("sentry_"))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    if let Some(value) = header {
        let pairs = parse_auth_header(value);
        if !pairs.is_empty() {
            if !query_pairs.is_empty() {
                return Err(AuthError::MultipleAuth);
            }
            return auth_from_pairs(&pairs);
        }
    }

    if query_pairs.is_empty() {
        return Err(AuthError::MissingKey);
    }
    auth_from_pairs(&query_pairs)
}

/// The security endpoint authenticates with the bare public key in the
/// query string; browsers posting violation reports cannot set headers.
pub fn public_key_from_query(query: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "sentry_key")
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

fn parse_auth_header(value: &str) -> HashMap<String, String> {
    let Some((prefix, rest)) = value.trim().split_once(' ') else {
        return HashMap::new();
    };
    if !prefix.eq_ignore_ascii_case("sentry") {
        return HashMap::new();
    }
    rest.split(',')
        .filter_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

fn non_empty(pairs: &HashMap<String, String>, key: &str) -> Option<String> {
    pairs.get(key).filter(|value| !value.is_empty()).cloned()
}

fn auth_from_pairs(pairs: &HashMap<String, String>) -> Result<Auth, AuthError> {
    let public_key = non_empty(pairs, "sentry_key").ok_or(AuthError::MissingKey)?;
    let version = match pairs.get("sentry_version") {
        Some(raw) => ProtocolVersion::parse(raw)?,
        None => return Err(AuthError::UnsupportedProtocol("none".to_string())),
    };

    Ok(Auth {
        version,
        public_key,
        secret_key: non_empty(pairs, "sentry_secret"),
        signature: non_empty(pairs, "sentry_signature"),
        timestamp: non_empty(pairs, "sentry_timestamp"),
        client: non_empty(pairs, "sentry_client"),
    })
}

/// Checks credentials against the project key they name.
///
/// Two modes are accepted, told apart by signature presence alone: the
/// classic client header carries `sentry_timestamp` even when nothing is
/// signed, so a bare timestamp never selects signed mode. Bearer mode
/// sends the secret itself (or, for public clients and protocol 2.0,
/// nothing beyond the public key). Signed mode sends an HMAC-SHA256 over
/// `"{timestamp} {body}"` plus the timestamp, which must fall within
/// `max_skew` of server time. Mixing a bearer secret with a signature
/// makes the request ambiguous and is rejected.
///
/// `public_client` marks requests that cannot be expected to hold the
/// secret: browser clients recognized by their Origin header, and the
/// query-string transport. The origin guard covers those instead.
pub fn verify(
    auth: &Auth,
    secret_key: Option<&str>,
    body: &[u8],
    public_client: bool,
    now: OffsetDateTime,
    max_skew: Duration,
) -> Result<(), AuthError> {
    if let Some(signature) = auth.signature.as_deref() {
        if auth.secret_key.is_some() {
            return Err(AuthError::SignatureMismatch);
        }
        let raw_timestamp = auth.timestamp.as_deref().ok_or(AuthError::TimestampExpired)?;
        let timestamp = auth.timestamp_secs().ok_or(AuthError::TimestampExpired)?;
        let secret = secret_key.ok_or(AuthError::SecretRequired)?;

        let skew = (now.unix_timestamp() as f64 - timestamp).abs();
        if skew > max_skew.as_seconds_f64() {
            return Err(AuthError::TimestampExpired);
        }
        let expected = compute_signature(secret, raw_timestamp, body);
        if !constant_time_eq(expected.as_bytes(), signature.to_ascii_lowercase().as_bytes()) {
            return Err(AuthError::SignatureMismatch);
        }
        return Ok(());
    }

    match (auth.secret_key.as_deref(), secret_key) {
        (Some(supplied), Some(expected)) => {
            if constant_time_eq(supplied.as_bytes(), expected.as_bytes()) {
                Ok(())
            } else {
                Err(AuthError::SignatureMismatch)
            }
        }
        // A secret was sent but the key has none to compare against.
        (Some(_), None) => Err(AuthError::SignatureMismatch),
        (None, _) => {
            if auth.version.requires_secret() && !public_client {
                Err(AuthError::SecretRequired)
            } else {
                Ok(())
            }
        }
    }
}

/// HMAC-SHA256 over `"{timestamp} {body}"`, hex encoded. The timestamp is
/// the raw header string, not a reformatted number.
pub fn compute_signature(secret: &str, timestamp: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(timestamp.as_bytes());
    mac.update(b" ");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
