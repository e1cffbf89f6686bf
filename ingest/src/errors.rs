use axum::Json;
use axum::http::header::HeaderName;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Result type alias for request processing.
pub type Result<T, E = ApiError> = std::result::Result<T, E>;

/// Response header mirroring the rejection reason, so SDK clients can log
/// it without parsing the body.
pub const ERROR_HEADER: &str = "x-sentry-error";

/// Credential problems detected before the payload is even looked at.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("missing authentication information")]
    MissingKey,

    #[error("unknown api key")]
    UnknownKey,

    #[error("invalid signature")]
    SignatureMismatch,

    #[error("signature timestamp outside the allowed window")]
    TimestampExpired,

    #[error("missing required attribute: sentry_secret")]
    SecretRequired,

    #[error("unsupported protocol version: {0}")]
    UnsupportedProtocol(String),

    #[error("multiple authentication payloads detected")]
    MultipleAuth,
}

/// Failures turning the request body into a JSON document.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("unsupported content encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("corrupt compressed stream: {0}")]
    CorruptStream(String),

    #[error("invalid json: {0}")]
    InvalidJson(String),

    #[error("payload exceeds the configured size limit")]
    SizeExceeded,
}

/// Payloads that decoded fine but do not form a well-formed event.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingRequiredField(&'static str),

    #[error("invalid value for '{field}': expected {expected}")]
    InvalidType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("unknown interface: {0}")]
    UnknownInterface(String),
}

#[derive(Error, Debug)]
#[error("origin '{origin}' is not allowed")]
pub struct OriginError {
    pub origin: String,
}

/// Terminal request error. Every failure a request can hit maps onto
/// exactly one of these, and each carries its HTTP status.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Origin(#[from] OriginError),

    #[error("internal error: {0}")]
    Store(#[from] store::StoreError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Auth(AuthError::MissingKey) | ApiError::Auth(AuthError::UnknownKey) => {
                StatusCode::UNAUTHORIZED
            }
            ApiError::Auth(AuthError::UnsupportedProtocol(_))
            | ApiError::Auth(AuthError::MultipleAuth) => StatusCode::BAD_REQUEST,
            ApiError::Auth(_) => StatusCode::FORBIDDEN,
            ApiError::Decode(_) | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Origin(_) => StatusCode::FORBIDDEN,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.to_string();

        // Client mistakes are routine and stay at debug; only server-side
        // failures are error-worthy.
        if status.is_server_error() {
            tracing::error!(error = %message, "request failed");
        } else {
            tracing::debug!(%status, error = %message, "request rejected");
        }

        let mut response = (
            status,
            Json(ErrorBody {
                error: message.clone(),
            }),
        )
            .into_response();
        if let Ok(value) = HeaderValue::from_str(&message) {
            response
                .headers_mut()
                .insert(HeaderName::from_static(ERROR_HEADER), value);
        }
        response
    }
}
