//! Service error types

use thiserror::Error;

/// Failure talking to the generation or persistence service
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Network, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Auth, message)
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::RateLimit, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::InvalidRequest, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::ServerError, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Unknown, message)
    }

    /// Classify a non-success HTTP response.
    ///
    /// The service reports failures as `{"detail": "..."}`; when present the
    /// detail is used as the message.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = detail_message(body);
        match status {
            401 | 403 => Self::auth(format!("Authentication failed: {message}")),
            429 => Self::rate_limit(format!("Rate limited: {message}")),
            400 | 404 | 422 => Self::invalid_request(format!("Invalid request: {message}")),
            500..=599 => Self::server_error(format!("Server error: {message}")),
            _ => Self::unknown(format!("HTTP {status}: {message}")),
        }
    }
}

/// Error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// Connection failures, timeouts, dropped streams
    Network,
    /// Missing or rejected credentials (401, 403)
    Auth,
    /// Rate limited (429)
    RateLimit,
    /// Rejected request (400, 404, 422)
    InvalidRequest,
    /// Server error (5xx)
    ServerError,
    Unknown,
}

/// Extract `detail` from a JSON error body, falling back to the raw text
pub fn detail_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| match v.get("detail") {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
            None => None,
        })
        .unwrap_or_else(|| body.trim().to_string())
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::network(format!("Request timeout: {e}"))
        } else if e.is_connect() {
            ApiError::network(format!("Connection failed: {e}"))
        } else if e.is_decode() {
            ApiError::unknown(format!("Failed to parse response: {e}"))
        } else {
            ApiError::unknown(format!("Request failed: {e}"))
        }
    }
}
