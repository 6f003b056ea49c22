//! Per-exchange error kinds and their client-facing mapping.
//!
//! Client-visible errors map to an HTTP status with a short plaintext
//! body; internal detail stays in the logs and never reaches clients.

use hyper::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("Too many requests")]
    AdmissionDenied,

    #[error("Request body exceeds the configured size limit")]
    RequestTooLarge,

    #[error("Request validation error: {0}")]
    RequestValidationFailed(String),

    #[error("No upstream configured for request path")]
    UpstreamUnresolved,

    #[error("Bad Gateway")]
    UpstreamInvalid,

    #[error("Bad Gateway")]
    UpstreamTransport(#[source] anyhow::Error),

    #[error("No matching replay record found")]
    ReplayMiss,

    #[error("Database error during replay")]
    StoreReadFailed(#[source] sqlx::Error),

    #[error("Failed to read request body")]
    RequestBodyRead(#[source] anyhow::Error),
}

impl ExchangeError {
    pub fn status(&self) -> StatusCode {
        match self {
            ExchangeError::AdmissionDenied => StatusCode::TOO_MANY_REQUESTS,
            ExchangeError::RequestTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ExchangeError::RequestValidationFailed(_) => StatusCode::BAD_REQUEST,
            ExchangeError::UpstreamUnresolved
            | ExchangeError::UpstreamInvalid
            | ExchangeError::UpstreamTransport(_) => StatusCode::BAD_GATEWAY,
            ExchangeError::ReplayMiss => StatusCode::NOT_FOUND,
            ExchangeError::StoreReadFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ExchangeError::RequestBodyRead(_) => StatusCode::BAD_REQUEST,
        }
    }
}
