use actix_web::{http::StatusCode, HttpResponse, ResponseError};

use crate::cipher::CipherError;

/// Per-request failures. Every variant maps to one HTTP status; the carried
/// detail is logged and never sent to the caller.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Missing credentials or the validation service rejected them
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// No routing rule applies to the path
    #[error("service not found for path: {0}")]
    RouteNotFound(String),

    /// Outbound call to the resolved backend failed
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Outbound call (or the whole fan-out race) ran past its deadline
    #[error("upstream timeout: {0}")]
    UpstreamTimeout(String),

    /// Malformed envelope JSON or ciphertext encoding
    #[error("decode error: {0}")]
    Decode(String),

    /// Padding or block alignment failure while decrypting
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    fn code(&self) -> &'static str {
        match self {
            GatewayError::Unauthorized(_) => "unauthorized",
            GatewayError::RouteNotFound(_) => "service_not_found",
            GatewayError::UpstreamUnavailable(_) => "upstream_unavailable",
            GatewayError::UpstreamTimeout(_) => "upstream_timeout",
            GatewayError::Decode(_) => "invalid_request_body",
            GatewayError::Crypto(_) => "decryption_failed",
            GatewayError::Internal(_) => "internal_error",
        }
    }

    fn public_message(&self) -> &'static str {
        match self {
            GatewayError::Unauthorized(_) => "Invalid or missing credentials",
            GatewayError::RouteNotFound(_) => "Service not found",
            GatewayError::UpstreamUnavailable(_) => "Failed to reach upstream service",
            GatewayError::UpstreamTimeout(_) => "No response from service",
            GatewayError::Decode(_) => "Invalid request body",
            GatewayError::Crypto(_) => "Failed to decrypt request body",
            GatewayError::Internal(_) => "An internal error occurred",
        }
    }
}

impl From<CipherError> for GatewayError {
    fn from(e: CipherError) -> Self {
        match e {
            CipherError::Base64(_) => GatewayError::Decode(e.to_string()),
            _ => GatewayError::Crypto(e.to_string()),
        }
    }
}

impl ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::RouteNotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            GatewayError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Decode(_) => StatusCode::BAD_REQUEST,
            GatewayError::Crypto(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            GatewayError::Unauthorized(_) | GatewayError::RouteNotFound(_) => {
                tracing::warn!("{}", self)
            }
            _ => tracing::error!("{}", self),
        }
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "error": self.code(),
            "message": self.public_message(),
        }))
    }
}
