//! Error types for Federelay
//!
//! All errors in the application are converted to `AppError`,
//! which implements `IntoResponse` for proper HTTP error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Application-wide error type
///
/// Federation failures carry their own variants so callers can tell a
/// malformed header from an unreachable key owner or a bad signature.
/// Inbound verification errors always reject the whole request.
#[derive(Debug, Error)]
pub enum AppError {
    /// Resource not found (404)
    #[error("Resource not found")]
    NotFound,

    /// Authentication required (401)
    #[error("Authentication required")]
    Unauthorized,

    /// Access denied (403)
    #[error("Access denied")]
    Forbidden,

    /// Validation error (400)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Signature header could not be parsed or lacks required components (400)
    #[error("Malformed signature header: {0}")]
    SignatureHeaderMalformed(String),

    /// The signer's actor document could not be fetched (401)
    #[error("Failed to fetch signing key: {0}")]
    KeyFetchFailed(String),

    /// The signer's actor document holds no usable public key (401)
    #[error("Failed to parse signing key: {0}")]
    KeyParseFailed(String),

    /// Local private key could not be loaded for signing (500)
    #[error("Failed to sign request: {0}")]
    KeySigning(String),

    /// Signature did not verify against the rebuilt signing string (401)
    #[error("Signature verification failed")]
    SignatureMismatch,

    /// Digest header missing or not matching the received body (401)
    #[error("Digest mismatch: {0}")]
    DigestMismatch(String),

    /// Date header missing, unparseable or outside the accepted window (401)
    #[error("Stale request: {0}")]
    StaleRequest(String),

    /// A single addressee could not be turned into a delivery target
    #[error("Failed to resolve recipient {addressee}: {reason}")]
    RecipientResolutionFailed { addressee: String, reason: String },

    /// All delivery attempts to one inbox failed
    #[error("Delivery to {inbox} failed after {attempts} attempts: {reason}")]
    DeliveryFailed {
        inbox: String,
        attempts: u32,
        reason: String,
    },

    /// Persistence error (500)
    #[error("Persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    /// HTTP client error (502)
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Federation error (502)
    #[error("Federation error: {0}")]
    Federation(String),

    /// Configuration error (500)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl AppError {
    /// Short machine-readable label, used for metrics and response bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::NotFound => "not_found",
            AppError::Unauthorized => "unauthorized",
            AppError::Forbidden => "forbidden",
            AppError::Validation(_) => "validation",
            AppError::SignatureHeaderMalformed(_) => "signature_header_malformed",
            AppError::KeyFetchFailed(_) => "key_fetch_failed",
            AppError::KeyParseFailed(_) => "key_parse_failed",
            AppError::KeySigning(_) => "key_signing",
            AppError::SignatureMismatch => "signature_mismatch",
            AppError::DigestMismatch(_) => "digest_mismatch",
            AppError::StaleRequest(_) => "stale_request",
            AppError::RecipientResolutionFailed { .. } => "recipient_resolution_failed",
            AppError::DeliveryFailed { .. } => "delivery_failed",
            AppError::Persistence(_) => "persistence",
            AppError::HttpClient(_) => "http_client",
            AppError::Federation(_) => "federation",
            AppError::Config(_) => "config",
            AppError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for AppError {
    /// Convert error to HTTP response
    ///
    /// Maps each error variant to appropriate HTTP status code
    /// and JSON error body.
    fn into_response(self) -> Response {
        use axum::Json;

        let status = match &self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Unauthorized
            | AppError::KeyFetchFailed(_)
            | AppError::KeyParseFailed(_)
            | AppError::SignatureMismatch
            | AppError::DigestMismatch(_)
            | AppError::StaleRequest(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::Validation(_) | AppError::SignatureHeaderMalformed(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::RecipientResolutionFailed { .. }
            | AppError::DeliveryFailed { .. }
            | AppError::HttpClient(_)
            | AppError::Federation(_) => StatusCode::BAD_GATEWAY,
            AppError::KeySigning(_)
            | AppError::Persistence(_)
            | AppError::Config(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Internal details stay in the logs.
        let error_message = match &self {
            AppError::Persistence(_) => "Persistence error".to_string(),
            AppError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        crate::metrics::ERRORS_TOTAL
            .with_label_values(&[self.kind()])
            .inc();

        let body = Json(serde_json::json!({
            "error": error_message,
            "type": self.kind(),
        }));

        (status, body).into_response()
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
