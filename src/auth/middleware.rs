//! Bearer token authentication
//!
//! Protects the client-facing outbox. Federation endpoints authenticate with
//! HTTP Signatures instead.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, request::Parts},
};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::AppState;
use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

fn extract_token_from_headers(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Compare a presented token with the configured one in constant time.
pub fn token_matches(presented: &str, expected: &str) -> bool {
    let Ok(mut presented_mac) = HmacSha256::new_from_slice(expected.as_bytes()) else {
        return false;
    };
    presented_mac.update(presented.as_bytes());
    let presented_tag = presented_mac.finalize().into_bytes();

    let Ok(mut expected_mac) = HmacSha256::new_from_slice(expected.as_bytes()) else {
        return false;
    };
    expected_mac.update(expected.as_bytes());
    expected_mac.verify_slice(&presented_tag).is_ok()
}

/// Extractor for an authenticated API client
///
/// # Usage
/// ```ignore
/// async fn handler(_client: ApiClient) -> impl IntoResponse {
///     "authenticated"
/// }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ApiClient;

#[async_trait]
impl<S> FromRequestParts<S> for ApiClient
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        let token = extract_token_from_headers(&parts.headers).ok_or(AppError::Unauthorized)?;

        if !token_matches(token, &state.config.auth.api_token) {
            tracing::warn!("Rejected API request with invalid bearer token");
            return Err(AppError::Unauthorized);
        }

        Ok(ApiClient)
    }
}
