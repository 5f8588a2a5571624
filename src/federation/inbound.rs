//! Inbound signature verification
//!
//! Checks run cheapest first: header syntax, date window and body digest
//! are validated before any remote key is fetched.

use chrono::Utc;
use http::HeaderMap;
use std::sync::Arc;
use std::time::Duration;

use super::key_cache::KeyResolver;
use super::signature::{build_signing_string, digest_matches, parse_http_date, parse_signature_header, verify};
use crate::error::AppError;
use crate::metrics;

/// The parts of a received request that signatures cover
#[derive(Debug, Clone, Copy)]
pub struct InboundRequest<'a> {
    pub method: &'a str,
    /// Path plus query, exactly as received
    pub path: &'a str,
    pub headers: &'a HeaderMap,
    pub body: &'a [u8],
}

/// Identity proven by a valid signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedSignature {
    pub key_id: String,
    /// Actor owning `key_id`
    pub actor: String,
}

/// Verifies HTTP signatures on inbound requests
pub struct InboundVerifier {
    keys: Arc<KeyResolver>,
    /// Accepted clock skew of the `Date` header; `None` disables the check
    max_age: Option<Duration>,
}

impl InboundVerifier {
    pub fn new(keys: Arc<KeyResolver>, max_age: Option<Duration>) -> Self {
        Self { keys, max_age }
    }

    /// Verify a request, rejecting it on any failure.
    ///
    /// # Errors
    /// - `SignatureHeaderMalformed`: missing/invalid `Signature` or `Host`
    /// - `StaleRequest`: missing `Date`, or outside the accepted window
    /// - `DigestMismatch`: missing `Digest`, or not the SHA-256 of the body
    /// - `KeyFetchFailed` / `KeyParseFailed`: signer's key unavailable
    /// - `SignatureMismatch`: signature does not verify
    pub async fn verify(&self, request: &InboundRequest<'_>) -> Result<VerifiedSignature, AppError> {
        let result = self.verify_inner(request).await;

        let label = match &result {
            Ok(_) => "accepted",
            Err(e) => e.kind(),
        };
        metrics::INBOUND_VERIFICATIONS_TOTAL
            .with_label_values(&[label])
            .inc();

        match &result {
            Ok(verified) => {
                tracing::debug!(key_id = %verified.key_id, "Inbound signature verified");
            }
            Err(e) => {
                tracing::warn!(path = %request.path, error = %e, "Rejected inbound request");
            }
        }
        result
    }

    async fn verify_inner(&self, request: &InboundRequest<'_>) -> Result<VerifiedSignature, AppError> {
        let signature_header = header_value(request.headers, "signature")
            .ok_or_else(|| AppError::SignatureHeaderMalformed("missing Signature header".to_string()))?;
        let signature = parse_signature_header(signature_header)?;

        let host = header_value(request.headers, "host")
            .ok_or_else(|| AppError::SignatureHeaderMalformed("missing Host header".to_string()))?;

        let date = header_value(request.headers, "date")
            .ok_or_else(|| AppError::StaleRequest("missing Date header".to_string()))?;
        self.check_date(date)?;

        let digest = header_value(request.headers, "digest")
            .ok_or_else(|| AppError::DigestMismatch("missing Digest header".to_string()))?;
        if !digest_matches(digest, request.body) {
            return Err(AppError::DigestMismatch(
                "Digest header does not match the received body".to_string(),
            ));
        }

        // Rebuilt from what was received, never from the sender's header list.
        let signing_string = build_signing_string(request.method, request.path, host, date, digest);

        let key = self.keys.resolve(&signature.key_id).await?;
        if verify(&key.public_key_pem, &signing_string, &signature.signature) {
            return Ok(VerifiedSignature {
                key_id: key.key_id,
                actor: key.owner,
            });
        }

        if key.from_cache {
            // The actor may have rotated its key since we cached it.
            tracing::debug!(key_id = %signature.key_id, "Cached key failed, refetching");
            self.keys.invalidate(&signature.key_id).await;
            let fresh = self.keys.resolve_fresh(&signature.key_id).await?;
            if verify(&fresh.public_key_pem, &signing_string, &signature.signature) {
                return Ok(VerifiedSignature {
                    key_id: fresh.key_id,
                    actor: fresh.owner,
                });
            }
        }

        Err(AppError::SignatureMismatch)
    }

    fn check_date(&self, date: &str) -> Result<(), AppError> {
        let Some(max_age) = self.max_age else {
            return Ok(());
        };

        let sent_at = parse_http_date(date)
            .ok_or_else(|| AppError::StaleRequest(format!("unparseable Date header: {}", date)))?;
        let skew = (Utc::now() - sent_at).num_seconds().unsigned_abs();

        if skew > max_age.as_secs() {
            return Err(AppError::StaleRequest(format!(
                "Date header is {}s away from server time (limit {}s)",
                skew,
                max_age.as_secs()
            )));
        }
        Ok(())
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::federation::actor::MockActorDirectory;
    use crate::federation::signature::{
        compute_digest, format_http_date, format_signature_header, sign, sign_request,
    };
    use crate::federation::test_support::{actor_document, other_keypair, test_keypair};
    use chrono::{DateTime, Duration as ChronoDuration};
    use http::HeaderValue;

    const ACTOR: &str = "https://remote.example/users/alice";
    const KEY_ID: &str = "https://remote.example/users/alice#main-key";
    const BODY: &[u8] = br#"{"type":"Follow","actor":"https://remote.example/users/alice"}"#;

    fn header_map(pairs: &[(&'static str, String)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        headers
    }

    fn signed_headers(private_pem: &str, body: &[u8]) -> HeaderMap {
        let url: url::Url = "https://local.example/inbox".parse().unwrap();
        let signed = sign_request("POST", &url, body, KEY_ID, private_pem).unwrap();
        header_map(&[
            ("host", signed.host),
            ("date", signed.date),
            ("digest", signed.digest),
            ("signature", signed.signature),
        ])
    }

    fn signed_headers_at(private_pem: &str, body: &[u8], at: DateTime<Utc>) -> HeaderMap {
        let date = format_http_date(at);
        let digest = compute_digest(body);
        let signing_string = build_signing_string("post", "/inbox", "local.example", &date, &digest);
        let signature = sign(private_pem, &signing_string).unwrap();
        header_map(&[
            ("host", "local.example".to_string()),
            ("date", date),
            ("digest", digest),
            ("signature", format_signature_header(KEY_ID, &signature)),
        ])
    }

    fn request<'a>(path: &'a str, headers: &'a HeaderMap, body: &'a [u8]) -> InboundRequest<'a> {
        InboundRequest {
            method: "POST",
            path,
            headers,
            body,
        }
    }

    fn verifier(directory: MockActorDirectory) -> InboundVerifier {
        let keys = Arc::new(KeyResolver::new(Arc::new(directory), Duration::from_secs(60)));
        InboundVerifier::new(keys, Some(Duration::from_secs(300)))
    }

    fn directory_publishing(public_pem: &str, times: usize) -> MockActorDirectory {
        let document = actor_document(ACTOR, public_pem);
        let mut directory = MockActorDirectory::new();
        directory
            .expect_fetch_actor_document()
            .withf(|uri| uri == ACTOR)
            .times(times)
            .returning(move |_| Ok(document.clone()));
        directory
    }

    fn no_fetch_directory() -> MockActorDirectory {
        let mut directory = MockActorDirectory::new();
        directory.expect_fetch_actor_document().times(0);
        directory
    }

    #[tokio::test]
    async fn accepts_correctly_signed_request() {
        let (private_pem, public_pem) = test_keypair();
        let verifier = verifier(directory_publishing(public_pem, 1));
        let headers = signed_headers(private_pem, BODY);

        let verified = verifier
            .verify(&request("/inbox", &headers, BODY))
            .await
            .expect("valid signature");

        assert_eq!(verified.key_id, KEY_ID);
        assert_eq!(verified.actor, ACTOR);
    }

    #[tokio::test]
    async fn rejects_tampered_body_before_fetching_key() {
        let (private_pem, _) = test_keypair();
        let verifier = verifier(no_fetch_directory());
        let headers = signed_headers(private_pem, BODY);
        let tampered = br#"{"type":"Delete","actor":"https://remote.example/users/alice"}"#;

        match verifier.verify(&request("/inbox", &headers, tampered)).await {
            Err(AppError::DigestMismatch(_)) => {}
            other => panic!("expected DigestMismatch, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejects_missing_digest_header() {
        let (private_pem, _) = test_keypair();
        let verifier = verifier(no_fetch_directory());
        let mut headers = signed_headers(private_pem, BODY);
        headers.remove("digest");

        assert!(matches!(
            verifier.verify(&request("/inbox", &headers, BODY)).await,
            Err(AppError::DigestMismatch(_))
        ));
    }

    #[tokio::test]
    async fn rejects_malformed_header_without_fetching_key() {
        let verifier = verifier(no_fetch_directory());
        let mut headers = signed_headers(&test_keypair().0, BODY);
        headers.insert(
            "signature",
            HeaderValue::from_static(
                "keyId=\"https://remote.example/users/alice#main-key\",headers=\"(request-target) host date\",signature=\"ZmFrZQ==\"",
            ),
        );

        assert!(matches!(
            verifier.verify(&request("/inbox", &headers, BODY)).await,
            Err(AppError::SignatureHeaderMalformed(_))
        ));

        headers.remove("signature");
        assert!(matches!(
            verifier.verify(&request("/inbox", &headers, BODY)).await,
            Err(AppError::SignatureHeaderMalformed(_))
        ));
    }

    #[tokio::test]
    async fn rejects_signature_from_unpublished_key() {
        let (private_pem, _) = test_keypair();
        let (_, other_public_pem) = other_keypair();
        let verifier = verifier(directory_publishing(other_public_pem, 1));
        let headers = signed_headers(private_pem, BODY);

        assert!(matches!(
            verifier.verify(&request("/inbox", &headers, BODY)).await,
            Err(AppError::SignatureMismatch)
        ));
    }

    #[tokio::test]
    async fn rejects_request_replayed_to_another_path() {
        let (private_pem, public_pem) = test_keypair();
        let verifier = verifier(directory_publishing(public_pem, 1));
        let headers = signed_headers(private_pem, BODY);

        assert!(matches!(
            verifier
                .verify(&request("/users/admin/inbox", &headers, BODY))
                .await,
            Err(AppError::SignatureMismatch)
        ));
    }

    #[tokio::test]
    async fn key_fetch_failure_rejects() {
        let (private_pem, _) = test_keypair();
        let mut directory = MockActorDirectory::new();
        directory
            .expect_fetch_actor_document()
            .returning(|_| Err(AppError::Federation("timeout".to_string())));
        let verifier = verifier(directory);
        let headers = signed_headers(private_pem, BODY);

        assert!(matches!(
            verifier.verify(&request("/inbox", &headers, BODY)).await,
            Err(AppError::KeyFetchFailed(_))
        ));
    }

    #[tokio::test]
    async fn rejects_stale_date_and_accepts_when_window_disabled() {
        let (private_pem, public_pem) = test_keypair();
        let headers = signed_headers_at(private_pem, BODY, Utc::now() - ChronoDuration::hours(2));

        let strict = verifier(no_fetch_directory());
        assert!(matches!(
            strict.verify(&request("/inbox", &headers, BODY)).await,
            Err(AppError::StaleRequest(_))
        ));

        let keys = Arc::new(KeyResolver::new(
            Arc::new(directory_publishing(public_pem, 1)),
            Duration::from_secs(60),
        ));
        let lenient = InboundVerifier::new(keys, None);
        assert!(lenient.verify(&request("/inbox", &headers, BODY)).await.is_ok());
    }

    #[tokio::test]
    async fn rotated_key_is_refetched_once() {
        let (old_private, old_public) = test_keypair();
        let (new_private, new_public) = other_keypair();
        let old_document = actor_document(ACTOR, old_public);
        let new_document = actor_document(ACTOR, new_public);

        let mut directory = MockActorDirectory::new();
        let mut seq = mockall::Sequence::new();
        directory
            .expect_fetch_actor_document()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_| Ok(old_document.clone()));
        directory
            .expect_fetch_actor_document()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_| Ok(new_document.clone()));
        let verifier = verifier(directory);

        let before = signed_headers(old_private, BODY);
        verifier
            .verify(&request("/inbox", &before, BODY))
            .await
            .expect("old key valid before rotation");

        let after = signed_headers(new_private, BODY);
        verifier
            .verify(&request("/inbox", &after, BODY))
            .await
            .expect("new key picked up after refetch");
    }
}
