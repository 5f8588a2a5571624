//! Remote actor lookup
//!
//! `ActorDirectory` is the seam between the federation core and the network:
//! recipient resolution and key resolution only ever see actor documents.

use async_trait::async_trait;
use serde_json::Value;
use std::net::IpAddr;

use super::model::{ACTIVITY_ACCEPT, Actor};
use crate::error::AppError;

/// Fetches actor documents by URI.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActorDirectory: Send + Sync {
    /// Fetch the raw JSON document published at `uri`.
    async fn fetch_actor_document(&self, uri: &str) -> Result<Value, AppError>;
}

/// Fetch and decode an actor document.
pub async fn fetch_actor(directory: &dyn ActorDirectory, uri: &str) -> Result<Actor, AppError> {
    let document = directory.fetch_actor_document(uri).await?;
    serde_json::from_value(document)
        .map_err(|e| AppError::Federation(format!("Invalid actor document at {}: {}", uri, e)))
}

/// Actor URI that owns a key id (the key id without its fragment).
pub fn key_owner(key_id: &str) -> &str {
    key_id.split('#').next().unwrap_or(key_id)
}

/// Whether a signature key id belongs to the given actor.
pub fn key_id_matches_actor(key_id: &str, actor_id: &str) -> bool {
    key_owner(key_id) == key_owner(actor_id)
}

/// `ActorDirectory` over HTTPS with SSRF guards.
pub struct HttpActorDirectory {
    client: reqwest::Client,
    allow_private_hosts: bool,
}

impl HttpActorDirectory {
    pub fn new(client: reqwest::Client, allow_private_hosts: bool) -> Self {
        Self {
            client,
            allow_private_hosts,
        }
    }
}

#[async_trait]
impl ActorDirectory for HttpActorDirectory {
    async fn fetch_actor_document(&self, uri: &str) -> Result<Value, AppError> {
        let actor_url = key_owner(uri);
        let parsed = parse_actor_url(actor_url)?;

        if !self.allow_private_hosts {
            let host = extract_actor_domain(actor_url)?;
            let port = parsed
                .port_or_known_default()
                .ok_or_else(|| AppError::Validation("Missing port in actor URL".to_string()))?;

            // Resolve DNS before fetching and reject local/private destinations.
            validate_resolved_host_ips(&host, port).await?;
        }

        tracing::debug!(actor = %actor_url, "Fetching actor document");

        let response = self
            .client
            .get(parsed)
            .header("Accept", ACTIVITY_ACCEPT)
            .send()
            .await
            .map_err(|e| AppError::Federation(format!("Failed to fetch actor: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::Federation(format!(
                "Failed to fetch actor {}: HTTP {}",
                actor_url,
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::Federation(format!("Failed to parse actor: {}", e)))
    }
}

fn parse_actor_url(actor_url: &str) -> Result<url::Url, AppError> {
    let parsed = url::Url::parse(actor_url)
        .map_err(|e| AppError::Validation(format!("Invalid actor URL: {}", e)))?;

    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(AppError::Validation(format!(
            "Unsupported actor URL scheme: {}",
            scheme
        ))),
    }
}

fn is_disallowed_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unique_local()
                || v6.is_unicast_link_local()
                || v6.is_multicast()
                || v6.is_unspecified()
        }
    }
}

fn is_disallowed_host(host: &str) -> bool {
    let normalized = host.trim_end_matches('.').to_ascii_lowercase();
    if normalized == "localhost" || normalized.ends_with(".localhost") {
        return true;
    }

    normalized
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .map(is_disallowed_ip)
        .unwrap_or(false)
}

/// Whether a URL points at a local or private destination.
pub(crate) fn is_private_url(url: &url::Url) -> bool {
    !matches!(url.scheme(), "http" | "https") || url.host_str().map_or(true, is_disallowed_host)
}

/// Redirect hops followed before giving up.
const MAX_REDIRECTS: usize = 5;

/// Redirect policy for the federation HTTP client.
///
/// Every hop is held to the same host check as the first request. A refused
/// hop stops the redirect chain and surfaces the 3xx response to the caller.
pub fn redirect_policy(allow_private_hosts: bool) -> reqwest::redirect::Policy {
    reqwest::redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            attempt.error("too many redirects")
        } else if !allow_private_hosts && is_private_url(attempt.url()) {
            tracing::warn!(url = %attempt.url(), "Refusing redirect to private address");
            attempt.stop()
        } else {
            attempt.follow()
        }
    })
}

async fn validate_resolved_host_ips(host: &str, port: u16) -> Result<(), AppError> {
    let normalized = host.trim_end_matches('.').to_ascii_lowercase();

    let mut resolved_any = false;
    let lookup = tokio::net::lookup_host((normalized.as_str(), port))
        .await
        .map_err(|e| AppError::Federation(format!("Failed to resolve actor host: {}", e)))?;

    for addr in lookup {
        resolved_any = true;
        if is_disallowed_ip(addr.ip()) {
            return Err(AppError::Forbidden);
        }
    }

    if !resolved_any {
        return Err(AppError::Federation(
            "No DNS records for actor host".to_string(),
        ));
    }

    Ok(())
}

/// Extract and validate remote actor domain from an actor URL or key ID URL.
///
/// This rejects non-HTTP(S) URLs and obvious local/private hosts.
pub fn extract_actor_domain(actor_or_key_id: &str) -> Result<String, AppError> {
    let parsed = parse_actor_url(key_owner(actor_or_key_id))?;

    let host = parsed
        .host_str()
        .ok_or_else(|| AppError::Validation("Missing host in actor URL".to_string()))?
        .to_ascii_lowercase();

    if is_disallowed_host(&host) {
        return Err(AppError::Forbidden);
    }

    Ok(host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, response::Redirect, routing::get};
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn extract_actor_domain_rejects_localhost() {
        match extract_actor_domain("https://localhost/users/alice#main-key") {
            Err(AppError::Forbidden) => {}
            other => panic!("expected forbidden for localhost, got: {other:?}"),
        }
    }

    #[test]
    fn extract_actor_domain_rejects_private_ip() {
        match extract_actor_domain("http://192.168.1.10/users/alice#main-key") {
            Err(AppError::Forbidden) => {}
            other => panic!("expected forbidden for private ip, got: {other:?}"),
        }
    }

    #[test]
    fn extract_actor_domain_rejects_non_http_scheme() {
        assert!(matches!(
            extract_actor_domain("ftp://example.com/users/alice"),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn extract_actor_domain_accepts_public_host() {
        let domain = extract_actor_domain("https://Example.com/users/alice#main-key")
            .expect("public host should be accepted");
        assert_eq!(domain, "example.com");
    }

    #[tokio::test]
    async fn validate_resolved_host_ips_rejects_loopback() {
        match validate_resolved_host_ips("127.0.0.1", 80).await {
            Err(AppError::Forbidden) => {}
            other => panic!("expected forbidden for loopback resolution, got: {other:?}"),
        }
    }

    #[test]
    fn key_owner_strips_fragment() {
        assert_eq!(
            key_owner("https://remote.example/users/alice#main-key"),
            "https://remote.example/users/alice"
        );
        assert_eq!(
            key_owner("https://remote.example/users/alice"),
            "https://remote.example/users/alice"
        );
    }

    #[test]
    fn key_id_matches_actor_compares_owners() {
        assert!(key_id_matches_actor(
            "https://remote.example/users/alice#main-key",
            "https://remote.example/users/alice",
        ));
        assert!(!key_id_matches_actor(
            "https://remote.example/users/bob#main-key",
            "https://remote.example/users/alice",
        ));
    }

    #[tokio::test]
    async fn fetch_actor_decodes_document() {
        let mut directory = MockActorDirectory::new();
        directory
            .expect_fetch_actor_document()
            .withf(|uri| uri == "https://b.example/users/bob")
            .times(1)
            .returning(|_| {
                Ok(json!({
                    "id": "https://b.example/users/bob",
                    "type": "Person",
                    "inbox": "https://b.example/users/bob/inbox",
                    "endpoints": {"sharedInbox": "https://b.example/inbox"}
                }))
            });

        let actor = fetch_actor(&directory, "https://b.example/users/bob")
            .await
            .expect("valid actor");
        assert_eq!(actor.inbox, "https://b.example/users/bob/inbox");
        assert_eq!(actor.shared_inbox(), Some("https://b.example/inbox"));
    }

    #[tokio::test]
    async fn fetch_actor_rejects_document_without_inbox() {
        let mut directory = MockActorDirectory::new();
        directory
            .expect_fetch_actor_document()
            .returning(|_| Ok(json!({"id": "https://b.example/users/bob"})));

        match fetch_actor(&directory, "https://b.example/users/bob").await {
            Err(AppError::Federation(msg)) => assert!(msg.contains("Invalid actor document")),
            other => panic!("expected invalid document error, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn http_directory_refuses_loopback_when_guarded() {
        let directory = HttpActorDirectory::new(reqwest::Client::new(), false);

        match directory
            .fetch_actor_document("http://127.0.0.1:9/users/alice")
            .await
        {
            Err(AppError::Forbidden) => {}
            other => panic!("expected forbidden, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn http_directory_fetches_document_and_drops_fragment() {
        let app = Router::new().route(
            "/users/alice",
            get(|| async { Json(json!({"id": "alice", "inbox": "inbox"})) }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let directory = HttpActorDirectory::new(reqwest::Client::new(), true);
        let document = directory
            .fetch_actor_document(&format!("http://{addr}/users/alice#main-key"))
            .await
            .expect("document fetched");

        assert_eq!(document["id"], "alice");
    }

    #[tokio::test]
    async fn http_directory_maps_error_status_to_federation_error() {
        let app = Router::new();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let directory = HttpActorDirectory::new(reqwest::Client::new(), true);
        match directory
            .fetch_actor_document(&format!("http://{addr}/users/missing"))
            .await
        {
            Err(AppError::Federation(msg)) => assert!(msg.contains("404")),
            other => panic!("expected federation error, got: {other:?}"),
        }
    }

    #[test]
    fn is_private_url_flags_local_destinations() {
        for uri in [
            "http://127.0.0.1:8080/inbox",
            "http://[::1]/inbox",
            "https://10.1.2.3/inbox",
            "https://app.localhost/inbox",
            "ftp://b.example/inbox",
        ] {
            assert!(is_private_url(&url::Url::parse(uri).unwrap()), "{uri}");
        }
        assert!(!is_private_url(
            &url::Url::parse("https://b.example/inbox").unwrap()
        ));
    }

    /// Serves `/start`, which redirects to `/internal` on the same loopback
    /// server, and records whether `/internal` was ever reached.
    async fn spawn_redirecting_server() -> (String, Arc<AtomicBool>) {
        let reached = Arc::new(AtomicBool::new(false));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let target = format!("http://{addr}/internal");

        let flag = reached.clone();
        let app = Router::new()
            .route(
                "/start",
                get(move || {
                    let target = target.clone();
                    async move { Redirect::temporary(&target) }
                }),
            )
            .route(
                "/internal",
                get(move || {
                    flag.store(true, Ordering::SeqCst);
                    async { Json(json!({"id": "internal", "inbox": "inbox"})) }
                }),
            );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}"), reached)
    }

    #[tokio::test]
    async fn redirect_to_loopback_is_refused_when_guarded() {
        let (base, reached) = spawn_redirecting_server().await;
        let client = reqwest::Client::builder()
            .redirect(redirect_policy(false))
            .build()
            .unwrap();

        let response = client.get(format!("{base}/start")).send().await.unwrap();
        assert_eq!(response.status(), 307);
        assert!(!reached.load(Ordering::SeqCst));

        // The directory treats the unfollowed redirect as a failed fetch.
        let directory = HttpActorDirectory::new(client, true);
        match directory
            .fetch_actor_document(&format!("{base}/start"))
            .await
        {
            Err(AppError::Federation(msg)) => assert!(msg.contains("307")),
            other => panic!("expected federation error, got: {other:?}"),
        }
        assert!(!reached.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn redirect_is_followed_when_private_hosts_allowed() {
        let (base, reached) = spawn_redirecting_server().await;
        let client = reqwest::Client::builder()
            .redirect(redirect_policy(true))
            .build()
            .unwrap();

        let response = client.get(format!("{base}/start")).send().await.unwrap();
        assert_eq!(response.status(), 200);
        assert!(reached.load(Ordering::SeqCst));
    }
}
