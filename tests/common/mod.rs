//! Common test utilities for E2E tests

#![allow(dead_code)]

use axum::Router;
use federelay::{AppState, config};
use rsa::RsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use std::sync::OnceLock;
use tempfile::TempDir;
use tokio::net::TcpListener;

pub const TEST_USERNAME: &str = "testuser";
pub const TEST_API_TOKEN: &str = "test-api-token-that-is-long-enough-0123456789";

/// `(private_pem, public_pem)` for the local test account.
pub fn local_keypair() -> &'static (String, String) {
    static KEYPAIR: OnceLock<(String, String)> = OnceLock::new();
    KEYPAIR.get_or_init(generate_keypair)
}

/// `(private_pem, public_pem)` for remote test actors.
pub fn remote_keypair() -> &'static (String, String) {
    static KEYPAIR: OnceLock<(String, String)> = OnceLock::new();
    KEYPAIR.get_or_init(generate_keypair)
}

fn generate_keypair() -> (String, String) {
    let mut rng = rand::thread_rng();
    let private_key = RsaPrivateKey::new(&mut rng, 1024).unwrap();
    let private_pem = private_key.to_pkcs8_pem(LineEnding::LF).unwrap().to_string();
    let public_pem = private_key
        .to_public_key()
        .to_public_key_pem(LineEnding::LF)
        .unwrap();
    (private_pem, public_pem)
}

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub _temp_dir: TempDir,
    pub client: reqwest::Client,
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        // Create temporary directory for test database
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        // Pre-create the account so startup does not generate a 4096-bit key.
        let db = federelay::data::Database::connect(&db_path).await.unwrap();
        let (private_key_pem, public_key_pem) = local_keypair().clone();
        let now = chrono::Utc::now();
        db.insert_account_if_empty(&federelay::data::Account {
            id: federelay::data::EntityId::new().0,
            username: TEST_USERNAME.to_string(),
            display_name: Some("Test User".to_string()),
            private_key_pem,
            public_key_pem,
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();
        drop(db);

        // Create test configuration
        let config = config::AppConfig {
            server: config::ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Let OS assign port
                domain: "localhost".to_string(),
                protocol: "http".to_string(),
            },
            database: config::DatabaseConfig {
                path: db_path.clone(),
            },
            federation: config::FederationConfig {
                max_delivery_attempts: 3,
                retry_backoff: config::RetryBackoff::Fixed,
                retry_base_delay_ms: 10,
                retry_max_delay_ms: 10,
                max_concurrent_deliveries: 4,
                key_cache_ttl_seconds: 60,
                request_timeout_seconds: 5,
                signature_max_age_seconds: 300,
                allow_private_hosts: true,
            },
            auth: config::AuthConfig {
                api_token: TEST_API_TOKEN.to_string(),
            },
            admin: config::AdminConfig {
                username: TEST_USERNAME.to_string(),
                display_name: "Test User".to_string(),
            },
            logging: config::LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        };

        // Initialize app state
        let state = AppState::new(config).await.unwrap();

        // Create HTTP client
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let addr_str = format!("http://{}", addr);

        let app = federelay::build_router(state.clone());

        // Spawn server in background
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr: addr_str,
            state,
            _temp_dir: temp_dir,
            client,
        }
    }

    /// Get base URL for API requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// Local actor id as advertised by the server
    pub fn actor_id(&self) -> String {
        format!("http://localhost/users/{}", TEST_USERNAME)
    }
}

/// Serve a fake remote server on an ephemeral loopback port.
///
/// `build` receives the server's base URL so documents can refer to it.
pub async fn spawn_remote<F>(build: F) -> String
where
    F: FnOnce(&str) -> Router,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let app = build(&base_url);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    base_url
}

/// Actor document publishing `{actor}#main-key` and the given inboxes.
pub fn remote_actor_document(
    actor: &str,
    inbox: &str,
    shared_inbox: Option<&str>,
    public_key_pem: &str,
) -> serde_json::Value {
    let mut document = serde_json::json!({
        "@context": ["https://www.w3.org/ns/activitystreams", "https://w3id.org/security/v1"],
        "id": actor,
        "type": "Person",
        "inbox": inbox,
        "publicKey": {
            "id": format!("{actor}#main-key"),
            "owner": actor,
            "publicKeyPem": public_key_pem,
        }
    });
    if let Some(shared_inbox) = shared_inbox {
        document["endpoints"] = serde_json::json!({ "sharedInbox": shared_inbox });
    }
    document
}

/// Sign `body` as a POST to `url`, returning a request ready to send.
pub fn signed_post(
    client: &reqwest::Client,
    url: &str,
    body: Vec<u8>,
    key_id: &str,
    private_key_pem: &str,
) -> reqwest::RequestBuilder {
    let parsed: url::Url = url.parse().unwrap();
    let signed =
        federelay::federation::sign_request("POST", &parsed, &body, key_id, private_key_pem)
            .unwrap();

    client
        .post(url)
        .header("Host", signed.host)
        .header("Date", signed.date)
        .header("Digest", signed.digest)
        .header("Signature", signed.signature)
        .header("Content-Type", "application/activity+json")
        .body(body)
}

/// Register metrics once per test binary.
pub fn init_metrics_once() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(federelay::metrics::init_metrics);
}
