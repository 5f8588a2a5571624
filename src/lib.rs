//! Federelay - a single-user ActivityPub node with signed federation delivery
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - Actor, inbox and outbox endpoints                        │
//! │  - Metrics                                                  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Service Layer                            │
//! │  - Local account and key pair                               │
//! │  - Inbox receive, outbox create-and-send                    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Federation Layer                          │
//! │  - HTTP Signatures, key cache, inbound verification         │
//! │  - Recipient resolution, shared inboxes, delivery + retry   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Layer                              │
//! │  - SQLite (sqlx)                                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP handlers
//! - `service`: Business logic layer
//! - `federation`: ActivityPub federation handling
//! - `data`: Database layer
//! - `auth`: Bearer token authentication for the outbox

pub mod api;
pub mod auth;
pub mod config;
pub mod data;
pub mod error;
pub mod federation;
pub mod metrics;
pub mod service;

use std::sync::Arc;

/// Largest accepted request body (inbound activities and outbox drafts).
const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;

/// Application state shared across all handlers
///
/// This struct is cloned for each request; everything inside is
/// reference counted.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Database connection pool
    pub db: Arc<data::Database>,

    /// HTTP client for federation (actor fetches and deliveries)
    pub http_client: Arc<reqwest::Client>,

    /// Known shared inboxes, seeded from the database
    pub shared_inboxes: Arc<federation::SharedInboxRegistry>,

    /// Remote public key cache
    pub key_resolver: Arc<federation::KeyResolver>,

    pub accounts: Arc<service::AccountService>,
    pub inbox: Arc<service::InboxService>,
    pub outbox: Arc<service::OutboxService>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Connect to SQLite database
    /// 2. Build the federation HTTP client
    /// 3. Seed the shared inbox registry
    /// 4. Wire key cache, verifier, resolver and delivery engine
    /// 5. Ensure the local account exists
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        // 1. Connect to SQLite database
        let db = Arc::new(data::Database::connect(&config.database.path).await?);
        tracing::info!("Database connected");

        // 2. Initialize HTTP client
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("Federelay/", env!("CARGO_PKG_VERSION")))
            .timeout(config.federation.request_timeout())
            .redirect(federation::redirect_policy(
                config.federation.allow_private_hosts,
            ))
            .build()
            .map_err(|e| error::AppError::Internal(e.into()))?;

        // 3. Shared inbox registry
        let shared_inboxes = Arc::new(federation::SharedInboxRegistry::with_inboxes(
            db.get_all_shared_inboxes().await?,
        ));
        tracing::info!(
            shared_inboxes = shared_inboxes.len().await,
            "Shared inbox registry loaded"
        );

        // 4. Federation components
        let directory: Arc<dyn federation::ActorDirectory> = Arc::new(
            federation::HttpActorDirectory::new(
                http_client.clone(),
                config.federation.allow_private_hosts,
            ),
        );
        let key_resolver = Arc::new(federation::KeyResolver::new(
            directory.clone(),
            config.federation.key_cache_ttl(),
        ));
        let verifier = Arc::new(federation::InboundVerifier::new(
            key_resolver.clone(),
            config.federation.signature_max_age(),
        ));
        let recipients = Arc::new(
            federation::RecipientResolver::new(directory, shared_inboxes.clone())
                .allow_private_hosts(config.federation.allow_private_hosts),
        );
        let engine = federation::DeliveryEngine::new(
            http_client.clone(),
            federation::RetryPolicy::from_config(&config.federation),
            config.federation.max_concurrent_deliveries,
        );

        // 5. Local account
        let accounts = Arc::new(service::AccountService::new(
            db.clone(),
            config.server.base_url(),
        ));
        let account = accounts
            .ensure_account(&config.admin.username, &config.admin.display_name)
            .await?;
        tracing::info!(actor = %accounts.uris(&account.username).id, "Local actor ready");

        let inbox = Arc::new(service::InboxService::new(db.clone(), verifier));
        let outbox = Arc::new(service::OutboxService::new(
            db.clone(),
            accounts.clone(),
            recipients,
            engine,
        ));

        tracing::info!("Application state initialized successfully");

        Ok(Self {
            config: Arc::new(config),
            db,
            http_client: Arc::new(http_client),
            shared_inboxes,
            key_resolver,
            accounts,
            inbox,
            outbox,
        })
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::{
        compression::CompressionLayer, limit::RequestBodyLimitLayer, trace::TraceLayer,
    };

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(api::activitypub_router())
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BODY_BYTES))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        .merge(api::metrics_router())
}

async fn health_check() -> &'static str {
    "OK"
}
