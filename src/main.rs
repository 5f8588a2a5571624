//! Federelay binary entry point

use federelay::{AppState, config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often expired entries are dropped from the public key cache.
const KEY_CACHE_PRUNE_INTERVAL_SECS: u64 = 600;

/// Application entry point
///
/// # Setup
/// 1. Initialize tracing/logging
/// 2. Load configuration from file and environment
/// 3. Initialize AppState
/// 4. Build Axum router
/// 5. Start background tasks (key cache pruning)
/// 6. Start HTTP server
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Initialize tracing/logging
    let log_format =
        std::env::var("FEDERELAY__LOGGING__FORMAT").unwrap_or_else(|_| "pretty".to_string());

    if log_format == "json" {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "federelay=info,tower_http=debug".into()),
            )
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "federelay=info,tower_http=debug".into()),
            )
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    tracing::info!("Starting Federelay...");

    // 2. Initialize metrics
    federelay::metrics::init_metrics();

    // 3. Load configuration
    let config = config::AppConfig::load()?;
    tracing::info!(
        domain = %config.server.domain,
        protocol = %config.server.protocol,
        max_attempts = config.federation.max_delivery_attempts,
        max_concurrent = config.federation.max_concurrent_deliveries,
        "Configuration loaded"
    );

    // 4. Initialize application state
    let state = AppState::new(config.clone()).await?;

    // 5. Build Axum router
    let app = federelay::build_router(state.clone());

    // 6. Bind
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Public URL: {}", config.server.base_url());

    // 7. Start background tasks
    spawn_key_cache_pruning_task(state);

    // Start server
    axum::serve(listener, app).await?;

    Ok(())
}

/// Spawn background task that drops expired public keys
fn spawn_key_cache_pruning_task(state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(
            KEY_CACHE_PRUNE_INTERVAL_SECS,
        ));

        // Consume the immediate first tick; the cache starts empty.
        interval.tick().await;

        loop {
            interval.tick().await;

            let removed = state.key_resolver.prune_expired().await;
            let stats = state.key_resolver.stats().await;
            tracing::debug!(
                removed,
                remaining = stats.total_entries,
                "Pruned public key cache"
            );
        }
    });

    tracing::info!("Key cache pruning task spawned");
}
