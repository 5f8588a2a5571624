//! Public key resolution
//!
//! Maps a signature `keyId` to the PEM published by its owning actor,
//! caching results to reduce remote requests.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use super::actor::{ActorDirectory, key_owner};
use super::signature::parse_public_key;
use crate::error::AppError;
use crate::metrics;

/// Cached public key entry
#[derive(Debug, Clone)]
struct CachedKey {
    /// PEM-encoded public key
    pem: String,
    /// When this entry was cached
    cached_at: Instant,
    /// TTL for this entry
    ttl: Duration,
}

impl CachedKey {
    /// Check if this cache entry is still valid
    fn is_valid(&self) -> bool {
        self.cached_at.elapsed() < self.ttl
    }
}

/// A public key together with where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedKey {
    pub key_id: String,
    /// Actor that published the key
    pub owner: String,
    pub public_key_pem: String,
    /// `true` when served from cache without a fetch
    pub from_cache: bool,
}

/// Key resolver
///
/// Thread-safe, TTL-bounded cache in front of an `ActorDirectory`.
pub struct KeyResolver {
    /// Cache storage: key_id -> cached key
    cache: Arc<RwLock<HashMap<String, CachedKey>>>,
    directory: Arc<dyn ActorDirectory>,
    default_ttl: Duration,
}

impl KeyResolver {
    /// Create a new key resolver
    ///
    /// # Arguments
    /// * `directory` - Where actor documents are fetched from
    /// * `default_ttl` - How long a fetched key is trusted without refetching
    pub fn new(directory: Arc<dyn ActorDirectory>, default_ttl: Duration) -> Self {
        Self {
            cache: Arc::new(RwLock::new(HashMap::new())),
            directory,
            default_ttl,
        }
    }

    /// Get the public key for a key ID
    ///
    /// Checks cache first, fetches from the owning actor if not cached or expired.
    pub async fn resolve(&self, key_id: &str) -> Result<ResolvedKey, AppError> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(key_id) {
                if cached.is_valid() {
                    tracing::debug!("Public key cache hit for {}", key_id);
                    metrics::KEY_CACHE_HITS_TOTAL.inc();
                    return Ok(ResolvedKey {
                        key_id: key_id.to_string(),
                        owner: key_owner(key_id).to_string(),
                        public_key_pem: cached.pem.clone(),
                        from_cache: true,
                    });
                }
                tracing::debug!("Public key cache expired for {}", key_id);
            }
        }

        metrics::KEY_CACHE_MISSES_TOTAL.inc();
        self.resolve_fresh(key_id).await
    }

    /// Fetch the key from its owner, bypassing and then refreshing the cache.
    pub async fn resolve_fresh(&self, key_id: &str) -> Result<ResolvedKey, AppError> {
        let owner = key_owner(key_id);
        tracing::debug!(key_id = %key_id, owner = %owner, "Fetching public key");

        let document = self
            .directory
            .fetch_actor_document(owner)
            .await
            .map_err(|e| AppError::KeyFetchFailed(format!("{}: {}", owner, e)))?;

        let pem = extract_public_key_pem(&document, key_id)?;
        parse_public_key(&pem)
            .map_err(|e| AppError::KeyParseFailed(format!("{}: {}", key_id, e)))?;

        {
            let mut cache = self.cache.write().await;
            cache.insert(
                key_id.to_string(),
                CachedKey {
                    pem: pem.clone(),
                    cached_at: Instant::now(),
                    ttl: self.default_ttl,
                },
            );
        }

        Ok(ResolvedKey {
            key_id: key_id.to_string(),
            owner: owner.to_string(),
            public_key_pem: pem,
            from_cache: false,
        })
    }

    /// Invalidate a cached key
    ///
    /// Used when a cached key stops verifying, e.g. after a key rotation.
    pub async fn invalidate(&self, key_id: &str) {
        let mut cache = self.cache.write().await;
        cache.remove(key_id);
        tracing::debug!("Invalidated public key cache for {}", key_id);
    }

    /// Get cache statistics
    pub async fn stats(&self) -> CacheStats {
        let cache = self.cache.read().await;
        let total = cache.len();
        let valid = cache.values().filter(|v| v.is_valid()).count();

        CacheStats {
            total_entries: total,
            valid_entries: valid,
            expired_entries: total - valid,
        }
    }

    /// Prune expired entries
    ///
    /// Should be called periodically to clean up expired entries.
    pub async fn prune_expired(&self) -> usize {
        let mut cache = self.cache.write().await;
        let before = cache.len();
        cache.retain(|_, v| v.is_valid());
        let removed = before - cache.len();

        if removed > 0 {
            tracing::info!("Pruned {} expired public key cache entries", removed);
        }
        removed
    }
}

/// Pick the key named by `key_id` out of an actor document.
///
/// `publicKey` may be a single object or an array of them.
fn extract_public_key_pem(document: &Value, key_id: &str) -> Result<String, AppError> {
    let candidates: Vec<&Value> = match document.get("publicKey") {
        Some(Value::Array(keys)) => keys.iter().collect(),
        Some(key @ Value::Object(_)) => vec![key],
        _ => {
            return Err(AppError::KeyParseFailed(format!(
                "actor {} has no publicKey",
                key_owner(key_id)
            )));
        }
    };

    let has_fragment = key_id.contains('#');
    let public_key = candidates
        .into_iter()
        .find(|key| {
            let advertised = key.get("id").and_then(Value::as_str);
            if has_fragment {
                advertised == Some(key_id)
            } else {
                advertised.is_none_or(|id| key_owner(id) == key_id)
            }
        })
        .ok_or_else(|| {
            AppError::KeyParseFailed(format!(
                "actor does not advertise key id {}",
                key_id
            ))
        })?;

    if let Some(owner) = public_key.get("owner").and_then(Value::as_str) {
        if owner != key_owner(key_id) {
            return Err(AppError::KeyParseFailed(format!(
                "key {} is owned by {}",
                key_id, owner
            )));
        }
    }

    public_key
        .get("publicKeyPem")
        .and_then(Value::as_str)
        .filter(|pem| !pem.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::KeyParseFailed(format!("missing publicKeyPem for {}", key_id)))
}

/// Cache statistics
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Total number of entries
    pub total_entries: usize,
    /// Number of valid (non-expired) entries
    pub valid_entries: usize,
    /// Number of expired entries
    pub expired_entries: usize,
}
