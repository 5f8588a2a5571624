//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration files (config/default.toml, config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::{net::IpAddr, path::PathBuf, time::Duration};

use crate::error::AppError;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub federation: FederationConfig,
    pub auth: AuthConfig,
    pub admin: AdminConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
    /// Public domain (e.g., "social.example.com")
    pub domain: String,
    /// Protocol ("http" or "https")
    pub protocol: String,
}

impl ServerConfig {
    /// Get the base URL for the instance
    ///
    /// # Returns
    /// Full URL like "https://social.example.com"
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.domain)
    }
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
}

/// Shape of the wait between two delivery attempts
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RetryBackoff {
    /// Same delay before every retry
    Fixed,
    /// Doubling delay with full jitter, capped at `retry_max_delay_ms`
    #[default]
    Exponential,
}

/// Outbound delivery and inbound verification settings
#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    /// Total attempts per target, first try included
    pub max_delivery_attempts: u32,
    #[serde(default)]
    pub retry_backoff: RetryBackoff,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Upper bound on simultaneous outbound POSTs
    pub max_concurrent_deliveries: usize,
    pub key_cache_ttl_seconds: u64,
    pub request_timeout_seconds: u64,
    /// Maximum accepted clock skew of inbound `Date` headers (0 disables the check)
    pub signature_max_age_seconds: u64,
    /// Allow fetching actors on loopback/private addresses (local testing only)
    #[serde(default)]
    pub allow_private_hosts: bool,
}

impl FederationConfig {
    pub fn key_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.key_cache_ttl_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn signature_max_age(&self) -> Option<Duration> {
        (self.signature_max_age_seconds > 0)
            .then(|| Duration::from_secs(self.signature_max_age_seconds))
    }
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            max_delivery_attempts: 5,
            retry_backoff: RetryBackoff::Exponential,
            retry_base_delay_ms: 2_000,
            retry_max_delay_ms: 60_000,
            max_concurrent_deliveries: 10,
            key_cache_ttl_seconds: 3_600,
            request_timeout_seconds: 30,
            signature_max_age_seconds: 300,
            allow_private_hosts: false,
        }
    }
}

/// API authentication
///
/// The outbox accepts activities only from a bearer of this token.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub api_token: String,
}

/// Local (single) actor configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    /// Admin username (default: "admin")
    #[serde(default = "default_admin_username")]
    pub username: String,
    /// Admin display name (default: "Admin")
    #[serde(default = "default_admin_display_name")]
    pub display_name: String,
}

fn default_admin_username() -> String {
    "admin".to_string()
}

fn default_admin_display_name() -> String {
    "Admin".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (FEDERELAY__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, AppError> {
        use config::{Config, Environment, File};

        let defaults = FederationConfig::default();

        let config = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.protocol", "http")?
            .set_default("database.path", "data/federelay.db")?
            .set_default(
                "federation.max_delivery_attempts",
                i64::from(defaults.max_delivery_attempts),
            )?
            .set_default("federation.retry_backoff", "exponential")?
            .set_default("federation.retry_base_delay_ms", defaults.retry_base_delay_ms as i64)?
            .set_default("federation.retry_max_delay_ms", defaults.retry_max_delay_ms as i64)?
            .set_default(
                "federation.max_concurrent_deliveries",
                defaults.max_concurrent_deliveries as i64,
            )?
            .set_default("federation.key_cache_ttl_seconds", defaults.key_cache_ttl_seconds as i64)?
            .set_default(
                "federation.request_timeout_seconds",
                defaults.request_timeout_seconds as i64,
            )?
            .set_default(
                "federation.signature_max_age_seconds",
                defaults.signature_max_age_seconds as i64,
            )?
            .set_default("federation.allow_private_hosts", false)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("FEDERELAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub(crate) fn validate(&self) -> Result<(), AppError> {
        const MIN_API_TOKEN_BYTES: usize = 32;

        if self.auth.api_token.len() < MIN_API_TOKEN_BYTES {
            return Err(AppError::Config(format!(
                "auth.api_token must be at least {} bytes",
                MIN_API_TOKEN_BYTES
            )));
        }

        if self.federation.max_delivery_attempts == 0 {
            return Err(AppError::Config(
                "federation.max_delivery_attempts must be greater than 0".to_string(),
            ));
        }

        if self.federation.max_concurrent_deliveries == 0 {
            return Err(AppError::Config(
                "federation.max_concurrent_deliveries must be greater than 0".to_string(),
            ));
        }

        if self.federation.retry_max_delay_ms < self.federation.retry_base_delay_ms {
            return Err(AppError::Config(
                "federation.retry_max_delay_ms must not be smaller than retry_base_delay_ms"
                    .to_string(),
            ));
        }

        if !is_local_server_domain(&self.server.domain)
            && !self.server.protocol.eq_ignore_ascii_case("https")
        {
            return Err(AppError::Config(
                "server.protocol must be https for non-local server domains".to_string(),
            ));
        }

        if self.federation.allow_private_hosts {
            tracing::warn!("federation.allow_private_hosts is enabled; actor fetches are not SSRF-guarded");
        }

        Ok(())
    }
}

fn normalized_server_host(domain: &str) -> String {
    let trimmed = domain.trim();
    let parsed_host = url::Url::parse(&format!("http://{trimmed}"))
        .ok()
        .and_then(|url| url.host_str().map(|host| host.to_string()));
    let host = parsed_host.unwrap_or_else(|| trimmed.to_string());
    host.trim_end_matches('.').to_ascii_lowercase()
}

fn is_local_server_domain(domain: &str) -> bool {
    let host = normalized_server_host(domain);
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }

    let host = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = host.parse::<IpAddr>() {
        return ip.is_loopback() || ip.is_unspecified();
    }

    false
}
