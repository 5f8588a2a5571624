//! Account service
//!
//! Handles the single local actor: its key pair, its URIs and its actor
//! document.

use std::sync::Arc;

use crate::data::{Account, Database, EntityId};
use crate::error::AppError;
use crate::federation::{Actor, Endpoints, PublicKeyDescriptor, SigningIdentity};

#[cfg(test)]
const ACCOUNT_KEY_BITS: usize = 1024;
#[cfg(not(test))]
const ACCOUNT_KEY_BITS: usize = 4096;

/// URIs of a local actor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalActorUris {
    pub id: String,
    pub inbox: String,
    pub outbox: String,
    pub shared_inbox: String,
    pub key_id: String,
}

impl LocalActorUris {
    pub fn new(base_url: &str, username: &str) -> Self {
        let base_url = base_url.trim_end_matches('/');
        let id = format!("{}/users/{}", base_url, username);
        Self {
            inbox: format!("{}/inbox", id),
            outbox: format!("{}/outbox", id),
            shared_inbox: format!("{}/inbox", base_url),
            key_id: format!("{}#main-key", id),
            id,
        }
    }
}

/// Account service
pub struct AccountService {
    db: Arc<Database>,
    base_url: String,
}

impl AccountService {
    /// Create new account service
    ///
    /// `base_url` is the public origin, e.g. `https://social.example.com`.
    pub fn new(db: Arc<Database>, base_url: impl Into<String>) -> Self {
        Self {
            db,
            base_url: base_url.into(),
        }
    }

    /// Get the admin account
    ///
    /// # Returns
    /// The single account or error if not initialized
    pub async fn get_account(&self) -> Result<Account, AppError> {
        self.db.get_account().await?.ok_or(AppError::NotFound)
    }

    /// Get the local account by username, `NotFound` for anyone else.
    pub async fn get_by_username(&self, username: &str) -> Result<Account, AppError> {
        self.db
            .get_account_by_username(username)
            .await?
            .ok_or(AppError::NotFound)
    }

    pub fn uris(&self, username: &str) -> LocalActorUris {
        LocalActorUris::new(&self.base_url, username)
    }

    /// Key material used to sign deliveries made as `account`.
    pub fn signing_identity(&self, account: &Account) -> SigningIdentity {
        SigningIdentity {
            key_id: self.uris(&account.username).key_id,
            private_key_pem: account.private_key_pem.clone(),
        }
    }

    /// Make sure the configured admin account exists
    ///
    /// Generates an RSA key pair on first start. On later starts the
    /// existing key pair is kept and the profile is updated to match the
    /// configuration.
    pub async fn ensure_account(
        &self,
        username: &str,
        display_name: &str,
    ) -> Result<Account, AppError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(AppError::Validation("username cannot be empty".to_string()));
        }
        let display_name = Some(display_name.trim())
            .filter(|name| !name.is_empty())
            .map(str::to_string);

        if let Some(mut account) = self.db.get_account().await? {
            if account.username != username || account.display_name != display_name {
                self.db
                    .update_account_profile(&account.id, username, display_name.as_deref())
                    .await?;
                tracing::info!(username = %username, "Updated admin account profile");
                account.username = username.to_string();
                account.display_name = display_name;
            }
            return Ok(account);
        }

        tracing::info!(username = %username, bits = ACCOUNT_KEY_BITS, "Generating admin key pair");
        let (private_key_pem, public_key_pem) = generate_key_pair(ACCOUNT_KEY_BITS).await?;

        let now = chrono::Utc::now();
        let account = Account {
            id: EntityId::new().0,
            username: username.to_string(),
            display_name,
            private_key_pem,
            public_key_pem,
            created_at: now,
            updated_at: now,
        };

        if !self.db.insert_account_if_empty(&account).await? {
            // Lost a race with another initializer; use the stored account.
            return self.get_account().await;
        }

        tracing::info!(username = %username, "Admin account created");
        Ok(account)
    }

    /// ActivityPub actor document for a local account.
    pub fn actor_document(&self, account: &Account) -> serde_json::Value {
        let uris = self.uris(&account.username);
        let actor = Actor {
            id: uris.id.clone(),
            kind: Some("Person".to_string()),
            inbox: uris.inbox,
            outbox: Some(uris.outbox),
            preferred_username: Some(account.username.clone()),
            endpoints: Some(Endpoints {
                shared_inbox: Some(uris.shared_inbox),
            }),
            public_key: Some(PublicKeyDescriptor {
                id: uris.key_id,
                owner: Some(uris.id.clone()),
                public_key_pem: account.public_key_pem.clone(),
            }),
        };

        let mut document = serde_json::to_value(actor).unwrap_or_default();
        if let Some(object) = document.as_object_mut() {
            object.insert(
                "@context".to_string(),
                serde_json::json!([
                    "https://www.w3.org/ns/activitystreams",
                    "https://w3id.org/security/v1"
                ]),
            );
            object.insert(
                "name".to_string(),
                serde_json::json!(account.display_name.as_deref().unwrap_or(&account.username)),
            );
            object.insert("url".to_string(), serde_json::json!(uris.id));
        }
        document
    }
}

/// Generate an RSA key pair off the async runtime.
///
/// # Returns
/// `(private_key_pem, public_key_pem)` as PKCS#8 / SPKI.
async fn generate_key_pair(bits: usize) -> Result<(String, String), AppError> {
    tokio::task::spawn_blocking(move || -> Result<(String, String), anyhow::Error> {
        use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
        use rsa::{RsaPrivateKey, RsaPublicKey};

        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, bits)?;
        let public_key = RsaPublicKey::from(&private_key);
        let private_key_pem = private_key.to_pkcs8_pem(LineEnding::LF)?.to_string();
        let public_key_pem = public_key.to_public_key_pem(LineEnding::LF)?;
        Ok((private_key_pem, public_key_pem))
    })
    .await
    .map_err(|e| AppError::Internal(e.into()))?
    .map_err(AppError::Internal)
}
