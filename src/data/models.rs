//! Data models
//!
//! Rust structs representing database rows.
//! All models use ULID for IDs and chrono for timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::federation::Activity;

// =============================================================================
// ID Types
// =============================================================================

/// Entity ID wrapper (ULID format, 26 characters)
///
/// Example: "01ARZ3NDEKTSV4RRFFQ69G5FAV"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Generate a new ULID
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Account (single user)
// =============================================================================

/// The local actor this instance speaks for
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Account {
    pub id: String,
    pub username: String,
    pub display_name: Option<String>,
    /// RSA private key (PKCS#8 PEM)
    pub private_key_pem: String,
    /// RSA public key (SPKI PEM)
    pub public_key_pem: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Activities
// =============================================================================

/// An outgoing activity as persisted before delivery
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StoredActivity {
    pub id: String,
    /// ActivityPub id (globally unique)
    pub uri: String,
    pub actor: String,
    pub activity_type: String,
    /// Full activity JSON, addressing included
    pub payload: String,
    /// Addressed to the public collection
    pub public: bool,
    pub created_at: DateTime<Utc>,
}

impl StoredActivity {
    /// Build a row from an activity about to be distributed.
    pub fn from_activity(activity: &Activity) -> Result<Self, AppError> {
        let payload = serde_json::to_string(activity)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("serialize activity: {e}")))?;

        Ok(Self {
            id: EntityId::new().0,
            uri: activity.id.clone(),
            actor: activity.actor.clone(),
            activity_type: activity.kind.clone(),
            payload,
            public: activity.is_public(),
            created_at: Utc::now(),
        })
    }

    /// Decode the stored payload.
    pub fn activity(&self) -> Result<Activity, AppError> {
        serde_json::from_str(&self.payload).map_err(|e| {
            AppError::Internal(anyhow::anyhow!(
                "stored activity {} is not valid JSON: {e}",
                self.uri
            ))
        })
    }
}

/// A verified activity received on one of the inboxes
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct InboundActivity {
    pub activity_id: String,
    pub actor: String,
    pub activity_type: String,
    /// Key id the request was signed with
    pub key_id: String,
    pub payload: String,
    pub received_at: DateTime<Utc>,
}
