//! Outbox service
//!
//! Create-and-send for activities authored by the local actor:
//!
//! 1. Build the activity (id, actor, published)
//! 2. Persist it; a persistence failure aborts before anything is sent
//! 3. Resolve recipients
//! 4. Remember newly discovered shared inboxes
//! 5. Deliver and report per-target outcomes

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use super::account::AccountService;
use crate::data::{Database, EntityId, StoredActivity};
use crate::error::AppError;
use crate::federation::{
    Activity, DeliveryEngine, DeliveryReport, RecipientResolver, TargetDelivery, one_or_many,
};

/// Default number of activities in an outbox page.
pub const OUTBOX_PAGE_SIZE: usize = 20;

/// Activity as submitted by a client, before it gets an id
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActivityDraft {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub object: Value,
    #[serde(default, deserialize_with = "one_or_many")]
    pub to: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub cc: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub bcc: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub bto: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub audience: Vec<String>,
}

/// An addressee that could not be resolved
#[derive(Debug, Clone, Serialize)]
pub struct SkippedRecipient {
    pub addressee: String,
    pub reason: String,
}

/// Result of one create-and-send
#[derive(Debug, Clone, Serialize)]
pub struct SendReport {
    pub activity_id: String,
    pub deliveries: Vec<TargetDelivery>,
    pub skipped_recipients: Vec<SkippedRecipient>,
    /// Shared inboxes learned while resolving this send
    pub discovered_shared_inboxes: Vec<String>,
}

impl SendReport {
    pub fn delivered_count(&self) -> usize {
        self.deliveries.iter().filter(|d| d.is_delivered()).count()
    }
}

/// Outbox service
pub struct OutboxService {
    db: Arc<Database>,
    accounts: Arc<AccountService>,
    resolver: Arc<RecipientResolver>,
    engine: DeliveryEngine,
}

impl OutboxService {
    pub fn new(
        db: Arc<Database>,
        accounts: Arc<AccountService>,
        resolver: Arc<RecipientResolver>,
        engine: DeliveryEngine,
    ) -> Self {
        Self {
            db,
            accounts,
            resolver,
            engine,
        }
    }

    /// Create an activity as `username` and distribute it.
    ///
    /// # Errors
    /// - `NotFound` if `username` is not the local account
    /// - `Validation` for an unusable draft
    /// - `Persistence` if the activity could not be stored; nothing is sent
    ///
    /// Failures of individual recipients are part of the returned report.
    pub async fn create_and_send(
        &self,
        username: &str,
        draft: ActivityDraft,
    ) -> Result<SendReport, AppError> {
        let account = self.accounts.get_by_username(username).await?;
        let activity = self.build_activity(&account.username, draft)?;

        self.db
            .insert_activity(&StoredActivity::from_activity(&activity)?)
            .await?;
        tracing::info!(activity = %activity.id, kind = %activity.kind, "Stored outgoing activity");

        let resolution = self.resolver.resolve(&activity).await;

        for inbox in &resolution.discovered_shared_inboxes {
            if let Err(e) = self.db.insert_shared_inbox(inbox).await {
                tracing::warn!(inbox = %inbox, error = %e, "Failed to persist shared inbox");
            }
        }

        let skipped_recipients = resolution
            .failures
            .iter()
            .map(|failure| match failure {
                AppError::RecipientResolutionFailed { addressee, reason } => SkippedRecipient {
                    addressee: addressee.clone(),
                    reason: reason.clone(),
                },
                other => SkippedRecipient {
                    addressee: String::new(),
                    reason: other.to_string(),
                },
            })
            .collect();

        let identity = self.accounts.signing_identity(&account);
        let DeliveryReport { deliveries } = self
            .engine
            .deliver(&activity, &identity, resolution.targets)
            .await?;

        Ok(SendReport {
            activity_id: activity.id,
            deliveries,
            skipped_recipients,
            discovered_shared_inboxes: resolution.discovered_shared_inboxes,
        })
    }

    /// Public activities of `username`, newest first, with blind recipients removed.
    ///
    /// # Returns
    /// `(page, total_count)`; the total includes non-public activities.
    pub async fn list_public(
        &self,
        username: &str,
        limit: usize,
    ) -> Result<(Vec<Activity>, i64), AppError> {
        let account = self.accounts.get_by_username(username).await?;
        let actor = self.accounts.uris(&account.username).id;

        let stored = self.db.get_public_activities_by_actor(&actor, limit).await?;
        let total = self.db.count_public_activities_by_actor(&actor).await?;

        let page = stored
            .iter()
            .map(|row| row.activity().map(|activity| activity.for_delivery()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((page, total))
    }

    /// A single public activity by id, with blind recipients removed.
    pub async fn get_public(&self, activity_id: &str) -> Result<Activity, AppError> {
        let stored = self
            .db
            .get_activity_by_uri(activity_id)
            .await?
            .ok_or(AppError::NotFound)?;
        let activity = stored.activity()?;

        if !activity.is_public() {
            return Err(AppError::NotFound);
        }
        Ok(activity.for_delivery())
    }

    fn build_activity(&self, username: &str, draft: ActivityDraft) -> Result<Activity, AppError> {
        let kind = draft.kind.trim();
        if kind.is_empty() {
            return Err(AppError::Validation("activity type is required".to_string()));
        }

        let uris = self.accounts.uris(username);
        let id = format!("{}/activities/{}", uris.id, EntityId::new().0);

        let mut activity = Activity::new(&id, kind, &uris.id);
        activity.to = draft.to;
        activity.cc = draft.cc;
        activity.bcc = draft.bcc;
        activity.bto = draft.bto;
        activity.audience = draft.audience;
        activity.object = draft.object;
        activity.published = Some(chrono::Utc::now());

        if activity.addressees().next().is_none() {
            return Err(AppError::Validation(
                "activity must have at least one addressee".to_string(),
            ));
        }

        // Objects created by this activity are attributed to the sender.
        if activity.kind == "Create" {
            if let Some(object) = activity.object.as_object_mut() {
                object
                    .entry("id")
                    .or_insert_with(|| Value::String(format!("{}/objects/{}", uris.id, EntityId::new().0)));
                object
                    .entry("attributedTo")
                    .or_insert_with(|| Value::String(uris.id.clone()));
            }
        }

        Ok(activity)
    }
}
