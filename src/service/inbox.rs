//! Inbox service
//!
//! Accepts signed activities from remote servers. Delivery is at-least-once,
//! so the same activity id may arrive several times; repeats are
//! acknowledged but recorded only once.

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;

use crate::data::{Database, InboundActivity};
use crate::error::AppError;
use crate::federation::{InboundRequest, InboundVerifier, key_id_matches_actor};
use crate::metrics;

/// What happened to an accepted inbound activity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboxReceipt {
    /// First time this activity id was seen
    Recorded,
    /// Already recorded earlier
    Duplicate,
}

/// Inbox service
pub struct InboxService {
    db: Arc<Database>,
    verifier: Arc<InboundVerifier>,
}

impl InboxService {
    pub fn new(db: Arc<Database>, verifier: Arc<InboundVerifier>) -> Self {
        Self { db, verifier }
    }

    /// Verify and record an inbound activity
    ///
    /// # Steps
    /// 1. Verify HTTP Signature (over the raw body)
    /// 2. Parse activity
    /// 3. Check the signer is the activity's actor and the id is on its origin
    /// 4. Record, ignoring repeats
    pub async fn receive(&self, request: InboundRequest<'_>) -> Result<InboxReceipt, AppError> {
        let verified = self.verifier.verify(&request).await?;

        let activity: Value = serde_json::from_slice(request.body)
            .map_err(|e| AppError::Validation(format!("Invalid JSON: {}", e)))?;

        let activity_id = required_str(&activity, "id")?;
        let activity_type = required_str(&activity, "type")?;
        let actor = activity
            .get("actor")
            .and_then(|actor| match actor {
                Value::String(id) => Some(id.as_str()),
                Value::Object(object) => object.get("id").and_then(Value::as_str),
                _ => None,
            })
            .ok_or_else(|| AppError::Validation("Missing actor field".to_string()))?;

        if !key_id_matches_actor(&verified.key_id, actor) {
            tracing::warn!(
                key_id = %verified.key_id,
                actor = %actor,
                "Signature keyId actor mismatch"
            );
            return Err(AppError::Forbidden);
        }

        // Ids are only trusted from the server that signed for them.
        if !same_origin(activity_id, actor) {
            tracing::warn!(
                activity = %activity_id,
                actor = %actor,
                "Activity id is not on the actor's origin"
            );
            return Err(AppError::Forbidden);
        }

        let recorded = self
            .db
            .record_inbound_activity(&InboundActivity {
                activity_id: activity_id.to_string(),
                actor: actor.to_string(),
                activity_type: activity_type.to_string(),
                key_id: verified.key_id.clone(),
                payload: String::from_utf8_lossy(request.body).into_owned(),
                received_at: Utc::now(),
            })
            .await?;

        if !recorded {
            tracing::debug!(activity = %activity_id, "Ignoring duplicate inbound activity");
            return Ok(InboxReceipt::Duplicate);
        }

        metrics::ACTIVITIES_RECEIVED_TOTAL
            .with_label_values(&[metrics::activity_type_label(activity_type)])
            .inc();
        tracing::info!(
            activity = %activity_id,
            kind = %activity_type,
            actor = %actor,
            "Accepted inbound activity"
        );

        Ok(InboxReceipt::Recorded)
    }
}

fn required_str<'a>(activity: &'a Value, field: &str) -> Result<&'a str, AppError> {
    activity
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::Validation(format!("Missing {} field", field)))
}

/// Whether two URIs share scheme, host and port.
fn same_origin(a: &str, b: &str) -> bool {
    match (url::Url::parse(a), url::Url::parse(b)) {
        (Ok(a), Ok(b)) => a.origin().is_tuple() && a.origin() == b.origin(),
        _ => false,
    }
}
