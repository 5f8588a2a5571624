//! ActivityPub wire types
//!
//! Only the fields the delivery core reads or writes are modelled;
//! everything else in an activity travels inside `object`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// The ActivityStreams public collection.
pub const PUBLIC_COLLECTION: &str = "https://www.w3.org/ns/activitystreams#Public";

/// Literal forms accepted as the public addressee.
const PUBLIC_ALIASES: [&str; 4] = [PUBLIC_COLLECTION, "as:Public", "Public", "public"];

/// Content type of outbound deliveries.
pub const ACTIVITY_CONTENT_TYPE: &str = "application/ld+json";

/// `Accept` value used when fetching remote documents.
pub const ACTIVITY_ACCEPT: &str =
    "application/activity+json, application/ld+json; profile=\"https://www.w3.org/ns/activitystreams\"";

/// Whether an addressee is the public collection marker.
pub fn is_public_marker(addressee: &str) -> bool {
    PUBLIC_ALIASES.contains(&addressee.trim())
}

fn default_context() -> Value {
    Value::String("https://www.w3.org/ns/activitystreams".to_string())
}

/// Addressing fields may be a single URI or an array of URIs.
pub(crate) fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
        Null(()),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
        OneOrMany::Null(()) => Vec::new(),
    })
}

/// An activity sent by a local actor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    #[serde(rename = "@context", default = "default_context")]
    pub context: Value,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub actor: String,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub to: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub bcc: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub bto: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub audience: Vec<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub object: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,
}

impl Activity {
    /// Create an unaddressed activity with no object.
    pub fn new(id: &str, kind: &str, actor: &str) -> Self {
        Self {
            context: default_context(),
            id: id.to_string(),
            kind: kind.to_string(),
            actor: actor.to_string(),
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            bto: Vec::new(),
            audience: Vec::new(),
            object: Value::Null,
            published: None,
        }
    }

    /// Every addressee across `to`, `cc`, `bcc`, `bto` and `audience`.
    pub fn addressees(&self) -> impl Iterator<Item = &str> {
        self.to
            .iter()
            .chain(&self.cc)
            .chain(&self.bcc)
            .chain(&self.bto)
            .chain(&self.audience)
            .map(String::as_str)
    }

    /// Public iff any addressing field carries the public collection.
    pub fn is_public(&self) -> bool {
        self.addressees().any(is_public_marker)
    }

    /// Copy suitable for the wire: blind recipients are removed.
    pub fn for_delivery(&self) -> Self {
        let mut delivered = self.clone();
        delivered.bcc.clear();
        delivered.bto.clear();
        if let Some(object) = delivered.object.as_object_mut() {
            object.remove("bcc");
            object.remove("bto");
        }
        delivered
    }
}

/// `endpoints` block of an actor document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_inbox: Option<String>,
}

/// `publicKey` block of an actor document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyDescriptor {
    pub id: String,
    #[serde(default)]
    pub owner: Option<String>,
    pub public_key_pem: String,
}

/// A (usually remote) actor document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub id: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub inbox: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbox: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoints: Option<Endpoints>,
    #[serde(
        default,
        deserialize_with = "lenient_public_key",
        skip_serializing_if = "Option::is_none"
    )]
    pub public_key: Option<PublicKeyDescriptor>,
}

/// `publicKey` may be one object, an array of them, or something this
/// node cannot use. Only the first usable entry is kept; key
/// verification reads the raw document and does not depend on it.
fn lenient_public_key<'de, D>(deserializer: D) -> Result<Option<PublicKeyDescriptor>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Array(entries)) => entries
            .into_iter()
            .find_map(|entry| serde_json::from_value(entry).ok()),
        Some(entry @ Value::Object(_)) => serde_json::from_value(entry).ok(),
        _ => None,
    })
}

impl Actor {
    /// Shared inbox advertised by the actor, if any
    pub fn shared_inbox(&self) -> Option<&str> {
        self.endpoints
            .as_ref()
            .and_then(|endpoints| endpoints.shared_inbox.as_deref())
            .filter(|inbox| !inbox.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addressing_accepts_single_string_or_array() {
        let activity: Activity = serde_json::from_value(serde_json::json!({
            "id": "https://a.example/activities/1",
            "type": "Create",
            "actor": "https://a.example/users/alice",
            "to": "as:Public",
            "cc": ["https://b.example/users/bob"],
            "bcc": null
        }))
        .unwrap();

        assert_eq!(activity.to, vec!["as:Public"]);
        assert_eq!(activity.cc, vec!["https://b.example/users/bob"]);
        assert!(activity.bcc.is_empty());
        assert!(activity.is_public());
    }

    #[test]
    fn public_marker_aliases() {
        assert!(is_public_marker(PUBLIC_COLLECTION));
        assert!(is_public_marker("as:Public"));
        assert!(is_public_marker("Public"));
        assert!(!is_public_marker("https://b.example/users/public"));
    }

    #[test]
    fn public_marker_in_audience_makes_activity_public() {
        let mut activity = Activity::new("https://a.example/1", "Create", "https://a.example/u");
        activity.to = vec!["https://b.example/users/bob".to_string()];
        assert!(!activity.is_public());

        activity.audience = vec![PUBLIC_COLLECTION.to_string()];
        assert!(activity.is_public());
    }

    #[test]
    fn for_delivery_strips_blind_recipients() {
        let mut activity = Activity::new("https://a.example/1", "Create", "https://a.example/u");
        activity.to = vec!["https://b.example/users/bob".to_string()];
        activity.bto = vec!["https://c.example/users/carol".to_string()];
        activity.bcc = vec!["https://d.example/users/dave".to_string()];
        activity.object = serde_json::json!({"type": "Note", "bcc": ["https://d.example/users/dave"]});

        let delivered = activity.for_delivery();
        let json = serde_json::to_value(&delivered).unwrap();

        assert!(json.get("bcc").is_none());
        assert!(json.get("bto").is_none());
        assert!(json["object"].get("bcc").is_none());
        assert_eq!(json["to"][0], "https://b.example/users/bob");
        // The original keeps its addressing for recipient resolution.
        assert_eq!(activity.bcc.len(), 1);
    }

    #[test]
    fn actor_shared_inbox_ignores_blank_value() {
        let actor: Actor = serde_json::from_value(serde_json::json!({
            "id": "https://b.example/users/bob",
            "inbox": "https://b.example/users/bob/inbox",
            "endpoints": {"sharedInbox": ""}
        }))
        .unwrap();

        assert_eq!(actor.shared_inbox(), None);
    }

    #[test]
    fn actor_accepts_key_array_and_unusable_key() {
        let actor: Actor = serde_json::from_value(serde_json::json!({
            "id": "https://b.example/users/bob",
            "inbox": "https://b.example/users/bob/inbox",
            "publicKey": [
                {"id": "https://b.example/users/bob#ed25519", "type": "Multikey"},
                {"id": "https://b.example/users/bob#main-key", "publicKeyPem": "pem"}
            ]
        }))
        .unwrap();
        assert_eq!(
            actor.public_key.map(|key| key.id),
            Some("https://b.example/users/bob#main-key".to_string())
        );

        let actor: Actor = serde_json::from_value(serde_json::json!({
            "id": "https://b.example/users/bob",
            "inbox": "https://b.example/users/bob/inbox",
            "publicKey": {"id": "https://b.example/users/bob#main-key"}
        }))
        .unwrap();
        assert_eq!(actor.inbox, "https://b.example/users/bob/inbox");
        assert!(actor.public_key.is_none());
    }
}
