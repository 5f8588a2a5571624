//! Recipient resolution
//!
//! Turns an activity's addressing into the set of inboxes it must be
//! POSTed to.
//!
//! - Public activities prefer each recipient's shared inbox, and are also
//!   broadcast to every shared inbox seen so far.
//! - Private activities only ever go to each recipient's own inbox, so
//!   content is never handed to a server-wide endpoint serving unaddressed
//!   actors.
//!
//! One unresolvable addressee never aborts the send.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::actor::{ActorDirectory, fetch_actor, is_private_url, key_owner};
use super::model::{Activity, is_public_marker};
use super::shared_inbox::SharedInboxRegistry;
use super::signature::server_name;
use crate::error::AppError;
use crate::metrics;

/// Number of actor lookups in flight at once.
const DEFAULT_LOOKUP_CONCURRENCY: usize = 8;

/// One inbox to deliver to
///
/// `inbox` is always normalized; two targets are the same target iff their
/// inboxes are equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct DeliveryTarget {
    /// Host (plus non-default port) used for the `Host` header
    pub server_name: String,
    pub inbox: String,
}

impl DeliveryTarget {
    /// Build a target from an inbox URI, normalizing it.
    pub fn from_inbox(inbox: &str) -> Result<Self, AppError> {
        let url = url::Url::parse(inbox.trim())
            .map_err(|e| AppError::Validation(format!("Invalid inbox URI {}: {}", inbox, e)))?;

        match url.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(AppError::Validation(format!(
                    "Unsupported inbox URI scheme: {}",
                    scheme
                )));
            }
        }

        Ok(Self {
            server_name: server_name(&url)?,
            inbox: url.to_string(),
        })
    }
}

/// Deduplicated delivery targets, keyed by normalized inbox URI
#[derive(Debug, Clone, Default)]
pub struct TargetSet {
    targets: BTreeMap<String, DeliveryTarget>,
}

impl TargetSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a target; `false` if its inbox was already present.
    pub fn insert(&mut self, target: DeliveryTarget) -> bool {
        if self.targets.contains_key(&target.inbox) {
            return false;
        }
        self.targets.insert(target.inbox.clone(), target);
        true
    }

    pub fn contains(&self, inbox: &str) -> bool {
        self.targets.contains_key(inbox)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeliveryTarget> {
        self.targets.values()
    }

    /// Inbox URIs, sorted.
    pub fn inboxes(&self) -> Vec<&str> {
        self.targets.keys().map(String::as_str).collect()
    }
}

impl IntoIterator for TargetSet {
    type Item = DeliveryTarget;
    type IntoIter = std::collections::btree_map::IntoValues<String, DeliveryTarget>;

    fn into_iter(self) -> Self::IntoIter {
        self.targets.into_values()
    }
}

/// Result of resolving one activity
#[derive(Debug, Default)]
pub struct Resolution {
    pub targets: TargetSet,
    /// Shared inboxes registered for the first time during this resolution
    pub discovered_shared_inboxes: Vec<String>,
    /// Addressees that were skipped, as `RecipientResolutionFailed`
    pub failures: Vec<AppError>,
}

struct ResolvedAddressee {
    target: DeliveryTarget,
    newly_registered_shared_inbox: bool,
}

/// Expands addressing into delivery targets
pub struct RecipientResolver {
    directory: Arc<dyn ActorDirectory>,
    shared_inboxes: Arc<SharedInboxRegistry>,
    lookup_concurrency: usize,
    allow_private_hosts: bool,
}

impl RecipientResolver {
    pub fn new(
        directory: Arc<dyn ActorDirectory>,
        shared_inboxes: Arc<SharedInboxRegistry>,
    ) -> Self {
        Self {
            directory,
            shared_inboxes,
            lookup_concurrency: DEFAULT_LOOKUP_CONCURRENCY,
            allow_private_hosts: false,
        }
    }

    pub fn with_lookup_concurrency(mut self, lookup_concurrency: usize) -> Self {
        self.lookup_concurrency = lookup_concurrency.max(1);
        self
    }

    /// Accept inboxes on loopback and private addresses (local testing only).
    pub fn allow_private_hosts(mut self, allow: bool) -> Self {
        self.allow_private_hosts = allow;
        self
    }

    /// Target for an inbox, refusing local and private destinations unless
    /// they are allowed.
    fn target_for(&self, inbox: &str) -> Result<DeliveryTarget, AppError> {
        let target = DeliveryTarget::from_inbox(inbox)?;
        if !self.allow_private_hosts
            && url::Url::parse(&target.inbox).map_or(true, |url| is_private_url(&url))
        {
            return Err(AppError::Validation(format!(
                "Inbox {} is on a private address",
                target.inbox
            )));
        }
        Ok(target)
    }

    /// Compute the delivery targets of an activity sent by `activity.actor`.
    ///
    /// The public marker and the sender itself are never looked up.
    pub async fn resolve<'a>(&self, activity: &'a Activity) -> Resolution {
        let public = activity.is_public();
        let sender = key_owner(&activity.actor);

        let addressees: BTreeSet<&'a str> = activity
            .addressees()
            .map(str::trim)
            .filter(|addressee| !addressee.is_empty())
            .filter(|addressee| !is_public_marker(addressee))
            .filter(|addressee| *addressee != sender)
            .collect();

        tracing::debug!(
            activity = %activity.id,
            public,
            addressees = addressees.len(),
            "Resolving recipients"
        );

        let lookups: Vec<(&'a str, Result<ResolvedAddressee, AppError>)> = stream::iter(addressees)
            .map(|addressee: &'a str| async move {
                (addressee, self.resolve_addressee(addressee, public).await)
            })
            .buffer_unordered(self.lookup_concurrency)
            .boxed()
            .collect()
            .await;

        let mut resolution = Resolution::default();
        for (addressee, result) in lookups {
            match result {
                Ok(resolved) => {
                    if resolved.newly_registered_shared_inbox {
                        resolution
                            .discovered_shared_inboxes
                            .push(resolved.target.inbox.clone());
                    }
                    resolution.targets.insert(resolved.target);
                }
                Err(e) => {
                    tracing::warn!(
                        activity = %activity.id,
                        addressee = %addressee,
                        error = %e,
                        "Skipping unresolvable recipient"
                    );
                    metrics::RECIPIENT_RESOLUTION_FAILURES_TOTAL.inc();
                    resolution.failures.push(AppError::RecipientResolutionFailed {
                        addressee: addressee.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if public {
            for inbox in self.shared_inboxes.list_all().await {
                match self.target_for(&inbox) {
                    Ok(target) => {
                        resolution.targets.insert(target);
                    }
                    Err(e) => {
                        tracing::warn!(inbox = %inbox, error = %e, "Ignoring invalid shared inbox");
                    }
                }
            }
        }

        resolution.discovered_shared_inboxes.sort();

        tracing::info!(
            activity = %activity.id,
            targets = resolution.targets.len(),
            skipped = resolution.failures.len(),
            "Resolved recipients"
        );

        resolution
    }

    async fn resolve_addressee(
        &self,
        addressee: &str,
        public: bool,
    ) -> Result<ResolvedAddressee, AppError> {
        let actor = fetch_actor(self.directory.as_ref(), addressee).await?;

        if public {
            if let Some(shared_inbox) = actor.shared_inbox() {
                let target = self.target_for(shared_inbox)?;
                let newly_registered_shared_inbox = self.shared_inboxes.add(&target.inbox).await;
                return Ok(ResolvedAddressee {
                    target,
                    newly_registered_shared_inbox,
                });
            }
        }

        Ok(ResolvedAddressee {
            target: self.target_for(&actor.inbox)?,
            newly_registered_shared_inbox: false,
        })
    }
}
