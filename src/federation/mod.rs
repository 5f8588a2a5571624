//! ActivityPub federation module
//!
//! Handles:
//! - HTTP Signatures (signing, parsing, verification)
//! - Actor fetching
//! - Public key caching
//! - Recipient resolution and shared inboxes
//! - Activity delivery with retry
//! - Inbound signature verification

mod actor;
mod delivery;
mod inbound;
mod key_cache;
mod model;
mod recipients;
mod shared_inbox;
pub mod signature;

#[cfg(test)]
pub(crate) mod test_support;

#[cfg(test)]
pub(crate) use actor::MockActorDirectory;
pub use actor::{
    ActorDirectory, HttpActorDirectory, extract_actor_domain, fetch_actor, key_id_matches_actor,
    key_owner, redirect_policy,
};
pub use delivery::{
    DeliveryEngine, DeliveryOutcome, DeliveryReport, RetryPolicy, SigningIdentity, TargetDelivery,
};
pub use inbound::{InboundRequest, InboundVerifier, VerifiedSignature};
pub use key_cache::{CacheStats, KeyResolver, ResolvedKey};
pub(crate) use model::one_or_many;
pub use model::{
    ACTIVITY_CONTENT_TYPE, Activity, Actor, Endpoints, PUBLIC_COLLECTION, PublicKeyDescriptor,
    is_public_marker,
};
pub use recipients::{DeliveryTarget, RecipientResolver, Resolution, TargetSet};
pub use shared_inbox::SharedInboxRegistry;
pub use signature::{SignatureHeaderFields, SignedHeaders, compute_digest, parse_signature_header, sign_request};
