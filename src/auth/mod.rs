//! API authentication
//!
//! Handles:
//! - Bearer token check for the outbox

mod middleware;

pub use middleware::{ApiClient, token_matches};
