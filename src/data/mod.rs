//! Data layer module
//!
//! Handles all data persistence:
//! - Local account and key pair
//! - Outgoing activities (persisted before delivery)
//! - Inbound activity ids (duplicate suppression)
//! - Known shared inboxes

mod database;
mod models;

pub use database::Database;
pub use models::*;
