//! Service layer
//!
//! Contains business logic separated from HTTP handlers.
//! Services orchestrate database and federation operations.

mod account;
mod inbox;
mod outbox;

pub use account::{AccountService, LocalActorUris};
pub use inbox::{InboxReceipt, InboxService};
pub use outbox::{ActivityDraft, OUTBOX_PAGE_SIZE, OutboxService, SendReport, SkippedRecipient};
