//! Known shared inboxes
//!
//! Every shared inbox seen on a public-addressed recipient is remembered
//! here; public activities are broadcast to all of them.

use std::collections::BTreeSet;
use tokio::sync::RwLock;

use crate::metrics;

/// Set of shared inbox URIs, safe for concurrent use
#[derive(Default)]
pub struct SharedInboxRegistry {
    inboxes: RwLock<BTreeSet<String>>,
}

impl SharedInboxRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-filled with previously persisted inboxes.
    pub fn with_inboxes<I>(inboxes: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let inboxes: BTreeSet<String> = inboxes
            .into_iter()
            .map(|inbox| inbox.trim().to_string())
            .filter(|inbox| !inbox.is_empty())
            .collect();
        metrics::KNOWN_SHARED_INBOXES.set(inboxes.len() as i64);

        Self {
            inboxes: RwLock::new(inboxes),
        }
    }

    /// Add an inbox.
    ///
    /// # Returns
    /// `true` if the inbox was not known before.
    pub async fn add(&self, inbox: &str) -> bool {
        let inbox = inbox.trim();
        if inbox.is_empty() {
            return false;
        }

        let mut inboxes = self.inboxes.write().await;
        let inserted = inboxes.insert(inbox.to_string());
        if inserted {
            tracing::debug!(inbox = %inbox, "Registered shared inbox");
            metrics::KNOWN_SHARED_INBOXES.set(inboxes.len() as i64);
        }
        inserted
    }

    /// Snapshot of all known inboxes, sorted.
    pub async fn list_all(&self) -> Vec<String> {
        self.inboxes.read().await.iter().cloned().collect()
    }

    pub async fn contains(&self, inbox: &str) -> bool {
        self.inboxes.read().await.contains(inbox.trim())
    }

    pub async fn len(&self) -> usize {
        self.inboxes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inboxes.read().await.is_empty()
    }
}
