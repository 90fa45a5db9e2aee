//! Origin -> destination index for relayed messages.
//!
//! Edits made to an origin message are re-applied to its copy. Links live in
//! memory only and are swept after a day.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::types::{ChatId, MessageId};

/// Links older than this are dropped by [`EditSyncIndex::sweep`].
pub const DEFAULT_LINK_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat: ChatId,
    pub message: MessageId,
}

impl MessageRef {
    pub fn new(chat: ChatId, message: MessageId) -> Self {
        Self { chat, message }
    }
}

#[derive(Debug, Clone, Copy)]
struct Link {
    destination: MessageRef,
    created_at: Instant,
}

pub struct EditSyncIndex {
    links: RwLock<HashMap<MessageRef, Link>>,
    max_age: Duration,
}

impl EditSyncIndex {
    pub fn new(max_age: Duration) -> Self {
        Self {
            links: RwLock::new(HashMap::new()),
            max_age,
        }
    }

    /// Record that `origin` was delivered as `destination`. A later record
    /// for the same origin replaces the earlier one.
    pub async fn record(&self, origin: MessageRef, destination: MessageRef) {
        self.links.write().await.insert(
            origin,
            Link {
                destination,
                created_at: Instant::now(),
            },
        );
    }

    pub async fn lookup(&self, origin: MessageRef) -> Option<MessageRef> {
        self.links.read().await.get(&origin).map(|l| l.destination)
    }

    /// Remove links older than the configured age. Returns how many went.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut links = self.links.write().await;
        let before = links.len();
        links.retain(|_, l| now.duration_since(l.created_at) <= self.max_age);
        before - links.len()
    }

    pub async fn len(&self) -> usize {
        self.links.read().await.len()
    }
}

impl Default for EditSyncIndex {
    fn default() -> Self {
        Self::new(DEFAULT_LINK_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(chat: i64, message: i64) -> MessageRef {
        MessageRef::new(ChatId(chat), MessageId(message))
    }

    #[tokio::test]
    async fn record_and_lookup() {
        let index = EditSyncIndex::default();
        index.record(r(1, 10), r(-100, 500)).await;
        assert_eq!(index.lookup(r(1, 10)).await, Some(r(-100, 500)));
        // Destinations are not keys.
        assert_eq!(index.lookup(r(-100, 500)).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_drops_only_old_links() {
        let index = EditSyncIndex::default();
        index.record(r(1, 1), r(2, 1)).await;
        tokio::time::advance(Duration::from_secs(23 * 3600)).await;
        index.record(r(1, 2), r(2, 2)).await;
        tokio::time::advance(Duration::from_secs(2 * 3600)).await;

        assert_eq!(index.sweep().await, 1);
        assert_eq!(index.lookup(r(1, 1)).await, None);
        assert_eq!(index.lookup(r(1, 2)).await, Some(r(2, 2)));
        assert_eq!(index.len().await, 1);
    }
}
