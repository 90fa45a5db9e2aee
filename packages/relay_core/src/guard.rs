use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::types::UserId;

/// Idle locks are dropped once the table grows past this size.
const PRUNE_THRESHOLD: usize = 1024;

/// Per-user exclusive sections.
///
/// Holding the guard for a user serialises everything done on that user's
/// behalf on the relay path. Waiters are served in FIFO order, so messages of
/// one user are handled in the order they arrived.
#[derive(Default)]
pub struct UserGuards {
    locks: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl UserGuards {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, user: UserId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            if locks.len() > PRUNE_THRESHOLD {
                locks.retain(|_, l| Arc::strong_count(l) > 1);
            }
            locks.entry(user).or_default().clone()
        };
        lock.lock_owned().await
    }

    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}
