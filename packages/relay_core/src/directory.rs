use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::types::{ThreadId, UserId};

#[derive(Default)]
struct Maps {
    by_thread: HashMap<ThreadId, UserId>,
    by_user: HashMap<UserId, ThreadId>,
}

/// Bidirectional user <-> thread index. A user owns at most one thread and a
/// thread belongs to exactly one user until it is removed.
#[derive(Default)]
pub struct ThreadDirectory {
    maps: RwLock<Maps>,
}

impl ThreadDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the index from the persisted per-user assignments.
    pub fn from_assignments(assignments: impl IntoIterator<Item = (UserId, ThreadId)>) -> Self {
        let mut maps = Maps::default();
        for (user, thread) in assignments {
            maps.by_thread.insert(thread, user);
            maps.by_user.insert(user, thread);
        }
        Self {
            maps: RwLock::new(maps),
        }
    }

    /// Bind `thread` to `user`, dropping whatever thread the user had before.
    /// Returns the replaced thread, if any.
    pub async fn assign(&self, user: UserId, thread: ThreadId) -> Option<ThreadId> {
        let mut maps = self.maps.write().await;
        let previous = maps.by_user.insert(user, thread);
        if let Some(old) = previous.filter(|old| *old != thread) {
            maps.by_thread.remove(&old);
        }
        if let Some(other) = maps.by_thread.insert(thread, user).filter(|u| *u != user) {
            maps.by_user.remove(&other);
        }
        previous.filter(|old| *old != thread)
    }

    pub async fn user_for(&self, thread: ThreadId) -> Option<UserId> {
        self.maps.read().await.by_thread.get(&thread).copied()
    }

    pub async fn thread_for(&self, user: UserId) -> Option<ThreadId> {
        self.maps.read().await.by_user.get(&user).copied()
    }

    /// Tear down the mapping for `thread`. Returns the user it belonged to.
    pub async fn remove_thread(&self, thread: ThreadId) -> Option<UserId> {
        let mut maps = self.maps.write().await;
        let user = maps.by_thread.remove(&thread)?;
        if maps.by_user.get(&user) == Some(&thread) {
            maps.by_user.remove(&user);
        }
        Some(user)
    }

    pub async fn len(&self) -> usize {
        self.maps.read().await.by_thread.len()
    }
}
