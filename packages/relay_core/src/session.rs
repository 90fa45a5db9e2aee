use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::types::{ThreadId, UserId};

/// Per-user relay state. Only `verified`, `thread` and `banned` survive a
/// restart; the timestamps are process-local.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSession {
    pub user: UserId,
    pub verified: bool,
    pub thread: Option<ThreadId>,
    pub banned: bool,
    pub verified_at: Option<DateTime<Utc>>,
    pub last_activity: DateTime<Utc>,
}

impl UserSession {
    pub fn new(user: UserId) -> Self {
        Self {
            user,
            verified: false,
            thread: None,
            banned: false,
            verified_at: None,
            last_activity: Utc::now(),
        }
    }
}

/// All known sessions. Sessions are created lazily and never removed.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<UserId, UserSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with sessions restored from storage.
    pub fn from_sessions(sessions: impl IntoIterator<Item = UserSession>) -> Self {
        Self {
            sessions: RwLock::new(sessions.into_iter().map(|s| (s.user, s)).collect()),
        }
    }

    /// Existing session for `user`, or a fresh one (which is then stored).
    pub async fn get_or_create(&self, user: UserId) -> UserSession {
        if let Some(session) = self.sessions.read().await.get(&user) {
            return session.clone();
        }
        self.sessions
            .write()
            .await
            .entry(user)
            .or_insert_with(|| UserSession::new(user))
            .clone()
    }

    pub async fn get(&self, user: UserId) -> Option<UserSession> {
        self.sessions.read().await.get(&user).cloned()
    }

    /// Apply `f` to the session of `user` (creating it first if needed) and
    /// return the updated copy.
    pub async fn update<F>(&self, user: UserId, f: F) -> UserSession
    where
        F: FnOnce(&mut UserSession),
    {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(user)
            .or_insert_with(|| UserSession::new(user));
        f(session);
        session.clone()
    }

    pub async fn touch(&self, user: UserId) {
        self.update(user, |s| s.last_activity = Utc::now()).await;
    }

    pub async fn mark_verified(&self, user: UserId) -> UserSession {
        self.update(user, |s| {
            s.verified = true;
            s.verified_at = Some(Utc::now());
        })
        .await
    }

    /// Set the banned flag. Returns false when it already had that value.
    pub async fn set_banned(&self, user: UserId, banned: bool) -> bool {
        let mut changed = false;
        self.update(user, |s| {
            changed = s.banned != banned;
            s.banned = banned;
        })
        .await;
        changed
    }

    pub async fn set_thread(&self, user: UserId, thread: Option<ThreadId>) {
        self.update(user, |s| s.thread = thread).await;
    }

    /// Clear the thread only if it still is `thread`. Returns whether it did.
    pub async fn clear_thread_if(&self, user: UserId, thread: ThreadId) -> bool {
        let mut cleared = false;
        self.update(user, |s| {
            if s.thread == Some(thread) {
                s.thread = None;
                cleared = true;
            }
        })
        .await;
        cleared
    }

    pub async fn snapshot(&self) -> Vec<UserSession> {
        let mut all: Vec<UserSession> = self.sessions.read().await.values().cloned().collect();
        all.sort_by_key(|s| s.user);
        all
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}
