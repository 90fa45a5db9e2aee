//! Durable state: the per-user thread assignment, verification flags and the
//! ban list. Everything else is rebuilt at startup or lives only in memory.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::directory::ThreadDirectory;
use crate::error::PersistError;
use crate::session::{SessionStore, UserSession};
use crate::types::{ThreadId, UserId};

/// The persisted record. Only the user -> thread direction is stored; the
/// reverse index is derived on load. Files written by older versions also
/// carry `thread_to_user`, which is ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub user_to_thread: BTreeMap<UserId, ThreadId>,
    #[serde(default)]
    pub user_verified: BTreeMap<UserId, bool>,
    #[serde(default)]
    pub banned_users: Vec<UserId>,
}

impl PersistedState {
    pub fn from_sessions(sessions: &[UserSession]) -> Self {
        let mut state = Self::default();
        for session in sessions {
            if let Some(thread) = session.thread {
                state.user_to_thread.insert(session.user, thread);
            }
            if session.verified {
                state.user_verified.insert(session.user, true);
            }
            if session.banned {
                state.banned_users.push(session.user);
            }
        }
        state
    }

    /// Rebuild in-memory sessions. If two users claim the same thread the
    /// lower user id keeps it.
    pub fn into_sessions(self) -> Vec<UserSession> {
        let banned: BTreeSet<UserId> = self.banned_users.into_iter().collect();
        let mut users: BTreeSet<UserId> = self.user_to_thread.keys().copied().collect();
        users.extend(self.user_verified.keys().copied());
        users.extend(banned.iter().copied());

        let mut claimed = BTreeSet::new();
        users
            .into_iter()
            .map(|user| {
                let mut session = UserSession::new(user);
                session.verified = self.user_verified.get(&user).copied().unwrap_or(false);
                session.banned = banned.contains(&user);
                session.thread = self
                    .user_to_thread
                    .get(&user)
                    .copied()
                    .filter(|t| claimed.insert(*t));
                session
            })
            .collect()
    }
}

/// Storage backend for [`PersistedState`]. Every save is a full overwrite.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn save(&self, state: &PersistedState) -> Result<(), PersistError>;
}

/// Keeps the last saved state in memory.
#[derive(Default)]
pub struct MemoryStateStore {
    last: Mutex<Option<PersistedState>>,
    saves: Mutex<usize>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<PersistedState> {
        self.last.lock().ok().and_then(|s| s.clone())
    }

    pub fn saves(&self) -> usize {
        self.saves.lock().map(|n| *n).unwrap_or(0)
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn save(&self, state: &PersistedState) -> Result<(), PersistError> {
        if let Ok(mut last) = self.last.lock() {
            *last = Some(state.clone());
        }
        if let Ok(mut saves) = self.saves.lock() {
            *saves += 1;
        }
        Ok(())
    }
}

/// Recomputes the persisted record from the live session table and hands it
/// to the store. Failures are logged; the next mutation retries.
pub struct Persister {
    sessions: Arc<SessionStore>,
    store: Arc<dyn StateStore>,
    /// Snapshot and save happen under one lock so the last save is never
    /// older than the last mutation.
    ordering: tokio::sync::Mutex<()>,
}

impl Persister {
    pub fn new(sessions: Arc<SessionStore>, store: Arc<dyn StateStore>) -> Self {
        Self {
            sessions,
            store,
            ordering: tokio::sync::Mutex::new(()),
        }
    }

    pub async fn persist(&self) {
        let _ordered = self.ordering.lock().await;
        let state = PersistedState::from_sessions(&self.sessions.snapshot().await);
        match self.store.save(&state).await {
            Ok(()) => debug!(
                threads = state.user_to_thread.len(),
                banned = state.banned_users.len(),
                "state persisted"
            ),
            Err(e) => warn!("failed to persist state: {}", e),
        }
    }
}

/// Restore the session table and thread directory from a persisted record.
pub fn restore(state: PersistedState) -> (SessionStore, ThreadDirectory) {
    let sessions = state.into_sessions();
    let directory =
        ThreadDirectory::from_assignments(sessions.iter().filter_map(|s| Some((s.user, s.thread?))));
    (SessionStore::from_sessions(sessions), directory)
}
