use async_trait::async_trait;
use relay_core::{PersistError, PersistedState, StateStore};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Durable state as one pretty-printed JSON document.
pub struct JsonStateFile {
    path: PathBuf,
    /// Held for the whole write-then-rename; saves share one temp file.
    write_lock: Mutex<()>,
}

impl JsonStateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the file written by a previous run. A missing file is a first
    /// start; an unreadable one is logged and replaced on the next save.
    pub fn load(&self) -> PersistedState {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No state file at {:?}, starting empty", self.path);
                return PersistedState::default();
            }
            Err(e) => {
                warn!("Failed to read state file {:?}: {}", self.path, e);
                return PersistedState::default();
            }
        };
        if content.trim().is_empty() {
            return PersistedState::default();
        }
        match serde_json::from_str::<PersistedState>(&content) {
            Ok(state) => {
                info!(
                    threads = state.user_to_thread.len(),
                    verified = state.user_verified.len(),
                    banned = state.banned_users.len(),
                    "Loaded state from {:?}",
                    self.path
                );
                state
            }
            Err(e) => {
                warn!("State file {:?} is corrupt, starting empty: {}", self.path, e);
                PersistedState::default()
            }
        }
    }
}

#[async_trait]
impl StateStore for JsonStateFile {
    async fn save(&self, state: &PersistedState) -> Result<(), PersistError> {
        let content = serde_json::to_string_pretty(state)?;
        let _write = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write then rename so a crash never leaves a half-written file.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::{ThreadId, UserId};
    use std::sync::Arc;

    #[tokio::test]
    async fn save_then_load() {
        let tmp = tempfile::tempdir().unwrap();
        let file = JsonStateFile::new(tmp.path().join("state/topic_mapping.json"));

        let mut state = PersistedState::default();
        state.user_to_thread.insert(UserId(1), ThreadId(10));
        state.user_verified.insert(UserId(1), true);
        state.banned_users.push(UserId(2));
        file.save(&state).await.unwrap();

        assert!(!tmp.path().join("state/topic_mapping.json.tmp").exists());
        assert_eq!(file.load(), state);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_saves_all_succeed() {
        let tmp = tempfile::tempdir().unwrap();
        let file = Arc::new(JsonStateFile::new(tmp.path().join("topic_mapping.json")));

        let handles: Vec<_> = (0..64)
            .map(|i| {
                let file = file.clone();
                tokio::spawn(async move {
                    let mut state = PersistedState::default();
                    state.user_to_thread.insert(UserId(i), ThreadId(100 + i));
                    file.save(&state).await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let state = file.load();
        assert_eq!(state.user_to_thread.len(), 1);
        let (user, thread) = state.user_to_thread.iter().next().unwrap();
        assert_eq!(thread.0, user.0 + 100);
        assert!(!tmp.path().join("topic_mapping.json.tmp").exists());
    }

    #[test]
    fn missing_or_corrupt_file_starts_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let file = JsonStateFile::new(tmp.path().join("topic_mapping.json"));
        assert_eq!(file.load(), PersistedState::default());

        std::fs::write(file.path(), "{not json").unwrap();
        assert_eq!(file.load(), PersistedState::default());

        std::fs::write(file.path(), "").unwrap();
        assert_eq!(file.load(), PersistedState::default());
    }

    #[test]
    fn reads_legacy_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let file = JsonStateFile::new(tmp.path().join("topic_mapping.json"));
        std::fs::write(
            file.path(),
            r#"{"user_to_thread":{"5":55},"thread_to_user":{"55":5},"user_verified":{"5":true},"banned_users":[]}"#,
        )
        .unwrap();
        let state = file.load();
        assert_eq!(state.user_to_thread.get(&UserId(5)), Some(&ThreadId(55)));
        assert_eq!(state.user_verified.get(&UserId(5)), Some(&true));
    }
}
