//! Creating and validating per-user threads.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::directory::ThreadDirectory;
use crate::error::{RelayError, TransportError};
use crate::health::{PROBE_TEXT, ThreadHealthMonitor};
use crate::metrics::RelayMetrics;
use crate::persist::Persister;
use crate::retry::RetryPolicy;
use crate::session::SessionStore;
use crate::transport::Transport;
use crate::types::{ChatId, Placement, TextFormat, ThreadId, UserId};

const MAX_TITLE_CHARS: usize = 40;

/// Thread title for a user: `user_<id>_<name>`, cut to 40 characters.
pub fn thread_title(user: UserId, display: &str) -> String {
    format!("user_{}_{}", user, display)
        .chars()
        .take(MAX_TITLE_CHARS)
        .collect()
}

/// A thread ready to receive messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnsuredThread {
    pub thread: ThreadId,
    pub is_new: bool,
}

#[derive(Debug, thiserror::Error)]
enum AttemptError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("verification probe for thread {expected} landed in {actual:?}")]
    Misplaced {
        expected: ThreadId,
        actual: Placement,
    },
}

pub struct TopicProvisioner {
    transport: Arc<dyn Transport>,
    workspace: ChatId,
    sessions: Arc<SessionStore>,
    directory: Arc<ThreadDirectory>,
    health: Arc<ThreadHealthMonitor>,
    persister: Arc<Persister>,
    metrics: Arc<RelayMetrics>,
    retry: RetryPolicy,
    settle_delay: Duration,
}

impl TopicProvisioner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: Arc<dyn Transport>,
        workspace: ChatId,
        sessions: Arc<SessionStore>,
        directory: Arc<ThreadDirectory>,
        health: Arc<ThreadHealthMonitor>,
        persister: Arc<Persister>,
        metrics: Arc<RelayMetrics>,
        retry: RetryPolicy,
        settle_delay: Duration,
    ) -> Self {
        Self {
            transport,
            workspace,
            sessions,
            directory,
            health,
            persister,
            metrics,
            retry,
            settle_delay,
        }
    }

    /// Return a healthy thread for `user`, creating one if needed.
    ///
    /// Callers must hold the user's guard.
    pub async fn ensure_thread(
        &self,
        user: UserId,
        display: &str,
    ) -> Result<EnsuredThread, RelayError> {
        let session = self.sessions.get_or_create(user).await;

        let mut torn_down = false;
        if let Some(thread) = session.thread {
            if self.health.verify_health(thread).await {
                return Ok(EnsuredThread {
                    thread,
                    is_new: false,
                });
            }
            info!(%user, %thread, "thread unhealthy, provisioning a replacement");
            self.teardown(user, thread).await;
            torn_down = true;
        }

        let thread = match self.create_verified(user, display).await {
            Ok(thread) => thread,
            Err(e) => {
                if torn_down {
                    self.persister.persist().await;
                }
                return Err(e);
            }
        };

        self.sessions.set_thread(user, Some(thread)).await;
        self.directory.assign(user, thread).await;
        self.health.mark_healthy(thread).await;
        self.persister.persist().await;
        self.metrics.thread_created();

        info!(%user, %thread, "thread provisioned");
        Ok(EnsuredThread {
            thread,
            is_new: true,
        })
    }

    /// Drop every trace of `thread` for `user`: directory entry, health
    /// cache and the session assignment. Does not persist.
    pub async fn teardown(&self, user: UserId, thread: ThreadId) {
        self.directory.remove_thread(thread).await;
        self.health.forget(thread).await;
        self.sessions.clear_thread_if(user, thread).await;
    }

    async fn create_verified(&self, user: UserId, display: &str) -> Result<ThreadId, RelayError> {
        let title = thread_title(user, display);
        self.retry
            .run(|attempt| {
                let title = title.clone();
                async move {
                    debug!(%user, attempt, "creating thread");
                    self.attempt_create(&title).await
                }
            })
            .await
            .map_err(|(err, attempts)| {
                warn!(%user, attempts, "thread provisioning failed: {}", err);
                self.metrics.provisioning_failed();
                RelayError::Provisioning {
                    user,
                    attempts,
                    last: err.to_string(),
                }
            })
    }

    async fn attempt_create(&self, title: &str) -> Result<ThreadId, AttemptError> {
        let thread = self.transport.create_thread(self.workspace, title).await?;

        // Freshly created threads are not always addressable right away.
        tokio::time::sleep(self.settle_delay).await;

        let probe = self
            .transport
            .send_message(self.workspace, Some(thread), PROBE_TEXT, TextFormat::Plain)
            .await?;
        if let Err(e) = self
            .transport
            .delete_message(probe.chat, probe.message)
            .await
        {
            debug!(%thread, "failed to delete verification probe: {}", e);
        }

        match probe.placement {
            Placement::Thread(actual) if actual == thread => Ok(thread),
            actual => Err(AttemptError::Misplaced {
                expected: thread,
                actual,
            }),
        }
    }
}
