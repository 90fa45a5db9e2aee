//! Thread health probing.
//!
//! The only reliable signal that a thread still exists is whether a real send
//! lands in it. A probe sends a short marker message addressed to the thread,
//! reads back where the platform put it, and deletes it again.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::metrics::RelayMetrics;
use crate::transport::{DeadThreadClassifier, Transport};
use crate::types::{ChatId, Placement, TextFormat, ThreadId};

/// Cached probe results are not trusted past this age.
pub const DEFAULT_HEALTH_TTL: Duration = Duration::from_secs(60);

pub(crate) const PROBE_TEXT: &str = "\u{200b}";

/// What a probe found out about a thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The probe landed in the addressed thread.
    Ok,
    /// The probe landed in a different thread.
    Redirected(ThreadId),
    /// The probe was delivered but without any thread attached.
    MissingDestinationId,
    /// The platform reports the thread as deleted or closed.
    Missing,
    /// The platform rejected the probe for a reason unrelated to the thread.
    ProbeInvalid(String),
    UnknownError(String),
}

impl ProbeOutcome {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeOutcome::Ok)
    }
}

#[derive(Debug, Clone)]
struct HealthEntry {
    healthy: bool,
    checked_at: Instant,
    detail: ProbeOutcome,
}

pub struct ThreadHealthMonitor {
    transport: Arc<dyn Transport>,
    workspace: ChatId,
    classifier: DeadThreadClassifier,
    ttl: Duration,
    cache: RwLock<HashMap<ThreadId, HealthEntry>>,
    metrics: Arc<RelayMetrics>,
}

impl ThreadHealthMonitor {
    pub fn new(
        transport: Arc<dyn Transport>,
        workspace: ChatId,
        classifier: DeadThreadClassifier,
        ttl: Duration,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            transport,
            workspace,
            classifier,
            ttl,
            cache: RwLock::new(HashMap::new()),
            metrics,
        }
    }

    /// Send a probe into `thread` and classify where it landed.
    pub async fn probe(&self, thread: ThreadId) -> ProbeOutcome {
        let sent = self
            .transport
            .send_message(self.workspace, Some(thread), PROBE_TEXT, TextFormat::Plain)
            .await;

        let outcome = match sent {
            Ok(delivered) => {
                if let Err(e) = self
                    .transport
                    .delete_message(delivered.chat, delivered.message)
                    .await
                {
                    debug!(%thread, "failed to delete health probe: {}", e);
                }
                match delivered.placement {
                    Placement::Thread(actual) if actual == thread => ProbeOutcome::Ok,
                    Placement::Thread(actual) => ProbeOutcome::Redirected(actual),
                    Placement::General | Placement::Unknown => ProbeOutcome::MissingDestinationId,
                }
            }
            Err(e) if self.classifier.is_dead_thread(&e) => ProbeOutcome::Missing,
            Err(e) if e.is_bad_request() => ProbeOutcome::ProbeInvalid(e.to_string()),
            Err(e) => ProbeOutcome::UnknownError(e.to_string()),
        };

        self.metrics.probe_sent(outcome.is_healthy());
        if !outcome.is_healthy() {
            warn!(%thread, ?outcome, "thread failed health probe");
        }
        outcome
    }

    /// Whether `thread` is usable, probing only when the cached answer is
    /// older than the TTL.
    pub async fn verify_health(&self, thread: ThreadId) -> bool {
        if let Some(entry) = self.cache.read().await.get(&thread) {
            if entry.checked_at.elapsed() < self.ttl {
                return entry.healthy;
            }
        }

        let outcome = self.probe(thread).await;
        let healthy = outcome.is_healthy();
        self.store(thread, healthy, outcome).await;
        healthy
    }

    pub async fn mark_healthy(&self, thread: ThreadId) {
        self.store(thread, true, ProbeOutcome::Ok).await;
    }

    pub async fn mark_unhealthy(&self, thread: ThreadId, reason: impl Into<String>) {
        self.store(thread, false, ProbeOutcome::UnknownError(reason.into()))
            .await;
    }

    pub async fn forget(&self, thread: ThreadId) {
        self.cache.write().await.remove(&thread);
    }

    /// Last probe result for `thread`, regardless of age.
    pub async fn last_outcome(&self, thread: ThreadId) -> Option<ProbeOutcome> {
        self.cache
            .read()
            .await
            .get(&thread)
            .map(|e| e.detail.clone())
    }

    async fn store(&self, thread: ThreadId, healthy: bool, detail: ProbeOutcome) {
        self.cache.write().await.insert(
            thread,
            HealthEntry {
                healthy,
                checked_at: Instant::now(),
                detail,
            },
        );
    }
}
