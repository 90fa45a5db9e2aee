//! Relay counters for observability.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug, Default)]
pub struct RelayMetrics {
    // Delivery
    pub to_workspace: AtomicU64,
    pub to_user: AtomicU64,
    pub delivery_failures: AtomicU64,

    // Threads
    pub threads_created: AtomicU64,
    pub provisioning_failures: AtomicU64,
    pub redirects_recovered: AtomicU64,
    pub probes_sent: AtomicU64,
    pub probes_unhealthy: AtomicU64,

    // Edit sync
    pub edits_synced: AtomicU64,
    pub links_swept: AtomicU64,

    // Admission
    pub captcha_passed: AtomicU64,
    pub captcha_failed: AtomicU64,

    start_time: Option<Instant>,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn relayed_to_workspace(&self) {
        bump(&self.to_workspace);
    }

    pub fn relayed_to_user(&self) {
        bump(&self.to_user);
    }

    pub fn delivery_failed(&self) {
        bump(&self.delivery_failures);
    }

    pub fn thread_created(&self) {
        bump(&self.threads_created);
    }

    pub fn provisioning_failed(&self) {
        bump(&self.provisioning_failures);
    }

    pub fn redirect_recovered(&self) {
        bump(&self.redirects_recovered);
    }

    pub fn probe_sent(&self, healthy: bool) {
        bump(&self.probes_sent);
        if !healthy {
            bump(&self.probes_unhealthy);
        }
    }

    pub fn edit_synced(&self) {
        bump(&self.edits_synced);
    }

    pub fn links_swept(&self, count: usize) {
        self.links_swept.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn captcha_result(&self, passed: bool) {
        bump(if passed {
            &self.captcha_passed
        } else {
            &self.captcha_failed
        });
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            messages: MessageMetrics {
                to_workspace: load(&self.to_workspace),
                to_user: load(&self.to_user),
                failures: load(&self.delivery_failures),
            },
            threads: ThreadMetrics {
                created: load(&self.threads_created),
                provisioning_failures: load(&self.provisioning_failures),
                redirects_recovered: load(&self.redirects_recovered),
                probes_sent: load(&self.probes_sent),
                probes_unhealthy: load(&self.probes_unhealthy),
            },
            edits: EditMetrics {
                synced: load(&self.edits_synced),
                links_swept: load(&self.links_swept),
            },
            captcha: CaptchaMetrics {
                passed: load(&self.captcha_passed),
                failed: load(&self.captcha_failed),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub messages: MessageMetrics,
    pub threads: ThreadMetrics,
    pub edits: EditMetrics,
    pub captcha: CaptchaMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageMetrics {
    pub to_workspace: u64,
    pub to_user: u64,
    pub failures: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadMetrics {
    pub created: u64,
    pub provisioning_failures: u64,
    pub redirects_recovered: u64,
    pub probes_sent: u64,
    pub probes_unhealthy: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditMetrics {
    pub synced: u64,
    pub links_swept: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptchaMetrics {
    pub passed: u64,
    pub failed: u64,
}
