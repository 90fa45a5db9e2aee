//! Admission gate run before a user's messages are relayed.
//!
//! `Unverified -> Pending -> Verified`. Verified is terminal and persisted.
//! Banned users never reach the gate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::metrics::RelayMetrics;
use crate::persist::Persister;
use crate::session::SessionStore;
use crate::types::UserId;

/// Generated answers are forgotten after this long.
pub const DEFAULT_CHALLENGE_TTL: Duration = Duration::from_secs(300);

pub const DEFAULT_FIXED_QUESTION: &str = "Please enter the access password:";

/// Admission mode, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptchaMode {
    /// First private message verifies the user.
    None,
    /// The trimmed text must equal `answer`. Unlimited attempts.
    FixedSecret { question: String, answer: String },
    /// A fresh arithmetic question per attempt.
    MathChallenge,
}

impl CaptchaMode {
    /// Resolve the mode from the raw settings: the math flag wins, then the
    /// presence of a fixed answer, otherwise no captcha.
    pub fn resolve(use_math: bool, question: Option<String>, answer: Option<String>) -> Self {
        if use_math {
            Self::MathChallenge
        } else if let Some(answer) = answer {
            Self::FixedSecret {
                question: question
                    .filter(|q| !q.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_FIXED_QUESTION.to_string()),
                answer,
            }
        } else {
            Self::None
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::FixedSecret { .. } => "fixed",
            Self::MathChallenge => "math",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MathQuestion {
    pub text: String,
    pub answer: i64,
}

impl MathQuestion {
    /// Operands in 1..=10. Subtraction never goes negative and division is
    /// always exact.
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let a: i64 = rng.random_range(1..=10);
        let b: i64 = rng.random_range(1..=10);
        match rng.random_range(0..4) {
            0 => Self {
                text: format!("{a} + {b} = ?"),
                answer: a + b,
            },
            1 => {
                let (hi, lo) = if a < b { (b, a) } else { (a, b) };
                Self {
                    text: format!("{hi} - {lo} = ?"),
                    answer: hi - lo,
                }
            }
            2 => Self {
                text: format!("{a} × {b} = ?"),
                answer: a * b,
            },
            _ => {
                let (divisor, quotient) = (a, b);
                Self {
                    text: format!("{} ÷ {} = ?", divisor * quotient, divisor),
                    answer: quotient,
                }
            }
        }
    }
}

struct PendingChallenge {
    answer: i64,
    expires_at: Instant,
    generation: u64,
    expiry: JoinHandle<()>,
}

#[derive(Default)]
struct PendingTable {
    entries: HashMap<UserId, PendingChallenge>,
    next_generation: u64,
}

/// Outstanding arithmetic answers, each with its own expiry task.
#[derive(Clone)]
struct PendingChallenges {
    table: Arc<Mutex<PendingTable>>,
    ttl: Duration,
}

impl PendingChallenges {
    fn new(ttl: Duration) -> Self {
        Self {
            table: Arc::new(Mutex::new(PendingTable::default())),
            ttl,
        }
    }

    /// Store `answer` for `user`, replacing and cancelling any earlier one.
    async fn issue(&self, user: UserId, answer: i64) {
        let mut table = self.table.lock().await;
        table.next_generation += 1;
        let generation = table.next_generation;

        let expiry = {
            let table = Arc::clone(&self.table);
            let ttl = self.ttl;
            tokio::spawn(async move {
                tokio::time::sleep(ttl).await;
                let mut table = table.lock().await;
                // Only remove the challenge this task was scheduled for.
                if table
                    .entries
                    .get(&user)
                    .is_some_and(|p| p.generation == generation)
                {
                    table.entries.remove(&user);
                    debug!(%user, "math challenge expired");
                }
            })
        };

        let pending = PendingChallenge {
            answer,
            expires_at: Instant::now() + self.ttl,
            generation,
            expiry,
        };
        if let Some(old) = table.entries.insert(user, pending) {
            old.expiry.abort();
        }
    }

    /// The live answer for `user`, if one exists and has not expired.
    async fn answer(&self, user: UserId) -> Option<i64> {
        let table = self.table.lock().await;
        table
            .entries
            .get(&user)
            .filter(|p| Instant::now() < p.expires_at)
            .map(|p| p.answer)
    }

    async fn clear(&self, user: UserId) {
        if let Some(old) = self.table.lock().await.entries.remove(&user) {
            old.expiry.abort();
        }
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.table.lock().await.entries.len()
    }
}

/// Result of running a private message through the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Verified; relay the message.
    Admitted,
    /// Just verified by this message, which was the answer and is not relayed.
    JustVerified { reply: String },
    /// Verified silently by this message, which is not relayed.
    Consumed,
    /// Not verified; send `reply` and drop the message.
    Challenged { reply: String },
}

pub const VERIFIED_REPLY: &str = "Verification passed! You can send messages now.";

pub struct CaptchaGate {
    mode: CaptchaMode,
    sessions: Arc<SessionStore>,
    persister: Arc<Persister>,
    metrics: Arc<RelayMetrics>,
    pending: PendingChallenges,
}

impl CaptchaGate {
    pub fn new(
        mode: CaptchaMode,
        sessions: Arc<SessionStore>,
        persister: Arc<Persister>,
        metrics: Arc<RelayMetrics>,
        challenge_ttl: Duration,
    ) -> Self {
        Self {
            mode,
            sessions,
            persister,
            metrics,
            pending: PendingChallenges::new(challenge_ttl),
        }
    }

    pub fn mode(&self) -> &CaptchaMode {
        &self.mode
    }

    /// Evaluate a private message from `user` whose text (or caption) is
    /// `text`. Callers must hold the user's guard.
    pub async fn evaluate(&self, user: UserId, text: &str) -> Admission {
        let session = self.sessions.get_or_create(user).await;
        if session.verified {
            return Admission::Admitted;
        }

        match &self.mode {
            CaptchaMode::None => {
                self.verify(user).await;
                Admission::Consumed
            }
            CaptchaMode::FixedSecret { question, answer } => {
                if text.trim() == answer {
                    self.verify(user).await;
                    Admission::JustVerified {
                        reply: VERIFIED_REPLY.to_string(),
                    }
                } else {
                    self.metrics.captcha_result(false);
                    Admission::Challenged {
                        reply: format!("Please pass verification first: {question}"),
                    }
                }
            }
            CaptchaMode::MathChallenge => {
                let expected = self.pending.answer(user).await;
                let parsed = text.trim().parse::<i64>();
                match (expected, parsed) {
                    (Some(expected), Ok(given)) if expected == given => {
                        self.pending.clear(user).await;
                        self.verify(user).await;
                        Admission::JustVerified {
                            reply: VERIFIED_REPLY.to_string(),
                        }
                    }
                    (expected, parsed) => {
                        let question = self.new_question(user).await;
                        let lead = match (expected, parsed) {
                            (_, Err(_)) => "Please enter a valid number:",
                            (None, Ok(_)) => "Please solve this to verify:",
                            (Some(_), Ok(_)) => "Wrong answer, try again:",
                        };
                        if expected.is_some() {
                            self.metrics.captcha_result(false);
                        }
                        Admission::Challenged {
                            reply: format!("{lead}\n{}", question.text),
                        }
                    }
                }
            }
        }
    }

    /// Reply to the `start` command for an unverified or verified user.
    pub async fn start(&self, user: UserId) -> String {
        let session = self.sessions.get_or_create(user).await;
        if session.verified {
            return "You are already verified. Just send your message (text, photos, videos and more are supported).".to_string();
        }
        match &self.mode {
            CaptchaMode::None => {
                self.verify(user).await;
                "Send me a message and I will pass it on.".to_string()
            }
            CaptchaMode::FixedSecret { question, .. } => question.clone(),
            CaptchaMode::MathChallenge => {
                let question = self.new_question(user).await;
                format!("Answer this to finish verification:\n{}", question.text)
            }
        }
    }

    async fn new_question(&self, user: UserId) -> MathQuestion {
        let question = MathQuestion::generate(&mut rand::rng());
        self.pending.issue(user, question.answer).await;
        question
    }

    async fn verify(&self, user: UserId) {
        self.sessions.mark_verified(user).await;
        self.persister.persist().await;
        self.metrics.captcha_result(true);
        info!(%user, mode = self.mode.name(), "user verified");
    }

    #[cfg(test)]
    pub(crate) async fn pending_answer(&self, user: UserId) -> Option<i64> {
        self.pending.answer(user).await
    }

    #[cfg(test)]
    pub(crate) async fn pending_len(&self) -> usize {
        self.pending.len().await
    }
}
