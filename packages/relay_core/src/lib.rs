//! Relay core: bridges private user chats and per-user threads inside one
//! staff workspace chat.
//!
//! Each admitted user owns exactly one thread. Messages from the user are
//! copied into that thread; staff messages posted in the thread are copied
//! back to the user. Threads are probed for health before reuse and replaced
//! when the platform starts delivering elsewhere. Edits to relayed messages
//! are re-applied to their copies.
//!
//! The crate knows nothing about HTTP. Outbound calls go through the
//! [`Transport`] trait and durable state through [`StateStore`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use relay_core::{CaptchaMode, ChatId, MemoryStateStore, PersistedState, Relay, RelaySettings, Transport};
//!
//! fn build(transport: Arc<dyn Transport>) -> Relay {
//!     let settings = RelaySettings::new(ChatId(-1001234567890), CaptchaMode::MathChallenge);
//!     Relay::new(settings, transport, Arc::new(MemoryStateStore::new()), PersistedState::default())
//! }
//! ```

pub mod captcha;
pub mod card;
pub mod commands;
pub mod directory;
pub mod error;
pub mod guard;
pub mod health;
pub mod links;
pub mod metrics;
pub mod persist;
pub mod provision;
pub mod relay;
pub mod retry;
pub mod session;
pub mod transport;
pub mod types;

#[cfg(test)]
mod test_helpers;

pub use captcha::{Admission, CaptchaGate, CaptchaMode, MathQuestion};
pub use commands::Command;
pub use directory::ThreadDirectory;
pub use error::{PersistError, RelayError, TransportError};
pub use guard::UserGuards;
pub use health::{ProbeOutcome, ThreadHealthMonitor};
pub use links::{EditSyncIndex, MessageRef};
pub use metrics::{MetricsSnapshot, RelayMetrics};
pub use persist::{MemoryStateStore, PersistedState, Persister, StateStore};
pub use provision::{EnsuredThread, TopicProvisioner};
pub use relay::{Handled, Relay, RelaySettings};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use session::{SessionStore, UserSession};
pub use transport::{DeadThreadClassifier, Transport};
pub use types::{
    ChatId, ChatKind, Delivered, IncomingMessage, MessageId, Placement, Sender, TextFormat,
    ThreadId, UserId,
};
