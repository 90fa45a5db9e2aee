//! The outbound side of the messaging platform, as the core needs it.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::TransportError;
use crate::types::{ChatId, Delivered, MessageId, TextFormat, ThreadId};

/// Outbound platform calls. Implementations perform the network I/O; the
/// core only interprets results.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Create a thread in `chat` and return its id.
    async fn create_thread(&self, chat: ChatId, name: &str) -> Result<ThreadId, TransportError>;

    async fn send_message(
        &self,
        chat: ChatId,
        thread: Option<ThreadId>,
        text: &str,
        format: TextFormat,
    ) -> Result<Delivered, TransportError>;

    /// Content-preserving forward of `message` from `from_chat` into `chat`.
    async fn copy_message(
        &self,
        chat: ChatId,
        thread: Option<ThreadId>,
        from_chat: ChatId,
        message: MessageId,
    ) -> Result<Delivered, TransportError>;

    async fn delete_message(&self, chat: ChatId, message: MessageId) -> Result<(), TransportError>;

    async fn edit_message_text(
        &self,
        chat: ChatId,
        message: MessageId,
        text: &str,
        entities: Option<&Value>,
    ) -> Result<(), TransportError>;

    async fn edit_message_caption(
        &self,
        chat: ChatId,
        message: MessageId,
        caption: &str,
        entities: Option<&Value>,
    ) -> Result<(), TransportError>;
}

/// Error phrasings the platform uses when a thread was deleted or closed.
const DEFAULT_DEAD_THREAD_SIGNATURES: &[&str] = &[
    "message thread not found",
    "thread not found",
    "topic not found",
    "topic_deleted",
    "topic_closed",
    "topic was deleted",
    "topic_id_invalid",
];

/// Recognises transport errors that mean "this thread is gone".
///
/// Matching is a case-insensitive substring search over the error
/// description. New signatures can be added as the platform's wording drifts.
#[derive(Clone, Debug)]
pub struct DeadThreadClassifier {
    signatures: Vec<String>,
}

impl Default for DeadThreadClassifier {
    fn default() -> Self {
        Self {
            signatures: DEFAULT_DEAD_THREAD_SIGNATURES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl DeadThreadClassifier {
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signatures.push(signature.into().to_lowercase());
        self
    }

    pub fn is_dead_thread(&self, err: &TransportError) -> bool {
        let TransportError::Api { description, .. } = err else {
            return false;
        };
        let description = description.to_lowercase();
        self.signatures.iter().any(|s| description.contains(s))
    }
}
