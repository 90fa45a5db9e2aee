//! Minimal Bot API client over HTTPS.
//!
//! Every method is a JSON POST to `<api>/bot<token>/<method>` answered by an
//! envelope `{ok, result, error_code, description}`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use relay_core::{
    ChatId, ChatKind, Delivered, IncomingMessage, MessageId, Placement, Sender, TextFormat,
    ThreadId, Transport, TransportError, UserId,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

/// Headroom on top of the long-poll timeout before the HTTP request gives up.
const POLL_SLACK: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Message fields that mark a platform event rather than user content.
const SERVICE_FIELDS: &[&str] = &[
    "new_chat_members",
    "left_chat_member",
    "new_chat_title",
    "new_chat_photo",
    "delete_chat_photo",
    "group_chat_created",
    "supergroup_chat_created",
    "migrate_to_chat_id",
    "migrate_from_chat_id",
    "pinned_message",
    "forum_topic_created",
    "forum_topic_edited",
    "forum_topic_closed",
    "forum_topic_reopened",
    "general_forum_topic_hidden",
    "general_forum_topic_unhidden",
    "message_auto_delete_timer_changed",
    "video_chat_started",
    "video_chat_ended",
    "video_chat_scheduled",
    "video_chat_participants_invited",
];

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    result: Option<T>,
    error_code: Option<i64>,
    description: Option<String>,
}

impl<T> Envelope<T> {
    fn into_result(self) -> Result<T, TransportError> {
        match (self.ok, self.result) {
            (true, Some(result)) => Ok(result),
            (true, None) => Err(TransportError::Decode("ok response without result".into())),
            (false, _) => Err(TransportError::Api {
                code: self.error_code,
                description: self
                    .description
                    .unwrap_or_else(|| "unknown error".to_string()),
            }),
        }
    }
}

// ── Wire types ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub edited_message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    #[serde(default)]
    pub message_thread_id: Option<i64>,
    #[serde(default)]
    pub is_topic_message: Option<bool>,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub entities: Option<Value>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub caption_entities: Option<Value>,
    #[serde(flatten)]
    pub rest: HashMap<String, Value>,
}

impl Message {
    /// Where the platform put this message.
    pub fn placement(&self) -> Placement {
        match (self.is_topic_message.unwrap_or(false), self.message_thread_id) {
            (true, Some(thread)) => Placement::Thread(ThreadId(thread)),
            _ => Placement::General,
        }
    }

    pub fn is_service(&self) -> bool {
        SERVICE_FIELDS.iter().any(|f| self.rest.contains_key(*f))
    }

    pub fn into_incoming(self) -> IncomingMessage {
        let chat_kind = match self.chat.kind.as_str() {
            "private" => ChatKind::Private,
            "group" => ChatKind::Group,
            "channel" => ChatKind::Channel,
            _ => ChatKind::Supergroup,
        };
        let is_service = self.is_service();
        // Only forum topic messages carry a meaningful thread id.
        let thread = match self.placement() {
            Placement::Thread(thread) => Some(thread),
            _ => None,
        };
        IncomingMessage {
            chat: ChatId(self.chat.id),
            chat_kind,
            message: MessageId(self.message_id),
            thread,
            sender: self.from.map(|u| Sender {
                id: UserId(u.id),
                is_bot: u.is_bot,
                first_name: u.first_name,
                last_name: u.last_name,
                username: u.username,
            }),
            text: self.text,
            entities: self.entities,
            caption: self.caption,
            caption_entities: self.caption_entities,
            is_service,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ForumTopic {
    message_thread_id: i64,
}

#[derive(Debug, Deserialize)]
struct CopiedMessage {
    message_id: i64,
}

// ── Client ──────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct BotApi {
    client: reqwest::Client,
    base: String,
}

impl BotApi {
    pub fn new(api_url: &str, token: &str) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base: format!("{}/bot{}", api_url.trim_end_matches('/'), token),
        })
    }

    async fn call<P, T>(&self, method: &str, params: &P, timeout: Duration) -> Result<T, TransportError>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        debug!(method, "bot api call");
        // Error responses carry a JSON envelope too, so the status is not checked.
        let response = self
            .client
            .post(format!("{}/{}", self.base, method))
            .json(params)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| TransportError::Network(without_url(e)))?;
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Network(without_url(e)))?;
        let envelope: Envelope<T> =
            serde_json::from_slice(&body).map_err(|e| TransportError::Decode(e.to_string()))?;
        envelope.into_result()
    }

    /// Identity check used at startup.
    pub async fn get_me(&self) -> Result<User, TransportError> {
        self.call("getMe", &json!({}), REQUEST_TIMEOUT).await
    }

    pub async fn get_updates(&self, offset: i64, timeout: Duration) -> Result<Vec<Update>, TransportError> {
        let params = json!({
            "offset": offset,
            "timeout": timeout.as_secs(),
            "allowed_updates": ["message", "edited_message"],
        });
        self.call("getUpdates", &params, timeout + POLL_SLACK).await
    }
}

/// reqwest errors include the request URL, which contains the token.
fn without_url(err: reqwest::Error) -> String {
    err.without_url().to_string()
}

fn thread_param(params: &mut Value, thread: Option<ThreadId>) {
    if let Some(thread) = thread {
        params["message_thread_id"] = json!(thread.0);
    }
}

#[async_trait]
impl Transport for BotApi {
    async fn create_thread(&self, chat: ChatId, name: &str) -> Result<ThreadId, TransportError> {
        let params = json!({ "chat_id": chat.0, "name": name });
        let topic: ForumTopic = self.call("createForumTopic", &params, REQUEST_TIMEOUT).await?;
        Ok(ThreadId(topic.message_thread_id))
    }

    async fn send_message(
        &self,
        chat: ChatId,
        thread: Option<ThreadId>,
        text: &str,
        format: TextFormat,
    ) -> Result<Delivered, TransportError> {
        let mut params = json!({ "chat_id": chat.0, "text": text });
        thread_param(&mut params, thread);
        if format == TextFormat::Html {
            params["parse_mode"] = json!("HTML");
        }
        let sent: Message = self.call("sendMessage", &params, REQUEST_TIMEOUT).await?;
        Ok(Delivered {
            chat: ChatId(sent.chat.id),
            message: MessageId(sent.message_id),
            placement: sent.placement(),
        })
    }

    async fn copy_message(
        &self,
        chat: ChatId,
        thread: Option<ThreadId>,
        from_chat: ChatId,
        message: MessageId,
    ) -> Result<Delivered, TransportError> {
        let mut params = json!({
            "chat_id": chat.0,
            "from_chat_id": from_chat.0,
            "message_id": message.0,
        });
        thread_param(&mut params, thread);
        let copied: CopiedMessage = self.call("copyMessage", &params, REQUEST_TIMEOUT).await?;
        // copyMessage only returns the new id, so where it landed is unknown.
        Ok(Delivered {
            chat,
            message: MessageId(copied.message_id),
            placement: Placement::Unknown,
        })
    }

    async fn delete_message(&self, chat: ChatId, message: MessageId) -> Result<(), TransportError> {
        let params = json!({ "chat_id": chat.0, "message_id": message.0 });
        let _: bool = self.call("deleteMessage", &params, REQUEST_TIMEOUT).await?;
        Ok(())
    }

    async fn edit_message_text(
        &self,
        chat: ChatId,
        message: MessageId,
        text: &str,
        entities: Option<&Value>,
    ) -> Result<(), TransportError> {
        let mut params = json!({ "chat_id": chat.0, "message_id": message.0, "text": text });
        if let Some(entities) = entities {
            params["entities"] = entities.clone();
        }
        let _: Value = self.call("editMessageText", &params, REQUEST_TIMEOUT).await?;
        Ok(())
    }

    async fn edit_message_caption(
        &self,
        chat: ChatId,
        message: MessageId,
        caption: &str,
        entities: Option<&Value>,
    ) -> Result<(), TransportError> {
        let mut params = json!({ "chat_id": chat.0, "message_id": message.0, "caption": caption });
        if let Some(entities) = entities {
            params["caption_entities"] = entities.clone();
        }
        let _: Value = self.call("editMessageCaption", &params, REQUEST_TIMEOUT).await?;
        Ok(())
    }
}
