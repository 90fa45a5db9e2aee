use serde::{Deserialize, Serialize};
use serde_json::Value;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// A platform user. Private chats share the numeric id of their user.
    UserId
);
id_type!(ChatId);
id_type!(
    /// A sub-conversation ("topic") inside the workspace chat.
    ThreadId
);
id_type!(MessageId);

impl UserId {
    /// The private chat with this user.
    pub fn chat(self) -> ChatId {
        ChatId(self.0)
    }
}

/// Where the platform says a sent or copied message actually landed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    /// Inside the given thread.
    Thread(ThreadId),
    /// In the chat's default destination (no thread attached).
    General,
    /// The call does not report a destination.
    Unknown,
}

/// A message the platform accepted, with its reported location.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Delivered {
    pub chat: ChatId,
    pub message: MessageId,
    pub placement: Placement,
}

/// How outbound text should be interpreted by the platform.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TextFormat {
    #[default]
    Plain,
    Html,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub id: UserId,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    /// Public handle, without the leading `@`.
    #[serde(default)]
    pub username: Option<String>,
}

impl Sender {
    pub fn full_name(&self) -> String {
        match &self.last_name {
            Some(last) if !last.is_empty() => format!("{} {}", self.first_name, last),
            _ => self.first_name.clone(),
        }
    }

    /// Name used in thread titles and logs: full name, then handle, then id.
    pub fn display_name(&self) -> String {
        let full = self.full_name();
        let name = if !full.trim().is_empty() {
            full
        } else if let Some(handle) = self.username.as_deref().filter(|h| !h.is_empty()) {
            handle.to_string()
        } else {
            self.id.to_string()
        };
        name.replace('\n', " ")
    }

    pub fn has_public_handle(&self) -> bool {
        self.username.as_deref().is_some_and(|h| !h.is_empty())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
}

/// An inbound message (new or edited) as seen by the core.
#[derive(Clone, Debug, PartialEq)]
pub struct IncomingMessage {
    pub chat: ChatId,
    pub chat_kind: ChatKind,
    pub message: MessageId,
    pub thread: Option<ThreadId>,
    pub sender: Option<Sender>,
    pub text: Option<String>,
    pub entities: Option<Value>,
    pub caption: Option<String>,
    pub caption_entities: Option<Value>,
    /// Joins, pins, topic-created notices and similar platform events.
    pub is_service: bool,
}

impl IncomingMessage {
    pub fn is_private(&self) -> bool {
        self.chat_kind == ChatKind::Private
    }

    /// Text if present, else the caption, else empty.
    pub fn text_or_caption(&self) -> &str {
        self.text
            .as_deref()
            .or(self.caption.as_deref())
            .unwrap_or_default()
    }

    pub fn is_command(&self) -> bool {
        self.text.as_deref().is_some_and(|t| t.starts_with('/'))
    }

    pub fn from_bot(&self) -> bool {
        self.sender.as_ref().is_some_and(|s| s.is_bot)
    }
}
