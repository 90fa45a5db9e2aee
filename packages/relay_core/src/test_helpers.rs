use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::captcha::CaptchaMode;
use crate::error::TransportError;
use crate::persist::{MemoryStateStore, PersistedState};
use crate::relay::{Relay, RelaySettings};
use crate::transport::Transport;
use crate::types::{ChatId, Delivered, MessageId, Placement, TextFormat, ThreadId};

/// Recorded outbound call.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    CreateThread {
        name: String,
        created: Option<ThreadId>,
    },
    Send {
        chat: ChatId,
        thread: Option<ThreadId>,
        text: String,
        format: TextFormat,
    },
    Copy {
        chat: ChatId,
        thread: Option<ThreadId>,
        from_chat: ChatId,
        message: MessageId,
        landed: Option<Placement>,
    },
    Delete {
        chat: ChatId,
        message: MessageId,
    },
    EditText {
        chat: ChatId,
        message: MessageId,
        text: String,
    },
    EditCaption {
        chat: ChatId,
        message: MessageId,
        caption: String,
    },
}

struct State {
    next_thread: i64,
    next_message: i64,
    failing_creates: u32,
    failing_copies: u32,
    placements: HashMap<ThreadId, Placement>,
    thread_errors: HashMap<ThreadId, TransportError>,
    chat_errors: HashMap<ChatId, TransportError>,
    calls: Vec<Call>,
}

/// Scripted in-memory transport. Threads are numbered from 1000 upwards,
/// messages from 1 upwards.
pub(crate) struct MockTransport {
    state: Mutex<State>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_thread: 1000,
                next_message: 1,
                failing_creates: 0,
                failing_copies: 0,
                placements: HashMap::new(),
                thread_errors: HashMap::new(),
                chat_errors: HashMap::new(),
                calls: Vec::new(),
            }),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    /// The next `n` thread creations fail with a network error.
    pub fn fail_next_creates(&self, n: u32) {
        self.with(|s| s.failing_creates = n);
    }

    /// The next `n` copies fail with a network error.
    pub fn fail_next_copies(&self, n: u32) {
        self.with(|s| s.failing_copies = n);
    }

    /// Messages addressed to `thread` report `placement` instead.
    pub fn redirect(&self, thread: ThreadId, placement: Placement) {
        self.with(|s| s.placements.insert(thread, placement));
    }

    /// Sends and copies into `thread` fail like a deleted topic.
    pub fn kill_thread(&self, thread: ThreadId) {
        self.fail_thread(
            thread,
            TransportError::api(400, "Bad Request: message thread not found"),
        );
    }

    pub fn fail_thread(&self, thread: ThreadId, err: TransportError) {
        self.with(|s| s.thread_errors.insert(thread, err));
    }

    /// Every call addressed to `chat` fails.
    pub fn fail_chat(&self, chat: ChatId, err: TransportError) {
        self.with(|s| s.chat_errors.insert(chat, err));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.with(|s| s.calls.clone())
    }

    pub fn create_attempts(&self) -> usize {
        self.count(|c| matches!(c, Call::CreateThread { .. }))
    }

    pub fn sends_to(&self, thread: ThreadId) -> usize {
        self.count(|c| matches!(c, Call::Send { thread: Some(t), .. } if *t == thread))
    }

    /// Texts sent to `chat` outside any thread.
    pub fn texts_to(&self, chat: ChatId) -> Vec<String> {
        self.with(|s| {
            s.calls
                .iter()
                .filter_map(|c| match c {
                    Call::Send {
                        chat: to,
                        thread: None,
                        text,
                        ..
                    } if *to == chat => Some(text.clone()),
                    _ => None,
                })
                .collect()
        })
    }

    /// Successful copies that landed in `thread`.
    pub fn copies_into(&self, thread: ThreadId) -> usize {
        self.count(|c| {
            matches!(c, Call::Copy { landed: Some(Placement::Thread(t)), .. } if *t == thread)
        })
    }

    pub fn copies_to_chat(&self, chat: ChatId) -> usize {
        self.count(|c| matches!(c, Call::Copy { chat: to, landed: Some(_), .. } if *to == chat))
    }

    pub fn cards_in(&self, thread: ThreadId) -> usize {
        self.count(|c| {
            matches!(c, Call::Send { thread: Some(t), format: TextFormat::Html, .. } if *t == thread)
        })
    }

    fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.with(|s| s.calls.iter().filter(|c| pred(*c)).count())
    }

    fn deliver(
        s: &mut State,
        chat: ChatId,
        thread: Option<ThreadId>,
    ) -> Result<Delivered, TransportError> {
        if let Some(err) = s.chat_errors.get(&chat) {
            return Err(err.clone());
        }
        let placement = match thread {
            Some(t) => {
                if let Some(err) = s.thread_errors.get(&t) {
                    return Err(err.clone());
                }
                s.placements.get(&t).copied().unwrap_or(Placement::Thread(t))
            }
            None => Placement::General,
        };
        let message = MessageId(s.next_message);
        s.next_message += 1;
        Ok(Delivered {
            chat,
            message,
            placement,
        })
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn create_thread(&self, _chat: ChatId, name: &str) -> Result<ThreadId, TransportError> {
        self.with(|s| {
            let result = if s.failing_creates > 0 {
                s.failing_creates -= 1;
                Err(TransportError::Network("create failed".into()))
            } else {
                let id = ThreadId(s.next_thread);
                s.next_thread += 1;
                Ok(id)
            };
            s.calls.push(Call::CreateThread {
                name: name.to_string(),
                created: result.as_ref().ok().copied(),
            });
            result
        })
    }

    async fn send_message(
        &self,
        chat: ChatId,
        thread: Option<ThreadId>,
        text: &str,
        format: TextFormat,
    ) -> Result<Delivered, TransportError> {
        self.with(|s| {
            s.calls.push(Call::Send {
                chat,
                thread,
                text: text.to_string(),
                format,
            });
            Self::deliver(s, chat, thread)
        })
    }

    async fn copy_message(
        &self,
        chat: ChatId,
        thread: Option<ThreadId>,
        from_chat: ChatId,
        message: MessageId,
    ) -> Result<Delivered, TransportError> {
        self.with(|s| {
            let result = if s.failing_copies > 0 {
                s.failing_copies -= 1;
                Err(TransportError::Network("copy failed".into()))
            } else {
                Self::deliver(s, chat, thread)
            };
            s.calls.push(Call::Copy {
                chat,
                thread,
                from_chat,
                message,
                landed: result.as_ref().ok().map(|d| d.placement),
            });
            result
        })
    }

    async fn delete_message(&self, chat: ChatId, message: MessageId) -> Result<(), TransportError> {
        self.with(|s| s.calls.push(Call::Delete { chat, message }));
        Ok(())
    }

    async fn edit_message_text(
        &self,
        chat: ChatId,
        message: MessageId,
        text: &str,
        _entities: Option<&Value>,
    ) -> Result<(), TransportError> {
        self.with(|s| {
            s.calls.push(Call::EditText {
                chat,
                message,
                text: text.to_string(),
            });
            match s.chat_errors.get(&chat) {
                Some(err) => Err(err.clone()),
                None => Ok(()),
            }
        })
    }

    async fn edit_message_caption(
        &self,
        chat: ChatId,
        message: MessageId,
        caption: &str,
        _entities: Option<&Value>,
    ) -> Result<(), TransportError> {
        self.with(|s| {
            s.calls.push(Call::EditCaption {
                chat,
                message,
                caption: caption.to_string(),
            });
            match s.chat_errors.get(&chat) {
                Some(err) => Err(err.clone()),
                None => Ok(()),
            }
        })
    }
}

pub(crate) const WORKSPACE: ChatId = ChatId(-1001);

/// A relay over a fresh [`MockTransport`] and [`MemoryStateStore`].
pub(crate) fn relay_with(
    captcha: CaptchaMode,
    state: PersistedState,
) -> (Relay, Arc<MockTransport>, Arc<MemoryStateStore>) {
    let mock = Arc::new(MockTransport::new());
    let store = Arc::new(MemoryStateStore::new());
    let relay = Relay::new(
        RelaySettings::new(WORKSPACE, captcha),
        mock.clone(),
        store.clone(),
        state,
    );
    (relay, mock, store)
}
