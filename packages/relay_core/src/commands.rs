//! Bot commands: `start`, `id`, `ban`, `unban`.

use tracing::{debug, info};

use crate::card;
use crate::relay::{Handled, Relay};
use crate::types::{IncomingMessage, TextFormat, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Id,
    /// Explicit target, if one was given.
    Ban(Option<UserId>),
    Unban(Option<UserId>),
}

impl Command {
    /// Parse `/name[@bot] [args]`. Unknown commands yield `None`.
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.split_whitespace();
        let head = parts.next()?.strip_prefix('/')?;
        let name = head.split('@').next().unwrap_or(head);
        let target = parts
            .next()
            .filter(|a| !a.is_empty() && a.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|a| a.parse().ok())
            .map(UserId);

        match name.to_ascii_lowercase().as_str() {
            "start" => Some(Self::Start),
            "id" => Some(Self::Id),
            "ban" => Some(Self::Ban(target)),
            "unban" => Some(Self::Unban(target)),
            _ => None,
        }
    }
}

const TARGET_UNKNOWN: &str =
    "❌ Could not identify the target. Use this inside a user's thread or pass a user ID.";

impl Relay {
    /// Run a command. Commands used in the wrong place are ignored.
    pub async fn handle_command(&self, msg: &IncomingMessage, command: Command) -> Handled {
        let Some(sender) = msg.sender.as_ref() else {
            return Handled::Ignored;
        };
        match command {
            Command::Start => self.start(msg, sender.id).await,
            Command::Id => {
                let (chat, thread) = if msg.is_private() {
                    (None, None)
                } else {
                    (Some(msg.chat), msg.thread)
                };
                self.reply(msg, &card::id_report(sender.id, chat, thread), TextFormat::Html)
                    .await;
                Handled::Relayed
            }
            Command::Ban(explicit) => self.set_ban(msg, explicit, true).await,
            Command::Unban(explicit) => self.set_ban(msg, explicit, false).await,
        }
    }

    async fn start(&self, msg: &IncomingMessage, user: UserId) -> Handled {
        if !msg.is_private() {
            return Handled::Ignored;
        }
        let _guard = self.guards.acquire(user).await;
        if self.sessions.get_or_create(user).await.banned {
            return Handled::Blocked;
        }
        let reply = self.captcha.start(user).await;
        self.reply(msg, &reply, TextFormat::Plain).await;
        Handled::Gated
    }

    async fn set_ban(&self, msg: &IncomingMessage, explicit: Option<UserId>, banned: bool) -> Handled {
        if msg.chat != self.workspace {
            return Handled::Ignored;
        }

        let target = match (explicit, msg.thread) {
            (Some(user), _) => Some(user),
            (None, Some(thread)) => self.directory.user_for(thread).await,
            (None, None) => None,
        };
        let Some(user) = target else {
            self.reply(msg, TARGET_UNKNOWN, TextFormat::Plain).await;
            return Handled::Failed;
        };

        let changed = self.sessions.set_banned(user, banned).await;
        let reply = match (banned, changed) {
            (true, false) => format!("User {user} is already banned."),
            (true, true) => format!("🚫 User {user} has been banned."),
            (false, false) => format!("User {user} is not banned."),
            (false, true) => format!("✅ User {user} has been unbanned."),
        };
        if changed {
            self.persister.persist().await;
            info!(%user, banned, "ban state changed");
        }
        self.reply(msg, &reply, TextFormat::Plain).await;
        Handled::Relayed
    }

    async fn reply(&self, msg: &IncomingMessage, text: &str, format: TextFormat) {
        if let Err(e) = self
            .transport
            .send_message(msg.chat, msg.thread, text, format)
            .await
        {
            debug!(chat = %msg.chat, "failed to send command reply: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::captcha::CaptchaMode;
    use crate::persist::PersistedState;
    use crate::test_helpers::{Call, WORKSPACE, relay_with};
    use crate::types::{ChatId, ChatKind, MessageId, Sender, ThreadId};

    fn command(chat: ChatId, kind: ChatKind, thread: Option<i64>, text: &str) -> IncomingMessage {
        IncomingMessage {
            chat,
            chat_kind: kind,
            message: MessageId(1),
            thread: thread.map(ThreadId),
            sender: Some(Sender {
                id: UserId(if kind == ChatKind::Private { chat.0 } else { 900 }),
                first_name: "Someone".to_string(),
                username: Some("someone".to_string()),
                ..Default::default()
            }),
            text: Some(text.to_string()),
            entities: None,
            caption: None,
            caption_entities: None,
            is_service: false,
        }
    }

    fn in_thread(thread: i64, text: &str) -> IncomingMessage {
        command(WORKSPACE, ChatKind::Supergroup, Some(thread), text)
    }

    fn last_reply(calls: &[Call]) -> String {
        calls
            .iter()
            .rev()
            .find_map(|c| match c {
                Call::Send { text, .. } => Some(text.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }

    #[test]
    fn parses_commands() {
        assert_eq!(Command::parse("/start"), Some(Command::Start));
        assert_eq!(Command::parse("/id@relay_bot"), Some(Command::Id));
        assert_eq!(Command::parse("/ban 123"), Some(Command::Ban(Some(UserId(123)))));
        assert_eq!(Command::parse("/ban @someone"), Some(Command::Ban(None)));
        assert_eq!(Command::parse("/unban"), Some(Command::Unban(None)));
        assert_eq!(Command::parse("/help"), None);
        assert_eq!(Command::parse("hello"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn ban_infers_target_from_thread() {
        let mut state = PersistedState::default();
        state.user_to_thread.insert(UserId(5), ThreadId(50));
        let (relay, mock, store) = relay_with(CaptchaMode::None, state);

        let msg = in_thread(50, "/ban");
        assert_eq!(relay.handle_command(&msg, Command::Ban(None)).await, Handled::Relayed);
        assert!(relay.sessions().get(UserId(5)).await.unwrap().banned);
        assert_eq!(store.last().unwrap().banned_users, vec![UserId(5)]);
        assert!(last_reply(&mock.calls()).contains("has been banned"));

        relay.handle_command(&msg, Command::Ban(None)).await;
        assert!(last_reply(&mock.calls()).contains("already banned"));
        assert_eq!(store.saves(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_id_wins_over_thread() {
        let mut state = PersistedState::default();
        state.user_to_thread.insert(UserId(5), ThreadId(50));
        let (relay, _, _) = relay_with(CaptchaMode::None, state);

        relay
            .handle_command(&in_thread(50, "/ban 6"), Command::Ban(Some(UserId(6))))
            .await;
        assert!(relay.sessions().get(UserId(6)).await.unwrap().banned);
        assert!(!relay.sessions().get(UserId(5)).await.unwrap().banned);
    }

    #[tokio::test(start_paused = true)]
    async fn ban_without_target_or_outside_workspace() {
        let (relay, mock, _) = relay_with(CaptchaMode::None, PersistedState::default());

        let general = command(WORKSPACE, ChatKind::Supergroup, None, "/ban");
        assert_eq!(relay.handle_command(&general, Command::Ban(None)).await, Handled::Failed);
        assert_eq!(last_reply(&mock.calls()), TARGET_UNKNOWN);

        let private = command(ChatId(5), ChatKind::Private, None, "/ban 5");
        assert_eq!(
            relay.handle_command(&private, Command::Ban(Some(UserId(5)))).await,
            Handled::Ignored
        );
        assert!(relay.sessions().get(UserId(5)).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn unban_keeps_healthy_thread() {
        let mut state = PersistedState::default();
        state.user_to_thread.insert(UserId(5), ThreadId(50));
        state.user_verified.insert(UserId(5), true);
        state.banned_users.push(UserId(5));
        let (relay, mock, _) = relay_with(CaptchaMode::None, state);

        let dm = command(ChatId(5), ChatKind::Private, None, "hello");
        assert_eq!(relay.handle_private_message(&dm).await, Handled::Blocked);

        relay
            .handle_command(&in_thread(50, "/unban"), Command::Unban(None))
            .await;
        assert!(last_reply(&mock.calls()).contains("has been unbanned"));

        assert_eq!(relay.handle_private_message(&dm).await, Handled::Relayed);
        assert_eq!(mock.create_attempts(), 0);
        assert_eq!(mock.copies_into(ThreadId(50)), 1);

        relay
            .handle_command(&in_thread(50, "/unban"), Command::Unban(None))
            .await;
        assert!(last_reply(&mock.calls()).contains("is not banned"));
    }

    #[tokio::test(start_paused = true)]
    async fn start_reports_status() {
        let (relay, mock, _) = relay_with(CaptchaMode::MathChallenge, PersistedState::default());
        let start = command(ChatId(5), ChatKind::Private, None, "/start");

        assert_eq!(relay.handle_command(&start, Command::Start).await, Handled::Gated);
        assert!(last_reply(&mock.calls()).contains("= ?"));
        let answer = relay.captcha.pending_answer(UserId(5)).await.unwrap();

        let reply = command(ChatId(5), ChatKind::Private, None, &answer.to_string());
        assert_eq!(relay.handle_private_message(&reply).await, Handled::Gated);
        assert!(relay.sessions().get(UserId(5)).await.unwrap().verified);

        relay.handle_command(&start, Command::Start).await;
        assert!(last_reply(&mock.calls()).contains("already verified"));

        // Not in groups.
        let group_start = in_thread(50, "/start");
        assert_eq!(relay.handle_command(&group_start, Command::Start).await, Handled::Ignored);
    }

    #[tokio::test(start_paused = true)]
    async fn id_reports_context() {
        let (relay, mock, _) = relay_with(CaptchaMode::None, PersistedState::default());
        relay
            .handle_command(&in_thread(50, "/id"), Command::Id)
            .await;
        let calls = mock.calls();
        let text = last_reply(&calls);
        assert!(text.contains("<code>-1001</code>"));
        assert!(text.contains("<code>900</code>"));
        assert!(text.contains("<code>50</code>"));
        assert!(calls.iter().any(|c| matches!(
            c,
            Call::Send { format: TextFormat::Html, thread: Some(ThreadId(50)), .. }
        )));
    }
}
