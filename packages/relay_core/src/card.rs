//! HTML snippets posted by the relay. Only the tags the chat platform's HTML
//! mode accepts are used (`b`, `code`, `a`), with literal newlines.

use maud::{Markup, html};

use crate::types::{ChatId, Sender, ThreadId, UserId};

/// Posted as the first message of a freshly provisioned thread.
pub fn user_card(sender: &Sender, restored: bool) -> String {
    let heading = if restored {
        "🔄 Session restored"
    } else {
        "👤 New user"
    };
    let mention = format!("tg://user?id={}", sender.id);
    let handle = sender
        .username
        .as_deref()
        .filter(|h| !h.is_empty())
        .map(|h| format!("@{h}"))
        .unwrap_or_else(|| "not set".to_string());

    let markup: Markup = html! {
        b { (heading) } "\n"
        "ID: " code { (sender.id.0) } "\n"
        "Name: " a href=(mention) { (sender.display_name()) } "\n"
        "Username: " (handle) "\n"
        "#id" (sender.id.0)
    };
    markup.into_string()
}

/// Reply to the `id` command.
pub fn id_report(user: UserId, chat: Option<ChatId>, thread: Option<ThreadId>) -> String {
    let markup: Markup = html! {
        @if let Some(chat) = chat {
            "📢 Group ID: " code { (chat.0) } "\n"
        }
        "👤 Your ID: " code { (user.0) }
        @if let Some(thread) = thread {
            "\n" "💬 Thread ID: " code { (thread.0) }
        }
    };
    markup.into_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender(username: Option<&str>) -> Sender {
        Sender {
            id: UserId(42),
            is_bot: false,
            first_name: "Ada <3".to_string(),
            last_name: None,
            username: username.map(str::to_string),
        }
    }

    #[test]
    fn card_escapes_names_and_links_user() {
        let card = user_card(&sender(Some("ada")), false);
        assert!(card.starts_with("<b>👤 New user</b>"));
        assert!(card.contains("<code>42</code>"));
        assert!(card.contains(r#"<a href="tg://user?id=42">Ada &lt;3</a>"#));
        assert!(card.contains("Username: @ada"));
        assert!(card.ends_with("#id42"));
    }

    #[test]
    fn restored_card_without_handle() {
        let card = user_card(&sender(None), true);
        assert!(card.contains("Session restored"));
        assert!(card.contains("Username: not set"));
    }

    #[test]
    fn id_report_in_private_and_group() {
        assert_eq!(id_report(UserId(7), None, None), "👤 Your ID: <code>7</code>");
        let group = id_report(UserId(7), Some(ChatId(-100)), Some(ThreadId(3)));
        assert_eq!(
            group,
            "📢 Group ID: <code>-100</code>\n👤 Your ID: <code>7</code>\n💬 Thread ID: <code>3</code>"
        );
    }
}
