//! Long-polling ingestion: pull updates, hand each one to its own task.

use std::sync::Arc;
use std::time::Duration;

use relay_core::{Command, Handled, Relay, RetryPolicy};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::telegram::{BotApi, Update};

pub struct Dispatcher {
    api: BotApi,
    relay: Arc<Relay>,
    poll_timeout: Duration,
    backoff: RetryPolicy,
}

impl Dispatcher {
    pub fn new(api: BotApi, relay: Arc<Relay>, poll_timeout: Duration) -> Self {
        Self {
            api,
            relay,
            poll_timeout,
            backoff: RetryPolicy::exponential(u32::MAX, Duration::from_secs(1), Duration::from_secs(60)),
        }
    }

    /// Poll until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        let mut offset = 0i64;
        let mut failures = 0u32;
        info!("Polling for updates");

        loop {
            let polled = tokio::select! {
                _ = cancel.cancelled() => break,
                polled = self.api.get_updates(offset, self.poll_timeout) => polled,
            };

            match polled {
                Ok(updates) => {
                    failures = 0;
                    if !updates.is_empty() {
                        debug!(count = updates.len(), "received updates");
                    }
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        let relay = self.relay.clone();
                        tokio::spawn(async move {
                            let id = update.update_id;
                            let handled = route(&relay, update).await;
                            debug!(update = id, ?handled, "update handled");
                        });
                    }
                }
                Err(e) => {
                    let delay = self.backoff.delay_after(failures);
                    failures = failures.saturating_add(1);
                    warn!(failures, ?delay, "getUpdates failed: {}", e);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
        info!("Update polling stopped");
    }
}

/// Send one update to the matching relay handler.
pub async fn route(relay: &Relay, update: Update) -> Handled {
    if let Some(edited) = update.edited_message {
        return relay.handle_edit(&edited.into_incoming()).await;
    }
    let Some(message) = update.message else {
        return Handled::Ignored;
    };
    let msg = message.into_incoming();

    if let Some(command) = msg.text.as_deref().and_then(Command::parse) {
        return relay.handle_command(&msg, command).await;
    }
    if msg.is_private() {
        relay.handle_private_message(&msg).await
    } else if msg.chat == relay.workspace() {
        relay.handle_workspace_message(&msg).await
    } else {
        Handled::Ignored
    }
}
