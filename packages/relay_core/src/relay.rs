//! Message relay between private chats and workspace threads.
//!
//! Each handler is an isolation boundary: failures are logged, reported to
//! the sender where that helps, and never propagate to the caller.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::captcha::{Admission, CaptchaGate, CaptchaMode, DEFAULT_CHALLENGE_TTL};
use crate::card;
use crate::directory::ThreadDirectory;
use crate::error::{RelayError, TransportError};
use crate::guard::UserGuards;
use crate::health::{DEFAULT_HEALTH_TTL, ThreadHealthMonitor};
use crate::links::{DEFAULT_LINK_TTL, EditSyncIndex, MessageRef};
use crate::metrics::RelayMetrics;
use crate::persist::{PersistedState, Persister, StateStore, restore};
use crate::provision::TopicProvisioner;
use crate::retry::RetryPolicy;
use crate::session::SessionStore;
use crate::transport::{DeadThreadClassifier, Transport};
use crate::types::{ChatId, Delivered, IncomingMessage, Placement, Sender, TextFormat, ThreadId, UserId};

pub const BANNED_NOTICE: &str = "🚫 You have been blocked by the administrators.";
pub const HANDLE_REQUIRED_NOTICE: &str =
    "Please set a public username in your profile settings, then send your message again.";

/// Everything the relay needs that is not a collaborator.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub workspace: ChatId,
    pub captcha: CaptchaMode,
    pub health_ttl: Duration,
    pub provision_retry: RetryPolicy,
    pub settle_delay: Duration,
    pub link_ttl: Duration,
    pub challenge_ttl: Duration,
    pub dead_thread: DeadThreadClassifier,
}

impl RelaySettings {
    pub fn new(workspace: ChatId, captcha: CaptchaMode) -> Self {
        Self {
            workspace,
            captcha,
            health_ttl: DEFAULT_HEALTH_TTL,
            provision_retry: RetryPolicy::fixed(3, Duration::from_secs(1)),
            settle_delay: Duration::from_millis(500),
            link_ttl: DEFAULT_LINK_TTL,
            challenge_ttl: DEFAULT_CHALLENGE_TTL,
            dead_thread: DeadThreadClassifier::default(),
        }
    }
}

/// What happened to an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    Relayed,
    /// Not something the relay acts on.
    Ignored,
    /// The sender is banned.
    Blocked,
    /// Consumed by the captcha gate.
    Gated,
    /// The sender has no public handle.
    NeedsHandle,
    /// Delivery failed; the sender was told where possible.
    Failed,
}

pub struct Relay {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) workspace: ChatId,
    pub(crate) sessions: Arc<SessionStore>,
    pub(crate) directory: Arc<ThreadDirectory>,
    pub(crate) health: Arc<ThreadHealthMonitor>,
    pub(crate) provisioner: TopicProvisioner,
    pub(crate) captcha: CaptchaGate,
    pub(crate) links: EditSyncIndex,
    pub(crate) guards: UserGuards,
    pub(crate) persister: Arc<Persister>,
    pub(crate) metrics: Arc<RelayMetrics>,
}

impl Relay {
    /// Build the relay from previously persisted state.
    pub fn new(
        settings: RelaySettings,
        transport: Arc<dyn Transport>,
        store: Arc<dyn StateStore>,
        state: PersistedState,
    ) -> Self {
        let (sessions, directory) = restore(state);
        let sessions = Arc::new(sessions);
        let directory = Arc::new(directory);
        let metrics = Arc::new(RelayMetrics::new());
        let persister = Arc::new(Persister::new(sessions.clone(), store));
        let health = Arc::new(ThreadHealthMonitor::new(
            transport.clone(),
            settings.workspace,
            settings.dead_thread,
            settings.health_ttl,
            metrics.clone(),
        ));
        let provisioner = TopicProvisioner::new(
            transport.clone(),
            settings.workspace,
            sessions.clone(),
            directory.clone(),
            health.clone(),
            persister.clone(),
            metrics.clone(),
            settings.provision_retry,
            settings.settle_delay,
        );
        let captcha = CaptchaGate::new(
            settings.captcha,
            sessions.clone(),
            persister.clone(),
            metrics.clone(),
            settings.challenge_ttl,
        );

        Self {
            transport,
            workspace: settings.workspace,
            sessions,
            directory,
            health,
            provisioner,
            captcha,
            links: EditSyncIndex::new(settings.link_ttl),
            guards: UserGuards::new(),
            persister,
            metrics,
        }
    }

    pub fn workspace(&self) -> ChatId {
        self.workspace
    }

    pub fn metrics(&self) -> Arc<RelayMetrics> {
        self.metrics.clone()
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn directory(&self) -> &ThreadDirectory {
        &self.directory
    }

    /// A non-command message in a private chat.
    pub async fn handle_private_message(&self, msg: &IncomingMessage) -> Handled {
        if !msg.is_private() || msg.is_service || msg.is_command() {
            return Handled::Ignored;
        }
        let Some(sender) = msg.sender.as_ref() else {
            return Handled::Ignored;
        };
        let user = sender.id;

        let _guard = self.guards.acquire(user).await;
        let session = self.sessions.get_or_create(user).await;
        self.sessions.touch(user).await;

        if session.banned {
            debug!(%user, "dropping message from banned user");
            self.notify(user, BANNED_NOTICE).await;
            return Handled::Blocked;
        }

        match self.captcha.evaluate(user, msg.text_or_caption()).await {
            Admission::Admitted => {}
            Admission::Consumed => return Handled::Gated,
            Admission::JustVerified { reply } | Admission::Challenged { reply } => {
                self.notify(user, &reply).await;
                return Handled::Gated;
            }
        }

        if !sender.has_public_handle() {
            self.notify(user, HANDLE_REQUIRED_NOTICE).await;
            return Handled::NeedsHandle;
        }

        match self.forward_to_workspace(msg, sender).await {
            Ok(delivered) => {
                self.links
                    .record(
                        MessageRef::new(msg.chat, msg.message),
                        MessageRef::new(delivered.chat, delivered.message),
                    )
                    .await;
                self.metrics.relayed_to_workspace();
                Handled::Relayed
            }
            Err(e) => {
                warn!(%user, "failed to relay message to workspace: {}", e);
                self.metrics.delivery_failed();
                let reply = match &e {
                    RelayError::Provisioning { .. } => format!("System error: {e}"),
                    RelayError::Transport(_) => format!("Message could not be delivered: {e}"),
                };
                self.notify(user, &reply).await;
                Handled::Failed
            }
        }
    }

    /// Copy `msg` into the user's thread, recovering once from a redirect.
    async fn forward_to_workspace(
        &self,
        msg: &IncomingMessage,
        sender: &Sender,
    ) -> Result<Delivered, RelayError> {
        let user = sender.id;
        let display = sender.display_name();

        let ensured = self.provisioner.ensure_thread(user, &display).await?;
        if ensured.is_new {
            self.post_card(ensured.thread, sender, false).await;
        }

        let delivered = self.copy_into(user, ensured.thread, msg).await?;
        match delivered.placement {
            Placement::Thread(actual) if actual != ensured.thread => {
                warn!(
                    %user,
                    expected = %ensured.thread,
                    %actual,
                    "copy landed in another thread, replacing"
                );
                self.provisioner.teardown(user, ensured.thread).await;
                self.persister.persist().await;

                let replacement = self.provisioner.ensure_thread(user, &display).await?;
                if replacement.is_new {
                    self.post_card(replacement.thread, sender, true).await;
                }
                let redelivered = self.copy_into(user, replacement.thread, msg).await?;
                self.metrics.redirect_recovered();
                info!(%user, thread = %replacement.thread, "message re-delivered after redirect");
                Ok(redelivered)
            }
            Placement::General => {
                // Not proof the thread is gone; drop the cached verdict so the
                // next message probes it.
                warn!(%user, thread = %ensured.thread, "copy landed outside any thread");
                self.health.forget(ensured.thread).await;
                Ok(delivered)
            }
            Placement::Thread(_) | Placement::Unknown => Ok(delivered),
        }
    }

    /// Copy the user's message into `thread`. A failed copy drops the thread
    /// so the next message provisions a fresh one.
    ///
    /// The Bot API's copyMessage returns only the new message id, so the live
    /// transport reports `Placement::Unknown` and the redirect handling in
    /// `forward_to_workspace` never fires there. Stale threads are then caught
    /// by the health probe once the cached verdict expires.
    async fn copy_into(
        &self,
        user: UserId,
        thread: ThreadId,
        msg: &IncomingMessage,
    ) -> Result<Delivered, RelayError> {
        match self
            .transport
            .copy_message(self.workspace, Some(thread), msg.chat, msg.message)
            .await
        {
            Ok(delivered) => Ok(delivered),
            Err(e) => {
                self.health.mark_unhealthy(thread, e.to_string()).await;
                self.directory.remove_thread(thread).await;
                if self.sessions.clear_thread_if(user, thread).await {
                    self.persister.persist().await;
                }
                Err(e.into())
            }
        }
    }

    async fn post_card(&self, thread: ThreadId, sender: &Sender, restored: bool) {
        let text = card::user_card(sender, restored);
        if let Err(e) = self
            .transport
            .send_message(self.workspace, Some(thread), &text, TextFormat::Html)
            .await
        {
            warn!(user = %sender.id, %thread, "failed to post user card: {}", e);
        }
    }

    /// A staff message inside a workspace thread.
    pub async fn handle_workspace_message(&self, msg: &IncomingMessage) -> Handled {
        if msg.chat != self.workspace || msg.is_service || msg.is_command() || msg.from_bot() {
            return Handled::Ignored;
        }
        let Some(thread) = msg.thread else {
            return Handled::Ignored;
        };
        let Some(user) = self.directory.user_for(thread).await else {
            debug!(%thread, "message in unowned thread");
            return Handled::Ignored;
        };

        match self
            .transport
            .copy_message(user.chat(), None, msg.chat, msg.message)
            .await
        {
            Ok(delivered) => {
                self.links
                    .record(
                        MessageRef::new(msg.chat, msg.message),
                        MessageRef::new(delivered.chat, delivered.message),
                    )
                    .await;
                self.metrics.relayed_to_user();
                Handled::Relayed
            }
            Err(e) => {
                // Usually the user blocked the bot.
                debug!(%user, "failed to relay reply to user: {}", e);
                self.metrics.delivery_failed();
                Handled::Failed
            }
        }
    }

    /// An edited message on either side. Only origins are looked up, so an
    /// edit of a relayed copy never flows back.
    pub async fn handle_edit(&self, msg: &IncomingMessage) -> Handled {
        let Some(target) = self.links.lookup(MessageRef::new(msg.chat, msg.message)).await else {
            return Handled::Ignored;
        };

        let result = if let Some(text) = msg.text.as_deref() {
            self.transport
                .edit_message_text(target.chat, target.message, text, msg.entities.as_ref())
                .await
        } else if let Some(caption) = msg.caption.as_deref() {
            self.transport
                .edit_message_caption(
                    target.chat,
                    target.message,
                    caption,
                    msg.caption_entities.as_ref(),
                )
                .await
        } else {
            return Handled::Ignored;
        };

        match result {
            Ok(()) => {
                self.metrics.edit_synced();
                Handled::Relayed
            }
            Err(e) => {
                warn!(chat = %msg.chat, message = %msg.message, "edit sync failed: {}", e);
                Handled::Failed
            }
        }
    }

    /// Drop expired message links. Returns how many were removed.
    pub async fn sweep_links(&self) -> usize {
        let removed = self.links.sweep().await;
        self.metrics.links_swept(removed);
        if removed > 0 {
            info!(removed, "swept expired message links");
        }
        removed
    }

    /// Send a plain text to a user's private chat. Failures are logged.
    pub(crate) async fn notify(&self, user: UserId, text: &str) {
        if let Err(e) = self.send_plain(user.chat(), None, text).await {
            debug!(%user, "failed to notify user: {}", e);
        }
    }

    pub(crate) async fn send_plain(
        &self,
        chat: ChatId,
        thread: Option<ThreadId>,
        text: &str,
    ) -> Result<Delivered, TransportError> {
        self.transport
            .send_message(chat, thread, text, TextFormat::Plain)
            .await
    }
}
