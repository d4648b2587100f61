//! Handles shared by every daemon component.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use agtchat_core::lifecycle::resolved_label;
use agtchat_core::{
    BatchDenyPolicy, ChatId, DEFAULT_RESOLUTION_WINDOW, MessageId, NotificationStatus, PaneOrigin, ThreadId,
};
use agtchat_source_claude_jsonl::DEFAULT_AUTO_APPROVED_TOOLS;
use agtchat_telegram::{ChatApi, Keyboard, OutgoingMessage};
use agtchat_tmux::TmuxCommandRunner;
use tracing::warn;

use crate::injector::Injector;
use crate::registry::Registry;
use crate::store::StateStore;

#[derive(Debug, Clone)]
pub struct DaemonSettings {
    pub chat_id: ChatId,
    /// Separates "resolved by itself" from "a human acted" for idle and
    /// permission notifications.
    pub resolution_window: Duration,
    pub deny_policy: BatchDenyPolicy,
    /// Command that starts the agent in a fresh session.
    pub agent_command: String,
    pub auto_register: bool,
    /// Tools that never prompt; ignored when looking for an open prompt.
    pub auto_approved: Vec<String>,
}

impl DaemonSettings {
    pub fn new(chat_id: ChatId) -> Self {
        Self {
            chat_id,
            resolution_window: DEFAULT_RESOLUTION_WINDOW,
            deny_policy: BatchDenyPolicy::default(),
            agent_command: "claude".into(),
            auto_register: true,
            auto_approved: DEFAULT_AUTO_APPROVED_TOOLS.iter().map(|t| (*t).to_owned()).collect(),
        }
    }
}

/// Where notifications for a pane go and how they are headed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub label: String,
    pub thread_id: Option<ThreadId>,
}

#[derive(Clone)]
pub struct DaemonContext {
    pub chat: Arc<dyn ChatApi>,
    pub tmux: Arc<dyn TmuxCommandRunner>,
    pub store: StateStore,
    pub registry: Registry,
    pub injector: Injector,
    pub settings: Arc<DaemonSettings>,
}

impl std::fmt::Debug for DaemonContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonContext")
            .field("store", &self.store)
            .field("registry", &self.registry)
            .field("settings", &self.settings)
            .finish()
    }
}

fn dir_name(cwd: &str) -> String {
    Path::new(cwd)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| cwd.to_owned())
}

impl DaemonContext {
    pub fn chat_id(&self) -> ChatId {
        self.settings.chat_id
    }

    /// Task panes post into their task's thread; anything else goes to the
    /// general thread, headed by its directory name.
    pub fn placement(&self, origin: &PaneOrigin) -> Placement {
        let task = match self.registry.for_pane(&origin.pane) {
            Ok(task) => task.or_else(|| {
                self.registry
                    .snapshot()
                    .ok()
                    .and_then(|f| f.for_dir(Path::new(&origin.cwd)).cloned())
            }),
            Err(e) => {
                warn!(error = %e, "registry unreadable, posting to general thread");
                None
            }
        };
        match task {
            Some(entry) => Placement {
                label: entry.task.name,
                thread_id: Some(entry.task.thread_id),
            },
            None => Placement {
                label: dir_name(&origin.cwd),
                thread_id: None,
            },
        }
    }

    /// Replace a notification's buttons with the label for its final status.
    pub async fn relabel(&self, message_id: MessageId, status: NotificationStatus, reason: Option<&str>) {
        let Some(label) = resolved_label(status, reason) else {
            return;
        };
        if let Err(e) = self
            .chat
            .edit_buttons(self.chat_id(), message_id, &Keyboard::resolved(label))
            .await
        {
            if !e.is_message_gone() {
                warn!(message_id, error = %e, "failed to relabel notification");
            }
        }
    }

    pub async fn delete_message(&self, message_id: MessageId) {
        if let Err(e) = self.chat.delete_message(self.chat_id(), message_id).await {
            if !e.is_message_gone() {
                warn!(message_id, error = %e, "failed to delete notification");
            }
        }
    }

    /// Post a plain reply to a user message.
    pub async fn reply(&self, thread_id: Option<ThreadId>, reply_to: MessageId, text: &str) {
        let msg = OutgoingMessage::new(self.chat_id(), text)
            .in_thread(thread_id)
            .replying_to(reply_to)
            .markdown();
        if let Err(e) = self.chat.send_message(&msg).await {
            warn!(reply_to, error = %e, "failed to send reply");
        }
    }

    pub async fn react(&self, message_id: MessageId, emoji: &str) {
        if let Err(e) = self.chat.react(self.chat_id(), message_id, emoji).await {
            warn!(message_id, error = %e, "failed to react");
        }
    }
}
