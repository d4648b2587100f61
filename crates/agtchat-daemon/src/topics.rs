//! Crash-safe creation of task threads, and recovery of interrupted ones.
//!
//! Creation checkpoints:
//! 1. pending marker written (no remote call yet)
//! 2. thread created remotely
//! 3. setup message posted in the thread
//! 4. marker replaced by the complete task record
//!
//! A crash leaves a pending marker. It is resolved by, in order: a learned
//! thread-name mapping from the update stream, the text of a message in an
//! unbound thread, or a manual `/link` prompt. A marker that matches no
//! thread once the update stream is caught up is retried from scratch.

use std::time::Duration;

use agtchat_core::{MessageId, PendingTopicMarker, TaskMarker, TaskRecord, ThreadId};
use agtchat_telegram::{IncomingMessage, OutgoingMessage};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::context::DaemonContext;
use crate::error::{StoreError, TaskError};
use crate::format;
use crate::marker::{read_marker, write_marker};

/// Pending markers younger than this may belong to a creation still in flight.
pub const DEFAULT_RETRY_GRACE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Linked to a thread that already existed.
    pub linked: Vec<String>,
    /// Created again because no thread was ever made.
    pub retried: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TopicProtocol {
    ctx: DaemonContext,
    retry_grace: Duration,
}

impl TopicProtocol {
    pub fn new(ctx: DaemonContext) -> Self {
        Self {
            ctx,
            retry_grace: DEFAULT_RETRY_GRACE,
        }
    }

    #[must_use]
    pub fn with_retry_grace(mut self, grace: Duration) -> Self {
        self.retry_grace = grace;
        self
    }

    /// Run all four checkpoints and post the ready notice.
    pub async fn create(&self, pending: PendingTopicMarker) -> Result<TaskRecord, TaskError> {
        self.begin(&pending)?;
        self.finish(pending).await
    }

    async fn finish(&self, pending: PendingTopicMarker) -> Result<TaskRecord, TaskError> {
        let thread_id = self.open_thread(&pending.name).await?;
        if let Err(e) = self.announce(thread_id, &pending.name).await {
            warn!(task = %pending.name, error = %e, "setup message not delivered");
        }
        let task = self.complete(pending, thread_id)?;
        self.ready_notice(&task).await;
        Ok(task)
    }

    /// Checkpoint 1.
    pub fn begin(&self, pending: &PendingTopicMarker) -> Result<(), TaskError> {
        write_marker(&pending.path, &TaskMarker::PendingTopic(pending.clone()))?;
        self.ctx.registry.add_pending(pending.clone())?;
        info!(task = %pending.name, path = %pending.path.display(), "pending topic marker written");
        Ok(())
    }

    /// Checkpoint 2.
    pub async fn open_thread(&self, name: &str) -> Result<ThreadId, TaskError> {
        let thread_id = self.ctx.chat.create_topic(self.ctx.chat_id(), name).await?;
        info!(task = name, thread_id, "thread created");
        Ok(thread_id)
    }

    /// Checkpoint 3: gives recovery a message to recognize the thread by.
    pub async fn announce(&self, thread_id: ThreadId, name: &str) -> Result<MessageId, TaskError> {
        let msg = OutgoingMessage::new(self.ctx.chat_id(), format::setup_message(name))
            .in_thread(Some(thread_id))
            .markdown();
        Ok(self.ctx.chat.send_message(&msg).await?)
    }

    /// Checkpoint 4.
    pub fn complete(&self, pending: PendingTopicMarker, thread_id: ThreadId) -> Result<TaskRecord, TaskError> {
        let task = pending.complete(thread_id);
        write_marker(&task.path, &TaskMarker::Complete(task.clone()))?;
        self.ctx.registry.upsert(task.clone())?;
        if let Err(e) = self.ctx.store.update(|s| {
            s.topic_names.remove(&thread_id);
        }) {
            warn!(thread_id, error = %e, "failed to forget bound thread name");
        }
        info!(task = %task.name, thread_id, "task bound to thread");
        Ok(task)
    }

    async fn ready_notice(&self, task: &TaskRecord) {
        let msg = OutgoingMessage::new(
            self.ctx.chat_id(),
            format::ready_message(&task.name, task.kind, &task.path),
        )
        .in_thread(Some(task.thread_id))
        .markdown();
        if let Err(e) = self.ctx.chat.send_message(&msg).await {
            warn!(task = %task.name, error = %e, "ready notice not delivered");
        }
    }

    /// Pending markers still on disk. Markers replaced meanwhile are dropped
    /// from the registry.
    fn live_pending(&self) -> Result<Vec<PendingTopicMarker>, StoreError> {
        let mut live = Vec::new();
        for pending in self.ctx.registry.pending()? {
            match read_marker(&pending.path) {
                Ok(Some(TaskMarker::PendingTopic(p))) => live.push(p),
                Ok(Some(TaskMarker::Complete(task))) => self.ctx.registry.upsert(task)?,
                Ok(None) => self.ctx.registry.remove_pending(&pending.name)?,
                Err(e) => warn!(task = %pending.name, error = %e, "pending marker unreadable"),
            }
        }
        Ok(live)
    }

    /// Threads with a learned name that no task is bound to.
    fn unbound_thread_named(&self, name: &str) -> Result<Option<ThreadId>, StoreError> {
        let names = self.ctx.store.read()?.topic_names;
        let registry = self.ctx.registry.snapshot()?;
        Ok(names
            .iter()
            .rev()
            .find(|(thread, n)| n.as_str() == name && registry.for_thread(**thread).is_none())
            .map(|(thread, _)| *thread))
    }

    /// Link pending markers to threads learned from the update stream.
    pub fn link_by_thread_names(&self) -> Result<Vec<String>, TaskError> {
        let mut linked = Vec::new();
        for pending in self.live_pending()? {
            if let Some(thread_id) = self.unbound_thread_named(&pending.name)? {
                let name = pending.name.clone();
                self.complete(pending, thread_id)?;
                info!(task = %name, thread_id, "recovered from thread-creation event");
                linked.push(name);
            }
        }
        Ok(linked)
    }

    /// Full pass, run once the update stream has been read to its end:
    /// markers with no matching thread never reached checkpoint 2.
    pub async fn recover(&self, now: DateTime<Utc>) -> Result<RecoveryReport, TaskError> {
        let mut report = RecoveryReport {
            linked: self.link_by_thread_names()?,
            retried: Vec::new(),
        };
        for pending in self.live_pending()? {
            let age = (now - pending.created_at).to_std().unwrap_or_default();
            if age < self.retry_grace {
                continue;
            }
            let name = pending.name.clone();
            info!(task = %name, "no thread found for pending marker, creating again");
            match self.finish(pending).await {
                Ok(_) => report.retried.push(name),
                Err(e) => warn!(task = %name, error = %e, "retry of thread creation failed"),
            }
        }
        Ok(report)
    }

    /// A message in a thread no task is bound to. Returns the linked task
    /// name, or prompts for a manual link when markers are still pending.
    pub async fn unbound_thread_message(&self, msg: &IncomingMessage) -> Result<Option<String>, TaskError> {
        let Some(thread_id) = msg.thread_id else {
            return Ok(None);
        };
        let pending = self.live_pending()?;
        if pending.is_empty() {
            return Ok(None);
        }
        let announced = msg.reply_to_text.as_deref().and_then(format::setup_task_name);
        let matched = pending.iter().position(|p| {
            announced == Some(p.name.as_str())
                || msg.text.contains(&p.name)
                || msg.reply_to_text.as_deref().is_some_and(|t| t.contains(&p.name))
        });
        match matched {
            Some(i) => {
                let marker = pending[i].clone();
                let name = marker.name.clone();
                self.complete(marker, thread_id)?;
                info!(task = %name, thread_id, "recovered from message in unbound thread");
                self.ctx
                    .reply(Some(thread_id), msg.message_id, &format!("🔗 Linked this topic to `{name}`"))
                    .await;
                Ok(Some(name))
            }
            None => {
                self.ctx
                    .reply(Some(thread_id), msg.message_id, &format::pending_link_prompt(&pending))
                    .await;
                Ok(None)
            }
        }
    }

    /// Manual link of a thread to a pending task.
    pub fn link(&self, name: &str, thread_id: ThreadId) -> Result<TaskRecord, TaskError> {
        if self.ctx.registry.for_thread(thread_id)?.is_some() {
            return Err(TaskError::AlreadyExists(format!("task for thread {thread_id}")));
        }
        let pending = self
            .live_pending()?
            .into_iter()
            .find(|p| p.name == name)
            .ok_or_else(|| TaskError::NotFound(name.to_owned()))?;
        self.complete(pending, thread_id)
    }
}
