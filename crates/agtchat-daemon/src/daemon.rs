//! The single event handler. Every state change in the daemon happens here,
//! one event at a time; the loops feeding it only observe.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use agtchat_core::{PaneOrigin, TaskMarker, TranscriptEvent};
use agtchat_telegram::client::GENERAL_TOPIC;
use agtchat_telegram::{ChatUpdate, IncomingMessage, Update};
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::commands::{Command, CommandHandler};
use crate::context::DaemonContext;
use crate::error::StoreError;
use crate::marker::read_marker;
use crate::notifier::Notifier;
use crate::registry::RebuildReport;
use crate::responder::Responder;
use crate::tasks::TaskManager;
use crate::topics::TopicProtocol;

const GENERAL_HINT: &str = "Reply to a notification to answer it, or send /help.";

#[derive(Debug)]
pub enum DaemonEvent {
    Transcript {
        events: Vec<TranscriptEvent>,
        observed_at: DateTime<Utc>,
    },
    /// Agent panes seen for the first time, or seen in a new directory.
    PanesDiscovered(Vec<PaneOrigin>),
    PanesGone(Vec<String>),
    /// One long-poll result. `done` fires once every update is handled, so
    /// the poller never requests past an unprocessed update.
    ChatBatch {
        updates: Vec<Update>,
        caught_up: bool,
        done: oneshot::Sender<()>,
    },
    Sweep {
        live_panes: HashSet<String>,
    },
}

#[derive(Debug)]
pub struct Daemon {
    ctx: DaemonContext,
    notifier: Notifier,
    responder: Responder,
    topics: TopicProtocol,
    tasks: TaskManager,
    commands: CommandHandler,
    caught_up: bool,
}

impl Daemon {
    pub fn new(ctx: DaemonContext) -> Self {
        Self::with_topics(ctx.clone(), TopicProtocol::new(ctx))
    }

    pub fn with_retry_grace(ctx: DaemonContext, grace: Duration) -> Self {
        Self::with_topics(ctx.clone(), TopicProtocol::new(ctx).with_retry_grace(grace))
    }

    fn with_topics(ctx: DaemonContext, topics: TopicProtocol) -> Self {
        let tasks = TaskManager::new(ctx.clone(), topics.clone());
        Self {
            notifier: Notifier::new(ctx.clone()),
            responder: Responder::new(ctx.clone(), tasks.clone()),
            commands: CommandHandler::new(ctx.clone(), tasks.clone(), topics.clone()),
            topics,
            tasks,
            ctx,
            caught_up: false,
        }
    }

    pub fn context(&self) -> &DaemonContext {
        &self.ctx
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Rebuild the registry from markers before anything else runs.
    pub fn startup(&mut self) -> Result<RebuildReport, StoreError> {
        self.ctx.registry.rebuild()
    }

    pub async fn run(mut self, mut events: mpsc::Receiver<DaemonEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event).await;
        }
        info!("event channel closed, daemon stopping");
    }

    pub async fn handle(&mut self, event: DaemonEvent) {
        match event {
            DaemonEvent::Transcript { events, observed_at } => {
                for event in events {
                    self.notifier.handle(event, observed_at).await;
                }
                self.notifier.retry_unnotified_heads(observed_at).await;
            }
            DaemonEvent::PanesDiscovered(origins) => {
                for origin in origins {
                    self.on_pane_discovered(&origin).await;
                }
            }
            DaemonEvent::PanesGone(panes) => {
                self.notifier.panes_gone(&panes, Utc::now()).await;
                for pane in &panes {
                    self.ctx.injector.forget_pane(pane);
                }
            }
            DaemonEvent::ChatBatch {
                updates,
                caught_up,
                done,
            } => {
                let now = Utc::now();
                for update in updates {
                    self.handle_update(update, now).await;
                }
                if caught_up {
                    if !self.caught_up {
                        info!("update stream caught up");
                    }
                    self.caught_up = true;
                    self.recover(now).await;
                }
                let _ = done.send(());
            }
            DaemonEvent::Sweep { live_panes } => {
                let removed = self.notifier.sweep(&live_panes, Utc::now()).await;
                self.ctx.injector.retain_panes(&live_panes);
                debug!(removed, live = live_panes.len(), "sweep finished");
            }
        }
    }

    async fn recover(&self, now: DateTime<Utc>) {
        match self.topics.recover(now).await {
            Ok(report) => {
                if !report.linked.is_empty() || !report.retried.is_empty() {
                    info!(linked = ?report.linked, retried = ?report.retried, "pending tasks recovered");
                }
            }
            Err(e) => warn!(error = %e, "task recovery failed"),
        }
    }

    /// Handle one update at most once. The offset only moves past an update
    /// after it was handled, so a crash replays it instead of losing it.
    pub async fn handle_update(&mut self, update: Update, now: DateTime<Utc>) {
        let offset = match self.ctx.store.read() {
            Ok(state) => state.update_offset,
            Err(e) => {
                warn!(error = %e, "state unreadable, update offset unknown");
                0
            }
        };
        if update.update_id < offset {
            debug!(update_id = update.update_id, offset, "update already handled");
            return;
        }
        self.dispatch(update.kind, now).await;
        if let Err(e) = self
            .ctx
            .store
            .update(|s| s.update_offset = s.update_offset.max(update.update_id + 1))
        {
            warn!(update_id = update.update_id, error = %e, "failed to persist update offset");
        }
    }

    async fn dispatch(&mut self, kind: ChatUpdate, now: DateTime<Utc>) {
        match kind {
            ChatUpdate::ButtonClick(click) => {
                self.responder.handle_click(&mut self.notifier, &click, now).await;
            }
            ChatUpdate::Message(msg) => {
                if msg.chat_id != self.ctx.chat_id() {
                    debug!(chat_id = msg.chat_id, "message from another chat ignored");
                    return;
                }
                self.on_message(&msg, now).await;
            }
            ChatUpdate::TopicCreated {
                chat_id,
                thread_id,
                name,
            } => {
                if chat_id != self.ctx.chat_id() {
                    return;
                }
                debug!(thread_id, name = %name, "thread created");
                if self.ctx.registry.for_thread(thread_id).ok().flatten().is_some() {
                    return;
                }
                if let Err(e) = self.ctx.store.update(|s| {
                    s.topic_names.insert(thread_id, name);
                }) {
                    warn!(thread_id, error = %e, "failed to record thread name");
                }
                if let Err(e) = self.topics.link_by_thread_names() {
                    warn!(error = %e, "linking by thread name failed");
                }
            }
            ChatUpdate::Unsupported => debug!("unsupported update skipped"),
        }
    }

    async fn on_message(&mut self, msg: &IncomingMessage, now: DateTime<Utc>) {
        if let Some(command) = Command::parse(&msg.text) {
            self.commands.handle(command, msg).await;
            return;
        }

        if let Some(reply_to) = msg.reply_to {
            let record = self
                .ctx
                .store
                .read()
                .ok()
                .and_then(|s| s.notifications.get(&reply_to).cloned());
            if let Some(record) = record {
                self.responder
                    .handle_reply(&mut self.notifier, msg, &record, now)
                    .await;
                return;
            }
        }

        match msg.thread_id {
            Some(thread_id) if thread_id != GENERAL_TOPIC => {
                match self.ctx.registry.for_thread(thread_id) {
                    Ok(Some(entry)) => {
                        self.responder
                            .handle_task_message(&mut self.notifier, msg, &entry, now)
                            .await;
                    }
                    Ok(None) => match self.topics.unbound_thread_message(msg).await {
                        Ok(Some(name)) => info!(task = %name, thread_id, "thread linked from message"),
                        Ok(None) => debug!(thread_id, "message in unbound thread"),
                        Err(e) => warn!(thread_id, error = %e, "linking from message failed"),
                    },
                    Err(e) => warn!(thread_id, error = %e, "registry unreadable"),
                }
            }
            _ => self.ctx.reply(msg.thread_id, msg.message_id, GENERAL_HINT).await,
        }
    }

    /// Bind a newly seen agent pane to its task, registering a task for it
    /// when its directory has none.
    async fn on_pane_discovered(&mut self, origin: &PaneOrigin) {
        let dir = Path::new(&origin.cwd);
        let known = match self.ctx.registry.snapshot() {
            Ok(file) => file
                .for_pane(&origin.pane, self.ctx.registry.session_prefix())
                .or_else(|| file.for_dir(dir))
                .cloned(),
            Err(e) => {
                warn!(error = %e, "registry unreadable");
                return;
            }
        };
        if let Some(entry) = known {
            if entry.pane.as_deref() != Some(origin.pane.as_str()) {
                debug!(task = %entry.task.name, pane = %origin.pane, "pane bound to task");
                if let Err(e) = self.ctx.registry.set_pane(&entry.task.name, Some(origin.pane.clone())) {
                    warn!(error = %e, "failed to record task pane");
                }
            }
            return;
        }

        match read_marker(dir) {
            Ok(Some(TaskMarker::Complete(task))) => {
                let name = task.name.clone();
                let bound = self
                    .ctx
                    .registry
                    .upsert(task)
                    .and_then(|()| self.ctx.registry.set_pane(&name, Some(origin.pane.clone())));
                if let Err(e) = bound {
                    warn!(task = %name, error = %e, "failed to cache task");
                }
            }
            // Still being created; recovery owns it.
            Ok(Some(TaskMarker::PendingTopic(_))) => {}
            Ok(None) if self.ctx.settings.auto_register && dir.is_dir() => {
                if let Err(e) = self.tasks.register_existing(&origin.pane, dir).await {
                    warn!(pane = %origin.pane, cwd = %origin.cwd, error = %e, "auto-registration failed");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(cwd = %origin.cwd, error = %e, "marker unreadable"),
        }
    }
}
