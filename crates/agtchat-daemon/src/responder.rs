//! Button clicks, replies, and messages posted in task threads.
//!
//! Every action on a record is claimed in the store before anything is
//! typed into a pane, so a second click or a late reply finds the record
//! already resolved. Text never reaches a pane while that pane has an open
//! permission prompt unless it answers exactly that prompt.

use std::path::PathBuf;

use agtchat_core::lifecycle::{INERT_CALLBACK, PANE_GONE_REASON, RESOLVED_IN_TERMINAL_REASON, apply_action};
use agtchat_core::{ButtonAction, MessageId, NotificationKind, NotificationRecord, NotificationStatus};
use agtchat_source_claude_jsonl::{PendingCall, has_tool_result, pending_tool_calls};
use agtchat_telegram::{ButtonClick, IncomingMessage};
use agtchat_tmux::PromptChoice;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::context::DaemonContext;
use crate::error::InjectError;
use crate::format;
use crate::injector::Injection;
use crate::notifier::Notifier;
use crate::registry::RegistryEntry;
use crate::tasks::TaskManager;

const ACK_EMOJI: &str = "👀";
const SESSION_ENDED_REPLY: &str = "⚠️ That session has ended; your reply was not delivered.";

fn prompt_choice(action: ButtonAction) -> Option<PromptChoice> {
    match action {
        ButtonAction::Allow => Some(PromptChoice::Accept),
        ButtonAction::AllowAlways => Some(PromptChoice::AcceptAlways),
        ButtonAction::Deny => Some(PromptChoice::Reject),
        ButtonAction::Dismiss => None,
    }
}

/// Replies that ask for a record dump instead of being delivered.
pub fn is_debug_request(text: &str) -> bool {
    matches!(text.trim().to_lowercase().as_str(), "debug" | "?" | "/debug")
}

async fn transcript_has_result(path: PathBuf, call_id: String) -> Option<bool> {
    match tokio::task::spawn_blocking(move || has_tool_result(&path, &call_id)).await {
        Ok(Ok(found)) => Some(found),
        Ok(Err(e)) => {
            debug!(error = %e, "transcript not readable for result check");
            None
        }
        Err(e) => {
            warn!(error = %e, "result check task failed");
            None
        }
    }
}

async fn transcript_pending_calls(path: PathBuf) -> Option<Vec<PendingCall>> {
    match tokio::task::spawn_blocking(move || pending_tool_calls(&path)).await {
        Ok(Ok(calls)) => Some(calls),
        Ok(Err(e)) => {
            debug!(error = %e, "transcript not readable for prompt check");
            None
        }
        Err(e) => {
            warn!(error = %e, "prompt check task failed");
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct Responder {
    ctx: DaemonContext,
    tasks: TaskManager,
}

impl Responder {
    pub fn new(ctx: DaemonContext, tasks: TaskManager) -> Self {
        Self { ctx, tasks }
    }

    async fn answer(&self, click: &ButtonClick, text: Option<&str>) {
        if let Err(e) = self.ctx.chat.answer_callback(&click.callback_id, text).await {
            debug!(callback_id = %click.callback_id, error = %e, "callback answer failed");
        }
    }

    fn load(&self, message_id: MessageId) -> Option<NotificationRecord> {
        match self.ctx.store.read() {
            Ok(state) => state.notifications.get(&message_id).cloned(),
            Err(e) => {
                warn!(message_id, error = %e, "state unreadable");
                None
            }
        }
    }

    /// Resolve a record unconditionally and relabel its message.
    async fn settle(&self, message_id: MessageId, status: NotificationStatus, reason: Option<&str>, now: DateTime<Utc>) {
        let updated = self.ctx.store.update(|s| {
            if let Some(r) = s.notifications.get_mut(&message_id) {
                r.resolve(status, reason, now);
            }
        });
        if let Err(e) = updated {
            warn!(message_id, error = %e, "failed to record status");
        }
        self.ctx.relabel(message_id, status, reason).await;
    }

    /// Put a claimed record back so it can be acted on again.
    fn reopen(&self, message_id: MessageId) {
        let reopened = self.ctx.store.update(|s| {
            if let Some(r) = s.notifications.get_mut(&message_id) {
                r.status = NotificationStatus::Pending;
                r.status_reason = None;
                r.resolved_at = None;
            }
        });
        if let Err(e) = reopened {
            warn!(message_id, error = %e, "failed to reopen notification");
        }
    }

    async fn pane_died(&self, notifier: &mut Notifier, pane: &str, now: DateTime<Utc>) {
        info!(pane, "pane gone during injection");
        notifier.panes_gone(&[pane.to_owned()], now).await;
    }

    // ─── Buttons ─────────────────────────────────────────────────

    pub async fn handle_click(&self, notifier: &mut Notifier, click: &ButtonClick, now: DateTime<Utc>) {
        if click.chat_id != self.ctx.chat_id() {
            debug!(chat_id = click.chat_id, "click from another chat ignored");
            self.answer(click, None).await;
            return;
        }
        if click.data == INERT_CALLBACK {
            self.answer(click, Some("Already handled")).await;
            return;
        }
        let Some(action) = ButtonAction::from_callback_data(&click.data) else {
            warn!(data = %click.data, "unknown button data");
            self.answer(click, None).await;
            return;
        };
        let Some(record) = self.load(click.message_id) else {
            self.answer(click, Some("Notification not found")).await;
            return;
        };
        if !record.status.is_pending() {
            self.answer(click, Some("Already handled")).await;
            return;
        }
        let Some(choice) = prompt_choice(action) else {
            self.dismiss(click, now).await;
            return;
        };
        if record.kind != NotificationKind::PermissionRequest {
            self.answer(click, Some("No active prompt")).await;
            return;
        }

        if let Some(call_id) = record.tool_call_id.clone() {
            if transcript_has_result(record.transcript_path.clone(), call_id.clone()).await == Some(true) {
                info!(message_id = record.message_id, call_id = %call_id, "prompt already answered in terminal");
                self.settle(
                    record.message_id,
                    NotificationStatus::Expired,
                    Some(RESOLVED_IN_TERMINAL_REASON),
                    now,
                )
                .await;
                self.answer(click, Some("Already handled in terminal")).await;
                return;
            }
        }

        let claimed = self.ctx.store.update(|s| {
            let r = s.notifications.get_mut(&click.message_id)?;
            Some(apply_action(r, action, now).map(|status| (status, r.status_reason.clone())))
        });
        let (status, reason) = match claimed {
            Ok(Some(Ok(claimed))) => claimed,
            Ok(Some(Err(_))) => {
                self.answer(click, Some("Already handled")).await;
                return;
            }
            Ok(None) => {
                self.answer(click, Some("Notification not found")).await;
                return;
            }
            Err(e) => {
                warn!(message_id = click.message_id, error = %e, "could not claim notification");
                self.answer(click, Some("Failed: state unavailable")).await;
                return;
            }
        };

        match self.ctx.injector.inject(&record.pane, Injection::Answer(choice)).await {
            Ok(()) => {
                info!(message_id = record.message_id, pane = %record.pane, %status, "prompt answered");
                self.ctx.relabel(record.message_id, status, reason.as_deref()).await;
                if action == ButtonAction::Deny {
                    if let Some(call_id) = &record.tool_call_id {
                        notifier.deny_batch(&record.pane, call_id, now).await;
                    }
                }
                self.answer(click, Some(action.ack_text())).await;
            }
            Err(InjectError::PaneDead(_)) => {
                self.settle(record.message_id, NotificationStatus::Stale, Some(PANE_GONE_REASON), now)
                    .await;
                self.pane_died(notifier, &record.pane, now).await;
                self.answer(click, Some("Failed: pane dead")).await;
            }
            Err(e) => {
                warn!(message_id = record.message_id, error = %e, "injection failed, notification reopened");
                self.reopen(record.message_id);
                self.answer(click, Some("Failed: could not reach the terminal")).await;
            }
        }
    }

    async fn dismiss(&self, click: &ButtonClick, now: DateTime<Utc>) {
        let dismissed = self.ctx.store.update(|s| {
            let r = s.notifications.get_mut(&click.message_id)?;
            apply_action(r, ButtonAction::Dismiss, now)
                .ok()
                .map(|status| (status, r.status_reason.clone()))
        });
        match dismissed {
            Ok(Some((status, reason))) => {
                self.ctx.relabel(click.message_id, status, reason.as_deref()).await;
                self.answer(click, Some(ButtonAction::Dismiss.ack_text())).await;
            }
            Ok(None) => self.answer(click, Some("Already handled")).await,
            Err(e) => {
                warn!(message_id = click.message_id, error = %e, "could not dismiss");
                self.answer(click, Some("Failed: state unavailable")).await;
            }
        }
    }

    // ─── Replies ─────────────────────────────────────────────────

    /// The oldest call in the pane's transcript that still waits on the
    /// user. Falls back to the store when the transcript is unreadable.
    async fn live_prompt(&self, record: &NotificationRecord) -> Option<String> {
        let auto_approved = &self.ctx.settings.auto_approved;
        let state = self.ctx.store.read().ok();
        match transcript_pending_calls(record.transcript_path.clone()).await {
            Some(calls) => calls
                .into_iter()
                .filter(|c| !auto_approved.iter().any(|t| *t == c.tool_name))
                .find(|c| {
                    let handled = state
                        .as_ref()
                        .and_then(|s| s.record_for_call(&c.call_id))
                        .is_some_and(|r| r.status.is_handled());
                    !handled
                })
                .map(|c| c.call_id),
            None => state
                .as_ref()
                .and_then(|s| s.pending_permission_for_pane(&record.pane))
                .and_then(|r| r.tool_call_id.clone()),
        }
    }

    /// A reply to a tracked notification.
    pub async fn handle_reply(
        &self,
        notifier: &mut Notifier,
        msg: &IncomingMessage,
        record: &NotificationRecord,
        now: DateTime<Utc>,
    ) {
        if is_debug_request(&msg.text) {
            let has_result = match &record.tool_call_id {
                Some(call_id) => transcript_has_result(record.transcript_path.clone(), call_id.clone()).await,
                None => None,
            };
            self.ctx
                .reply(msg.thread_id, msg.message_id, &format::debug_dump(record, has_result))
                .await;
            return;
        }
        if !record.status.accepts_reply() {
            self.ctx.reply(msg.thread_id, msg.message_id, SESSION_ENDED_REPLY).await;
            return;
        }

        match self.live_prompt(record).await {
            Some(call_id) if record.tool_call_id.as_deref() == Some(call_id.as_str()) => {
                self.reply_to_prompt(notifier, msg, record, &call_id, now).await;
            }
            Some(call_id) => {
                info!(pane = %record.pane, open_call = %call_id, "reply blocked by another open prompt");
                self.ctx
                    .reply(msg.thread_id, msg.message_id, format::PROTECTED_PROMPT_REPLY)
                    .await;
            }
            None => self.submit(notifier, msg, &record.pane, now).await,
        }
    }

    /// The reply answers the prompt itself: reject with the reply as the
    /// instruction, then the rest of the batch is abandoned by the agent.
    async fn reply_to_prompt(
        &self,
        notifier: &mut Notifier,
        msg: &IncomingMessage,
        record: &NotificationRecord,
        call_id: &str,
        now: DateTime<Utc>,
    ) {
        let claimed = self.ctx.store.update(|s| {
            if let Some(r) = s.notifications.get_mut(&record.message_id) {
                r.resolve(NotificationStatus::Replied, None, now);
            }
        });
        if let Err(e) = claimed {
            warn!(message_id = record.message_id, error = %e, "could not claim notification for reply");
            self.ctx.reply(msg.thread_id, msg.message_id, "Failed: state unavailable").await;
            return;
        }
        match self
            .ctx
            .injector
            .inject(&record.pane, Injection::Instruct(msg.text.clone()))
            .await
        {
            Ok(()) => {
                info!(message_id = record.message_id, pane = %record.pane, "prompt answered with instruction");
                self.ctx.relabel(record.message_id, NotificationStatus::Replied, None).await;
                self.ctx.react(msg.message_id, ACK_EMOJI).await;
                notifier.deny_batch(&record.pane, call_id, now).await;
            }
            Err(InjectError::PaneDead(_)) => {
                self.settle(record.message_id, NotificationStatus::Stale, Some(PANE_GONE_REASON), now)
                    .await;
                self.pane_died(notifier, &record.pane, now).await;
                self.ctx.reply(msg.thread_id, msg.message_id, "Failed: pane dead").await;
            }
            Err(e) => {
                warn!(message_id = record.message_id, error = %e, "instruction not delivered, notification reopened");
                self.reopen(record.message_id);
                self.ctx
                    .reply(msg.thread_id, msg.message_id, "Failed: could not reach the terminal")
                    .await;
            }
        }
    }

    async fn submit(&self, notifier: &mut Notifier, msg: &IncomingMessage, pane: &str, now: DateTime<Utc>) {
        match self.ctx.injector.inject(pane, Injection::Submit(msg.text.clone())).await {
            Ok(()) => {
                debug!(pane, message_id = msg.message_id, "message delivered");
                self.ctx.react(msg.message_id, ACK_EMOJI).await;
            }
            Err(InjectError::PaneDead(_)) => {
                self.pane_died(notifier, pane, now).await;
                self.ctx.reply(msg.thread_id, msg.message_id, SESSION_ENDED_REPLY).await;
            }
            Err(e) => {
                warn!(pane, error = %e, "message not delivered");
                self.ctx
                    .reply(msg.thread_id, msg.message_id, "Failed: could not reach the terminal")
                    .await;
            }
        }
    }

    // ─── Task threads ────────────────────────────────────────────

    /// A plain message in a task's thread goes to the task's pane.
    pub async fn handle_task_message(
        &self,
        notifier: &mut Notifier,
        msg: &IncomingMessage,
        entry: &RegistryEntry,
        now: DateTime<Utc>,
    ) {
        let name = &entry.task.name;
        let pane = match self.tasks.ensure_session(entry).await {
            Ok(Some(pane)) => pane,
            Ok(None) => {
                self.ctx
                    .reply(
                        msg.thread_id,
                        msg.message_id,
                        &format!("⏸️ Task `{name}` is paused. Send /resume to restart it."),
                    )
                    .await;
                return;
            }
            Err(e) => {
                warn!(task = %name, error = %e, "no session for task message");
                self.ctx
                    .reply(msg.thread_id, msg.message_id, &format!("Failed: {e}"))
                    .await;
                return;
            }
        };
        let open_prompt = self
            .ctx
            .store
            .read()
            .ok()
            .is_some_and(|s| s.pending_permission_for_pane(&pane).is_some());
        if open_prompt {
            info!(task = %name, pane = %pane, "task message blocked by open prompt");
            self.ctx
                .reply(msg.thread_id, msg.message_id, format::PROTECTED_PROMPT_REPLY)
                .await;
            return;
        }
        self.submit(notifier, msg, &pane, now).await;
    }
}
