//! Transcript events → notification records and outbound messages.
//!
//! Owns the per-pane batch queues. Only the head of a pane's queue is ever
//! notified; the next call is notified once the head's result shows up.
//! A record is persisted only after its message was delivered.

use std::collections::{HashMap, HashSet};

use agtchat_core::lifecycle::{
    BATCH_DENIAL_REASON, IdleOutcome, PANE_GONE_REASON, RESOLVED_IN_TERMINAL_REASON, ResultOutcome,
    classify_idle_followup, classify_tool_result,
};
use agtchat_core::{
    AssistantText, BatchDenyPolicy, BatchQueue, BatchQueues, CompactionPhase, CompactionTrigger, MessageId,
    NotificationDraft, NotificationKind, NotificationRecord, NotificationStatus, PaneOrigin, ToolCall,
    TranscriptEvent,
};
use agtchat_telegram::{ChatError, Keyboard, OutgoingMessage};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::context::DaemonContext;
use crate::format;

/// Outcome of denying a pane's head call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchDenial {
    pub denied: Option<String>,
    /// Other queued calls resolved along with the denied one.
    pub expired: Vec<String>,
}

#[derive(Debug)]
pub struct Notifier {
    ctx: DaemonContext,
    queues: BatchQueues,
    calls: HashMap<String, ToolCall>,
}

impl Notifier {
    pub fn new(ctx: DaemonContext) -> Self {
        Self {
            ctx,
            queues: BatchQueues::new(),
            calls: HashMap::new(),
        }
    }

    pub fn queue(&self, pane: &str) -> Option<&BatchQueue> {
        self.queues.get(pane)
    }

    pub async fn handle(&mut self, event: TranscriptEvent, now: DateTime<Utc>) {
        match event {
            TranscriptEvent::ToolCallSeen(call) => self.on_tool_call(call, now).await,
            TranscriptEvent::ToolResultSeen { origin, call_id } => {
                self.on_tool_result(&origin, &call_id, now).await;
            }
            TranscriptEvent::AssistantTextSeen(text) => self.on_assistant_text(text, now).await,
            TranscriptEvent::CompactionBoundary {
                origin,
                phase,
                trigger,
            } => self.on_compaction(&origin, phase, trigger, now).await,
        }
    }

    // ─── Tool calls ──────────────────────────────────────────────

    async fn on_tool_call(&mut self, call: ToolCall, now: DateTime<Utc>) {
        let pane = call.origin.pane.clone();
        self.demote_idles(&pane, now).await;

        if call.auto_approved {
            debug!(pane = %pane, call_id = %call.call_id, tool = %call.tool_name, "auto-approved call, not surfaced");
            return;
        }
        if call.settled {
            debug!(pane = %pane, call_id = %call.call_id, "call already settled in terminal, not queued");
            return;
        }

        let existing = match self.ctx.store.read() {
            Ok(state) => state
                .record_for_call(&call.call_id)
                .map(|r| (r.message_id, r.status)),
            Err(e) => {
                warn!(error = %e, "state unreadable while queueing call");
                None
            }
        };
        match existing {
            Some((_, status)) if !status.is_pending() => {
                debug!(call_id = %call.call_id, %status, "call already resolved, not queued");
            }
            Some((message_id, _)) => {
                let queue = self.queues.entry(&pane);
                if queue.push(&call.call_id) {
                    queue.mark_notified(&call.call_id, message_id);
                }
                self.calls.insert(call.call_id.clone(), call);
            }
            None => {
                if self.queues.entry(&pane).push(&call.call_id) {
                    debug!(pane = %pane, call_id = %call.call_id, "call queued");
                    self.calls.insert(call.call_id.clone(), call);
                    self.notify_head(&pane, now).await;
                }
            }
        }
    }

    async fn notify_head(&mut self, pane: &str, now: DateTime<Utc>) {
        let Some(call_id) = self
            .queues
            .get(pane)
            .and_then(BatchQueue::head_needing_notification)
            .map(str::to_owned)
        else {
            return;
        };
        let Some(call) = self.calls.get(&call_id).cloned() else {
            warn!(pane, call_id = %call_id, "queued call has no details, dropping it");
            if let Some(queue) = self.queues.get_mut(pane) {
                queue.resolve(&call_id);
            }
            return;
        };
        match self.send_permission(&call, now).await {
            Ok(message_id) => {
                if let Some(queue) = self.queues.get_mut(pane) {
                    queue.mark_notified(&call_id, message_id);
                }
                info!(pane, call_id = %call_id, message_id, tool = %call.tool_name, "permission request notified");
            }
            Err(e) => warn!(pane, call_id = %call_id, error = %e, "permission request not delivered, will retry"),
        }
    }

    async fn send_permission(&self, call: &ToolCall, now: DateTime<Utc>) -> Result<MessageId, ChatError> {
        let placement = self.ctx.placement(&call.origin);
        let text = format::permission_text(
            &placement.label,
            &call.tool_name,
            &call.input,
            call.preceding_text.as_deref(),
        );
        let msg = OutgoingMessage::new(self.ctx.chat_id(), text)
            .in_thread(placement.thread_id)
            .with_keyboard(Keyboard::permission())
            .markdown();
        let message_id = self.ctx.chat.send_message(&msg).await?;
        let record = NotificationDraft {
            chat_id: self.ctx.chat_id(),
            thread_id: placement.thread_id,
            pane: call.origin.pane.clone(),
            cwd: call.origin.cwd.clone(),
            kind: NotificationKind::PermissionRequest,
            tool_call_id: Some(call.call_id.clone()),
            tool_name: Some(call.tool_name.clone()),
            assistant_message_id: call.assistant_message_id.clone(),
            transcript_path: call.origin.transcript_path.clone(),
        }
        .into_record(message_id, now);
        self.persist(record);
        Ok(message_id)
    }

    /// A delivered but unrecorded message is preferred over a second send.
    fn persist(&self, record: NotificationRecord) {
        let message_id = record.message_id;
        if let Err(e) = self.ctx.store.update(|s| {
            s.notifications.insert(message_id, record);
        }) {
            warn!(message_id, error = %e, "notification delivered but not recorded");
        }
    }

    /// Retry heads whose notification could not be delivered earlier.
    pub async fn retry_unnotified_heads(&mut self, now: DateTime<Utc>) {
        for (pane, _) in self.queues.heads_needing_notification() {
            self.notify_head(&pane, now).await;
        }
    }

    // ─── Results ─────────────────────────────────────────────────

    async fn on_tool_result(&mut self, origin: &PaneOrigin, call_id: &str, now: DateTime<Utc>) {
        self.calls.remove(call_id);
        let window = self.ctx.settings.resolution_window;
        let outcome = self.ctx.store.update(|s| {
            let record = s.record_for_call_mut(call_id)?;
            if !record.is_pending_permission() {
                return None;
            }
            let outcome = classify_tool_result(record.elapsed(now), window);
            match outcome {
                ResultOutcome::Delete => record.resolve(NotificationStatus::Deleted, None, now),
                ResultOutcome::Expire => {
                    record.resolve(NotificationStatus::Expired, Some(RESOLVED_IN_TERMINAL_REASON), now);
                }
            }
            Some((record.message_id, outcome))
        });
        match outcome {
            Ok(Some((message_id, ResultOutcome::Delete))) => {
                info!(call_id, message_id, "resolved before anyone could act, deleting notification");
                self.ctx.delete_message(message_id).await;
            }
            Ok(Some((message_id, ResultOutcome::Expire))) => {
                info!(call_id, message_id, "resolved in terminal, notification expired");
                self.ctx
                    .relabel(message_id, NotificationStatus::Expired, Some(RESOLVED_IN_TERMINAL_REASON))
                    .await;
            }
            Ok(None) => {}
            Err(e) => warn!(call_id, error = %e, "failed to record tool result"),
        }

        let pane = self
            .queues
            .pane_of(call_id)
            .map(str::to_owned)
            .unwrap_or_else(|| origin.pane.clone());
        if let Some(queue) = self.queues.get_mut(&pane) {
            queue.resolve(call_id);
            if queue.is_empty() {
                self.queues.remove_pane(&pane);
            }
        }
        self.notify_head(&pane, now).await;
    }

    // ─── Idle ────────────────────────────────────────────────────

    /// Activity after an idle notification: a quick follow-up means it was a
    /// false alarm, a late one means it is merely outdated.
    async fn demote_idles(&self, pane: &str, now: DateTime<Utc>) {
        let window = self.ctx.settings.resolution_window;
        let outcomes = self.ctx.store.update(|s| {
            let mut out = Vec::new();
            s.notifications.retain(|message_id, r| {
                if r.pane != pane || r.kind != NotificationKind::Idle || !r.status.is_pending() {
                    return true;
                }
                let outcome = classify_idle_followup(r.elapsed(now), window);
                out.push((*message_id, outcome));
                match outcome {
                    IdleOutcome::Delete => false,
                    IdleOutcome::Supersede => {
                        r.resolve(NotificationStatus::Superseded, None, now);
                        true
                    }
                }
            });
            out
        });
        let outcomes = match outcomes {
            Ok(outcomes) => outcomes,
            Err(e) => {
                warn!(pane, error = %e, "failed to update idle notifications");
                return;
            }
        };
        for (message_id, outcome) in outcomes {
            match outcome {
                IdleOutcome::Delete => {
                    info!(pane, message_id, "idle notification was a false alarm, deleting");
                    self.ctx.delete_message(message_id).await;
                }
                IdleOutcome::Supersede => {
                    debug!(pane, message_id, "idle notification superseded");
                    self.clear_buttons(message_id).await;
                }
            }
        }
    }

    async fn clear_buttons(&self, message_id: MessageId) {
        if let Err(e) = self
            .ctx
            .chat
            .edit_buttons(self.ctx.chat_id(), message_id, &Keyboard::default())
            .await
        {
            if !e.is_message_gone() {
                warn!(message_id, error = %e, "failed to clear buttons");
            }
        }
    }

    async fn on_assistant_text(&mut self, text: AssistantText, now: DateTime<Utc>) {
        if text.has_following_tool_call || text.text.trim().is_empty() {
            return;
        }
        let pane = text.origin.pane.as_str();
        let older = self.ctx.store.update(|s| {
            if s.has_record_for_assistant_message(&text.message_id) {
                return None;
            }
            let mut older = Vec::new();
            for r in s.notifications.values_mut() {
                if r.pane == pane && r.kind == NotificationKind::Idle && r.status.is_pending() {
                    r.resolve(NotificationStatus::Superseded, None, now);
                    older.push(r.message_id);
                }
            }
            Some(older)
        });
        let older = match older {
            Ok(Some(older)) => older,
            Ok(None) => {
                debug!(pane, message_id = %text.message_id, "idle already notified");
                return;
            }
            Err(e) => {
                warn!(pane, error = %e, "state unavailable, skipping idle notification");
                return;
            }
        };
        for message_id in older {
            self.clear_buttons(message_id).await;
        }

        let placement = self.ctx.placement(&text.origin);
        let msg = OutgoingMessage::new(self.ctx.chat_id(), format::idle_text(&placement.label, &text.text))
            .in_thread(placement.thread_id)
            .with_keyboard(Keyboard::dismiss())
            .markdown();
        match self.ctx.chat.send_message(&msg).await {
            Ok(message_id) => {
                info!(pane, message_id, "idle notification sent");
                self.persist(
                    NotificationDraft {
                        chat_id: self.ctx.chat_id(),
                        thread_id: placement.thread_id,
                        pane: pane.to_owned(),
                        cwd: text.origin.cwd.clone(),
                        kind: NotificationKind::Idle,
                        tool_call_id: None,
                        tool_name: None,
                        assistant_message_id: Some(text.message_id.clone()),
                        transcript_path: text.origin.transcript_path.clone(),
                    }
                    .into_record(message_id, now),
                );
            }
            Err(e) => warn!(pane, error = %e, "idle notification not delivered"),
        }
    }

    async fn on_compaction(
        &self,
        origin: &PaneOrigin,
        phase: CompactionPhase,
        trigger: CompactionTrigger,
        now: DateTime<Utc>,
    ) {
        let placement = self.ctx.placement(origin);
        let msg = OutgoingMessage::new(
            self.ctx.chat_id(),
            format::compaction_text(&placement.label, phase, trigger),
        )
        .in_thread(placement.thread_id)
        .markdown();
        match self.ctx.chat.send_message(&msg).await {
            Ok(message_id) => self.persist(
                NotificationDraft {
                    chat_id: self.ctx.chat_id(),
                    thread_id: placement.thread_id,
                    pane: origin.pane.clone(),
                    cwd: origin.cwd.clone(),
                    kind: NotificationKind::Informational,
                    tool_call_id: None,
                    tool_name: None,
                    assistant_message_id: None,
                    transcript_path: origin.transcript_path.clone(),
                }
                .into_record(message_id, now),
            ),
            Err(e) => warn!(pane = %origin.pane, error = %e, "compaction notice not delivered"),
        }
    }

    // ─── Denial, dead panes ──────────────────────────────────────

    /// The agent abandons its whole pending batch when one call is denied.
    pub async fn deny_batch(&mut self, pane: &str, call_id: &str, now: DateTime<Utc>) -> BatchDenial {
        let policy = self.ctx.settings.deny_policy;
        let mut denial = BatchDenial {
            denied: Some(call_id.to_owned()),
            expired: Vec::new(),
        };
        if let Some(queue) = self.queues.get_mut(pane) {
            if queue.head().is_some_and(|h| h.call_id == call_id) {
                let (_, dropped) = queue.deny_head(policy);
                denial.expired = dropped.into_iter().map(|q| q.call_id).collect();
            } else {
                queue.resolve(call_id);
            }
            if queue.is_empty() {
                self.queues.remove_pane(pane);
            }
        }
        self.calls.remove(call_id);
        for id in &denial.expired {
            self.calls.remove(id);
        }

        let expired = &denial.expired;
        let relabel = self.ctx.store.update(|s| {
            let mut touched = Vec::new();
            for r in s.notifications.values_mut() {
                let queued = r.tool_call_id.as_ref().is_some_and(|id| expired.contains(id));
                if queued && r.is_pending_permission() {
                    r.resolve(NotificationStatus::Expired, Some(BATCH_DENIAL_REASON), now);
                    touched.push(r.message_id);
                }
            }
            touched
        });
        match relabel {
            Ok(ids) => {
                for message_id in ids {
                    self.ctx
                        .relabel(message_id, NotificationStatus::Expired, Some(BATCH_DENIAL_REASON))
                        .await;
                }
            }
            Err(e) => warn!(pane, error = %e, "failed to expire batch-denied calls"),
        }
        info!(pane, call_id, expired = denial.expired.len(), "batch denied");

        if policy == BatchDenyPolicy::AdvanceToNext {
            self.notify_head(pane, now).await;
        }
        denial
    }

    /// Panes reported gone by the transcript loop.
    pub async fn panes_gone(&mut self, panes: &[String], now: DateTime<Utc>) {
        for pane in panes {
            self.queues.remove_pane(pane);
        }
        self.calls.retain(|_, c| !panes.contains(&c.origin.pane));
        self.mark_stale(|pane| panes.iter().any(|p| p == pane), now).await;
    }

    async fn mark_stale(&self, dead: impl Fn(&str) -> bool, now: DateTime<Utc>) -> Vec<MessageId> {
        let marked = self.ctx.store.update(|s| {
            let mut marked = Vec::new();
            for r in s.notifications.values_mut() {
                if r.status.is_pending() && dead(r.pane.as_str()) {
                    r.resolve(NotificationStatus::Stale, Some(PANE_GONE_REASON), now);
                    marked.push(r.message_id);
                }
            }
            marked
        });
        let marked = marked.unwrap_or_else(|e| {
            warn!(error = %e, "failed to mark notifications stale");
            Vec::new()
        });
        for message_id in &marked {
            self.ctx
                .relabel(*message_id, NotificationStatus::Stale, Some(PANE_GONE_REASON))
                .await;
        }
        marked
    }

    /// Drop every record whose pane is not in `live`. Returns how many were removed.
    pub async fn sweep(&mut self, live: &HashSet<String>, now: DateTime<Utc>) -> usize {
        let live_refs: Vec<&str> = live.iter().map(String::as_str).collect();
        self.queues.retain_panes(&live_refs);
        self.calls.retain(|_, c| live.contains(&c.origin.pane));

        self.mark_stale(|pane| !live.contains(pane), now).await;
        let removed = self.ctx.store.update(|s| {
            let before = s.notifications.len();
            s.notifications.retain(|_, r| live.contains(&r.pane));
            before - s.notifications.len()
        });
        match removed {
            Ok(n) => {
                if n > 0 {
                    info!(removed = n, "swept notifications of dead panes");
                }
                n
            }
            Err(e) => {
                warn!(error = %e, "sweep could not update state");
                0
            }
        }
    }
}
