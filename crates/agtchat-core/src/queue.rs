//! Per-pane ordering of tool calls that arrived in one agent turn.
//!
//! The terminal only ever prompts for one tool call at a time, front to back,
//! so only the head of a pane's queue may carry a live notification.

use std::collections::{HashMap, VecDeque};

use crate::types::MessageId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedCall {
    pub call_id: String,
    /// Message id of the live notification, set only while this entry is the head.
    pub notified: Option<MessageId>,
}

/// What happens to the rest of a pane's queue when its head is denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchDenyPolicy {
    /// The agent aborts the whole batch; every queued call is dropped.
    #[default]
    ClearQueue,
    /// Only the denied call is dropped; the next call becomes the head.
    AdvanceToNext,
}

#[derive(Debug, Clone, Default)]
pub struct BatchQueue {
    entries: VecDeque<QueuedCall>,
}

impl BatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a call in arrival order. Duplicates are ignored.
    pub fn push(&mut self, call_id: &str) -> bool {
        if self.contains(call_id) {
            return false;
        }
        self.entries.push_back(QueuedCall {
            call_id: call_id.to_owned(),
            notified: None,
        });
        true
    }

    pub fn head(&self) -> Option<&QueuedCall> {
        self.entries.front()
    }

    /// Call id of the head if it has no live notification yet.
    pub fn head_needing_notification(&self) -> Option<&str> {
        self.entries
            .front()
            .filter(|entry| entry.notified.is_none())
            .map(|entry| entry.call_id.as_str())
    }

    /// Record the notification for the head. Non-head entries are refused.
    pub fn mark_notified(&mut self, call_id: &str, message_id: MessageId) -> bool {
        match self.entries.front_mut() {
            Some(head) if head.call_id == call_id => {
                head.notified = Some(message_id);
                true
            }
            _ => false,
        }
    }

    /// Forget the head's notification (e.g. it was deleted as a false alarm).
    pub fn clear_notified(&mut self, call_id: &str) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.call_id == call_id) {
            entry.notified = None;
        }
    }

    /// Remove a call whose result has been observed.
    pub fn resolve(&mut self, call_id: &str) -> Option<QueuedCall> {
        let idx = self.entries.iter().position(|e| e.call_id == call_id)?;
        self.entries.remove(idx)
    }

    /// Remove the denied head and return the other calls that no longer exist.
    pub fn deny_head(&mut self, policy: BatchDenyPolicy) -> (Option<QueuedCall>, Vec<QueuedCall>) {
        let head = self.entries.pop_front();
        let dropped = match policy {
            BatchDenyPolicy::ClearQueue => self.entries.drain(..).collect(),
            BatchDenyPolicy::AdvanceToNext => Vec::new(),
        };
        (head, dropped)
    }

    pub fn contains(&self, call_id: &str) -> bool {
        self.entries.iter().any(|e| e.call_id == call_id)
    }

    pub fn position(&self, call_id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.call_id == call_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedCall> {
        self.entries.iter()
    }
}

/// Batch queues keyed by pane.
#[derive(Debug, Clone, Default)]
pub struct BatchQueues {
    panes: HashMap<String, BatchQueue>,
}

impl BatchQueues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&mut self, pane: &str) -> &mut BatchQueue {
        self.panes.entry(pane.to_owned()).or_default()
    }

    pub fn get(&self, pane: &str) -> Option<&BatchQueue> {
        self.panes.get(pane)
    }

    pub fn get_mut(&mut self, pane: &str) -> Option<&mut BatchQueue> {
        self.panes.get_mut(pane)
    }

    /// Pane whose queue holds the given call, if any.
    pub fn pane_of(&self, call_id: &str) -> Option<&str> {
        self.panes
            .iter()
            .find(|(_, q)| q.contains(call_id))
            .map(|(pane, _)| pane.as_str())
    }

    pub fn remove_pane(&mut self, pane: &str) -> Option<BatchQueue> {
        self.panes.remove(pane)
    }

    pub fn retain_panes(&mut self, live: &[&str]) {
        self.panes.retain(|pane, _| live.contains(&pane.as_str()));
    }

    /// Panes whose head still needs a notification, with that head's call id.
    pub fn heads_needing_notification(&self) -> Vec<(String, String)> {
        let mut heads: Vec<(String, String)> = self
            .panes
            .iter()
            .filter_map(|(pane, q)| {
                q.head_needing_notification()
                    .map(|call| (pane.clone(), call.to_owned()))
            })
            .collect();
        heads.sort();
        heads
    }
}
