//! Notification lifecycle decisions.
//!
//! ```text
//! permission: pending --allow/deny/reply--> allowed|denied|replied
//!             pending --result <window-->  deleted
//!             pending --result >=window--> expired
//! idle:       pending --tool call <window-->  deleted
//!             pending --tool call >=window--> superseded
//! ```
//!
//! Elapsed time is measured from the notification's `created_at`, so the
//! rules are evaluated when the corroborating transcript event arrives and
//! need no timers.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::types::{AgtchatError, NotificationKind, NotificationRecord, NotificationStatus};

/// Default boundary between "terminal auto-resolved" and "a human acted".
pub const DEFAULT_RESOLUTION_WINDOW: Duration = Duration::from_secs(4);

pub const BATCH_DENIAL_REASON: &str = "denied via batch denial";
pub const RESOLVED_IN_TERMINAL_REASON: &str = "resolved in terminal";
pub const DISMISSED_REASON: &str = "dismissed";
pub const ALLOW_ALWAYS_REASON: &str = "always";
pub const PANE_GONE_REASON: &str = "session ended";

/// Callback data of the "already handled" button; clicks on it are only acknowledged.
pub const INERT_CALLBACK: &str = "_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonAction {
    Allow,
    AllowAlways,
    Deny,
    Dismiss,
}

impl ButtonAction {
    pub fn from_callback_data(data: &str) -> Option<Self> {
        match data {
            "y" | "allow" => Some(Self::Allow),
            "a" | "always" => Some(Self::AllowAlways),
            "n" | "deny" => Some(Self::Deny),
            "d" | "dismiss" => Some(Self::Dismiss),
            _ => None,
        }
    }

    pub fn callback_data(self) -> &'static str {
        match self {
            Self::Allow => "y",
            Self::AllowAlways => "a",
            Self::Deny => "n",
            Self::Dismiss => "d",
        }
    }

    /// Short confirmation shown in the chat client's toast.
    pub fn ack_text(self) -> &'static str {
        match self {
            Self::Allow => "Allowed",
            Self::AllowAlways => "Always allowed",
            Self::Deny => "Denied",
            Self::Dismiss => "Dismissed",
        }
    }

    /// Whether the action drives the terminal's permission prompt.
    pub fn answers_prompt(self) -> bool {
        !matches!(self, Self::Dismiss)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultOutcome {
    /// The terminal resolved the prompt on its own; the chat message was a false alarm.
    Delete,
    /// A human plausibly answered in the terminal; keep the message, disable its buttons.
    Expire,
}

/// A tool result arrived for a pending permission notification.
pub fn classify_tool_result(elapsed: Duration, window: Duration) -> ResultOutcome {
    if elapsed < window {
        ResultOutcome::Delete
    } else {
        ResultOutcome::Expire
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleOutcome {
    /// The agent changed its mind before anyone could read the idle ping.
    Delete,
    /// The agent moved on; the ping stays visible and repliable.
    Supersede,
}

/// A tool call arrived after an idle notification for the same pane.
pub fn classify_idle_followup(elapsed: Duration, window: Duration) -> IdleOutcome {
    if elapsed < window {
        IdleOutcome::Delete
    } else {
        IdleOutcome::Supersede
    }
}

/// Apply a button action to a pending record and return its new status.
pub fn apply_action(
    record: &mut NotificationRecord,
    action: ButtonAction,
    now: DateTime<Utc>,
) -> Result<NotificationStatus, AgtchatError> {
    if !record.status.is_pending() {
        return Err(AgtchatError::NotPending {
            message_id: record.message_id,
            status: record.status,
        });
    }
    if action.answers_prompt() && record.kind != NotificationKind::PermissionRequest {
        return Err(AgtchatError::ActionNotApplicable {
            message_id: record.message_id,
            kind: record.kind,
        });
    }
    let (status, reason) = match action {
        ButtonAction::Allow => (NotificationStatus::Allowed, None),
        ButtonAction::AllowAlways => (NotificationStatus::Allowed, Some(ALLOW_ALWAYS_REASON)),
        ButtonAction::Deny => (NotificationStatus::Denied, None),
        ButtonAction::Dismiss => (NotificationStatus::Expired, Some(DISMISSED_REASON)),
    };
    record.resolve(status, reason, now);
    Ok(status)
}

/// Label of the single inert button left on a resolved message.
pub fn resolved_label(status: NotificationStatus, reason: Option<&str>) -> Option<&'static str> {
    let label = match (status, reason) {
        (NotificationStatus::Allowed, Some(ALLOW_ALWAYS_REASON)) => "✓ Always",
        (NotificationStatus::Allowed, _) => "✓ Allowed",
        (NotificationStatus::Denied, _) => "✗ Denied",
        (NotificationStatus::Replied, _) => "💬 Replied",
        (NotificationStatus::Expired, Some(BATCH_DENIAL_REASON)) => "⏰ Expired (batch denied)",
        (NotificationStatus::Expired, Some(DISMISSED_REASON)) => "Dismissed",
        (NotificationStatus::Expired, _) => "⏰ Expired",
        (NotificationStatus::Stale, _) => "⚠ Session ended",
        (NotificationStatus::Pending | NotificationStatus::Superseded, _)
        | (NotificationStatus::Deleted, _) => return None,
    };
    Some(label)
}
