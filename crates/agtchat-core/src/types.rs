use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Chat message id. Keys a [`NotificationRecord`].
pub type MessageId = i64;
/// Chat (group) id.
pub type ChatId = i64;
/// Forum thread id inside a chat.
pub type ThreadId = i64;

// ─── Notifications ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    PermissionRequest,
    Idle,
    Informational,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PermissionRequest => "permission_request",
            Self::Idle => "idle",
            Self::Informational => "informational",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Allowed,
    Denied,
    Replied,
    Expired,
    Superseded,
    Deleted,
    Stale,
}

impl NotificationStatus {
    pub const ALL: [Self; 8] = [
        Self::Pending,
        Self::Allowed,
        Self::Denied,
        Self::Replied,
        Self::Expired,
        Self::Superseded,
        Self::Deleted,
        Self::Stale,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Allowed => "allowed",
            Self::Denied => "denied",
            Self::Replied => "replied",
            Self::Expired => "expired",
            Self::Superseded => "superseded",
            Self::Deleted => "deleted",
            Self::Stale => "stale",
        }
    }

    pub fn is_pending(self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Replies are routed to the pane for every record whose message is
    /// still visible and whose pane has not been reported gone.
    pub fn accepts_reply(self) -> bool {
        !matches!(self, Self::Deleted | Self::Stale)
    }

    /// The user resolved the record through the chat.
    pub fn is_handled(self) -> bool {
        matches!(self, Self::Allowed | Self::Denied | Self::Replied)
    }
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationStatus {
    type Err = AgtchatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| AgtchatError::UnknownVariant {
                kind: "notification status",
                value: s.to_owned(),
            })
    }
}

/// Everything needed to create a notification before the chat message exists.
///
/// A draft becomes a [`NotificationRecord`] only once the outbound message
/// has been delivered and its message id is known.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationDraft {
    pub chat_id: ChatId,
    pub thread_id: Option<ThreadId>,
    pub pane: String,
    pub cwd: String,
    pub kind: NotificationKind,
    pub tool_call_id: Option<String>,
    pub tool_name: Option<String>,
    pub assistant_message_id: Option<String>,
    pub transcript_path: PathBuf,
}

impl NotificationDraft {
    pub fn into_record(self, message_id: MessageId, now: DateTime<Utc>) -> NotificationRecord {
        NotificationRecord {
            message_id,
            chat_id: self.chat_id,
            thread_id: self.thread_id,
            pane: self.pane,
            cwd: self.cwd,
            kind: self.kind,
            tool_call_id: self.tool_call_id,
            tool_name: self.tool_name,
            assistant_message_id: self.assistant_message_id,
            transcript_path: self.transcript_path,
            created_at: now,
            status: NotificationStatus::Pending,
            status_reason: None,
            resolved_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub message_id: MessageId,
    pub chat_id: ChatId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<ThreadId>,
    pub pane: String,
    #[serde(default)]
    pub cwd: String,
    pub kind: NotificationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_message_id: Option<String>,
    pub transcript_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub status: NotificationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl NotificationRecord {
    pub fn is_pending_permission(&self) -> bool {
        self.kind == NotificationKind::PermissionRequest && self.status.is_pending()
    }

    /// Time since the notification was sent. Clock skew counts as zero.
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).to_std().unwrap_or_default()
    }

    pub fn resolve(
        &mut self,
        status: NotificationStatus,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) {
        self.status = status;
        self.status_reason = reason.map(str::to_owned);
        self.resolved_at = Some(now);
    }
}

// ─── Transcript events ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactionPhase {
    Started,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactionTrigger {
    Auto,
    Manual,
}

impl CompactionTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
        }
    }
}

/// Where a transcript event came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PaneOrigin {
    pub pane: String,
    pub cwd: String,
    pub transcript_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub origin: PaneOrigin,
    pub call_id: String,
    pub tool_name: String,
    pub input: serde_json::Value,
    /// Assistant message the call belongs to (one turn may span several lines).
    pub assistant_message_id: Option<String>,
    /// Narrative text written in the same turn, shown above the prompt.
    pub preceding_text: Option<String>,
    /// Auto-approved calls are tracked but never surfaced.
    pub auto_approved: bool,
    /// Its result was read together with the call; the terminal already
    /// moved past it.
    pub settled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssistantText {
    pub origin: PaneOrigin,
    pub message_id: String,
    pub text: String,
    pub has_following_tool_call: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptEvent {
    ToolCallSeen(ToolCall),
    ToolResultSeen {
        origin: PaneOrigin,
        call_id: String,
    },
    AssistantTextSeen(AssistantText),
    CompactionBoundary {
        origin: PaneOrigin,
        phase: CompactionPhase,
        trigger: CompactionTrigger,
    },
}

impl TranscriptEvent {
    pub fn origin(&self) -> &PaneOrigin {
        match self {
            Self::ToolCallSeen(call) => &call.origin,
            Self::AssistantTextSeen(text) => &text.origin,
            Self::ToolResultSeen { origin, .. } | Self::CompactionBoundary { origin, .. } => {
                origin
            }
        }
    }

    pub fn pane(&self) -> &str {
        &self.origin().pane
    }
}

// ─── Tasks ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Existing directory; cleanup keeps the directory.
    Session,
    /// Dedicated git worktree; cleanup removes it.
    Worktree,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Worktree => "worktree",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = AgtchatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "session" => Ok(Self::Session),
            "worktree" => Ok(Self::Worktree),
            _ => Err(AgtchatError::UnknownVariant {
                kind: "task kind",
                value: s.to_owned(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Active,
    Paused,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Completed task metadata, the durable source of truth for a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub name: String,
    pub kind: TaskKind,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub thread_id: ThreadId,
    #[serde(default)]
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
}

/// Intent to bind a task to a chat thread whose id is not yet known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTopicMarker {
    pub name: String,
    pub kind: TaskKind,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PendingTopicMarker {
    pub fn complete(self, thread_id: ThreadId) -> TaskRecord {
        TaskRecord {
            name: self.name,
            kind: self.kind,
            path: self.path,
            repo: self.repo,
            description: self.description,
            thread_id,
            status: TaskStatus::Active,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskMarker {
    PendingTopic(PendingTopicMarker),
    Complete(TaskRecord),
}

impl TaskMarker {
    pub fn name(&self) -> &str {
        match self {
            Self::PendingTopic(pending) => &pending.name,
            Self::Complete(task) => &task.name,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::PendingTopic(_))
    }

    /// Marker files may be copied between directories; the directory they
    /// are found in wins over the recorded path.
    pub fn with_path(mut self, path: PathBuf) -> Self {
        match &mut self {
            Self::PendingTopic(pending) => pending.path = path,
            Self::Complete(task) => task.path = path,
        }
        self
    }
}

// ─── Error ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgtchatError {
    UnknownVariant { kind: &'static str, value: String },
    NotPending { message_id: MessageId, status: NotificationStatus },
    ActionNotApplicable { message_id: MessageId, kind: NotificationKind },
}

impl fmt::Display for AgtchatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownVariant { kind, value } => write!(f, "unknown {kind}: {value}"),
            Self::NotPending { message_id, status } => {
                write!(f, "notification {message_id} is {status}, not pending")
            }
            Self::ActionNotApplicable { message_id, kind } => {
                write!(f, "action not applicable to {kind} notification {message_id}")
            }
        }
    }
}

impl std::error::Error for AgtchatError {}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_760_000_000 + secs, 0)
            .single()
            .expect("valid timestamp")
    }

    fn draft() -> NotificationDraft {
        NotificationDraft {
            chat_id: -100,
            thread_id: Some(7),
            pane: "ca-demo:0.0".into(),
            cwd: "/home/u/demo".into(),
            kind: NotificationKind::PermissionRequest,
            tool_call_id: Some("toolu_1".into()),
            tool_name: Some("Bash".into()),
            assistant_message_id: Some("msg_1".into()),
            transcript_path: PathBuf::from("/tmp/t.jsonl"),
        }
    }

    #[test]
    fn status_parse_and_display() {
        for status in NotificationStatus::ALL {
            let parsed: NotificationStatus = status.to_string().parse().expect("parse");
            assert_eq!(parsed, status);
        }
        assert!("bogus".parse::<NotificationStatus>().is_err());
    }

    #[test]
    fn reply_acceptance() {
        assert!(NotificationStatus::Pending.accepts_reply());
        assert!(NotificationStatus::Superseded.accepts_reply());
        assert!(NotificationStatus::Expired.accepts_reply());
        assert!(NotificationStatus::Allowed.accepts_reply());
        assert!(!NotificationStatus::Deleted.accepts_reply());
        assert!(!NotificationStatus::Stale.accepts_reply());
    }

    #[test]
    fn draft_becomes_pending_record() {
        let record = draft().into_record(42, ts(0));
        assert_eq!(record.message_id, 42);
        assert_eq!(record.status, NotificationStatus::Pending);
        assert!(record.is_pending_permission());
        assert_eq!(record.elapsed(ts(3)), Duration::from_secs(3));
        assert_eq!(record.elapsed(ts(-5)), Duration::ZERO);
    }

    #[test]
    fn record_serde_skips_empty_optionals() {
        let mut d = draft();
        d.thread_id = None;
        d.tool_call_id = None;
        let record = d.into_record(1, ts(0));
        let json = serde_json::to_string(&record).expect("serialize");
        assert!(!json.contains("thread_id"));
        assert!(!json.contains("tool_call_id"));
        let back: NotificationRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, record);
    }

    #[test]
    fn marker_tagged_by_state() {
        let pending = PendingTopicMarker {
            name: "fix-login".into(),
            kind: TaskKind::Worktree,
            path: PathBuf::from("/repo/trees/fix-login"),
            repo: Some(PathBuf::from("/repo")),
            description: None,
            created_at: ts(0),
        };
        let marker = TaskMarker::PendingTopic(pending.clone());
        let json = serde_json::to_value(&marker).expect("serialize");
        assert_eq!(json["state"], "pending_topic");
        assert_eq!(json["kind"], "worktree");

        let done = TaskMarker::Complete(pending.complete(99));
        let json = serde_json::to_value(&done).expect("serialize");
        assert_eq!(json["state"], "complete");
        assert_eq!(json["thread_id"], 99);
        assert_eq!(json["status"], "active");
    }

    #[test]
    fn marker_path_follows_directory() {
        let marker = TaskMarker::Complete(TaskRecord {
            name: "a".into(),
            kind: TaskKind::Session,
            path: PathBuf::from("/old"),
            repo: None,
            description: None,
            thread_id: 1,
            status: TaskStatus::Paused,
            created_at: ts(0),
        });
        match marker.with_path(PathBuf::from("/new")) {
            TaskMarker::Complete(task) => assert_eq!(task.path, PathBuf::from("/new")),
            TaskMarker::PendingTopic(_) => panic!("expected complete marker"),
        }
    }

    #[test]
    fn error_display() {
        let err = AgtchatError::NotPending {
            message_id: 5,
            status: NotificationStatus::Expired,
        };
        assert_eq!(err.to_string(), "notification 5 is expired, not pending");
    }
}
