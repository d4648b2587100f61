//! agtchat-source-claude-jsonl: transcript source for Claude Code sessions.
//! Tails the per-session JSONL transcripts, decodes each line into a closed
//! set of shapes, and turns them into [`agtchat_core::TranscriptEvent`]s.

pub mod cursor;
pub mod discovery;
pub mod manager;
pub mod scan;
pub mod translate;
pub mod watcher;

pub use cursor::TranscriptCursor;
pub use manager::TranscriptManager;
pub use scan::{PendingCall, has_tool_result, pending_tool_calls};
pub use translate::{DEFAULT_AUTO_APPROVED_TOOLS, TranscriptLine};
pub use watcher::{SessionFileWatcher, StartAt};
