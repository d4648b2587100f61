//! Error types for the tmux backend.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TmuxError {
    #[error("tmux command failed: {0}")]
    CommandFailed(String),

    #[error("failed to parse list-panes line {line_num}: {detail}")]
    ParseError { line_num: usize, detail: String },

    #[error("tmux command timed out after {0:?}")]
    Timeout(Duration),

    #[error("tmux io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TmuxError {
    /// tmux reports a missing target as a plain command failure.
    pub fn is_missing_target(&self) -> bool {
        match self {
            Self::CommandFailed(msg) => {
                msg.contains("can't find") || msg.contains("no server running")
            }
            _ => false,
        }
    }
}
