use std::path::PathBuf;

use agtchat_telegram::ChatError;
use agtchat_tmux::TmuxError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid json in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("could not lock {0}")]
    Lock(PathBuf),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum InjectError {
    /// The pane is gone or did not answer in time. Related state is dropped, never retried.
    #[error("pane {0} is gone")]
    PaneDead(String),

    #[error(transparent)]
    Tmux(#[from] TmuxError),

    #[error("injection task failed: {0}")]
    Join(String),
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("invalid task name {0:?}: use letters, digits, '-' and '_'")]
    InvalidName(String),

    #[error("task {0} already exists")]
    AlreadyExists(String),

    #[error("task {0} not found")]
    NotFound(String),

    #[error("task {name} is {status}")]
    WrongStatus { name: String, status: String },

    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),

    #[error("git {action} failed: {detail}")]
    Git { action: &'static str, detail: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error(transparent)]
    Tmux(#[from] TmuxError),

    #[error("background task failed: {0}")]
    Join(String),
}
