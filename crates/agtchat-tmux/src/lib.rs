//! agtchat-tmux: tmux backend IO boundary.
//! Provides subprocess execution with deadlines, pane listing and liveness,
//! keystroke/text injection, and session lifecycle. No business logic.

pub mod error;
pub mod executor;
pub mod inject;
pub mod pane_info;
pub mod session;

pub use error::TmuxError;
pub use executor::{TmuxCommandRunner, TmuxExecutor};
pub use inject::{Key, Pacing, PromptChoice};
pub use pane_info::{LIST_PANES_FORMAT, TmuxPaneInfo, list_panes, pane_exists};
