//! Session lifecycle for task panes.

use std::path::Path;

use crate::error::TmuxError;
use crate::executor::TmuxCommandRunner;
use crate::inject::{Key, send_key, send_literal};
use crate::pane_info::PANE_TARGET_FORMAT;

pub fn has_session(runner: &impl TmuxCommandRunner, name: &str) -> Result<bool, TmuxError> {
    match runner.run(&["has-session", "-t", name]) {
        Ok(_) => Ok(true),
        Err(e) if e.is_missing_target() => Ok(false),
        Err(TmuxError::CommandFailed(_)) => Ok(false),
        Err(e) => Err(e),
    }
}

/// First pane of a session, as `session:window.pane`.
pub fn first_pane(runner: &impl TmuxCommandRunner, name: &str) -> Result<Option<String>, TmuxError> {
    let out = runner.run(&["list-panes", "-t", name, "-F", PANE_TARGET_FORMAT])?;
    Ok(out.lines().map(str::trim).find(|l| !l.is_empty()).map(str::to_owned))
}

/// Create a detached session rooted at `dir` and return its pane target.
pub fn new_session(
    runner: &impl TmuxCommandRunner,
    name: &str,
    dir: &Path,
) -> Result<String, TmuxError> {
    let dir = dir.to_string_lossy();
    runner.run(&["new-session", "-d", "-s", name, "-c", &dir])?;
    first_pane(runner, name)?
        .ok_or_else(|| TmuxError::CommandFailed(format!("session {name} has no panes")))
}

pub fn kill_session(runner: &impl TmuxCommandRunner, name: &str) -> Result<(), TmuxError> {
    if !has_session(runner, name)? {
        return Ok(());
    }
    runner.run(&["kill-session", "-t", name])?;
    Ok(())
}

/// Type a shell command into a fresh pane and run it.
pub fn run_in_pane(
    runner: &impl TmuxCommandRunner,
    target: &str,
    command: &str,
) -> Result<(), TmuxError> {
    send_literal(runner, target, command)?;
    send_key(runner, target, Key::Enter)
}
