//! TmuxPaneInfo, list_panes format string, and parser.

use crate::error::TmuxError;
use crate::executor::TmuxCommandRunner;
use serde::{Deserialize, Serialize};

/// Tab-delimited format string for `tmux list-panes -F`.
pub const LIST_PANES_FORMAT: &str = "#{session_name}:#{window_index}.#{pane_index}\t#{pane_id}\t#{session_name}\t#{pane_current_command}\t#{pane_current_path}";

/// Format for addressing a pane by session coordinates.
pub const PANE_TARGET_FORMAT: &str = "#{session_name}:#{window_index}.#{pane_index}";

/// Metadata for one tmux pane.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TmuxPaneInfo {
    /// `session:window.pane` coordinates; the address used for injection.
    pub target: String,
    pub pane_id: String,
    pub session_name: String,
    pub current_cmd: String,
    pub current_path: String,
}

impl TmuxPaneInfo {
    /// Whether the pane's foreground process looks like the agent CLI.
    ///
    /// The agent runs under node and some releases rename the process to
    /// their version number, so both are accepted besides the command name.
    pub fn runs_agent(&self, agent_command: &str) -> bool {
        let cmd = self.current_cmd.as_str();
        cmd.starts_with(agent_command)
            || cmd == "node"
            || (cmd.contains('.') && cmd.chars().all(|c| c.is_ascii_digit() || c == '.'))
    }
}

/// Execute `tmux list-panes -a` and parse the output.
pub fn list_panes(runner: &impl TmuxCommandRunner) -> Result<Vec<TmuxPaneInfo>, TmuxError> {
    match runner.run(&["list-panes", "-a", "-F", LIST_PANES_FORMAT]) {
        Ok(output) => parse_list_panes_output(&output),
        // No server means no panes, not a failure.
        Err(e) if e.is_missing_target() => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

/// Whether the pane still exists. Only a definite "not found" answers `false`.
pub fn pane_exists(runner: &impl TmuxCommandRunner, target: &str) -> Result<bool, TmuxError> {
    match runner.run(&["display-message", "-p", "-t", target, "#{pane_id}"]) {
        Ok(out) => Ok(!out.trim().is_empty()),
        Err(e) if e.is_missing_target() => Ok(false),
        Err(e) => Err(e),
    }
}

/// Parse the raw output of `tmux list-panes -F <FORMAT>`.
pub fn parse_list_panes_output(output: &str) -> Result<Vec<TmuxPaneInfo>, TmuxError> {
    let mut panes = Vec::new();
    for (idx, line) in output.lines().enumerate() {
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.trim().is_empty() {
            continue;
        }
        panes.push(parse_line(trimmed, idx + 1)?);
    }
    Ok(panes)
}

fn parse_line(line: &str, line_num: usize) -> Result<TmuxPaneInfo, TmuxError> {
    let parts: Vec<&str> = line.splitn(5, '\t').collect();
    if parts.len() < 5 {
        return Err(TmuxError::ParseError {
            line_num,
            detail: format!("expected 5 tab-separated fields, got {}", parts.len()),
        });
    }

    Ok(TmuxPaneInfo {
        target: parts[0].to_string(),
        pane_id: parts[1].to_string(),
        session_name: parts[2].to_string(),
        current_cmd: parts[3].to_string(),
        current_path: parts[4].to_string(),
    })
}
