//! CWD-based transcript discovery.
//!
//! Claude Code stores each project's transcripts under
//! `~/.claude/projects/<encoded cwd>/<session>.jsonl`; the newest file by
//! modification time belongs to the live session.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::warn;

/// Encode a path the way Claude Code names project directories.
/// Example: `/Users/vm/my.project` -> `-Users-vm-my-project`
pub fn encode_path(path: &str) -> String {
    path.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect()
}

/// `~/.claude/projects`, or `None` without a home directory.
pub fn default_projects_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".claude").join("projects"))
}

/// Project directory holding the transcripts for `cwd`.
pub fn project_dir(projects_dir: &Path, cwd: &str) -> PathBuf {
    let canonical = std::fs::canonicalize(cwd)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| cwd.to_owned());
    projects_dir.join(encode_path(&canonical))
}

/// Most recently modified transcript for `cwd`.
pub fn newest_transcript(projects_dir: &Path, cwd: &str) -> Option<PathBuf> {
    let dir = project_dir(projects_dir, cwd);
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "failed to list transcripts");
            return None;
        }
    };

    entries
        .filter_map(Result::ok)
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "jsonl"))
        .filter_map(|entry| {
            let modified = entry.metadata().ok()?.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            Some((modified, entry.path()))
        })
        .max_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)))
        .map(|(_, path)| path)
}
