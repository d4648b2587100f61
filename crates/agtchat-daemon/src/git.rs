//! Worktree management for worktree tasks.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{info, warn};

use crate::error::TaskError;

/// Repository-provided script run in a fresh worktree.
pub const SETUP_HOOK: &str = ".agtchat-setup.sh";

const GIT_TIMEOUT: Duration = Duration::from_secs(30);
const HOOK_TIMEOUT: Duration = Duration::from_secs(60);

pub fn worktree_path(repo: &Path, name: &str) -> PathBuf {
    repo.join("trees").join(name)
}

async fn run(mut cmd: Command, action: &'static str, timeout: Duration) -> Result<String, TaskError> {
    cmd.stdin(Stdio::null()).kill_on_drop(true);
    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(TaskError::Git {
                action,
                detail: e.to_string(),
            });
        }
        Err(_) => {
            return Err(TaskError::Git {
                action,
                detail: format!("timed out after {timeout:?}"),
            });
        }
    };
    if !output.status.success() {
        return Err(TaskError::Git {
            action,
            detail: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn git(repo: &Path) -> Command {
    let mut cmd = Command::new("git");
    cmd.arg("-C").arg(repo);
    cmd
}

/// Create `<repo>/trees/<name>` on a new branch `<name>`, or on the
/// existing branch of that name.
pub async fn add_worktree(repo: &Path, name: &str) -> Result<PathBuf, TaskError> {
    let path = worktree_path(repo, name);
    if path.exists() {
        return Err(TaskError::AlreadyExists(name.to_owned()));
    }
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| TaskError::Git {
                action: "worktree add",
                detail: e.to_string(),
            })?;
    }

    let mut fresh = git(repo);
    fresh.args(["worktree", "add", "-b", name]).arg(&path).arg("HEAD");
    if let Err(first) = run(fresh, "worktree add", GIT_TIMEOUT).await {
        let mut existing = git(repo);
        existing.args(["worktree", "add"]).arg(&path).arg(name);
        run(existing, "worktree add", GIT_TIMEOUT).await.map_err(|second| {
            warn!(error = %first, "new-branch worktree failed");
            second
        })?;
    }
    info!(repo = %repo.display(), path = %path.display(), "worktree created");
    Ok(path)
}

pub async fn remove_worktree(repo: &Path, path: &Path) -> Result<(), TaskError> {
    if !path.exists() {
        return Ok(());
    }
    let mut cmd = git(repo);
    cmd.args(["worktree", "remove", "--force"]).arg(path);
    run(cmd, "worktree remove", GIT_TIMEOUT).await?;
    info!(path = %path.display(), "worktree removed");
    Ok(())
}

/// Run the repository's setup hook in the worktree. Returns `false` when
/// the repository has none.
pub async fn run_setup_hook(repo: &Path, name: &str, worktree: &Path) -> Result<bool, TaskError> {
    let hook = repo.join(SETUP_HOOK);
    if !hook.is_file() {
        return Ok(false);
    }
    let mut cmd = Command::new("bash");
    cmd.arg(&hook)
        .current_dir(worktree)
        .env("TASK_NAME", name)
        .env("REPO_PATH", repo)
        .env("WORKTREE_PATH", worktree);
    run(cmd, "setup hook", HOOK_TIMEOUT).await?;
    info!(hook = %hook.display(), "setup hook completed");
    Ok(true)
}
