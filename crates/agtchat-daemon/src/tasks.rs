//! Task lifecycle: spawn, pause, resume, cleanup, and session resurrection.

use std::path::Path;
use std::sync::Arc;

use agtchat_core::{PendingTopicMarker, TaskKind, TaskMarker, TaskRecord, TaskStatus};
use agtchat_tmux::session::{first_pane, kill_session, new_session, run_in_pane};
use agtchat_tmux::{TmuxCommandRunner, pane_exists};
use chrono::Utc;
use tracing::{info, warn};

use crate::context::DaemonContext;
use crate::error::TaskError;
use crate::git;
use crate::marker::{read_marker, remove_marker, write_marker};
use crate::registry::RegistryEntry;
use crate::topics::TopicProtocol;

pub fn validate_name(name: &str) -> Result<(), TaskError> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(TaskError::InvalidName(name.to_owned()))
    }
}

/// Single-quote `s` for a POSIX shell.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn agent_command_line(agent: &str, description: Option<&str>, resume: bool) -> String {
    let fresh = match description {
        Some(d) if !d.trim().is_empty() => format!("{agent} {}", shell_quote(d)),
        _ => agent.to_owned(),
    };
    if resume {
        format!("{agent} --continue || {fresh}")
    } else {
        fresh
    }
}

async fn blocking<T, F>(tmux: &Arc<dyn TmuxCommandRunner>, f: F) -> Result<T, TaskError>
where
    T: Send + 'static,
    F: FnOnce(&Arc<dyn TmuxCommandRunner>) -> Result<T, agtchat_tmux::TmuxError> + Send + 'static,
{
    let tmux = tmux.clone();
    tokio::task::spawn_blocking(move || f(&tmux))
        .await
        .map_err(|e| TaskError::Join(e.to_string()))?
        .map_err(TaskError::from)
}

#[derive(Debug, Clone)]
pub struct TaskManager {
    ctx: DaemonContext,
    topics: TopicProtocol,
}

impl TaskManager {
    pub fn new(ctx: DaemonContext, topics: TopicProtocol) -> Self {
        Self { ctx, topics }
    }

    fn claim_name(&self, name: &str) -> Result<(), TaskError> {
        validate_name(name)?;
        if self.ctx.registry.snapshot()?.is_taken(name) {
            return Err(TaskError::AlreadyExists(name.to_owned()));
        }
        Ok(())
    }

    /// `base`, or `base-2`, `base-3`… whichever is free.
    pub fn unique_name(&self, base: &str) -> Result<String, TaskError> {
        let mut base: String = base
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
            .collect();
        if base.is_empty() {
            base = "task".into();
        }
        let registry = self.ctx.registry.snapshot()?;
        if !registry.is_taken(&base) {
            return Ok(base);
        }
        let mut n = 2;
        loop {
            let candidate = format!("{base}-{n}");
            if !registry.is_taken(&candidate) {
                return Ok(candidate);
            }
            n += 1;
        }
    }

    /// New task in an existing directory, with a fresh agent session.
    pub async fn spawn_session(
        &self,
        name: &str,
        dir: &Path,
        description: Option<String>,
    ) -> Result<TaskRecord, TaskError> {
        self.claim_name(name)?;
        if !dir.is_dir() {
            return Err(TaskError::NotADirectory(dir.to_path_buf()));
        }
        if let Some(marker) = read_marker(dir)? {
            return Err(TaskError::AlreadyExists(marker.name().to_owned()));
        }
        let task = self
            .topics
            .create(PendingTopicMarker {
                name: name.to_owned(),
                kind: TaskKind::Session,
                path: dir.to_path_buf(),
                repo: None,
                description,
                created_at: Utc::now(),
            })
            .await?;
        let pane = self.start_session(&task, false).await?;
        self.ctx.registry.set_pane(&task.name, Some(pane))?;
        Ok(task)
    }

    /// New task in a fresh worktree of `repo`.
    pub async fn spawn_worktree(
        &self,
        name: &str,
        repo: &Path,
        description: Option<String>,
    ) -> Result<TaskRecord, TaskError> {
        self.claim_name(name)?;
        if !repo.is_dir() {
            return Err(TaskError::NotADirectory(repo.to_path_buf()));
        }
        let path = git::add_worktree(repo, name).await?;
        if let Err(e) = git::run_setup_hook(repo, name, &path).await {
            warn!(task = name, error = %e, "setup hook failed, continuing");
        }
        let task = self
            .topics
            .create(PendingTopicMarker {
                name: name.to_owned(),
                kind: TaskKind::Worktree,
                path,
                repo: Some(repo.to_path_buf()),
                description,
                created_at: Utc::now(),
            })
            .await?;
        let pane = self.start_session(&task, false).await?;
        self.ctx.registry.set_pane(&task.name, Some(pane))?;
        Ok(task)
    }

    /// Bind an agent already running in `pane` to a new session task.
    pub async fn register_existing(&self, pane: &str, dir: &Path) -> Result<TaskRecord, TaskError> {
        let base = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = self.unique_name(&base)?;
        let task = self
            .topics
            .create(PendingTopicMarker {
                name,
                kind: TaskKind::Session,
                path: dir.to_path_buf(),
                repo: None,
                description: None,
                created_at: Utc::now(),
            })
            .await?;
        self.ctx.registry.set_pane(&task.name, Some(pane.to_owned()))?;
        info!(task = %task.name, pane, "registered running agent");
        Ok(task)
    }

    async fn start_session(&self, task: &TaskRecord, resume: bool) -> Result<String, TaskError> {
        let session = self.ctx.registry.session_name(&task.name);
        let dir = task.path.clone();
        let command = agent_command_line(&self.ctx.settings.agent_command, task.description.as_deref(), resume);
        let pane = blocking(&self.ctx.tmux, move |tmux| {
            kill_session(tmux, &session)?;
            let pane = new_session(tmux, &session, &dir)?;
            run_in_pane(tmux, &pane, &command)?;
            Ok(pane)
        })
        .await?;
        info!(task = %task.name, pane = %pane, resume, "agent session started");
        Ok(pane)
    }

    fn entry(&self, name: &str) -> Result<RegistryEntry, TaskError> {
        self.ctx
            .registry
            .get(name)?
            .ok_or_else(|| TaskError::NotFound(name.to_owned()))
    }

    fn write_status(&self, task: &TaskRecord, status: TaskStatus) -> Result<(), TaskError> {
        let mut updated = task.clone();
        updated.status = status;
        write_marker(&task.path, &TaskMarker::Complete(updated))?;
        self.ctx.registry.set_status(&task.name, status)?;
        Ok(())
    }

    async fn pane_alive(&self, pane: Option<String>) -> bool {
        let Some(pane) = pane else {
            return false;
        };
        blocking(&self.ctx.tmux, move |tmux| pane_exists(tmux, &pane))
            .await
            .unwrap_or(false)
    }

    pub async fn pause(&self, name: &str) -> Result<TaskRecord, TaskError> {
        let entry = self.entry(name)?;
        if entry.task.status == TaskStatus::Paused {
            return Err(TaskError::WrongStatus {
                name: name.to_owned(),
                status: entry.task.status.to_string(),
            });
        }
        let session = self.ctx.registry.session_name(name);
        blocking(&self.ctx.tmux, move |tmux| kill_session(tmux, &session)).await?;
        self.write_status(&entry.task, TaskStatus::Paused)?;
        self.ctx.registry.set_pane(name, None)?;
        info!(task = name, "task paused");
        Ok(TaskRecord {
            status: TaskStatus::Paused,
            ..entry.task
        })
    }

    pub async fn resume(&self, name: &str) -> Result<TaskRecord, TaskError> {
        let entry = self.entry(name)?;
        if entry.task.status == TaskStatus::Active && self.pane_alive(entry.pane.clone()).await {
            return Err(TaskError::WrongStatus {
                name: name.to_owned(),
                status: "already running".to_owned(),
            });
        }
        self.write_status(&entry.task, TaskStatus::Active)?;
        let task = TaskRecord {
            status: TaskStatus::Active,
            ..entry.task
        };
        let pane = self.start_session(&task, true).await?;
        self.ctx.registry.set_pane(name, Some(pane))?;
        info!(task = name, "task resumed");
        Ok(task)
    }

    /// Tear a task down. The thread is closed, not deleted, so history stays.
    pub async fn cleanup(&self, name: &str) -> Result<TaskRecord, TaskError> {
        let entry = self.entry(name)?;
        let task = entry.task;
        let session = self.ctx.registry.session_name(name);
        blocking(&self.ctx.tmux, move |tmux| kill_session(tmux, &session)).await?;
        if let Err(e) = self.ctx.chat.close_topic(self.ctx.chat_id(), task.thread_id).await {
            warn!(task = name, error = %e, "could not close thread");
        }
        match (&task.kind, &task.repo) {
            (TaskKind::Worktree, Some(repo)) => git::remove_worktree(repo, &task.path).await?,
            _ => remove_marker(&task.path)?,
        }
        self.ctx.registry.remove(name)?;
        info!(task = name, "task cleaned up");
        Ok(task)
    }

    /// Pane that input for `entry` should go to, starting the session again
    /// if it died. `None` for paused tasks.
    pub async fn ensure_session(&self, entry: &RegistryEntry) -> Result<Option<String>, TaskError> {
        if entry.task.status == TaskStatus::Paused {
            return Ok(None);
        }
        if self.pane_alive(entry.pane.clone()).await {
            return Ok(entry.pane.clone());
        }
        let session = self.ctx.registry.session_name(&entry.task.name);
        let existing = blocking(&self.ctx.tmux, move |tmux| {
            if agtchat_tmux::session::has_session(tmux, &session)? {
                first_pane(tmux, &session)
            } else {
                Ok(None)
            }
        })
        .await?;
        let pane = match existing {
            Some(pane) => pane,
            None => {
                info!(task = %entry.task.name, "session gone, resurrecting");
                self.start_session(&entry.task, true).await?
            }
        };
        self.ctx.registry.set_pane(&entry.task.name, Some(pane.clone()))?;
        Ok(Some(pane))
    }

    pub fn tasks(&self) -> Result<Vec<RegistryEntry>, TaskError> {
        Ok(self.ctx.registry.tasks()?)
    }
}
