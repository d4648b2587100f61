//! Task registry: a disposable cache of task markers.
//!
//! Maps task name → last-known task record and pane. It is never the source
//! of truth; [`Registry::rebuild`] repopulates it from a marker scan, so
//! loss or corruption only costs a scan.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use agtchat_core::{PendingTopicMarker, TaskMarker, TaskRecord, TaskStatus, ThreadId};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::StoreError;
use crate::marker::{DEFAULT_SCAN_DEPTH, scan_markers};
use crate::store::LockedJson;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    #[serde(flatten)]
    pub task: TaskRecord,
    /// Last pane the task's agent was seen in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pane: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryFile {
    #[serde(default)]
    pub tasks: BTreeMap<String, RegistryEntry>,
    /// Tasks whose chat thread is not yet durably recorded.
    #[serde(default)]
    pub pending: BTreeMap<String, PendingTopicMarker>,
}

/// Session name of a pane target (`session:window.pane`).
pub fn session_of_pane(pane: &str) -> &str {
    pane.split(':').next().unwrap_or(pane)
}

impl RegistryFile {
    pub fn for_thread(&self, thread_id: ThreadId) -> Option<&RegistryEntry> {
        self.tasks.values().find(|e| e.task.thread_id == thread_id)
    }

    pub fn for_pane(&self, pane: &str, session_prefix: &str) -> Option<&RegistryEntry> {
        let session = session_of_pane(pane);
        self.tasks
            .values()
            .find(|e| e.pane.as_deref() == Some(pane))
            .or_else(|| {
                self.tasks
                    .values()
                    .find(|e| session.strip_prefix(session_prefix) == Some(e.task.name.as_str()))
            })
    }

    pub fn for_dir(&self, dir: &Path) -> Option<&RegistryEntry> {
        self.tasks.values().find(|e| e.task.path == dir)
    }

    /// Whether a task or pending task already claims `name`.
    pub fn is_taken(&self, name: &str) -> bool {
        self.tasks.contains_key(name) || self.pending.contains_key(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildReport {
    pub tasks: usize,
    pub pending: usize,
    /// Complete tasks that were missing from the cache.
    pub added: Vec<String>,
    /// Cached tasks with no marker on disk anymore.
    pub dropped: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Registry {
    file: LockedJson<RegistryFile>,
    scan_roots: Vec<PathBuf>,
    scan_depth: usize,
    session_prefix: String,
}

impl Registry {
    pub fn new(path: impl Into<PathBuf>, scan_roots: Vec<PathBuf>, session_prefix: impl Into<String>) -> Self {
        Self {
            file: LockedJson::new(path),
            scan_roots,
            scan_depth: DEFAULT_SCAN_DEPTH,
            session_prefix: session_prefix.into(),
        }
    }

    pub fn session_prefix(&self) -> &str {
        &self.session_prefix
    }

    /// Multiplexer session name for a task.
    pub fn session_name(&self, task: &str) -> String {
        format!("{}{task}", self.session_prefix)
    }

    pub fn scan_roots(&self) -> &[PathBuf] {
        &self.scan_roots
    }

    pub fn snapshot(&self) -> Result<RegistryFile, StoreError> {
        self.file.read()
    }

    pub fn get(&self, name: &str) -> Result<Option<RegistryEntry>, StoreError> {
        Ok(self.file.read()?.tasks.remove(name))
    }

    pub fn tasks(&self) -> Result<Vec<RegistryEntry>, StoreError> {
        Ok(self.file.read()?.tasks.into_values().collect())
    }

    pub fn pending(&self) -> Result<Vec<PendingTopicMarker>, StoreError> {
        Ok(self.file.read()?.pending.into_values().collect())
    }

    pub fn for_thread(&self, thread_id: ThreadId) -> Result<Option<RegistryEntry>, StoreError> {
        Ok(self.file.read()?.for_thread(thread_id).cloned())
    }

    pub fn for_pane(&self, pane: &str) -> Result<Option<RegistryEntry>, StoreError> {
        Ok(self.file.read()?.for_pane(pane, &self.session_prefix).cloned())
    }

    pub fn add_pending(&self, marker: PendingTopicMarker) -> Result<(), StoreError> {
        self.file.update(|f| {
            f.pending.insert(marker.name.clone(), marker);
        })
    }

    pub fn remove_pending(&self, name: &str) -> Result<(), StoreError> {
        self.file.update(|f| {
            f.pending.remove(name);
        })
    }

    /// Insert or replace a complete task, keeping its last-known pane.
    pub fn upsert(&self, task: TaskRecord) -> Result<(), StoreError> {
        self.file.update(|f| {
            f.pending.remove(&task.name);
            let pane = f.tasks.get(&task.name).and_then(|e| e.pane.clone());
            f.tasks.insert(task.name.clone(), RegistryEntry { task, pane });
        })
    }

    pub fn remove(&self, name: &str) -> Result<Option<RegistryEntry>, StoreError> {
        self.file.update(|f| {
            f.pending.remove(name);
            f.tasks.remove(name)
        })
    }

    pub fn set_status(&self, name: &str, status: TaskStatus) -> Result<bool, StoreError> {
        self.file.update(|f| match f.tasks.get_mut(name) {
            Some(entry) => {
                entry.task.status = status;
                true
            }
            None => false,
        })
    }

    pub fn set_pane(&self, name: &str, pane: Option<String>) -> Result<(), StoreError> {
        self.file.update(|f| {
            if let Some(entry) = f.tasks.get_mut(name) {
                entry.pane = pane;
            }
        })
    }

    /// Replace the cache with what the marker files say.
    pub fn rebuild(&self) -> Result<RebuildReport, StoreError> {
        let markers = scan_markers(&self.scan_roots, self.scan_depth);
        let report = self.file.update(|f| {
            let mut tasks = BTreeMap::new();
            let mut pending = BTreeMap::new();
            let mut added = Vec::new();
            for marker in markers {
                match marker {
                    TaskMarker::Complete(task) => {
                        let pane = match f.tasks.get(&task.name) {
                            Some(old) => old.pane.clone(),
                            None => {
                                added.push(task.name.clone());
                                None
                            }
                        };
                        tasks.insert(task.name.clone(), RegistryEntry { task, pane });
                    }
                    TaskMarker::PendingTopic(p) => {
                        pending.insert(p.name.clone(), p);
                    }
                }
            }
            let dropped = f
                .tasks
                .keys()
                .filter(|name| !tasks.contains_key(*name))
                .cloned()
                .collect();
            f.tasks = tasks;
            f.pending = pending;
            RebuildReport {
                tasks: f.tasks.len(),
                pending: f.pending.len(),
                added,
                dropped,
            }
        })?;
        info!(
            tasks = report.tasks,
            pending = report.pending,
            added = report.added.len(),
            dropped = report.dropped.len(),
            "registry rebuilt from markers"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker::write_marker;
    use agtchat_core::TaskKind;
    use chrono::Utc;

    fn task(name: &str, dir: &Path, thread_id: ThreadId, kind: TaskKind) -> TaskRecord {
        TaskRecord {
            name: name.into(),
            kind,
            path: dir.to_path_buf(),
            repo: None,
            description: Some(format!("work on {name}")),
            thread_id,
            status: TaskStatus::Active,
            created_at: Utc::now(),
        }
    }

    fn setup() -> (tempfile::TempDir, Registry) {
        let root = tempfile::tempdir().expect("test");
        let registry = Registry::new(
            root.path().join("state/registry.json"),
            vec![root.path().join("work")],
            "ca-",
        );
        (root, registry)
    }

    #[test]
    fn lookups_by_thread_and_pane() {
        let (root, registry) = setup();
        registry
            .upsert(task("api", &root.path().join("work/api"), 11, TaskKind::Session))
            .expect("test");
        registry
            .upsert(task("web", &root.path().join("work/web"), 12, TaskKind::Worktree))
            .expect("test");
        registry.set_pane("web", Some("main:1.0".into())).expect("test");

        assert_eq!(registry.for_thread(11).expect("test").map(|e| e.task.name), Some("api".into()));
        assert_eq!(registry.for_pane("ca-api:0.0").expect("test").map(|e| e.task.name), Some("api".into()));
        assert_eq!(registry.for_pane("main:1.0").expect("test").map(|e| e.task.name), Some("web".into()));
        assert!(registry.for_pane("other:0.0").expect("test").is_none());
    }

    #[test]
    fn rebuild_reproduces_task_set_after_corruption() {
        let (root, registry) = setup();
        let mut expected = Vec::new();
        for (i, name) in ["alpha", "beta", "gamma"].into_iter().enumerate() {
            let dir = root.path().join("work").join(name);
            std::fs::create_dir_all(&dir).expect("test");
            let kind = if i % 2 == 0 { TaskKind::Session } else { TaskKind::Worktree };
            let t = task(name, &dir, 100 + i as i64, kind);
            write_marker(&dir, &TaskMarker::Complete(t.clone())).expect("test");
            registry.upsert(t.clone()).expect("test");
            expected.push((t.name, t.kind, t.path, t.thread_id));
        }
        let pending_dir = root.path().join("work/delta");
        std::fs::create_dir_all(&pending_dir).expect("test");
        write_marker(
            &pending_dir,
            &TaskMarker::PendingTopic(PendingTopicMarker {
                name: "delta".into(),
                kind: TaskKind::Session,
                path: pending_dir.clone(),
                repo: None,
                description: None,
                created_at: Utc::now(),
            }),
        )
        .expect("test");

        std::fs::write(root.path().join("state/registry.json"), "garbage{").expect("test");

        let report = registry.rebuild().expect("test");
        assert_eq!(report.tasks, 3);
        assert_eq!(report.pending, 1);
        assert_eq!(report.added.len(), 3);

        let rebuilt: Vec<_> = registry
            .tasks()
            .expect("test")
            .into_iter()
            .map(|e| (e.task.name, e.task.kind, e.task.path, e.task.thread_id))
            .collect();
        assert_eq!(rebuilt, expected);
        assert_eq!(registry.pending().expect("test")[0].name, "delta");
    }

    #[test]
    fn rebuild_keeps_panes_and_drops_vanished() {
        let (root, registry) = setup();
        let dir = root.path().join("work/kept");
        std::fs::create_dir_all(&dir).expect("test");
        let kept = task("kept", &dir, 1, TaskKind::Session);
        write_marker(&dir, &TaskMarker::Complete(kept.clone())).expect("test");
        registry.upsert(kept).expect("test");
        registry.set_pane("kept", Some("ca-kept:0.0".into())).expect("test");
        registry
            .upsert(task("gone", &root.path().join("work/gone"), 2, TaskKind::Session))
            .expect("test");

        let report = registry.rebuild().expect("test");
        assert!(report.added.is_empty());
        assert_eq!(report.dropped, ["gone"]);
        assert_eq!(
            registry.get("kept").expect("test").and_then(|e| e.pane),
            Some("ca-kept:0.0".into())
        );
    }
}
