//! Multi-transcript orchestration: which files are tailed, for which panes.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use agtchat_core::{PaneOrigin, TranscriptEvent};
use tracing::info;

use crate::cursor::TranscriptCursor;
use crate::discovery;
use crate::watcher::{SessionFileWatcher, StartAt};

#[derive(Debug)]
struct Tracked {
    watcher: SessionFileWatcher,
    cursor: TranscriptCursor,
}

#[derive(Debug)]
pub struct TranscriptManager {
    projects_dir: PathBuf,
    auto_approved: HashSet<String>,
    tracked: HashMap<PathBuf, Tracked>,
    pane_paths: HashMap<String, PathBuf>,
    /// Agent panes seen by an earlier sync, with or without a transcript.
    seen_panes: HashSet<String>,
    started_at: SystemTime,
}

impl TranscriptManager {
    pub fn new(projects_dir: PathBuf, auto_approved: impl IntoIterator<Item = String>) -> Self {
        Self {
            projects_dir,
            auto_approved: auto_approved.into_iter().collect(),
            tracked: HashMap::new(),
            pane_paths: HashMap::new(),
            seen_panes: HashSet::new(),
            started_at: SystemTime::now(),
        }
    }

    pub fn auto_approved(&self) -> &HashSet<String> {
        &self.auto_approved
    }

    /// Start tailing a transcript for a pane. Returns `false` if the file was
    /// already tracked (the pane binding is refreshed either way).
    pub fn track(&mut self, origin: PaneOrigin, start: StartAt) -> bool {
        let path = origin.transcript_path.clone();

        if let Some(previous) = self.pane_paths.insert(origin.pane.clone(), path.clone()) {
            if previous != path && !self.pane_paths.values().any(|p| *p == previous) {
                self.tracked.remove(&previous);
                info!(pane = %origin.pane, path = %previous.display(), "stopped tracking superseded transcript");
            }
        }

        if let Some(existing) = self.tracked.get_mut(&path) {
            let old_pane = existing.cursor.origin().pane.clone();
            if old_pane != origin.pane {
                existing.cursor.rebind(&origin.pane, &origin.cwd);
                if self.pane_paths.get(&old_pane) == Some(&path) {
                    self.pane_paths.remove(&old_pane);
                }
            }
            return false;
        }

        info!(pane = %origin.pane, path = %path.display(), ?start, "tracking transcript");
        self.tracked.insert(
            path.clone(),
            Tracked {
                watcher: SessionFileWatcher::new(path, start),
                cursor: TranscriptCursor::new(origin),
            },
        );
        true
    }

    /// Bind each agent pane to the newest transcript of its cwd.
    ///
    /// Transcripts that predate this manager are tailed from their end. A
    /// transcript that appeared later (a new session, or a pane that had none
    /// at its last sync) is read from its first line. Returns the origins that
    /// started being tracked.
    pub fn sync_panes<'a>(
        &mut self,
        panes: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Vec<PaneOrigin> {
        let mut added = Vec::new();
        for (pane, cwd) in panes {
            let seen_before = !self.seen_panes.insert(pane.to_owned());
            let Some(path) = discovery::newest_transcript(&self.projects_dir, cwd) else {
                continue;
            };
            if self.pane_paths.get(pane) == Some(&path) {
                continue;
            }
            let start = if seen_before || self.created_since_start(&path) {
                StartAt::Beginning
            } else {
                StartAt::End
            };
            let origin = PaneOrigin {
                pane: pane.to_owned(),
                cwd: cwd.to_owned(),
                transcript_path: path,
            };
            if self.track(origin.clone(), start) {
                added.push(origin);
            }
        }
        added
    }

    fn created_since_start(&self, path: &Path) -> bool {
        std::fs::metadata(path)
            .and_then(|m| m.created())
            .is_ok_and(|created| created > self.started_at)
    }

    /// Read every tracked transcript once. Files are visited in path order.
    pub fn poll_all(&mut self) -> Vec<TranscriptEvent> {
        let mut paths: Vec<&PathBuf> = self.tracked.keys().collect();
        paths.sort();
        let paths: Vec<PathBuf> = paths.into_iter().cloned().collect();

        let mut events = Vec::new();
        for path in paths {
            if let Some(tracked) = self.tracked.get_mut(&path) {
                let lines = tracked.watcher.poll_new_lines();
                if !lines.is_empty() {
                    events.extend(tracked.cursor.apply(&lines, &self.auto_approved));
                }
            }
        }
        events
    }

    /// Drop transcripts bound to panes not in `live`. Returns the dropped panes.
    pub fn retain_panes(&mut self, live: &HashSet<String>) -> Vec<String> {
        let dead: Vec<String> = self
            .pane_paths
            .keys()
            .filter(|pane| !live.contains(*pane))
            .cloned()
            .collect();
        for pane in &dead {
            self.seen_panes.remove(pane);
            if let Some(path) = self.pane_paths.remove(pane) {
                self.tracked.remove(&path);
                info!(pane = %pane, path = %path.display(), "stopped tracking (pane gone)");
            }
        }
        dead
    }

    pub fn transcript_for_pane(&self, pane: &str) -> Option<&Path> {
        self.pane_paths.get(pane).map(PathBuf::as_path)
    }

    pub fn origin_for_pane(&self, pane: &str) -> Option<&PaneOrigin> {
        let path = self.pane_paths.get(pane)?;
        self.tracked.get(path).map(|t| t.cursor.origin())
    }

    pub fn tracked_panes(&self) -> impl Iterator<Item = &str> {
        self.pane_paths.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }
}
