//! Task marker files: the durable source of truth for a task.
//!
//! A marker lives at `<task dir>/.agtchat-task`. It is written before any
//! remote call (pending state) and atomically replaced once the chat thread
//! id is known (complete state).

use std::fs;
use std::path::{Path, PathBuf};

use agtchat_core::TaskMarker;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::error::StoreError;
use crate::store::atomic_write;

pub const MARKER_FILE: &str = ".agtchat-task";

/// How deep below a scan root a task directory may sit.
pub const DEFAULT_SCAN_DEPTH: usize = 6;

/// Directories never descended into during a scan.
const SKIPPED_DIRS: &[&str] = &["node_modules", "target", ".git", ".cache", "Library"];

pub fn marker_path(dir: &Path) -> PathBuf {
    dir.join(MARKER_FILE)
}

pub fn read_marker(dir: &Path) -> Result<Option<TaskMarker>, StoreError> {
    let path = marker_path(dir);
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    let marker: TaskMarker =
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Json { path, source })?;
    Ok(Some(marker.with_path(dir.to_path_buf())))
}

pub fn write_marker(dir: &Path, marker: &TaskMarker) -> Result<(), StoreError> {
    let path = marker_path(dir);
    let bytes = serde_json::to_vec_pretty(marker).map_err(|source| StoreError::Json {
        path: path.clone(),
        source,
    })?;
    atomic_write(&path, &bytes)
}

/// Remove the marker. A missing marker is not an error.
pub fn remove_marker(dir: &Path) -> Result<(), StoreError> {
    let path = marker_path(dir);
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

fn descend(entry: &DirEntry) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return true;
    }
    let name = entry.file_name().to_string_lossy();
    !(name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_ref()))
}

/// Find every readable marker below `roots`. Unreadable markers are logged
/// and skipped. Results are ordered by directory path.
pub fn scan_markers(roots: &[PathBuf], max_depth: usize) -> Vec<TaskMarker> {
    let mut found: Vec<TaskMarker> = Vec::new();
    for root in roots {
        let walker = WalkDir::new(root)
            .max_depth(max_depth + 1)
            .follow_links(false)
            .into_iter()
            .filter_entry(descend);
        for entry in walker.filter_map(Result::ok) {
            if !entry.file_type().is_file() || entry.file_name() != MARKER_FILE {
                continue;
            }
            let Some(dir) = entry.path().parent() else {
                continue;
            };
            match read_marker(dir) {
                Ok(Some(marker)) => {
                    debug!(dir = %dir.display(), name = marker.name(), "found task marker");
                    if !found.iter().any(|m| m.name() == marker.name()) {
                        found.push(marker);
                    } else {
                        warn!(dir = %dir.display(), name = marker.name(), "duplicate task marker ignored");
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "skipping unreadable task marker"),
            }
        }
    }
    found.sort_by(|a, b| marker_dir(a).cmp(marker_dir(b)));
    found
}

fn marker_dir(marker: &TaskMarker) -> &Path {
    match marker {
        TaskMarker::PendingTopic(p) => &p.path,
        TaskMarker::Complete(t) => &t.path,
    }
}
