//! Durable JSON state shared by the daemon loops and the CLI.
//!
//! Every read-modify-write happens under an exclusive advisory lock on a
//! sibling `.lock` file, and every write replaces the file atomically
//! (write temp, fsync, rename), so a crash leaves either the old or the new
//! content on disk.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use agtchat_core::{MessageId, NotificationKind, NotificationRecord, PaneOrigin, ThreadId};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::StoreError;

// ─── Locked file ──────────────────────────────────────────────────

pub struct LockedJson<T> {
    path: PathBuf,
    lock_path: PathBuf,
    _value: PhantomData<fn() -> T>,
}

impl<T> Clone for LockedJson<T> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            lock_path: self.lock_path.clone(),
            _value: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for LockedJson<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockedJson").field("path", &self.path).finish()
    }
}

impl<T: Serialize + DeserializeOwned + Default> LockedJson<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = path.with_extension("lock");
        Self {
            path,
            lock_path,
            _value: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the current content.
    pub fn read(&self) -> Result<T, StoreError> {
        let _guard = self.lock(false)?;
        self.load()
    }

    /// Atomic read-modify-write. The closure's return value is passed through.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, StoreError> {
        let _guard = self.lock(true)?;
        let mut value = self.load()?;
        let out = f(&mut value);
        let bytes = serde_json::to_vec_pretty(&value).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })?;
        atomic_write(&self.path, &bytes)?;
        Ok(out)
    }

    fn lock(&self, exclusive: bool) -> Result<File, StoreError> {
        if let Some(parent) = self.lock_path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.lock_path)
            .map_err(|e| StoreError::io(&self.lock_path, e))?;
        let locked = if exclusive {
            file.lock_exclusive()
        } else {
            file.lock_shared()
        };
        locked.map_err(|_| StoreError::Lock(self.lock_path.clone()))?;
        Ok(file)
    }

    fn load(&self) -> Result<T, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(T::default());
        }
        match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(value),
            Err(e) => {
                let aside = self.path.with_extension("corrupt");
                warn!(path = %self.path.display(), error = %e, aside = %aside.display(), "state file unreadable, starting empty");
                fs::rename(&self.path, &aside).map_err(|e| StoreError::io(&self.path, e))?;
                Ok(T::default())
            }
        }
    }
}

/// Replace `path` with `bytes` so readers see either the old or the new file.
pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dir.join(format!(".{name}.{}.tmp", std::process::id()));

    let mut file = File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
    file.write_all(bytes).map_err(|e| StoreError::io(&tmp, e))?;
    file.sync_all().map_err(|e| StoreError::io(&tmp, e))?;
    drop(file);
    fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))
}

// ─── Daemon state ─────────────────────────────────────────────────

/// Notification records, the update cursor, and learned thread names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DaemonState {
    /// Next update id to request. Only advanced after an update is processed.
    #[serde(default)]
    pub update_offset: i64,
    #[serde(default)]
    pub notifications: BTreeMap<MessageId, NotificationRecord>,
    /// Thread id → name, from thread-creation events.
    #[serde(default)]
    pub topic_names: BTreeMap<ThreadId, String>,
}

pub type StateStore = LockedJson<DaemonState>;

impl DaemonState {
    pub fn record_for_call(&self, call_id: &str) -> Option<&NotificationRecord> {
        self.notifications
            .values()
            .find(|r| r.tool_call_id.as_deref() == Some(call_id))
    }

    pub fn record_for_call_mut(&mut self, call_id: &str) -> Option<&mut NotificationRecord> {
        self.notifications
            .values_mut()
            .find(|r| r.tool_call_id.as_deref() == Some(call_id))
    }

    pub fn has_record_for_assistant_message(&self, message_id: &str) -> bool {
        self.notifications
            .values()
            .any(|r| r.assistant_message_id.as_deref() == Some(message_id) && r.kind == NotificationKind::Idle)
    }

    pub fn pending_permission_for_pane(&self, pane: &str) -> Option<&NotificationRecord> {
        self.notifications
            .values()
            .find(|r| r.pane == pane && r.is_pending_permission())
    }

    /// Newest record per pane, for re-tracking transcripts after a restart.
    pub fn latest_origins(&self) -> Vec<PaneOrigin> {
        let mut newest: BTreeMap<&str, &NotificationRecord> = BTreeMap::new();
        for record in self.notifications.values() {
            let slot = newest.entry(record.pane.as_str()).or_insert(record);
            if record.created_at > slot.created_at {
                *slot = record;
            }
        }
        newest
            .into_values()
            .map(|r| PaneOrigin {
                pane: r.pane.clone(),
                cwd: r.cwd.clone(),
                transcript_path: r.transcript_path.clone(),
            })
            .collect()
    }
}
