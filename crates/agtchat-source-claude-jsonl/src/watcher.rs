//! Byte-offset tailer for one JSONL transcript file.
//!
//! Tracks the read position, buffers a partial trailing line until its
//! newline arrives, and starts over when the file is replaced (inode change)
//! or truncated.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Where a new watcher starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartAt {
    /// Skip existing content; only lines appended from now on are seen.
    End,
    Beginning,
}

#[derive(Debug)]
pub struct SessionFileWatcher {
    path: PathBuf,
    offset: u64,
    inode: u64,
    partial: String,
}

impl SessionFileWatcher {
    pub fn new(path: PathBuf, start: StartAt) -> Self {
        let (size, inode) = file_metadata(&path).unwrap_or((0, 0));
        let offset = match start {
            StartAt::End => size,
            StartAt::Beginning => 0,
        };
        Self {
            path,
            offset,
            inode,
            partial: String::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes consumed so far, including any buffered partial line.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read every complete line appended since the last poll.
    ///
    /// IO failures are logged and yield no lines; the next poll retries from
    /// the same offset.
    pub fn poll_new_lines(&mut self) -> Vec<String> {
        if let Some((size, inode)) = file_metadata(&self.path) {
            let replaced = self.inode != 0 && inode != self.inode;
            if replaced || size < self.offset {
                debug!(path = %self.path.display(), replaced, "transcript reset, reading from start");
                self.offset = 0;
                self.partial.clear();
            }
            self.inode = inode;
        }

        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to open transcript");
                return Vec::new();
            }
        };
        let mut reader = BufReader::new(file);
        if let Err(e) = reader.seek(SeekFrom::Start(self.offset)) {
            warn!(path = %self.path.display(), offset = self.offset, error = %e, "failed to seek transcript");
            return Vec::new();
        }

        let mut lines = Vec::new();
        let mut buf = String::new();
        loop {
            buf.clear();
            match reader.read_line(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    self.offset += n as u64;
                    match buf.strip_suffix('\n') {
                        Some(rest) => {
                            let mut line = std::mem::take(&mut self.partial);
                            line.push_str(rest.trim_end_matches('\r'));
                            if !line.trim().is_empty() {
                                lines.push(line);
                            }
                        }
                        None => self.partial.push_str(&buf),
                    }
                }
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "error reading transcript");
                    break;
                }
            }
        }
        lines
    }
}

/// File size and inode.
fn file_metadata(path: &Path) -> Option<(u64, u64)> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        fs::metadata(path).ok().map(|m| (m.len(), m.ino()))
    }
    #[cfg(not(unix))]
    {
        fs::metadata(path).ok().map(|m| (m.len(), 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn append(path: &Path, text: &str) {
        let mut f = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .expect("test");
        f.write_all(text.as_bytes()).expect("test");
    }

    #[test]
    fn reads_appended_lines_once() {
        let dir = tempfile::tempdir().expect("test");
        let path = dir.path().join("s.jsonl");
        fs::write(&path, "").expect("test");
        let mut watcher = SessionFileWatcher::new(path.clone(), StartAt::Beginning);

        append(&path, "{\"type\":\"user\"}\n{\"type\":\"assistant\"}\n");
        let lines = watcher.poll_new_lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("assistant"));
        assert!(watcher.poll_new_lines().is_empty());

        append(&path, "{\"type\":\"system\"}\n");
        assert_eq!(watcher.poll_new_lines(), ["{\"type\":\"system\"}"]);
    }

    #[test]
    fn partial_line_waits_for_newline() {
        let dir = tempfile::tempdir().expect("test");
        let path = dir.path().join("s.jsonl");
        fs::write(&path, "").expect("test");
        let mut watcher = SessionFileWatcher::new(path.clone(), StartAt::Beginning);

        append(&path, "{\"type\":\"us");
        assert!(watcher.poll_new_lines().is_empty());
        append(&path, "er\"}\n");
        assert_eq!(watcher.poll_new_lines(), ["{\"type\":\"user\"}"]);
    }

    #[test]
    fn start_at_end_skips_history() {
        let dir = tempfile::tempdir().expect("test");
        let path = dir.path().join("s.jsonl");
        fs::write(&path, "{\"old\":1}\n{\"old\":2}\n").expect("test");
        let mut watcher = SessionFileWatcher::new(path.clone(), StartAt::End);
        assert!(watcher.poll_new_lines().is_empty());

        append(&path, "{\"new\":1}\n");
        assert_eq!(watcher.poll_new_lines(), ["{\"new\":1}"]);
    }

    #[test]
    fn truncation_restarts_from_beginning() {
        let dir = tempfile::tempdir().expect("test");
        let path = dir.path().join("s.jsonl");
        fs::write(&path, "{\"a\":1}\n{\"a\":2}\n").expect("test");
        let mut watcher = SessionFileWatcher::new(path.clone(), StartAt::End);

        fs::write(&path, "{\"b\":1}\n").expect("test");
        assert_eq!(watcher.poll_new_lines(), ["{\"b\":1}"]);
    }

    #[cfg(unix)]
    #[test]
    fn replaced_file_is_read_from_start() {
        let dir = tempfile::tempdir().expect("test");
        let path = dir.path().join("s.jsonl");
        append(&path, "{\"type\":\"user\"}\n");
        let mut watcher = SessionFileWatcher::new(path.clone(), StartAt::Beginning);
        assert_eq!(watcher.poll_new_lines().len(), 1);

        let other = dir.path().join("s.jsonl.new");
        fs::write(&other, "{\"type\":\"assistant\"}\n{\"type\":\"user\"}\n").expect("test");
        fs::rename(&other, &path).expect("test");

        let lines = watcher.poll_new_lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("assistant"));
    }

    #[test]
    fn missing_file_yields_nothing() {
        let dir = tempfile::tempdir().expect("test");
        let mut watcher = SessionFileWatcher::new(dir.path().join("gone.jsonl"), StartAt::End);
        assert!(watcher.poll_new_lines().is_empty());
        assert_eq!(watcher.offset(), 0);
    }
}
