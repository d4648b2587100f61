//! Read-only full scans of a transcript.
//!
//! Used by the responder to check the live prompt state of a pane without
//! touching the watcher's cursor.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use crate::translate::TranscriptLine;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCall {
    pub call_id: String,
    pub tool_name: String,
}

fn for_each_line(path: &Path, mut f: impl FnMut(TranscriptLine)) -> io::Result<()> {
    let reader = BufReader::new(File::open(path)?);
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        // Malformed and partial lines carry no usable evidence here.
        if let Ok(parsed) = TranscriptLine::parse(&line) {
            if !parsed.is_sidechain() {
                f(parsed);
            }
        }
    }
    Ok(())
}

/// Tool calls without a result, in the order they were written.
pub fn pending_tool_calls(path: &Path) -> io::Result<Vec<PendingCall>> {
    let mut pending: Vec<PendingCall> = Vec::new();
    for_each_line(path, |line| match line {
        TranscriptLine::Assistant(a) => {
            for (id, name, _) in a.tool_uses() {
                if !pending.iter().any(|p| p.call_id == id) {
                    pending.push(PendingCall {
                        call_id: id.to_owned(),
                        tool_name: name.to_owned(),
                    });
                }
            }
        }
        TranscriptLine::User(u) => {
            for id in u.tool_result_ids() {
                pending.retain(|p| p.call_id != id);
            }
        }
        TranscriptLine::System(_) | TranscriptLine::Other => {}
    })?;
    Ok(pending)
}

/// Whether the transcript already records a result for `call_id`.
pub fn has_tool_result(path: &Path, call_id: &str) -> io::Result<bool> {
    let mut found = false;
    for_each_line(path, |line| {
        if let TranscriptLine::User(u) = line {
            found |= u.tool_result_ids().any(|id| id == call_id);
        }
    })?;
    Ok(found)
}
