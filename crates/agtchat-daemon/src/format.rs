//! Outbound message text.

use std::path::Path;

use agtchat_core::{CompactionPhase, CompactionTrigger, NotificationRecord, PendingTopicMarker, TaskKind, TaskStatus};
use serde_json::Value;

use crate::registry::RegistryEntry;

/// Stay well below the service's 4096-character message limit.
pub const MAX_MESSAGE_CHARS: usize = 3800;
const MAX_PRECEDING_CHARS: usize = 1200;
const SETUP_PREFIX: &str = "🛠 Setting up task `";

pub const PROTECTED_PROMPT_REPLY: &str =
    "⚠️ Ignored: there's a pending permission prompt. Please respond to that first.";

pub fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_owned(),
    }
}

/// `~`-relative form of a working directory.
pub fn short_path(path: &str) -> String {
    match std::env::var("HOME") {
        Ok(home) if !home.is_empty() => match path.strip_prefix(&home) {
            Some("") => "~".to_owned(),
            Some(rest) if rest.starts_with('/') => format!("~{rest}"),
            _ => path.to_owned(),
        },
        _ => path.to_owned(),
    }
}

fn fenced(body: &str) -> String {
    body.replace("```", "'''")
}

fn str_field<'a>(input: &'a Value, key: &str) -> &'a str {
    input.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// What the agent is asking to do, in a form readable on a phone.
pub fn describe_tool(tool_name: &str, input: &Value) -> String {
    match tool_name {
        "Bash" => {
            let cmd = fenced(str_field(input, "command"));
            let desc = str_field(input, "description");
            let desc = if desc.is_empty() {
                String::new()
            } else {
                format!("\n\n_{desc}_")
            };
            format!("Asking permission to run:\n\n```bash\n{cmd}\n```{desc}")
        }
        "Edit" | "MultiEdit" => {
            let path = short_path(str_field(input, "file_path"));
            let old = str_field(input, "old_string");
            let new = str_field(input, "new_string");
            let diff: Vec<String> = old
                .lines()
                .map(|l| format!("-{l}"))
                .chain(new.lines().map(|l| format!("+{l}")))
                .collect();
            format!(
                "Asking permission to edit `{path}`:\n\n```diff\n{}\n```",
                fenced(&diff.join("\n"))
            )
        }
        "Write" => format!("Asking permission to write `{}`", short_path(str_field(input, "file_path"))),
        "Read" => format!("Asking permission to read `{}`", short_path(str_field(input, "file_path"))),
        "WebFetch" => format!("Asking permission to fetch {}", str_field(input, "url")),
        "AskUserQuestion" => {
            let mut lines = vec!["Asking:".to_owned(), String::new()];
            for q in input.get("questions").and_then(Value::as_array).into_iter().flatten() {
                lines.push(format!("*{}*", str_field(q, "question")));
                for opt in q.get("options").and_then(Value::as_array).into_iter().flatten() {
                    lines.push(format!("• {}", str_field(opt, "label")));
                }
            }
            lines.join("\n")
        }
        _ => {
            let body = serde_json::to_string_pretty(input).unwrap_or_default();
            format!(
                "Asking permission to use {tool_name}:\n\n```\n{}\n```",
                fenced(&truncate(&body, 1500))
            )
        }
    }
}

pub fn permission_text(label: &str, tool_name: &str, input: &Value, preceding: Option<&str>) -> String {
    let mut text = format!("`{label}`\n\n");
    if let Some(preceding) = preceding.filter(|p| !p.trim().is_empty()) {
        text.push_str(&truncate(preceding.trim(), MAX_PRECEDING_CHARS));
        text.push_str("\n\n---\n\n");
    }
    text.push_str(&describe_tool(tool_name, input));
    truncate(&text, MAX_MESSAGE_CHARS)
}

pub fn idle_text(label: &str, assistant_text: &str) -> String {
    truncate(&format!("`{label}`\n\n{}", assistant_text.trim()), MAX_MESSAGE_CHARS)
}

pub fn compaction_text(label: &str, phase: CompactionPhase, trigger: CompactionTrigger) -> String {
    match phase {
        CompactionPhase::Started => format!("`{label}`\n\n🔄 Compacting context ({})...", trigger.as_str()),
        CompactionPhase::Completed => format!("`{label}`\n\n✅ Context compacted ({})", trigger.as_str()),
    }
}

pub fn setup_message(name: &str) -> String {
    format!("{SETUP_PREFIX}{name}`…")
}

/// Task name announced by a setup message, if `text` is one.
pub fn setup_task_name(text: &str) -> Option<&str> {
    let rest = text.strip_prefix(SETUP_PREFIX)?;
    rest.split('`').next().filter(|n| !n.is_empty())
}

pub fn ready_message(name: &str, kind: TaskKind, path: &Path) -> String {
    format!(
        "✅ Task `{name}` ready ({kind}) in `{}`",
        short_path(&path.to_string_lossy())
    )
}

pub fn status_text(tasks: &[RegistryEntry], pending: &[PendingTopicMarker]) -> String {
    if tasks.is_empty() && pending.is_empty() {
        return "No tasks.".to_owned();
    }
    let mut lines = vec!["*Tasks*".to_owned(), String::new()];
    for entry in tasks {
        let t = &entry.task;
        let state = match t.status {
            TaskStatus::Active => "▶️",
            TaskStatus::Paused => "⏸️",
        };
        let kind = match t.kind {
            TaskKind::Worktree => "🌳",
            TaskKind::Session => "📁",
        };
        lines.push(format!(
            "{state} {kind} `{}` · {}",
            t.name,
            short_path(&t.path.to_string_lossy())
        ));
    }
    for p in pending {
        lines.push(format!("⏳ `{}` · setting up", p.name));
    }
    lines.join("\n")
}

pub fn pending_link_prompt(pending: &[PendingTopicMarker]) -> String {
    let names: Vec<String> = pending.iter().map(|p| format!("`{}`", p.name)).collect();
    format!(
        "This topic is not linked to a task. Tasks waiting for a topic: {}\n\nSend `/link <task>` here to link one.",
        names.join(", ")
    )
}

pub fn debug_dump(record: &NotificationRecord, has_result: Option<bool>) -> String {
    let mut lines = vec![
        format!("*Debug: msg_id={}*", record.message_id),
        format!("Kind: {}", record.kind),
        format!("Status: {}", record.status),
        format!("Pane: {}", record.pane),
    ];
    if let Some(has_result) = has_result {
        lines.push(format!("Has result in transcript: {has_result}"));
    }
    let json = serde_json::to_string_pretty(record).unwrap_or_default();
    lines.push(format!("```\n{}\n```", fenced(&json)));
    truncate(&lines.join("\n"), MAX_MESSAGE_CHARS)
}

pub const HELP_TEXT: &str = "*Commands*

/status - Show all tasks and status
/recover - Rebuild registry from marker files
/pause <task> - Stop a task's session
/resume <task> - Restart a paused task
/cleanup <task> - Remove a task and close its topic
/link <task> - Link this topic to a task being set up
/debug - Show debug info for a message (reply to it)
/help - Show this help message

Reply to a notification to answer it. Messages inside a task topic go to that task's session.";
