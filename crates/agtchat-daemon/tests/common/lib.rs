//! Shared test doubles for the daemon: an in-memory chat service and a
//! scripted tmux that keeps a table of live panes.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use agtchat_core::{ChatId, MessageId, ThreadId};
use agtchat_telegram::{
    ButtonClick, ChatApi, ChatError, ChatUpdate, IncomingMessage, Keyboard, OutgoingMessage, Update,
};
use agtchat_tmux::{TmuxCommandRunner, TmuxError};
use async_trait::async_trait;

pub const CHAT_ID: ChatId = -1001;

// ─── Chat ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Sent {
    pub message_id: MessageId,
    pub msg: OutgoingMessage,
}

#[derive(Debug)]
struct ChatInner {
    next_message_id: MessageId,
    next_thread_id: ThreadId,
    next_update_id: i64,
    sent: Vec<Sent>,
    edits: Vec<(MessageId, Keyboard)>,
    deleted: Vec<MessageId>,
    answers: Vec<(String, Option<String>)>,
    topics: Vec<(ThreadId, String)>,
    closed: Vec<ThreadId>,
    reactions: Vec<(MessageId, String)>,
    queued: Vec<Update>,
    failing_sends: usize,
    failing_topics: usize,
}

/// In-memory chat service. Topic creation queues the service message the
/// real service would deliver through the update stream.
#[derive(Debug)]
pub struct MockChat {
    inner: Mutex<ChatInner>,
}

impl Default for MockChat {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChat {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ChatInner {
                next_message_id: 100,
                next_thread_id: 500,
                next_update_id: 1,
                sent: Vec::new(),
                edits: Vec::new(),
                deleted: Vec::new(),
                answers: Vec::new(),
                topics: Vec::new(),
                closed: Vec::new(),
                reactions: Vec::new(),
                queued: Vec::new(),
                failing_sends: 0,
                failing_topics: 0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ChatInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_update(&self, kind: ChatUpdate) -> Update {
        let mut inner = self.lock();
        let update_id = inner.next_update_id;
        inner.next_update_id += 1;
        Update { update_id, kind }
    }

    pub fn click(&self, message_id: MessageId, data: &str) -> Update {
        let callback_id = format!("cb-{message_id}-{data}");
        self.next_update(ChatUpdate::ButtonClick(ButtonClick {
            callback_id,
            chat_id: CHAT_ID,
            message_id,
            data: data.to_owned(),
        }))
    }

    pub fn reply(&self, reply_to: MessageId, text: &str) -> Update {
        let message_id = self.alloc_message_id();
        let reply_to_text = self
            .sent()
            .into_iter()
            .find(|s| s.message_id == reply_to)
            .map(|s| s.msg.text);
        let thread_id = self
            .sent()
            .into_iter()
            .find(|s| s.message_id == reply_to)
            .and_then(|s| s.msg.thread_id);
        self.next_update(ChatUpdate::Message(IncomingMessage {
            chat_id: CHAT_ID,
            message_id,
            thread_id,
            text: text.to_owned(),
            reply_to: Some(reply_to),
            reply_to_text,
        }))
    }

    pub fn message(&self, thread_id: Option<ThreadId>, text: &str) -> Update {
        let message_id = self.alloc_message_id();
        self.next_update(ChatUpdate::Message(IncomingMessage {
            chat_id: CHAT_ID,
            message_id,
            thread_id,
            text: text.to_owned(),
            reply_to: None,
            reply_to_text: None,
        }))
    }

    pub fn topic_created(&self, thread_id: ThreadId, name: &str) -> Update {
        self.next_update(ChatUpdate::TopicCreated {
            chat_id: CHAT_ID,
            thread_id,
            name: name.to_owned(),
        })
    }

    /// Make an update available to `get_updates`.
    pub fn queue(&self, update: Update) {
        self.lock().queued.push(update);
    }

    fn alloc_message_id(&self) -> MessageId {
        let mut inner = self.lock();
        let id = inner.next_message_id;
        inner.next_message_id += 1;
        id
    }

    pub fn fail_next_sends(&self, n: usize) {
        self.lock().failing_sends = n;
    }

    pub fn fail_next_topics(&self, n: usize) {
        self.lock().failing_topics = n;
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.lock().sent.clone()
    }

    pub fn last_sent(&self) -> Option<Sent> {
        self.lock().sent.last().cloned()
    }

    pub fn sent_containing(&self, needle: &str) -> Vec<Sent> {
        self.sent()
            .into_iter()
            .filter(|s| s.msg.text.contains(needle))
            .collect()
    }

    pub fn edits(&self) -> Vec<(MessageId, Keyboard)> {
        self.lock().edits.clone()
    }

    /// Label of the most recent single-button edit of `message_id`.
    pub fn label_of(&self, message_id: MessageId) -> Option<String> {
        self.lock()
            .edits
            .iter()
            .rev()
            .find(|(id, _)| *id == message_id)
            .and_then(|(_, kb)| kb.inline_keyboard.first()?.first().map(|b| b.text.clone()))
    }

    pub fn deleted(&self) -> Vec<MessageId> {
        self.lock().deleted.clone()
    }

    pub fn answers(&self) -> Vec<(String, Option<String>)> {
        self.lock().answers.clone()
    }

    pub fn last_answer(&self) -> Option<String> {
        self.lock().answers.last().and_then(|(_, text)| text.clone())
    }

    pub fn topics(&self) -> Vec<(ThreadId, String)> {
        self.lock().topics.clone()
    }

    pub fn closed(&self) -> Vec<ThreadId> {
        self.lock().closed.clone()
    }

    pub fn reactions(&self) -> Vec<(MessageId, String)> {
        self.lock().reactions.clone()
    }
}

#[async_trait]
impl ChatApi for MockChat {
    async fn send_message(&self, msg: &OutgoingMessage) -> Result<MessageId, ChatError> {
        let mut inner = self.lock();
        if inner.failing_sends > 0 {
            inner.failing_sends -= 1;
            return Err(ChatError::Api {
                code: 502,
                description: "Bad Gateway".into(),
            });
        }
        let message_id = inner.next_message_id;
        inner.next_message_id += 1;
        inner.sent.push(Sent {
            message_id,
            msg: msg.clone(),
        });
        Ok(message_id)
    }

    async fn edit_buttons(
        &self,
        _chat_id: ChatId,
        message_id: MessageId,
        keyboard: &Keyboard,
    ) -> Result<(), ChatError> {
        self.lock().edits.push((message_id, keyboard.clone()));
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<(), ChatError> {
        self.lock()
            .answers
            .push((callback_id.to_owned(), text.map(str::to_owned)));
        Ok(())
    }

    async fn delete_message(&self, _chat_id: ChatId, message_id: MessageId) -> Result<(), ChatError> {
        self.lock().deleted.push(message_id);
        Ok(())
    }

    async fn get_updates(&self, offset: i64, _timeout: Duration) -> Result<Vec<Update>, ChatError> {
        let inner = self.lock();
        Ok(inner
            .queued
            .iter()
            .filter(|u| u.update_id >= offset)
            .cloned()
            .collect())
    }

    async fn create_topic(&self, chat_id: ChatId, name: &str) -> Result<ThreadId, ChatError> {
        let mut inner = self.lock();
        if inner.failing_topics > 0 {
            inner.failing_topics -= 1;
            return Err(ChatError::Api {
                code: 502,
                description: "Bad Gateway".into(),
            });
        }
        let thread_id = inner.next_thread_id;
        inner.next_thread_id += 1;
        inner.topics.push((thread_id, name.to_owned()));
        let update_id = inner.next_update_id;
        inner.next_update_id += 1;
        inner.queued.push(Update {
            update_id,
            kind: ChatUpdate::TopicCreated {
                chat_id,
                thread_id,
                name: name.to_owned(),
            },
        });
        Ok(thread_id)
    }

    async fn close_topic(&self, _chat_id: ChatId, thread_id: ThreadId) -> Result<(), ChatError> {
        self.lock().closed.push(thread_id);
        Ok(())
    }

    async fn react(&self, _chat_id: ChatId, message_id: MessageId, emoji: &str) -> Result<(), ChatError> {
        self.lock().reactions.push((message_id, emoji.to_owned()));
        Ok(())
    }
}

// ─── Tmux ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct FakePane {
    cwd: String,
    cmd: String,
}

#[derive(Debug, Default)]
struct TmuxInner {
    panes: BTreeMap<String, FakePane>,
    calls: Vec<Vec<String>>,
    delay: Duration,
}

/// tmux stand-in keyed by `session:window.pane` targets.
#[derive(Debug, Default)]
pub struct FakeTmux {
    inner: Mutex<TmuxInner>,
}

fn session_of(target: &str) -> &str {
    target.split(':').next().unwrap_or(target)
}

fn flag_value<'a>(args: &[&'a str], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| *a == flag)
        .and_then(|i| args.get(i + 1))
        .copied()
}

impl FakeTmux {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TmuxInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_pane(&self, target: &str, cwd: &str, cmd: &str) {
        self.lock().panes.insert(
            target.to_owned(),
            FakePane {
                cwd: cwd.to_owned(),
                cmd: cmd.to_owned(),
            },
        );
    }

    pub fn remove_pane(&self, target: &str) {
        self.lock().panes.remove(target);
    }

    pub fn has_pane(&self, target: &str) -> bool {
        self.lock().panes.contains_key(target)
    }

    /// Every tmux call sleeps this long first.
    pub fn set_delay(&self, delay: Duration) {
        self.lock().delay = delay;
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.lock().calls.clone()
    }

    /// `send-keys` payloads for a target, one string per call
    /// (`"Enter"`, `"Down"`, `"-l some text"`).
    pub fn sent_to(&self, target: &str) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.first().map(String::as_str) == Some("send-keys"))
            .filter(|c| c.get(2).map(String::as_str) == Some(target))
            .map(|c| c[3..].join(" "))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    fn missing(what: &str, target: &str) -> TmuxError {
        TmuxError::CommandFailed(format!("exit code 1: can't find {what}: {target}"))
    }
}

impl TmuxCommandRunner for FakeTmux {
    fn run(&self, args: &[&str]) -> Result<String, TmuxError> {
        let delay = {
            let mut inner = self.lock();
            inner.calls.push(args.iter().map(|a| (*a).to_owned()).collect());
            inner.delay
        };
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let mut inner = self.lock();
        match args.first().copied() {
            Some("display-message") | Some("send-keys") => {
                let target = flag_value(args, "-t").unwrap_or_default();
                if inner.panes.contains_key(target) {
                    Ok("%1\n".into())
                } else {
                    Err(Self::missing("pane", target))
                }
            }
            Some("has-session") => {
                let name = flag_value(args, "-t").unwrap_or_default();
                if inner.panes.keys().any(|t| session_of(t) == name) {
                    Ok(String::new())
                } else {
                    Err(Self::missing("session", name))
                }
            }
            Some("new-session") => {
                let name = flag_value(args, "-s").unwrap_or_default().to_owned();
                let cwd = flag_value(args, "-c").unwrap_or_default().to_owned();
                inner.panes.insert(
                    format!("{name}:0.0"),
                    FakePane {
                        cwd,
                        cmd: "zsh".into(),
                    },
                );
                Ok(String::new())
            }
            Some("kill-session") => {
                let name = flag_value(args, "-t").unwrap_or_default().to_owned();
                inner.panes.retain(|t, _| session_of(t) != name);
                Ok(String::new())
            }
            Some("list-panes") if args.contains(&"-a") => Ok(inner
                .panes
                .iter()
                .enumerate()
                .map(|(i, (target, pane))| {
                    format!(
                        "{target}\t%{i}\t{}\t{}\t{}\n",
                        session_of(target),
                        pane.cmd,
                        pane.cwd
                    )
                })
                .collect()),
            Some("list-panes") => {
                let name = flag_value(args, "-t").unwrap_or_default();
                let targets: Vec<&String> = inner
                    .panes
                    .keys()
                    .filter(|t| session_of(t) == name)
                    .collect();
                if targets.is_empty() {
                    return Err(Self::missing("session", name));
                }
                Ok(targets.into_iter().map(|t| format!("{t}\n")).collect())
            }
            _ => Ok(String::new()),
        }
    }
}

// ─── Transcript lines ─────────────────────────────────────────────

pub fn tool_use_line(message_id: &str, calls: &[(&str, &str)]) -> String {
    let content: Vec<serde_json::Value> = calls
        .iter()
        .map(|(id, name)| {
            serde_json::json!({
                "type": "tool_use",
                "id": id,
                "name": name,
                "input": { "command": "cargo test" },
            })
        })
        .collect();
    serde_json::json!({
        "type": "assistant",
        "message": { "id": message_id, "content": content },
    })
    .to_string()
}

pub fn tool_result_line(call_id: &str) -> String {
    serde_json::json!({
        "type": "user",
        "message": { "content": [{ "type": "tool_result", "tool_use_id": call_id, "content": "ok" }] },
    })
    .to_string()
}

pub fn text_line(message_id: &str, text: &str) -> String {
    serde_json::json!({
        "type": "assistant",
        "message": { "id": message_id, "content": [{ "type": "text", "text": text }] },
    })
    .to_string()
}
