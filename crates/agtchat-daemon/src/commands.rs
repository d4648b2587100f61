//! Bot commands sent as chat messages.

use agtchat_telegram::IncomingMessage;
use tracing::{info, warn};

use crate::context::DaemonContext;
use crate::error::TaskError;
use crate::format;
use crate::tasks::TaskManager;
use crate::topics::TopicProtocol;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Status,
    Recover,
    Debug,
    Link(Option<String>),
    Pause(Option<String>),
    Resume(Option<String>),
    Cleanup(Option<String>),
    Help,
    Unknown(String),
}

impl Command {
    /// `/name[@bot] [arg]`, or `None` for ordinary text.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let rest = text.strip_prefix('/')?;
        let mut parts = rest.splitn(2, char::is_whitespace);
        let head = parts.next().unwrap_or_default();
        let name = head.split('@').next().unwrap_or(head).to_lowercase();
        let arg = parts
            .next()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_owned);
        Some(match name.as_str() {
            "status" => Self::Status,
            "recover" => Self::Recover,
            "debug" => Self::Debug,
            "link" => Self::Link(arg),
            "pause" => Self::Pause(arg),
            "resume" => Self::Resume(arg),
            "cleanup" => Self::Cleanup(arg),
            "help" | "start" => Self::Help,
            _ => Self::Unknown(name),
        })
    }
}

#[derive(Debug, Clone)]
pub struct CommandHandler {
    ctx: DaemonContext,
    tasks: TaskManager,
    topics: TopicProtocol,
}

impl CommandHandler {
    pub fn new(ctx: DaemonContext, tasks: TaskManager, topics: TopicProtocol) -> Self {
        Self { ctx, tasks, topics }
    }

    /// Task named by the argument, or the task bound to the message's thread.
    fn target(&self, arg: Option<String>, msg: &IncomingMessage) -> Result<String, String> {
        if let Some(name) = arg {
            return Ok(name);
        }
        let bound = msg
            .thread_id
            .and_then(|t| self.ctx.registry.for_thread(t).ok().flatten());
        bound
            .map(|e| e.task.name)
            .ok_or_else(|| "Name a task, or send this inside the task's topic.".to_owned())
    }

    pub async fn handle(&self, command: Command, msg: &IncomingMessage) {
        info!(?command, thread_id = ?msg.thread_id, "command received");
        let (Ok(text) | Err(text)) = self.run(command, msg).await;
        self.ctx.reply(msg.thread_id, msg.message_id, &text).await;
    }

    async fn run(&self, command: Command, msg: &IncomingMessage) -> Result<String, String> {
        let failed = |e: TaskError| format!("Failed: {e}");
        match command {
            Command::Status => {
                let tasks = self.tasks.tasks().map_err(failed)?;
                let pending = self.ctx.registry.pending().map_err(|e| failed(e.into()))?;
                Ok(format::status_text(&tasks, &pending))
            }
            Command::Recover => {
                let report = self.ctx.registry.rebuild().map_err(|e| failed(e.into()))?;
                let linked = self.topics.link_by_thread_names().map_err(failed)?;
                let found = report.added.len() + linked.len();
                Ok(if found == 0 {
                    "No new tasks found.".to_owned()
                } else {
                    format!("Recovered {found} task(s)")
                })
            }
            Command::Debug => self.debug(msg),
            Command::Link(arg) => {
                let Some(thread_id) = msg.thread_id else {
                    return Err("Send /link inside the topic to link.".to_owned());
                };
                let Some(name) = arg else {
                    let pending = self.ctx.registry.pending().map_err(|e| failed(e.into()))?;
                    return Ok(format::pending_link_prompt(&pending));
                };
                let task = self.topics.link(&name, thread_id).map_err(failed)?;
                Ok(format!("🔗 Linked this topic to `{}`", task.name))
            }
            Command::Pause(arg) => {
                let name = self.target(arg, msg)?;
                self.tasks.pause(&name).await.map_err(failed)?;
                Ok(format!("⏸️ Paused `{name}`"))
            }
            Command::Resume(arg) => {
                let name = self.target(arg, msg)?;
                self.tasks.resume(&name).await.map_err(failed)?;
                Ok(format!("▶️ Resumed `{name}`"))
            }
            Command::Cleanup(arg) => {
                let name = self.target(arg, msg)?;
                self.tasks.cleanup(&name).await.map_err(failed)?;
                Ok(format!("🧹 Cleaned up `{name}`"))
            }
            Command::Help => Ok(format::HELP_TEXT.to_owned()),
            Command::Unknown(name) => Err(format!("Unknown command /{name}. Send /help for the list.")),
        }
    }

    fn debug(&self, msg: &IncomingMessage) -> Result<String, String> {
        let Some(reply_to) = msg.reply_to else {
            return Err("Reply to a notification with /debug.".to_owned());
        };
        let state = self.ctx.store.read().map_err(|e| {
            warn!(error = %e, "state unreadable for debug");
            format!("Failed: {e}")
        })?;
        match state.notifications.get(&reply_to) {
            Some(record) => Ok(format::debug_dump(record, None)),
            None => Err(format!("No notification record for message {reply_to}.")),
        }
    }
}
