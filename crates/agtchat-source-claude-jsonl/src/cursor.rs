//! Per-transcript cursor: turns batches of raw lines into transcript events.

use std::collections::HashSet;

use agtchat_core::{AssistantText, PaneOrigin, ToolCall, TranscriptEvent};
use tracing::{debug, warn};

use crate::translate::{AssistantLine, TranscriptLine};

/// Reader state for one transcript, owned by the watcher side only.
#[derive(Debug, Clone)]
pub struct TranscriptCursor {
    origin: PaneOrigin,
    /// Calls seen without a result yet, in arrival order.
    awaiting: Vec<String>,
    last_assistant_message_id: Option<String>,
    /// Most recent narrative text and the assistant message it belongs to.
    last_text: Option<(Option<String>, String)>,
}

impl TranscriptCursor {
    pub fn new(origin: PaneOrigin) -> Self {
        Self {
            origin,
            awaiting: Vec::new(),
            last_assistant_message_id: None,
            last_text: None,
        }
    }

    pub fn origin(&self) -> &PaneOrigin {
        &self.origin
    }

    /// The transcript moved to another pane (e.g. a resumed session).
    pub fn rebind(&mut self, pane: &str, cwd: &str) {
        self.origin.pane = pane.to_owned();
        self.origin.cwd = cwd.to_owned();
    }

    pub fn awaiting(&self) -> &[String] {
        &self.awaiting
    }

    pub fn last_assistant_message_id(&self) -> Option<&str> {
        self.last_assistant_message_id.as_deref()
    }

    /// Decode a batch of complete lines and emit events in file order.
    ///
    /// A call whose result appears later in the same batch was resolved by
    /// the terminal before it could be surfaced; its call event is flagged
    /// `settled` so it still counts as activity but is never prompted for.
    pub fn apply(&mut self, lines: &[String], auto_approved: &HashSet<String>) -> Vec<TranscriptEvent> {
        let decoded: Vec<TranscriptLine> = lines
            .iter()
            .filter_map(|raw| match TranscriptLine::parse(raw) {
                Ok(line) => Some(line),
                Err(e) => {
                    warn!(
                        path = %self.origin.transcript_path.display(),
                        error = %e,
                        "skipping malformed transcript line"
                    );
                    None
                }
            })
            .filter(|line| !line.is_sidechain())
            .collect();

        let mut events = Vec::new();
        for (idx, line) in decoded.iter().enumerate() {
            match line {
                TranscriptLine::Assistant(assistant) => {
                    let followed = followed_by_tool_use(assistant, &decoded[idx + 1..]);
                    self.on_assistant(assistant, followed, auto_approved, &mut events);
                }
                TranscriptLine::User(user) => {
                    for call_id in user.tool_result_ids() {
                        self.awaiting.retain(|id| id != call_id);
                        events.push(TranscriptEvent::ToolResultSeen {
                            origin: self.origin.clone(),
                            call_id: call_id.to_owned(),
                        });
                    }
                }
                TranscriptLine::System(system) => {
                    if let Some((phase, trigger)) = system.compaction() {
                        events.push(TranscriptEvent::CompactionBoundary {
                            origin: self.origin.clone(),
                            phase,
                            trigger,
                        });
                    }
                }
                TranscriptLine::Other => {}
            }
        }

        mark_settled_calls(&mut events);
        events
    }

    fn on_assistant(
        &mut self,
        line: &AssistantLine,
        followed_by_tool_use: bool,
        auto_approved: &HashSet<String>,
        events: &mut Vec<TranscriptEvent>,
    ) {
        let message_id = line.message.id.clone();
        if message_id.is_some() {
            self.last_assistant_message_id.clone_from(&message_id);
        }
        let text = line.text();

        if !line.has_tool_use() {
            if let Some(text) = text {
                self.last_text = Some((message_id.clone(), text.clone()));
                if let Some(id) = message_id {
                    events.push(TranscriptEvent::AssistantTextSeen(AssistantText {
                        origin: self.origin.clone(),
                        message_id: id,
                        text,
                        has_following_tool_call: followed_by_tool_use,
                    }));
                }
            }
            return;
        }

        let preceding_text = text.or_else(|| match &self.last_text {
            Some((id, text)) if *id == message_id => Some(text.clone()),
            _ => None,
        });
        for (call_id, tool_name, input) in line.tool_uses() {
            if self.awaiting.iter().any(|id| id == call_id) {
                continue;
            }
            self.awaiting.push(call_id.to_owned());
            let auto = auto_approved.contains(tool_name);
            debug!(pane = %self.origin.pane, call_id, tool_name, auto, "tool call seen");
            events.push(TranscriptEvent::ToolCallSeen(ToolCall {
                origin: self.origin.clone(),
                call_id: call_id.to_owned(),
                tool_name: tool_name.to_owned(),
                input: input.clone(),
                assistant_message_id: message_id.clone(),
                preceding_text: preceding_text.clone(),
                auto_approved: auto,
                settled: false,
            }));
        }
    }
}

fn followed_by_tool_use(line: &AssistantLine, rest: &[TranscriptLine]) -> bool {
    let Some(id) = line.message.id.as_deref() else {
        return false;
    };
    rest.iter().any(|later| match later {
        TranscriptLine::Assistant(a) => a.message.id.as_deref() == Some(id) && a.has_tool_use(),
        _ => false,
    })
}

fn mark_settled_calls(events: &mut [TranscriptEvent]) {
    let results: HashSet<String> = events
        .iter()
        .filter_map(|event| match event {
            TranscriptEvent::ToolResultSeen { call_id, .. } => Some(call_id.clone()),
            _ => None,
        })
        .collect();
    if results.is_empty() {
        return;
    }
    for event in events.iter_mut() {
        if let TranscriptEvent::ToolCallSeen(call) = event {
            call.settled = results.contains(&call.call_id);
        }
    }
}
