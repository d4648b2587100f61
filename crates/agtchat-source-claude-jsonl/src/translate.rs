//! Typed shapes of Claude Code transcript lines.
//!
//! Each line is decoded once at the boundary into [`TranscriptLine`]; unknown
//! line types and content items decode to `Other` and are ignored downstream.

use agtchat_core::{CompactionPhase, CompactionTrigger};
use serde::Deserialize;
use serde_json::Value;

/// Tools the terminal runs without prompting. Never surfaced as notifications.
pub const DEFAULT_AUTO_APPROVED_TOOLS: &[&str] = &[
    "Read",
    "Glob",
    "Grep",
    "LS",
    "TodoWrite",
    "Task",
    "NotebookRead",
];

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranscriptLine {
    User(UserLine),
    Assistant(AssistantLine),
    System(SystemLine),
    #[serde(other)]
    Other,
}

impl TranscriptLine {
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    /// Sub-agent lines share the file but never prompt in the main pane.
    pub fn is_sidechain(&self) -> bool {
        match self {
            Self::User(l) => l.is_sidechain,
            Self::Assistant(l) => l.is_sidechain,
            Self::System(_) | Self::Other => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserLine {
    #[serde(default)]
    pub message: UserMessage,
    #[serde(default, rename = "isSidechain")]
    pub is_sidechain: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct UserMessage {
    #[serde(default)]
    pub content: UserContent,
}

/// User content is either a bare prompt string or a list of items.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum UserContent {
    Text(String),
    Items(Vec<ContentItem>),
}

impl Default for UserContent {
    fn default() -> Self {
        Self::Items(Vec::new())
    }
}

impl UserLine {
    /// Call ids answered by this line.
    pub fn tool_result_ids(&self) -> impl Iterator<Item = &str> {
        let items: &[ContentItem] = match &self.message.content {
            UserContent::Items(items) => items,
            UserContent::Text(_) => &[],
        };
        items.iter().filter_map(|item| match item {
            ContentItem::ToolResult { tool_use_id } => Some(tool_use_id.as_str()),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AssistantLine {
    pub message: AssistantMessage,
    #[serde(default, rename = "isSidechain")]
    pub is_sidechain: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AssistantMessage {
    /// Shared by every line written for the same turn.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub content: Vec<ContentItem>,
}

impl AssistantLine {
    /// Narrative text of the line, blocks joined by blank lines.
    pub fn text(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .message
            .content
            .iter()
            .filter_map(|item| match item {
                ContentItem::Text { text } if !text.trim().is_empty() => Some(text.trim()),
                _ => None,
            })
            .collect();
        (!parts.is_empty()).then(|| parts.join("\n\n"))
    }

    pub fn tool_uses(&self) -> impl Iterator<Item = (&str, &str, &Value)> {
        self.message.content.iter().filter_map(|item| match item {
            ContentItem::ToolUse { id, name, input } => Some((id.as_str(), name.as_str(), input)),
            _ => None,
        })
    }

    pub fn has_tool_use(&self) -> bool {
        self.tool_uses().next().is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SystemLine {
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default, rename = "compactMetadata")]
    pub compact_metadata: Option<CompactMetadata>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct CompactMetadata {
    #[serde(default)]
    pub trigger: Option<String>,
    #[serde(default)]
    pub phase: Option<String>,
}

impl SystemLine {
    /// Compaction marker carried by this line, if any.
    ///
    /// A `compact_boundary` line without an explicit phase marks completion.
    pub fn compaction(&self) -> Option<(CompactionPhase, CompactionTrigger)> {
        let phase = match self.subtype.as_deref()? {
            "compact_boundary" => {
                let meta_phase = self
                    .compact_metadata
                    .as_ref()
                    .and_then(|m| m.phase.as_deref());
                match meta_phase {
                    Some("start" | "started") => CompactionPhase::Started,
                    _ => CompactionPhase::Completed,
                }
            }
            "compact_start" => CompactionPhase::Started,
            _ => return None,
        };
        let trigger = match self
            .compact_metadata
            .as_ref()
            .and_then(|m| m.trigger.as_deref())
        {
            Some("manual") => CompactionTrigger::Manual,
            _ => CompactionTrigger::Auto,
        };
        Some((phase, trigger))
    }
}
