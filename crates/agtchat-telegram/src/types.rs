//! Wire shapes of the Bot API and the closed update type they decode into.

use agtchat_core::{ChatId, MessageId, ThreadId};
use serde::Deserialize;

// ─── Wire ─────────────────────────────────────────────────────────

/// Envelope of every Bot API response.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub error_code: Option<u16>,
    #[serde(default)]
    pub parameters: Option<ResponseParameters>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ResponseParameters {
    #[serde(default)]
    pub retry_after: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<RawMessage>,
    #[serde(default)]
    pub callback_query: Option<RawCallback>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawMessage {
    pub message_id: MessageId,
    pub chat: RawChat,
    #[serde(default)]
    pub message_thread_id: Option<ThreadId>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub reply_to_message: Option<Box<RawMessage>>,
    #[serde(default)]
    pub forum_topic_created: Option<RawTopicCreated>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawChat {
    pub id: ChatId,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawTopicCreated {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawCallback {
    pub id: String,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub message: Option<RawMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawForumTopic {
    pub message_thread_id: ThreadId,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawSentMessage {
    pub message_id: MessageId,
}

// ─── Domain ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ButtonClick {
    pub callback_id: String,
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub thread_id: Option<ThreadId>,
    pub text: String,
    /// Explicit reply target. Forum messages implicitly "reply" to the
    /// topic's creation message; that is not reported here.
    pub reply_to: Option<MessageId>,
    /// Text of the explicit reply target, when it had any.
    pub reply_to_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatUpdate {
    ButtonClick(ButtonClick),
    Message(IncomingMessage),
    TopicCreated {
        chat_id: ChatId,
        thread_id: ThreadId,
        name: String,
    },
    /// Anything else (edits, joins, stickers). Acknowledged and skipped.
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub update_id: i64,
    pub kind: ChatUpdate,
}

impl From<RawUpdate> for Update {
    fn from(raw: RawUpdate) -> Self {
        let kind = if let Some(cb) = raw.callback_query {
            match cb.message {
                Some(msg) => ChatUpdate::ButtonClick(ButtonClick {
                    callback_id: cb.id,
                    chat_id: msg.chat.id,
                    message_id: msg.message_id,
                    data: cb.data.unwrap_or_default(),
                }),
                None => ChatUpdate::Unsupported,
            }
        } else if let Some(msg) = raw.message {
            decode_message(msg)
        } else {
            ChatUpdate::Unsupported
        };
        Self {
            update_id: raw.update_id,
            kind,
        }
    }
}

fn decode_message(msg: RawMessage) -> ChatUpdate {
    if let Some(created) = msg.forum_topic_created {
        return ChatUpdate::TopicCreated {
            chat_id: msg.chat.id,
            thread_id: msg.message_thread_id.unwrap_or(msg.message_id),
            name: created.name,
        };
    }
    let Some(text) = msg.text else {
        return ChatUpdate::Unsupported;
    };
    let explicit = msg.reply_to_message.filter(|r| {
        r.forum_topic_created.is_none() && Some(r.message_id) != msg.message_thread_id
    });
    let (reply_to, reply_to_text) = match explicit {
        Some(r) => (Some(r.message_id), r.text),
        None => (None, None),
    };
    ChatUpdate::Message(IncomingMessage {
        chat_id: msg.chat.id,
        message_id: msg.message_id,
        thread_id: msg.message_thread_id,
        text,
        reply_to,
        reply_to_text,
    })
}
