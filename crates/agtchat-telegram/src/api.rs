//! The chat operations the daemon depends on.

use std::time::Duration;

use agtchat_core::{ChatId, MessageId, ThreadId};
use async_trait::async_trait;

use crate::error::ChatError;
use crate::keyboard::Keyboard;
use crate::types::Update;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutgoingMessage {
    pub chat_id: ChatId,
    pub thread_id: Option<ThreadId>,
    pub text: String,
    pub keyboard: Option<Keyboard>,
    pub reply_to: Option<MessageId>,
    /// Send with Markdown parsing; falls back to plain text if rejected.
    pub markdown: bool,
}

impl OutgoingMessage {
    pub fn new(chat_id: ChatId, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn in_thread(mut self, thread_id: Option<ThreadId>) -> Self {
        self.thread_id = thread_id;
        self
    }

    #[must_use]
    pub fn with_keyboard(mut self, keyboard: Keyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }

    #[must_use]
    pub fn replying_to(mut self, message_id: MessageId) -> Self {
        self.reply_to = Some(message_id);
        self
    }

    #[must_use]
    pub fn markdown(mut self) -> Self {
        self.markdown = true;
        self
    }
}

/// Chat service boundary. Implemented by [`crate::TelegramClient`] and by
/// test doubles.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn send_message(&self, msg: &OutgoingMessage) -> Result<MessageId, ChatError>;

    async fn edit_buttons(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        keyboard: &Keyboard,
    ) -> Result<(), ChatError>;

    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<(), ChatError>;

    async fn delete_message(&self, chat_id: ChatId, message_id: MessageId) -> Result<(), ChatError>;

    /// Long-poll for updates with `update_id >= offset`, waiting up to `timeout`.
    async fn get_updates(&self, offset: i64, timeout: Duration) -> Result<Vec<Update>, ChatError>;

    async fn create_topic(&self, chat_id: ChatId, name: &str) -> Result<ThreadId, ChatError>;

    async fn close_topic(&self, chat_id: ChatId, thread_id: ThreadId) -> Result<(), ChatError>;

    async fn react(&self, chat_id: ChatId, message_id: MessageId, emoji: &str) -> Result<(), ChatError>;
}
