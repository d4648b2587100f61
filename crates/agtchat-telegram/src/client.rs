//! Telegram Bot API client.

use std::time::Duration;

use agtchat_core::{ChatId, MessageId, ThreadId};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::api::{ChatApi, OutgoingMessage};
use crate::error::ChatError;
use crate::keyboard::Keyboard;
use crate::types::{ApiResponse, ChatUpdate, RawForumTopic, RawSentMessage, RawUpdate, Update};

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Messages to the General topic must not carry a thread id.
pub const GENERAL_TOPIC: ThreadId = 1;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
/// Extra time granted to a long-poll request beyond its server-side wait.
const LONG_POLL_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    endpoint: String,
}

impl TelegramClient {
    pub fn new(bot_token: &str) -> Result<Self, ChatError> {
        Self::with_base_url(DEFAULT_API_BASE, bot_token)
    }

    pub fn with_base_url(base_url: &str, bot_token: &str) -> Result<Self, ChatError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/bot{bot_token}", base_url.trim_end_matches('/')),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<T, ChatError> {
        let resp = self
            .http
            .post(format!("{}/{method}", self.endpoint))
            .json(body)
            .timeout(timeout)
            .send()
            .await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;
        let envelope: ApiResponse<T> = serde_json::from_slice(&bytes)
            .map_err(|e| ChatError::Decode(format!("{method}: {e} (http {status})")))?;

        if envelope.ok {
            return envelope
                .result
                .ok_or_else(|| ChatError::Decode(format!("{method}: ok response without result")));
        }

        let code = envelope.error_code.unwrap_or_else(|| status.as_u16());
        let description = envelope.description.unwrap_or_default();
        if code == 429 {
            let secs = envelope
                .parameters
                .and_then(|p| p.retry_after)
                .unwrap_or(1);
            return Err(ChatError::RateLimited {
                retry_after: Duration::from_secs(secs),
            });
        }
        if description.contains("not enough rights") {
            return Err(ChatError::NoTopicRights(description));
        }
        Err(ChatError::Api { code, description })
    }

    fn message_body(msg: &OutgoingMessage) -> Value {
        let mut body = json!({
            "chat_id": msg.chat_id,
            "text": msg.text,
        });
        if let Some(thread_id) = msg.thread_id.filter(|t| *t != GENERAL_TOPIC) {
            body["message_thread_id"] = json!(thread_id);
        }
        if let Some(keyboard) = &msg.keyboard {
            body["reply_markup"] = json!(keyboard);
        }
        if let Some(reply_to) = msg.reply_to {
            body["reply_parameters"] = json!({
                "message_id": reply_to,
                "allow_sending_without_reply": true,
            });
        }
        if msg.markdown {
            body["parse_mode"] = json!("Markdown");
        }
        body
    }
}

fn decode_update(value: Value) -> Update {
    let update_id = value.get("update_id").and_then(Value::as_i64).unwrap_or(0);
    match serde_json::from_value::<RawUpdate>(value) {
        Ok(raw) => raw.into(),
        Err(e) => {
            warn!(update_id, error = %e, "skipping malformed update");
            Update {
                update_id,
                kind: ChatUpdate::Unsupported,
            }
        }
    }
}

#[async_trait]
impl ChatApi for TelegramClient {
    async fn send_message(&self, msg: &OutgoingMessage) -> Result<MessageId, ChatError> {
        let mut body = Self::message_body(msg);
        let sent = match self
            .call::<RawSentMessage>("sendMessage", &body, REQUEST_TIMEOUT)
            .await
        {
            Err(ChatError::Api { code: 400, description })
                if msg.markdown && description.contains("can't parse entities") =>
            {
                debug!(chat_id = msg.chat_id, "markdown rejected, resending as plain text");
                if let Some(obj) = body.as_object_mut() {
                    obj.remove("parse_mode");
                }
                self.call::<RawSentMessage>("sendMessage", &body, REQUEST_TIMEOUT)
                    .await?
            }
            other => other?,
        };
        Ok(sent.message_id)
    }

    async fn edit_buttons(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        keyboard: &Keyboard,
    ) -> Result<(), ChatError> {
        let body = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "reply_markup": keyboard,
        });
        match self
            .call::<Value>("editMessageReplyMarkup", &body, REQUEST_TIMEOUT)
            .await
        {
            Err(e) if e.is_not_modified() => Ok(()),
            other => other.map(drop),
        }
    }

    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<(), ChatError> {
        let mut body = json!({ "callback_query_id": callback_id });
        if let Some(text) = text {
            body["text"] = json!(text);
        }
        self.call::<Value>("answerCallbackQuery", &body, REQUEST_TIMEOUT)
            .await
            .map(drop)
    }

    async fn delete_message(&self, chat_id: ChatId, message_id: MessageId) -> Result<(), ChatError> {
        let body = json!({ "chat_id": chat_id, "message_id": message_id });
        self.call::<Value>("deleteMessage", &body, REQUEST_TIMEOUT)
            .await
            .map(drop)
    }

    async fn get_updates(&self, offset: i64, timeout: Duration) -> Result<Vec<Update>, ChatError> {
        let body = json!({
            "offset": offset,
            "timeout": timeout.as_secs(),
            "allowed_updates": ["message", "callback_query"],
        });
        let raw: Vec<Value> = self
            .call("getUpdates", &body, timeout + LONG_POLL_GRACE)
            .await?;
        Ok(raw.into_iter().map(decode_update).collect())
    }

    async fn create_topic(&self, chat_id: ChatId, name: &str) -> Result<ThreadId, ChatError> {
        let body = json!({ "chat_id": chat_id, "name": name });
        let topic: RawForumTopic = self
            .call("createForumTopic", &body, REQUEST_TIMEOUT)
            .await?;
        Ok(topic.message_thread_id)
    }

    async fn close_topic(&self, chat_id: ChatId, thread_id: ThreadId) -> Result<(), ChatError> {
        let body = json!({ "chat_id": chat_id, "message_thread_id": thread_id });
        self.call::<Value>("closeForumTopic", &body, REQUEST_TIMEOUT)
            .await
            .map(drop)
    }

    async fn react(&self, chat_id: ChatId, message_id: MessageId, emoji: &str) -> Result<(), ChatError> {
        let body = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "reaction": [{ "type": "emoji", "emoji": emoji }],
        });
        self.call::<Value>("setMessageReaction", &body, REQUEST_TIMEOUT)
            .await
            .map(drop)
    }
}
