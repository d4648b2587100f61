//! agtchat-telegram: chat-service IO boundary.
//! The [`ChatApi`] trait the daemon talks to, a Telegram Bot API client
//! behind it, and the closed update type decoded at the boundary.

pub mod api;
pub mod client;
pub mod error;
pub mod keyboard;
pub mod types;

pub use api::{ChatApi, OutgoingMessage};
pub use client::TelegramClient;
pub use error::ChatError;
pub use keyboard::{Button, Keyboard};
pub use types::{ButtonClick, ChatUpdate, IncomingMessage, Update};
