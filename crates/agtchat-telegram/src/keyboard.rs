//! Inline button controls attached to notifications.

use agtchat_core::ButtonAction;
use agtchat_core::lifecycle::INERT_CALLBACK;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Button {
    pub text: String,
    pub callback_data: String,
}

impl Button {
    pub fn new(text: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: callback_data.into(),
        }
    }

    pub fn action(text: &str, action: ButtonAction) -> Self {
        Self::new(text, action.callback_data())
    }
}

/// Rows of buttons, serialized as `{"inline_keyboard": [[..]]}`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Keyboard {
    pub inline_keyboard: Vec<Vec<Button>>,
}

impl Keyboard {
    /// Allow / Always / Deny for a pending permission prompt.
    pub fn permission() -> Self {
        Self {
            inline_keyboard: vec![vec![
                Button::action("✓ Allow", ButtonAction::Allow),
                Button::action("✓ Always", ButtonAction::AllowAlways),
                Button::action("✗ Deny", ButtonAction::Deny),
            ]],
        }
    }

    /// Dismiss control for an idle notification.
    pub fn dismiss() -> Self {
        Self {
            inline_keyboard: vec![vec![Button::action("Dismiss", ButtonAction::Dismiss)]],
        }
    }

    /// A single button whose click is only acknowledged.
    pub fn resolved(label: &str) -> Self {
        Self {
            inline_keyboard: vec![vec![Button::new(label, INERT_CALLBACK)]],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inline_keyboard.iter().all(Vec::is_empty)
    }
}
