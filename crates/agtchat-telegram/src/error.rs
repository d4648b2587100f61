use std::time::Duration;

/// Errors from the chat service boundary.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("chat api error {code}: {description}")]
    Api { code: u16, description: String },

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("bot lacks rights to manage topics: {0}")]
    NoTopicRights(String),

    #[error("decode error: {0}")]
    Decode(String),
}

impl ChatError {
    /// Worth retrying with the same request later.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) | Self::RateLimited { .. } => true,
            Self::Api { code, .. } => *code >= 500,
            Self::NoTopicRights(_) | Self::Decode(_) => false,
        }
    }

    /// The referenced message no longer exists (or can no longer be changed).
    pub fn is_message_gone(&self) -> bool {
        match self {
            Self::Api { code: 400, description } => {
                let d = description.to_ascii_lowercase();
                d.contains("message to edit not found")
                    || d.contains("message to delete not found")
                    || d.contains("message can't be deleted")
            }
            _ => false,
        }
    }

    /// Editing to identical markup is reported as an error by the service.
    pub fn is_not_modified(&self) -> bool {
        matches!(self, Self::Api { code: 400, description } if description.contains("message is not modified"))
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}
