//! Serialized input delivery into panes.
//!
//! At most one injection runs per pane at a time. Every injection first
//! re-checks that the pane exists, and a call that does not finish within
//! the deadline is reported as a dead pane rather than retried.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agtchat_tmux::inject::{answer_prompt, submit_prompt_instruction, submit_text};
use agtchat_tmux::{Pacing, PromptChoice, TmuxCommandRunner, pane_exists};
use tracing::{debug, warn};

use crate::error::InjectError;

pub const DEFAULT_INJECTION_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Injection {
    /// Clear the input line, type the text, submit.
    Submit(String),
    /// Pick an option of the open permission prompt.
    Answer(PromptChoice),
    /// Move the open prompt to its free-text option and submit the text there.
    Instruct(String),
}

#[derive(Clone)]
pub struct Injector {
    tmux: Arc<dyn TmuxCommandRunner>,
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
    pacing: Pacing,
    timeout: Duration,
}

impl std::fmt::Debug for Injector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Injector")
            .field("pacing", &self.pacing)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Injector {
    pub fn new(tmux: Arc<dyn TmuxCommandRunner>) -> Self {
        Self {
            tmux,
            locks: Arc::default(),
            pacing: Pacing::default(),
            timeout: DEFAULT_INJECTION_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn pane_lock(&self, pane: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(pane.to_owned()).or_default().clone()
    }

    /// Drop the lock of a pane that is gone, unless an injection still holds it.
    pub fn forget_pane(&self, pane: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks.get(pane).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(pane);
        }
    }

    /// Drop the locks of every pane not in `live` that no injection holds.
    pub fn retain_panes(&self, live: &HashSet<String>) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.retain(|pane, lock| live.contains(pane) || Arc::strong_count(lock) > 1);
    }

    pub fn tracked_panes(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub async fn inject(&self, pane: &str, injection: Injection) -> Result<(), InjectError> {
        let lock = self.pane_lock(pane);
        let tmux = self.tmux.clone();
        let target = pane.to_owned();
        let pacing = self.pacing;

        // The guard moves into the blocking job, so the pane stays locked until
        // tmux really returns, even when this call has already timed out.
        let delivery = async move {
            let serialized = lock.lock_owned().await;
            tokio::task::spawn_blocking(move || -> Result<(), InjectError> {
                let _serialized = serialized;
                if !pane_exists(&tmux, &target)? {
                    return Err(InjectError::PaneDead(target));
                }
                let sent = match &injection {
                    Injection::Submit(text) => submit_text(&tmux, &target, text, pacing),
                    Injection::Answer(choice) => answer_prompt(&tmux, &target, *choice, pacing),
                    Injection::Instruct(text) => submit_prompt_instruction(&tmux, &target, text, pacing),
                };
                match sent {
                    Ok(()) => Ok(()),
                    Err(e) if e.is_missing_target() => Err(InjectError::PaneDead(target)),
                    Err(e) => Err(e.into()),
                }
            })
            .await
        };

        match tokio::time::timeout(self.timeout, delivery).await {
            Ok(Ok(result)) => {
                if result.is_ok() {
                    debug!(pane, "input delivered");
                }
                result
            }
            Ok(Err(join)) => Err(InjectError::Join(join.to_string())),
            Err(_) => {
                warn!(pane, timeout = ?self.timeout, "injection timed out, treating pane as gone");
                Err(InjectError::PaneDead(pane.to_owned()))
            }
        }
    }
}
