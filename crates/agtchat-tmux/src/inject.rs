//! Keystroke and text injection into a pane.
//!
//! Literal text and the submit keystroke always go out as separate
//! `send-keys` calls; the agent's input box drops a submit that arrives
//! in the same write as the text.

use std::time::Duration;

use crate::error::TmuxError;
use crate::executor::TmuxCommandRunner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Enter,
    Down,
    Escape,
    /// Clear the current input line.
    ClearLine,
}

impl Key {
    pub fn tmux_name(self) -> &'static str {
        match self {
            Self::Enter => "Enter",
            Self::Down => "Down",
            Self::Escape => "Escape",
            Self::ClearLine => "C-u",
        }
    }
}

/// Option chosen in the agent's three-way permission prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptChoice {
    /// 1) Yes
    Accept,
    /// 2) Yes, and don't ask again
    AcceptAlways,
    /// 3) No, and tell the agent what to do differently
    Reject,
}

impl PromptChoice {
    fn keys(self) -> &'static [Key] {
        match self {
            Self::Accept => &[Key::Enter],
            Self::AcceptAlways => &[Key::Down, Key::Enter],
            Self::Reject => &[Key::Down, Key::Down, Key::Enter],
        }
    }
}

/// Delays between injected steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    /// Between navigation keystrokes.
    pub key_gap: Duration,
    /// Between literal text and the submit keystroke.
    pub submit_gap: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            key_gap: Duration::from_millis(20),
            submit_gap: Duration::from_millis(100),
        }
    }
}

impl Pacing {
    pub const NONE: Self = Self {
        key_gap: Duration::ZERO,
        submit_gap: Duration::ZERO,
    };
}

pub fn send_key(runner: &impl TmuxCommandRunner, target: &str, key: Key) -> Result<(), TmuxError> {
    runner.run(&["send-keys", "-t", target, key.tmux_name()])?;
    Ok(())
}

/// Send text verbatim; tmux does not interpret key names with `-l`.
pub fn send_literal(
    runner: &impl TmuxCommandRunner,
    target: &str,
    text: &str,
) -> Result<(), TmuxError> {
    runner.run(&["send-keys", "-t", target, "-l", text])?;
    Ok(())
}

fn pause(gap: Duration) {
    if !gap.is_zero() {
        std::thread::sleep(gap);
    }
}

/// Clear the input line, type `text`, then submit.
pub fn submit_text(
    runner: &impl TmuxCommandRunner,
    target: &str,
    text: &str,
    pacing: Pacing,
) -> Result<(), TmuxError> {
    send_key(runner, target, Key::ClearLine)?;
    send_literal(runner, target, text)?;
    pause(pacing.submit_gap);
    send_key(runner, target, Key::Enter)
}

/// Answer the open permission prompt.
pub fn answer_prompt(
    runner: &impl TmuxCommandRunner,
    target: &str,
    choice: PromptChoice,
    pacing: Pacing,
) -> Result<(), TmuxError> {
    for (i, key) in choice.keys().iter().enumerate() {
        if i > 0 {
            pause(pacing.key_gap);
        }
        send_key(runner, target, *key)?;
    }
    Ok(())
}

/// Navigate the open prompt to its free-text option and submit `text` there.
pub fn submit_prompt_instruction(
    runner: &impl TmuxCommandRunner,
    target: &str,
    text: &str,
    pacing: Pacing,
) -> Result<(), TmuxError> {
    send_key(runner, target, Key::ClearLine)?;
    send_key(runner, target, Key::Down)?;
    pause(pacing.key_gap);
    send_key(runner, target, Key::Down)?;
    pause(pacing.key_gap);
    send_literal(runner, target, text)?;
    pause(pacing.submit_gap);
    send_key(runner, target, Key::Enter)
}
