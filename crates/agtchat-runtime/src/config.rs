//! Configuration: a TOML file, with credentials overridable from the
//! environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use agtchat_core::{BatchDenyPolicy, ChatId};
use agtchat_source_claude_jsonl::DEFAULT_AUTO_APPROVED_TOOLS;
use agtchat_source_claude_jsonl::discovery::default_projects_dir;
use anyhow::{Context, bail};
use serde::Deserialize;

use crate::cli::DaemonOpts;

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    bot_token: Option<String>,
    chat_id: Option<ChatId>,
    state_dir: Option<PathBuf>,
    scan_roots: Option<Vec<PathBuf>>,
    projects_dir: Option<PathBuf>,
    resolution_window_ms: Option<u64>,
    auto_approved_tools: Option<Vec<String>>,
    session_prefix: Option<String>,
    agent_command: Option<String>,
    auto_register: Option<bool>,
    batch_deny: Option<String>,
    poll_timeout_secs: Option<u64>,
    transcript_poll_ms: Option<u64>,
    sweep_interval_secs: Option<u64>,
    injection_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub chat_id: ChatId,
    pub state_dir: PathBuf,
    pub scan_roots: Vec<PathBuf>,
    pub projects_dir: PathBuf,
    pub resolution_window: Duration,
    pub auto_approved_tools: Vec<String>,
    pub session_prefix: String,
    pub agent_command: String,
    pub auto_register: bool,
    pub deny_policy: BatchDenyPolicy,
    pub poll_timeout: Duration,
    pub transcript_poll: Duration,
    pub sweep_interval: Duration,
    pub injection_timeout: Duration,
}

fn home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

/// `$XDG_<var>/agtchat`, else `~/<fallback>/agtchat`.
fn xdg_dir(var: &str, fallback: &str) -> Option<PathBuf> {
    match std::env::var_os(var) {
        Some(dir) if !dir.is_empty() => Some(PathBuf::from(dir).join("agtchat")),
        _ => home().map(|h| h.join(fallback).join("agtchat")),
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    xdg_dir("XDG_CONFIG_HOME", ".config").map(|d| d.join("config.toml"))
}

fn parse_policy(value: &str) -> anyhow::Result<BatchDenyPolicy> {
    match value {
        "clear_queue" => Ok(BatchDenyPolicy::ClearQueue),
        "advance_to_next" => Ok(BatchDenyPolicy::AdvanceToNext),
        other => bail!("batch_deny must be \"clear_queue\" or \"advance_to_next\", got {other:?}"),
    }
}

impl Config {
    /// Load from `path` (or the default location). A missing file is fine
    /// as long as the environment supplies the credentials.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = path.map(Path::to_path_buf).or_else(default_config_path);
        let file = match &path {
            Some(p) if p.exists() => {
                let text = std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
                toml::from_str(&text).with_context(|| format!("parsing {}", p.display()))?
            }
            _ => FileConfig::default(),
        };
        Self::resolve(file, |key| std::env::var(key).ok())
    }

    fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let bot_token = env("AGTCHAT_BOT_TOKEN")
            .or(file.bot_token)
            .filter(|t| !t.trim().is_empty())
            .context("no bot token: set bot_token in the config file or AGTCHAT_BOT_TOKEN")?;
        let chat_id = match env("AGTCHAT_CHAT_ID") {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("AGTCHAT_CHAT_ID is not a number: {raw:?}"))?,
            None => file
                .chat_id
                .context("no chat id: set chat_id in the config file or AGTCHAT_CHAT_ID")?,
        };
        let state_dir = file
            .state_dir
            .or_else(|| xdg_dir("XDG_STATE_HOME", ".local/state"))
            .context("cannot determine a state directory; set state_dir")?;
        let scan_roots = file
            .scan_roots
            .or_else(|| home().map(|h| vec![h]))
            .unwrap_or_default();
        let projects_dir = file
            .projects_dir
            .or_else(default_projects_dir)
            .context("cannot locate the agent's projects directory; set projects_dir")?;
        let deny_policy = match file.batch_deny.as_deref() {
            Some(v) => parse_policy(v)?,
            None => BatchDenyPolicy::default(),
        };

        Ok(Self {
            bot_token,
            chat_id,
            state_dir,
            scan_roots,
            projects_dir,
            resolution_window: Duration::from_millis(file.resolution_window_ms.unwrap_or(4000)),
            auto_approved_tools: file
                .auto_approved_tools
                .unwrap_or_else(|| DEFAULT_AUTO_APPROVED_TOOLS.iter().map(|t| (*t).to_owned()).collect()),
            session_prefix: file.session_prefix.unwrap_or_else(|| "ca-".to_owned()),
            agent_command: file.agent_command.unwrap_or_else(|| "claude".to_owned()),
            auto_register: file.auto_register.unwrap_or(true),
            deny_policy,
            poll_timeout: Duration::from_secs(file.poll_timeout_secs.unwrap_or(30)),
            transcript_poll: Duration::from_millis(file.transcript_poll_ms.unwrap_or(500)),
            sweep_interval: Duration::from_secs(file.sweep_interval_secs.unwrap_or(300)),
            injection_timeout: Duration::from_millis(file.injection_timeout_ms.unwrap_or(5000)),
        })
    }

    /// Apply daemon flags on top of file values.
    pub fn with_overrides(mut self, opts: &DaemonOpts) -> Self {
        if let Some(ms) = opts.transcript_poll_ms {
            self.transcript_poll = Duration::from_millis(ms);
        }
        if let Some(secs) = opts.poll_timeout_secs {
            self.poll_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = opts.sweep_interval_secs {
            self.sweep_interval = Duration::from_secs(secs);
        }
        self
    }

    pub fn state_path(&self) -> PathBuf {
        self.state_dir.join("state.json")
    }

    pub fn registry_path(&self) -> PathBuf {
        self.state_dir.join("registry.json")
    }
}
