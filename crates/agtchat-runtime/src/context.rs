//! Wiring from configuration to daemon handles.

use std::sync::Arc;

use agtchat_daemon::{DaemonContext, DaemonSettings, Injector, Registry, StateStore};
use agtchat_telegram::TelegramClient;
use agtchat_tmux::{TmuxCommandRunner, TmuxExecutor};
use anyhow::Context;

use crate::config::Config;

/// Socket targeting: --tmux-socket > AGTCHAT_TMUX_SOCKET_PATH > AGTCHAT_TMUX_SOCKET_NAME
pub fn build_executor(tmux_socket: Option<&str>) -> TmuxExecutor {
    let executor = TmuxExecutor::default();
    if let Some(socket) = tmux_socket {
        executor.with_socket_path(socket)
    } else if let Ok(path) = std::env::var("AGTCHAT_TMUX_SOCKET_PATH") {
        executor.with_socket_path(path)
    } else if let Ok(name) = std::env::var("AGTCHAT_TMUX_SOCKET_NAME") {
        executor.with_socket_name(name)
    } else {
        executor
    }
}

pub fn build_context(cfg: &Config, tmux_socket: Option<&str>) -> anyhow::Result<DaemonContext> {
    std::fs::create_dir_all(&cfg.state_dir)
        .with_context(|| format!("creating state directory {}", cfg.state_dir.display()))?;

    let tmux: Arc<dyn TmuxCommandRunner> = Arc::new(build_executor(tmux_socket));
    let chat = TelegramClient::new(&cfg.bot_token).context("building chat client")?;
    let settings = DaemonSettings {
        resolution_window: cfg.resolution_window,
        deny_policy: cfg.deny_policy,
        agent_command: cfg.agent_command.clone(),
        auto_register: cfg.auto_register,
        auto_approved: cfg.auto_approved_tools.clone(),
        ..DaemonSettings::new(cfg.chat_id)
    };

    Ok(DaemonContext {
        chat: Arc::new(chat),
        injector: Injector::new(tmux.clone()).with_timeout(cfg.injection_timeout),
        tmux,
        store: StateStore::new(cfg.state_path()),
        registry: Registry::new(cfg.registry_path(), cfg.scan_roots.clone(), cfg.session_prefix.clone()),
        settings: Arc::new(settings),
    })
}
