//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "agtchat", about = "Chat bridge for agents running in tmux")]
pub struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/agtchat/config.toml)
    #[arg(long, short = 'c', global = true, env = "AGTCHAT_CONFIG")]
    pub config: Option<PathBuf>,

    /// tmux socket path
    #[arg(long, global = true)]
    pub tmux_socket: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the bridge (transcript watcher + chat poller)
    Daemon(DaemonOpts),
    /// List tasks
    Status,
    /// Rebuild the task registry from marker files
    Recover,
    /// Start a new task with its own chat topic
    Spawn(SpawnOpts),
    /// Stop a task's session, keeping its topic
    Pause { name: String },
    /// Restart a paused task's session
    Resume { name: String },
    /// Remove a task: close its topic and its worktree or marker
    Cleanup { name: String },
}

#[derive(clap::Args, Default)]
pub struct DaemonOpts {
    /// Transcript poll interval in milliseconds (overrides config)
    #[arg(long)]
    pub transcript_poll_ms: Option<u64>,

    /// Long-poll wait in seconds (overrides config)
    #[arg(long)]
    pub poll_timeout_secs: Option<u64>,

    /// Dead-pane sweep interval in seconds (overrides config)
    #[arg(long)]
    pub sweep_interval_secs: Option<u64>,
}

#[derive(clap::Args)]
pub struct SpawnOpts {
    /// Task name: letters, digits, '-' and '_'
    pub name: String,

    /// Run in this existing directory
    #[arg(long, conflicts_with = "repo")]
    pub dir: Option<PathBuf>,

    /// Create a git worktree of this repository under <repo>/trees/<name>
    #[arg(long)]
    pub repo: Option<PathBuf>,

    /// Initial prompt for the agent
    #[arg(long, short = 'd')]
    pub description: Option<String>,
}
