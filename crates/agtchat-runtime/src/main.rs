//! agtchat: chat bridge for coding agents running in tmux.
//! Single-process binary; the daemon and the task subcommands share state files.

use clap::Parser;

mod chat_loop;
mod cli;
mod cmd_task;
mod config;
mod context;
mod poll_loop;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    let filter = std::env::var("AGTCHAT_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    let cfg = config::Config::load(args.config.as_deref())?;
    let tmux_socket = args.tmux_socket.as_deref();

    match args.command {
        cli::Command::Daemon(opts) => {
            tracing::info!("agtchat daemon starting");
            poll_loop::run_daemon(cfg, opts, tmux_socket).await?;
        }
        cli::Command::Status => {
            let ctx = context::build_context(&cfg, tmux_socket)?;
            cmd_task::cmd_status(&ctx)?;
        }
        cli::Command::Recover => {
            let ctx = context::build_context(&cfg, tmux_socket)?;
            cmd_task::cmd_recover(&ctx)?;
        }
        cli::Command::Spawn(opts) => {
            let ctx = context::build_context(&cfg, tmux_socket)?;
            cmd_task::cmd_spawn(&ctx, opts).await?;
        }
        cli::Command::Pause { name } => {
            let ctx = context::build_context(&cfg, tmux_socket)?;
            cmd_task::cmd_pause(&ctx, &name).await?;
        }
        cli::Command::Resume { name } => {
            let ctx = context::build_context(&cfg, tmux_socket)?;
            cmd_task::cmd_resume(&ctx, &name).await?;
        }
        cli::Command::Cleanup { name } => {
            let ctx = context::build_context(&cfg, tmux_socket)?;
            cmd_task::cmd_cleanup(&ctx, &name).await?;
        }
    }

    Ok(())
}
