//! Daemon wiring: transcript poll loop, chat long-poll loop and sweep
//! ticker, all feeding the single event handler.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use agtchat_daemon::{Daemon, DaemonContext, DaemonEvent};
use agtchat_source_claude_jsonl::{StartAt, TranscriptManager};
use agtchat_tmux::{TmuxCommandRunner, TmuxPaneInfo, list_panes};
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};

use crate::chat_loop::run_chat_loop;
use crate::cli::DaemonOpts;
use crate::config::Config;
use crate::context::build_context;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Run the daemon until ctrl-c or SIGTERM.
pub async fn run_daemon(cfg: Config, opts: DaemonOpts, tmux_socket: Option<&str>) -> anyhow::Result<()> {
    let cfg = cfg.with_overrides(&opts);
    let ctx = build_context(&cfg, tmux_socket)?;

    let mut daemon = Daemon::new(ctx.clone());
    match daemon.startup() {
        Ok(report) => tracing::info!(
            tasks = report.tasks,
            pending = report.pending,
            "registry loaded"
        ),
        Err(e) => tracing::warn!(error = %e, "registry rebuild failed, continuing with cache"),
    }

    let mut manager = TranscriptManager::new(cfg.projects_dir.clone(), cfg.auto_approved_tools.clone());
    restore_tracking(&ctx, &mut manager);

    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let daemon_handle = tokio::spawn(daemon.run(rx));

    let transcript_handle = tokio::spawn(run_transcript_loop(
        ctx.tmux.clone(),
        manager,
        tx.clone(),
        cfg.transcript_poll,
        cfg.agent_command.clone(),
    ));
    let chat_handle = tokio::spawn(run_chat_loop(
        ctx.chat.clone(),
        ctx.store.clone(),
        tx.clone(),
        cfg.poll_timeout,
    ));
    let sweep_handle = tokio::spawn(run_sweep_loop(ctx.tmux.clone(), tx, cfg.sweep_interval));

    tracing::info!(chat_id = cfg.chat_id, "agtchat daemon running");

    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
                        _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "SIGTERM handler unavailable");
                    ctrl_c.await.ok();
                    tracing::info!("received ctrl-c, shutting down");
                }
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            tracing::info!("received ctrl-c, shutting down");
        }
    };

    tokio::select! {
        () = shutdown => {}
        _ = transcript_handle => tracing::error!("transcript loop exited unexpectedly"),
        _ = chat_handle => tracing::error!("chat loop exited unexpectedly"),
        _ = sweep_handle => tracing::error!("sweep loop exited unexpectedly"),
        _ = daemon_handle => tracing::error!("event handler exited unexpectedly"),
    }

    tracing::info!("daemon stopped");
    Ok(())
}

/// Re-track transcripts referenced by persisted records, from their end.
fn restore_tracking(ctx: &DaemonContext, manager: &mut TranscriptManager) {
    let origins = match ctx.store.read() {
        Ok(state) => state.latest_origins(),
        Err(e) => {
            tracing::warn!(error = %e, "state unreadable, nothing to restore");
            return;
        }
    };
    let mut restored = 0;
    for origin in origins {
        if origin.transcript_path.is_file() && manager.track(origin, StartAt::End) {
            restored += 1;
        }
    }
    if restored > 0 {
        tracing::info!(restored, "transcript tracking restored from state");
    }
}

async fn list_all_panes(tmux: &Arc<dyn TmuxCommandRunner>) -> anyhow::Result<Vec<TmuxPaneInfo>> {
    let exec = Arc::clone(tmux);
    Ok(tokio::task::spawn_blocking(move || list_panes(&exec)).await??)
}

async fn run_transcript_loop(
    tmux: Arc<dyn TmuxCommandRunner>,
    mut manager: TranscriptManager,
    tx: mpsc::Sender<DaemonEvent>,
    every: Duration,
    agent_command: String,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match transcript_tick(&tmux, &mut manager, &agent_command).await {
            Ok(events) => {
                for event in events {
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => tracing::warn!("transcript tick failed: {e}"),
        }
    }
}

async fn transcript_tick(
    tmux: &Arc<dyn TmuxCommandRunner>,
    manager: &mut TranscriptManager,
    agent_command: &str,
) -> anyhow::Result<Vec<DaemonEvent>> {
    let panes = list_all_panes(tmux).await?;
    let agents: Vec<&TmuxPaneInfo> = panes.iter().filter(|p| p.runs_agent(agent_command)).collect();
    tracing::debug!(panes = panes.len(), agents = agents.len(), "listed panes");

    let mut events = Vec::new();
    let discovered = manager.sync_panes(agents.iter().map(|p| (p.target.as_str(), p.current_path.as_str())));
    if !discovered.is_empty() {
        events.push(DaemonEvent::PanesDiscovered(discovered));
    }

    let live: HashSet<String> = panes.iter().map(|p| p.target.clone()).collect();
    let gone = manager.retain_panes(&live);
    if !gone.is_empty() {
        events.push(DaemonEvent::PanesGone(gone));
    }

    let observed = manager.poll_all();
    if !observed.is_empty() {
        events.push(DaemonEvent::Transcript {
            events: observed,
            observed_at: Utc::now(),
        });
    }
    Ok(events)
}

async fn run_sweep_loop(tmux: Arc<dyn TmuxCommandRunner>, tx: mpsc::Sender<DaemonEvent>, every: Duration) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; give the transcript loop a head start.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        match list_all_panes(&tmux).await {
            Ok(panes) => {
                let live_panes = panes.into_iter().map(|p| p.target).collect();
                if tx.send(DaemonEvent::Sweep { live_panes }).await.is_err() {
                    return;
                }
            }
            Err(e) => tracing::warn!("sweep skipped, panes not listed: {e}"),
        }
    }
}
