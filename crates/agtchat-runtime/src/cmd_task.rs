//! One-shot task subcommands: status, recover, spawn, pause, resume, cleanup.
//!
//! These share the daemon's state files, so they can run while it is up.

use agtchat_daemon::{DaemonContext, TaskManager, TopicProtocol, format};
use anyhow::Context;

use crate::cli::SpawnOpts;

fn manager(ctx: &DaemonContext) -> TaskManager {
    TaskManager::new(ctx.clone(), TopicProtocol::new(ctx.clone()))
}

pub fn cmd_status(ctx: &DaemonContext) -> anyhow::Result<()> {
    let tasks = manager(ctx).tasks()?;
    let pending = ctx.registry.pending()?;
    println!("{}", format::status_text(&tasks, &pending));
    Ok(())
}

pub fn cmd_recover(ctx: &DaemonContext) -> anyhow::Result<()> {
    let report = ctx.registry.rebuild()?;
    let linked = TopicProtocol::new(ctx.clone()).link_by_thread_names()?;
    println!("{} task(s), {} pending topic(s)", report.tasks, report.pending);
    for name in &report.added {
        println!("  added    {name}");
    }
    for name in &linked {
        println!("  linked   {name}");
    }
    for name in &report.dropped {
        println!("  dropped  {name}");
    }
    Ok(())
}

pub async fn cmd_spawn(ctx: &DaemonContext, opts: SpawnOpts) -> anyhow::Result<()> {
    let manager = manager(ctx);
    let task = match opts.repo {
        Some(repo) => manager.spawn_worktree(&opts.name, &repo, opts.description).await?,
        None => {
            let dir = match opts.dir {
                Some(dir) => dir,
                None => std::env::current_dir().context("resolving current directory")?,
            };
            manager.spawn_session(&opts.name, &dir, opts.description).await?
        }
    };
    println!(
        "spawned {} ({}) in {} [session {}]",
        task.name,
        task.kind,
        task.path.display(),
        ctx.registry.session_name(&task.name)
    );
    Ok(())
}

pub async fn cmd_pause(ctx: &DaemonContext, name: &str) -> anyhow::Result<()> {
    let task = manager(ctx).pause(name).await?;
    println!("paused {}", task.name);
    Ok(())
}

pub async fn cmd_resume(ctx: &DaemonContext, name: &str) -> anyhow::Result<()> {
    let task = manager(ctx).resume(name).await?;
    println!("resumed {}", task.name);
    Ok(())
}

pub async fn cmd_cleanup(ctx: &DaemonContext, name: &str) -> anyhow::Result<()> {
    let task = manager(ctx).cleanup(name).await?;
    println!("cleaned up {}", task.name);
    Ok(())
}
