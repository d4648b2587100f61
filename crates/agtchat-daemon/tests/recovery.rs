//! Thread creation interrupted at each checkpoint converges to exactly one
//! bound thread once the daemon comes back.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use agtchat_core::{PendingTopicMarker, TaskKind, TaskMarker, ThreadId};
use agtchat_daemon::marker::{marker_path, read_marker};
use agtchat_daemon::{
    Daemon, DaemonContext, DaemonEvent, DaemonSettings, Injector, Registry, StateStore, TopicProtocol,
};
use agtchat_daemon_test_support::{CHAT_ID, FakeTmux, MockChat};
use agtchat_telegram::{ChatApi, Update};
use agtchat_tmux::Pacing;
use chrono::Utc;
use tokio::sync::oneshot;

struct Rig {
    dir: tempfile::TempDir,
    chat: Arc<MockChat>,
    ctx: DaemonContext,
}

fn rig() -> Rig {
    let dir = tempfile::tempdir().expect("test");
    let chat = Arc::new(MockChat::new());
    let tmux = Arc::new(FakeTmux::new());
    let mut settings = DaemonSettings::new(CHAT_ID);
    settings.auto_register = false;
    let ctx = DaemonContext {
        chat: chat.clone(),
        tmux: tmux.clone(),
        store: StateStore::new(dir.path().join("state.json")),
        registry: Registry::new(dir.path().join("registry.json"), vec![dir.path().join("work")], "ca-"),
        injector: Injector::new(tmux).with_pacing(Pacing::NONE),
        settings: Arc::new(settings),
    };
    Rig { dir, chat, ctx }
}

impl Rig {
    fn task_dir(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join("work").join(name);
        std::fs::create_dir_all(&path).expect("test");
        path
    }

    fn pending(&self, name: &str) -> PendingTopicMarker {
        PendingTopicMarker {
            name: name.into(),
            kind: TaskKind::Session,
            path: self.task_dir(name),
            repo: None,
            description: None,
            created_at: Utc::now(),
        }
    }

    /// The process died and came back: fresh handler, registry cache gone.
    fn restart(&self, grace: Duration) -> Daemon {
        std::fs::remove_file(self.dir.path().join("registry.json")).ok();
        let mut daemon = Daemon::with_retry_grace(self.ctx.clone(), grace);
        daemon.startup().expect("test");
        daemon
    }

    async fn updates(&self) -> Vec<Update> {
        let offset = self.ctx.store.read().expect("test").update_offset;
        self.chat.get_updates(offset, Duration::ZERO).await.expect("test")
    }

    /// Updates consumed by a run whose state never reached disk.
    async fn lose_backlog(&self) {
        let consumed = self.updates().await;
        let next = consumed.last().map_or(0, |u| u.update_id + 1);
        self.ctx.store.update(|s| s.update_offset = next).expect("test");
    }

    fn bound_thread(&self, name: &str) -> Option<ThreadId> {
        match read_marker(&self.dir.path().join("work").join(name)).expect("test") {
            Some(TaskMarker::Complete(task)) => Some(task.thread_id),
            _ => None,
        }
    }
}

async fn deliver(daemon: &mut Daemon, updates: Vec<Update>, caught_up: bool) {
    let (done, handled) = oneshot::channel();
    daemon
        .handle(DaemonEvent::ChatBatch {
            updates,
            caught_up,
            done,
        })
        .await;
    handled.await.expect("test");
}

fn assert_converged(r: &Rig, name: &str) {
    let topics = r.chat.topics();
    assert_eq!(topics.len(), 1, "exactly one thread: {topics:?}");
    let thread_id = topics[0].0;
    assert_eq!(r.bound_thread(name), Some(thread_id));
    let entry = r.ctx.registry.for_thread(thread_id).expect("test").expect("test");
    assert_eq!(entry.task.name, name);
    assert!(r.ctx.registry.pending().expect("test").is_empty());
}

#[tokio::test]
async fn crash_before_thread_is_retried_once_caught_up() {
    let r = rig();
    let topics = TopicProtocol::new(r.ctx.clone());
    topics.begin(&r.pending("api")).expect("test");

    let mut daemon = r.restart(Duration::ZERO);
    assert_eq!(r.ctx.registry.pending().expect("test").len(), 1);

    // Not caught up yet: the thread may still show up in the backlog.
    deliver(&mut daemon, Vec::new(), false).await;
    assert!(r.chat.topics().is_empty());

    deliver(&mut daemon, Vec::new(), true).await;
    assert_converged(&r, "api");

    // The creation event of the retried thread changes nothing.
    let backlog = r.updates().await;
    deliver(&mut daemon, backlog, true).await;
    assert_converged(&r, "api");
}

#[tokio::test]
async fn crash_after_thread_links_from_creation_event() {
    let r = rig();
    let topics = TopicProtocol::new(r.ctx.clone());
    topics.begin(&r.pending("api")).expect("test");
    topics.open_thread("api").await.expect("test");

    // Even with no grace, the backlog is read before anything is retried.
    let mut daemon = r.restart(Duration::ZERO);
    let backlog = r.updates().await;
    assert_eq!(backlog.len(), 1);
    deliver(&mut daemon, backlog, true).await;
    assert_converged(&r, "api");
    assert!(r.ctx.store.read().expect("test").topic_names.is_empty());
}

#[tokio::test]
async fn crash_after_setup_message_links_from_reply() {
    let r = rig();
    let topics = TopicProtocol::new(r.ctx.clone());
    topics.begin(&r.pending("api")).expect("test");
    let thread_id = topics.open_thread("api").await.expect("test");
    let setup = topics.announce(thread_id, "api").await.expect("test");

    // The creation event was consumed before the crash; the learned name is lost.
    let mut daemon = r.restart(Duration::from_secs(60));
    r.lose_backlog().await;

    let reply = r.chat.reply(setup, "is this ready?");
    deliver(&mut daemon, vec![reply], true).await;
    assert_converged(&r, "api");
    assert!(!r.chat.sent_containing("Linked this topic to `api`").is_empty());
}

#[tokio::test]
async fn unmatched_thread_is_linked_by_hand() {
    let r = rig();
    let topics = TopicProtocol::new(r.ctx.clone());
    topics.begin(&r.pending("api")).expect("test");
    let thread_id = topics.open_thread("api").await.expect("test");

    let mut daemon = r.restart(Duration::from_secs(60));
    r.lose_backlog().await;

    let hello = r.chat.message(Some(thread_id), "hello?");
    deliver(&mut daemon, vec![hello], true).await;
    assert_eq!(r.bound_thread("api"), None);
    assert!(r.chat.last_sent().is_some_and(|s| s.msg.text.contains("/link")));

    let link = r.chat.message(Some(thread_id), "/link api");
    deliver(&mut daemon, vec![link], true).await;
    assert_converged(&r, "api");
}

fn task_set(r: &Rig) -> HashSet<(String, TaskKind, PathBuf, ThreadId)> {
    r.ctx
        .registry
        .tasks()
        .expect("test")
        .into_iter()
        .map(|e| (e.task.name, e.task.kind, e.task.path, e.task.thread_id))
        .collect()
}

#[tokio::test]
async fn completed_tasks_survive_losing_the_registry() {
    let r = rig();
    let topics = TopicProtocol::new(r.ctx.clone());
    let task = topics.create(r.pending("api")).await.expect("test");
    let worktree = PendingTopicMarker {
        kind: TaskKind::Worktree,
        repo: Some(r.dir.path().join("repo")),
        ..r.pending("web")
    };
    topics.create(worktree).await.expect("test");
    let before = task_set(&r);
    assert_eq!(before.len(), 2);

    std::fs::remove_file(r.dir.path().join("registry.json")).expect("test");
    let report = r.ctx.registry.rebuild().expect("test");
    assert_eq!(report.tasks, 2);
    assert_eq!(report.added.len(), 2);
    assert_eq!(task_set(&r), before);

    // A marker deleted by hand drops the task on the next rebuild.
    std::fs::remove_file(marker_path(&task.path)).expect("test");
    let report = r.ctx.registry.rebuild().expect("test");
    assert_eq!(report.dropped, ["api"]);
    assert_eq!(task_set(&r).len(), 1);
}
