//! Transcript lines in, chat traffic and tmux keys out, through the same
//! event handler the daemon runs.

use std::collections::HashSet;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use agtchat_core::{BatchDenyPolicy, NotificationRecord, NotificationStatus, PaneOrigin};
use agtchat_daemon::format::PROTECTED_PROMPT_REPLY;
use agtchat_daemon::{
    Daemon, DaemonContext, DaemonEvent, DaemonSettings, Injector, Registry, StateStore, TaskManager, TopicProtocol,
};
use agtchat_daemon_test_support::{CHAT_ID, FakeTmux, MockChat, text_line, tool_result_line, tool_use_line};
use agtchat_source_claude_jsonl::{StartAt, TranscriptManager};
use agtchat_telegram::{ChatApi, Update};
use agtchat_tmux::Pacing;
use chrono::Utc;
use tokio::sync::oneshot;

const PANE: &str = "dev:0.0";

struct Rig {
    dir: tempfile::TempDir,
    chat: Arc<MockChat>,
    tmux: Arc<FakeTmux>,
    ctx: DaemonContext,
    daemon: Daemon,
    transcripts: TranscriptManager,
    transcript: PathBuf,
}

fn context(dir: &std::path::Path, chat: Arc<MockChat>, tmux: Arc<FakeTmux>, settings: DaemonSettings) -> DaemonContext {
    DaemonContext {
        chat,
        tmux: tmux.clone(),
        store: StateStore::new(dir.join("state.json")),
        registry: Registry::new(dir.join("registry.json"), vec![dir.join("work")], "ca-"),
        injector: Injector::new(tmux)
            .with_pacing(Pacing::NONE)
            .with_timeout(Duration::from_secs(2)),
        settings: Arc::new(settings),
    }
}

fn rig_with(configure: impl FnOnce(&mut DaemonSettings)) -> Rig {
    let dir = tempfile::tempdir().expect("test");
    let chat = Arc::new(MockChat::new());
    let tmux = Arc::new(FakeTmux::new());
    tmux.add_pane(PANE, "/work/api", "claude");

    let mut settings = DaemonSettings::new(CHAT_ID);
    settings.auto_register = false;
    configure(&mut settings);
    let ctx = context(dir.path(), chat.clone(), tmux.clone(), settings);

    let transcript = dir.path().join("session.jsonl");
    std::fs::write(&transcript, "").expect("test");
    let mut transcripts = TranscriptManager::new(dir.path().join("projects"), ["Read".to_owned()]);
    transcripts.track(
        PaneOrigin {
            pane: PANE.into(),
            cwd: "/work/api".into(),
            transcript_path: transcript.clone(),
        },
        StartAt::Beginning,
    );

    Rig {
        daemon: Daemon::new(ctx.clone()),
        dir,
        chat,
        tmux,
        ctx,
        transcripts,
        transcript,
    }
}

fn rig() -> Rig {
    rig_with(|_| {})
}

impl Rig {
    /// Append lines and run one transcript tick.
    async fn agent_writes(&mut self, lines: &[String]) {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&self.transcript)
            .expect("test");
        for line in lines {
            writeln!(file, "{line}").expect("test");
        }
        drop(file);
        let events = self.transcripts.poll_all();
        self.daemon
            .handle(DaemonEvent::Transcript {
                events,
                observed_at: Utc::now(),
            })
            .await;
    }

    async fn deliver(&mut self, updates: Vec<Update>) {
        let (done, handled) = oneshot::channel();
        self.daemon
            .handle(DaemonEvent::ChatBatch {
                updates,
                caught_up: true,
                done,
            })
            .await;
        handled.await.expect("test");
    }

    fn record(&self, message_id: i64) -> Option<NotificationRecord> {
        self.ctx.store.read().expect("test").notifications.get(&message_id).cloned()
    }

    fn tasks(&self) -> TaskManager {
        TaskManager::new(self.ctx.clone(), TopicProtocol::new(self.ctx.clone()))
    }

    fn task_dir(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join("work").join(name);
        std::fs::create_dir_all(&path).expect("test");
        path
    }

    fn permission_messages(&self) -> Vec<i64> {
        self.chat
            .sent()
            .into_iter()
            .filter(|s| s.msg.keyboard.as_ref().is_some_and(|k| k.inline_keyboard[0].len() == 3))
            .map(|s| s.message_id)
            .collect()
    }
}

#[tokio::test]
async fn allow_answers_the_prompt_once() {
    let mut r = rig();
    r.agent_writes(&[tool_use_line("m1", &[("T1", "Bash")])]).await;
    let [id] = r.permission_messages()[..] else {
        panic!("expected one permission request");
    };

    r.deliver(vec![r.chat.click(id, "y")]).await;
    assert_eq!(r.tmux.sent_to(PANE), ["Enter"]);
    assert_eq!(r.record(id).map(|rec| rec.status), Some(NotificationStatus::Allowed));
    assert_eq!(r.chat.label_of(id).as_deref(), Some("✓ Allowed"));

    // A second tap on the stale button must not send another key.
    let again = r.chat.click(id, "y");
    r.deliver(vec![again]).await;
    assert_eq!(r.tmux.sent_to(PANE).len(), 1);
    assert_eq!(r.chat.last_answer().as_deref(), Some("Already handled"));

    r.agent_writes(&[tool_result_line("T1")]).await;
    assert_eq!(r.record(id).map(|rec| rec.status), Some(NotificationStatus::Allowed));
    assert!(r.chat.deleted().is_empty());
}

#[tokio::test]
async fn batch_is_notified_one_call_at_a_time() {
    let mut r = rig();
    r.agent_writes(&[tool_use_line("m1", &[("T1", "Bash"), ("T2", "Edit")])]).await;
    assert_eq!(r.permission_messages().len(), 1);

    let id = r.permission_messages()[0];
    r.deliver(vec![r.chat.click(id, "y")]).await;
    assert_eq!(r.permission_messages().len(), 1);

    r.agent_writes(&[tool_result_line("T1")]).await;
    let ids = r.permission_messages();
    assert_eq!(ids.len(), 2);
    assert_eq!(r.record(ids[1]).and_then(|rec| rec.tool_call_id).as_deref(), Some("T2"));
}

#[tokio::test]
async fn deny_clears_the_rest_of_the_batch() {
    let mut r = rig();
    r.agent_writes(&[tool_use_line("m1", &[("T1", "Bash"), ("T2", "Bash"), ("T3", "Bash")])])
        .await;
    let id = r.permission_messages()[0];

    r.deliver(vec![r.chat.click(id, "n")]).await;
    assert_eq!(r.tmux.sent_to(PANE), ["Down", "Down", "Enter"]);
    assert_eq!(r.record(id).map(|rec| rec.status), Some(NotificationStatus::Denied));
    assert_eq!(r.chat.last_answer().as_deref(), Some("Denied"));
    assert!(r.daemon.notifier().queue(PANE).is_none());

    // The agent abandons the batch; nothing else is surfaced.
    r.agent_writes(&[text_line("m2", "Understood, I won't run those.")]).await;
    assert_eq!(r.permission_messages().len(), 1);
}

#[tokio::test]
async fn deny_can_advance_to_the_next_call() {
    let mut r = rig_with(|s| s.deny_policy = BatchDenyPolicy::AdvanceToNext);
    r.agent_writes(&[tool_use_line("m1", &[("T1", "Bash"), ("T2", "Bash")])]).await;
    let id = r.permission_messages()[0];

    r.deliver(vec![r.chat.click(id, "n")]).await;
    let ids = r.permission_messages();
    assert_eq!(ids.len(), 2);
    assert_eq!(r.record(ids[1]).and_then(|rec| rec.tool_call_id).as_deref(), Some("T2"));
}

#[tokio::test]
async fn quick_result_deletes_the_request() {
    let mut r = rig();
    r.agent_writes(&[tool_use_line("m1", &[("T1", "Bash")])]).await;
    let id = r.permission_messages()[0];

    r.agent_writes(&[tool_result_line("T1")]).await;
    assert_eq!(r.chat.deleted(), [id]);
    assert_eq!(r.record(id).map(|rec| rec.status), Some(NotificationStatus::Deleted));
}

#[tokio::test]
async fn late_result_expires_the_request() {
    let mut r = rig_with(|s| s.resolution_window = Duration::ZERO);
    r.agent_writes(&[tool_use_line("m1", &[("T1", "Bash")])]).await;
    let id = r.permission_messages()[0];

    r.agent_writes(&[tool_result_line("T1")]).await;
    assert!(r.chat.deleted().is_empty());
    assert_eq!(r.record(id).map(|rec| rec.status), Some(NotificationStatus::Expired));
    assert_eq!(r.chat.label_of(id).as_deref(), Some("⏰ Expired"));
}

#[tokio::test]
async fn idle_followed_quickly_is_a_false_alarm() {
    let mut r = rig();
    r.agent_writes(&[text_line("m1", "Done. Want me to open a PR?")]).await;
    let idle = r.chat.last_sent().expect("test").message_id;
    assert_eq!(r.record(idle).map(|rec| rec.status), Some(NotificationStatus::Pending));

    r.agent_writes(&[tool_use_line("m2", &[("T1", "Read")])]).await;
    assert_eq!(r.chat.deleted(), [idle]);
    assert!(r.record(idle).is_none());
}

#[tokio::test]
async fn idle_followed_late_is_superseded() {
    let mut r = rig_with(|s| s.resolution_window = Duration::ZERO);
    r.agent_writes(&[text_line("m1", "Done. Want me to open a PR?")]).await;
    let idle = r.chat.last_sent().expect("test").message_id;

    r.agent_writes(&[tool_use_line("m2", &[("T1", "Read")])]).await;
    assert!(r.chat.deleted().is_empty());
    assert_eq!(r.record(idle).map(|rec| rec.status), Some(NotificationStatus::Superseded));
    let cleared = r.chat.edits().into_iter().any(|(id, kb)| id == idle && kb.inline_keyboard.is_empty());
    assert!(cleared);

    // A late reply to the superseded idle message still reaches the pane.
    let reply = r.chat.reply(idle, "yes please");
    r.deliver(vec![reply]).await;
    assert!(r.tmux.sent_to(PANE).iter().any(|k| k == "-l yes please"));
}

#[tokio::test]
async fn idle_followed_by_call_settled_in_the_same_read_is_a_false_alarm() {
    let mut r = rig();
    r.agent_writes(&[text_line("m1", "Done. Want me to open a PR?")]).await;
    let idle = r.chat.last_sent().expect("test").message_id;

    r.agent_writes(&[tool_use_line("m2", &[("T1", "Read")]), tool_result_line("T1")])
        .await;
    assert_eq!(r.chat.deleted(), [idle]);
    assert!(r.record(idle).is_none());
}

#[tokio::test]
async fn idle_superseded_by_call_settled_in_the_same_read() {
    let mut r = rig_with(|s| s.resolution_window = Duration::ZERO);
    r.agent_writes(&[text_line("m1", "Done. Want me to open a PR?")]).await;
    let idle = r.chat.last_sent().expect("test").message_id;

    r.agent_writes(&[tool_use_line("m2", &[("T1", "Bash")]), tool_result_line("T1")])
        .await;
    assert_eq!(r.record(idle).map(|rec| rec.status), Some(NotificationStatus::Superseded));
    // The terminal already moved past the call: nothing to prompt for.
    assert!(r.permission_messages().is_empty());
    assert!(r.daemon.notifier().queue(PANE).is_none());
}

#[tokio::test]
async fn reply_to_old_message_is_held_back_by_open_prompt() {
    let mut r = rig_with(|s| s.resolution_window = Duration::ZERO);
    r.agent_writes(&[text_line("m1", "Which database?")]).await;
    let idle = r.chat.last_sent().expect("test").message_id;
    r.agent_writes(&[tool_use_line("m2", &[("T1", "Bash")])]).await;
    let prompt = r.permission_messages()[0];

    let reply = r.chat.reply(idle, "postgres");
    r.deliver(vec![reply]).await;
    assert!(r.tmux.sent_to(PANE).is_empty());
    assert_eq!(r.record(prompt).map(|rec| rec.status), Some(NotificationStatus::Pending));
    assert_eq!(r.chat.last_sent().map(|s| s.msg.text).as_deref(), Some(PROTECTED_PROMPT_REPLY));

    // Replying to the prompt itself answers it with an instruction.
    let reply = r.chat.reply(prompt, "use sqlite for tests");
    r.deliver(vec![reply]).await;
    let keys = r.tmux.sent_to(PANE);
    assert_eq!(keys[..3], ["C-u", "Down", "Down"]);
    assert_eq!(keys[3], "-l use sqlite for tests");
    assert_eq!(r.record(prompt).map(|rec| rec.status), Some(NotificationStatus::Replied));
}

#[tokio::test]
async fn dead_pane_ends_pending_notifications() {
    let mut r = rig();
    r.agent_writes(&[tool_use_line("m1", &[("T1", "Bash")])]).await;
    let id = r.permission_messages()[0];

    r.tmux.remove_pane(PANE);
    r.deliver(vec![r.chat.click(id, "y")]).await;
    assert_eq!(r.record(id).map(|rec| rec.status), Some(NotificationStatus::Stale));
    assert_eq!(r.chat.label_of(id).as_deref(), Some("⚠ Session ended"));
    assert_eq!(r.chat.last_answer().as_deref(), Some("Failed: pane dead"));

    let live: HashSet<String> = HashSet::new();
    r.daemon.handle(DaemonEvent::Sweep { live_panes: live }).await;
    assert!(r.record(id).is_none());
}

#[tokio::test]
async fn restart_does_not_replay_handled_updates() {
    let mut r = rig();
    r.agent_writes(&[tool_use_line("m1", &[("T1", "Bash")])]).await;
    let id = r.permission_messages()[0];
    let click = r.chat.click(id, "y");
    r.chat.queue(click.clone());
    r.deliver(vec![click.clone()]).await;

    // Same state files, fresh handler: the poller asks from the stored offset.
    let mut restarted = Daemon::new(r.ctx.clone());
    restarted.startup().expect("test");
    let offset = r.ctx.store.read().expect("test").update_offset;
    assert_eq!(offset, click.update_id + 1);
    let pending = r.chat.get_updates(offset, Duration::ZERO).await.expect("test");
    assert!(pending.is_empty());

    // A batch redelivered anyway is skipped by id.
    restarted.handle_update(click, Utc::now()).await;
    assert_eq!(r.tmux.sent_to(PANE), ["Enter"]);
}

#[tokio::test]
async fn thread_message_is_held_back_by_open_prompt() {
    let mut r = rig();
    let dir = r.task_dir("api");
    let task = r.tasks().register_existing(PANE, &dir).await.expect("test");
    r.agent_writes(&[tool_use_line("m1", &[("T1", "Bash")])]).await;
    let prompt = r.permission_messages()[0];

    let msg = r.chat.message(Some(task.thread_id), "also update the docs");
    r.deliver(vec![msg]).await;
    assert!(r.tmux.sent_to(PANE).is_empty());
    assert_eq!(r.chat.last_sent().map(|s| s.msg.text).as_deref(), Some(PROTECTED_PROMPT_REPLY));
    assert_eq!(r.record(prompt).map(|rec| rec.status), Some(NotificationStatus::Pending));

    // Once the prompt is gone the same message goes through.
    r.agent_writes(&[tool_result_line("T1")]).await;
    let msg = r.chat.message(Some(task.thread_id), "also update the docs");
    r.deliver(vec![msg]).await;
    assert!(r.tmux.sent_to(PANE).iter().any(|k| k == "-l also update the docs"));
}

#[tokio::test]
async fn thread_message_revives_a_dead_task_session() {
    let mut r = rig();
    let dir = r.task_dir("web");
    let task = r.tasks().spawn_session("web", &dir, None).await.expect("test");
    let pane = "ca-web:0.0";
    r.tmux.remove_pane(pane);
    r.tmux.clear_calls();

    let msg = r.chat.message(Some(task.thread_id), "run the tests again");
    r.deliver(vec![msg]).await;
    assert!(r.tmux.has_pane(pane));
    let keys = r.tmux.sent_to(pane);
    let resumed = keys.iter().position(|k| k.contains("claude --continue"));
    let delivered = keys.iter().position(|k| k == "-l run the tests again");
    assert!(resumed.is_some() && delivered.is_some() && resumed < delivered, "{keys:?}");
    let entry = r.ctx.registry.get("web").expect("test").expect("test");
    assert_eq!(entry.pane.as_deref(), Some(pane));
}
