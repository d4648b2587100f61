use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use agtchat_core::{NotificationRecord, PaneOrigin};
use agtchat_daemon_test_support::{CHAT_ID, FakeTmux, MockChat};
use agtchat_tmux::Pacing;
use chrono::{DateTime, TimeZone, Utc};

use crate::context::{DaemonContext, DaemonSettings};
use crate::injector::Injector;
use crate::registry::Registry;
use crate::store::StateStore;

pub(crate) struct Harness {
    pub ctx: DaemonContext,
    pub chat: Arc<MockChat>,
    pub tmux: Arc<FakeTmux>,
    pub dir: tempfile::TempDir,
}

pub(crate) fn harness() -> Harness {
    let dir = tempfile::tempdir().expect("test");
    let chat = Arc::new(MockChat::new());
    let tmux = Arc::new(FakeTmux::new());
    let ctx = DaemonContext {
        chat: chat.clone(),
        tmux: tmux.clone(),
        store: StateStore::new(dir.path().join("state.json")),
        registry: Registry::new(
            dir.path().join("registry.json"),
            vec![dir.path().join("work")],
            "ca-",
        ),
        injector: Injector::new(tmux.clone())
            .with_pacing(Pacing::NONE)
            .with_timeout(Duration::from_secs(2)),
        settings: Arc::new(DaemonSettings::new(CHAT_ID)),
    };
    Harness { ctx, chat, tmux, dir }
}

impl Harness {
    pub fn record(&self, message_id: i64) -> Option<NotificationRecord> {
        self.ctx
            .store
            .read()
            .expect("test")
            .notifications
            .get(&message_id)
            .cloned()
    }

    pub fn transcript(&self, name: &str) -> PathBuf {
        self.dir.path().join(format!("{name}.jsonl"))
    }
}

pub(crate) fn origin(pane: &str, transcript_path: PathBuf) -> PaneOrigin {
    PaneOrigin {
        pane: pane.into(),
        cwd: "/work/api".into(),
        transcript_path,
    }
}

/// Fixed instant plus `millis`.
pub(crate) fn at(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(1_760_000_000_000 + millis)
        .single()
        .expect("test")
}
