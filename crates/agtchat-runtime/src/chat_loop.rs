//! Long-poll loop for chat updates.
//!
//! Each batch is handed to the event handler and the loop waits until it is
//! fully handled before asking again, so the persisted offset always covers
//! what was processed and nothing more.

use std::sync::Arc;
use std::time::Duration;

use agtchat_daemon::{DaemonEvent, StateStore};
use agtchat_telegram::ChatApi;
use tokio::sync::{mpsc, oneshot};

/// Server-side cap on updates per request; a shorter batch means caught up.
const UPDATE_BATCH_LIMIT: usize = 100;
const MIN_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

pub fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}

pub async fn run_chat_loop(
    chat: Arc<dyn ChatApi>,
    store: StateStore,
    tx: mpsc::Sender<DaemonEvent>,
    poll_timeout: Duration,
) {
    let mut backoff = MIN_BACKOFF;
    loop {
        let offset = match store.read() {
            Ok(state) => state.update_offset,
            Err(e) => {
                tracing::warn!(error = %e, "state unreadable, retrying");
                tokio::time::sleep(backoff).await;
                backoff = next_backoff(backoff);
                continue;
            }
        };

        match chat.get_updates(offset, poll_timeout).await {
            Ok(updates) => {
                backoff = MIN_BACKOFF;
                tracing::debug!(offset, count = updates.len(), "updates received");
                let caught_up = updates.len() < UPDATE_BATCH_LIMIT;
                let (done, handled) = oneshot::channel();
                let batch = DaemonEvent::ChatBatch {
                    updates,
                    caught_up,
                    done,
                };
                if tx.send(batch).await.is_err() || handled.await.is_err() {
                    tracing::info!("event handler gone, chat loop stopping");
                    return;
                }
            }
            Err(e) => {
                let wait = e.retry_after().unwrap_or(backoff);
                if e.is_transient() {
                    tracing::warn!(error = %e, wait_secs = wait.as_secs(), "polling failed, backing off");
                } else {
                    tracing::error!(error = %e, wait_secs = wait.as_secs(), "polling rejected, backing off");
                }
                tokio::time::sleep(wait).await;
                backoff = next_backoff(backoff);
            }
        }
    }
}
