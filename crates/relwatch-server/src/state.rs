use std::sync::Arc;

use relwatch_core::{TargetId, WatchScheduler};
use serde::Serialize;
use tokio::sync::broadcast;

/// Message pushed to SSE subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SseMessage {
    /// A watcher saw a new release and it was recorded on the target.
    NewRelease {
        target_id: TargetId,
        tag: String,
        title: String,
    },
    /// The target list or a target's settings changed.
    TargetsChanged,
}

impl SseMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            SseMessage::NewRelease { .. } => "new_release",
            SseMessage::TargetsChanged => "targets_changed",
        }
    }
}

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<WatchScheduler>,
    pub event_tx: broadcast::Sender<SseMessage>,
}

impl AppState {
    pub fn new(scheduler: Arc<WatchScheduler>) -> Self {
        let (tx, _) = broadcast::channel(64);
        let state = Self {
            scheduler,
            event_tx: tx.clone(),
        };

        // Drain new-release notifications from the watchers, record them on
        // their targets and broadcast each one. Ends once the scheduler is
        // dropped. Guard: only spawn if inside a Tokio runtime.
        if tokio::runtime::Handle::try_current().is_ok() {
            let scheduler = Arc::downgrade(&state.scheduler);
            let period = state.scheduler.settings().sync_interval();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(period).await;
                    let Some(scheduler) = scheduler.upgrade() else {
                        break;
                    };
                    for (target_id, release) in scheduler.sync_new_releases().await {
                        let _ = tx.send(SseMessage::NewRelease {
                            target_id,
                            title: release.title().to_string(),
                            tag: release.tag,
                        });
                    }
                }
            });
        }

        state
    }

    pub fn notify_targets_changed(&self) {
        let _ = self.event_tx.send(SseMessage::TargetsChanged);
    }
}
