//! Per-target watch loop: fetch, compare, decide, publish.
//!
//! A poller only ever writes into its [`WatchEntry`]; the target registry is
//! left to the control plane. Errors inside a cycle are logged and recorded
//! on the entry, and only a stop request ends the loop.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::source::ReleaseSource;
use crate::trigger::Reconciler;
use crate::types::{Target, TargetId};
use crate::watch_state::WatchEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollerState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// The slice of a target a poller needs, captured when it starts.
#[derive(Debug, Clone)]
pub struct WatchSpec {
    pub id: TargetId,
    pub name: String,
    pub release_ref: String,
    pub credential: Option<String>,
    pub namespace: String,
    pub deployment_name: String,
    pub interval: Duration,
}

impl From<&Target> for WatchSpec {
    fn from(target: &Target) -> Self {
        Self {
            id: target.id.clone(),
            name: target.name.clone(),
            release_ref: target.release_ref.clone(),
            credential: target.credential.clone(),
            namespace: target.namespace.clone(),
            deployment_name: target.deployment_name.clone(),
            interval: target.polling_interval(),
        }
    }
}

/// What a single poll cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A stop was requested before the cycle could complete.
    Cancelled,
    FetchFailed(String),
    NoReleases,
    /// First tag ever seen for this target; recorded without reconciling.
    FirstObservation { tag: String },
    NewRelease {
        previous: String,
        tag: String,
        reconciled: bool,
    },
    Unchanged { tag: String },
}

pub struct Poller {
    spec: WatchSpec,
    entry: Arc<WatchEntry>,
    source: Arc<dyn ReleaseSource>,
    reconciler: Reconciler,
    fetch_timeout: Duration,
    state: PollerState,
}

impl Poller {
    pub fn new(
        spec: WatchSpec,
        entry: Arc<WatchEntry>,
        source: Arc<dyn ReleaseSource>,
        reconciler: Reconciler,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            spec,
            entry,
            source,
            reconciler,
            fetch_timeout,
            state: PollerState::Idle,
        }
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    /// Run cycles until a stop is requested on the entry.
    pub async fn run(mut self) -> PollerState {
        self.state = PollerState::Running;
        info!(
            target_id = %self.spec.id,
            name = %self.spec.name,
            release_ref = %self.spec.release_ref,
            interval_secs = self.spec.interval.as_secs(),
            "watcher started"
        );

        loop {
            if !self.entry.desired_running() {
                break;
            }
            self.poll_once().await;
            if !self.entry.desired_running() {
                break;
            }
            tokio::select! {
                biased;
                () = self.entry.stop_requested() => break,
                () = sleep(self.spec.interval) => {}
            }
        }

        self.state = PollerState::Stopping;
        debug!(target_id = %self.spec.id, "watcher stopping");
        self.state = PollerState::Stopped;
        info!(target_id = %self.spec.id, name = %self.spec.name, "watcher stopped");
        self.state
    }

    /// Execute one fetch/compare/decide/publish cycle.
    pub async fn poll_once(&self) -> CycleOutcome {
        let spec = &self.spec;
        if !self.entry.desired_running() {
            return CycleOutcome::Cancelled;
        }

        let fetch = timeout(
            self.fetch_timeout,
            self.source
                .fetch(&spec.release_ref, spec.credential.as_deref()),
        );
        let fetched = tokio::select! {
            biased;
            () = self.entry.stop_requested() => return CycleOutcome::Cancelled,
            result = fetch => result,
        };

        let releases = match fetched {
            Err(_) => {
                let reason = format!(
                    "release fetch timed out after {}s",
                    self.fetch_timeout.as_secs()
                );
                warn!(target_id = %spec.id, release_ref = %spec.release_ref, "{reason}");
                self.entry.record_error(reason.clone());
                self.entry.mark_checked();
                return CycleOutcome::FetchFailed(reason);
            }
            Ok(Err(e)) => {
                warn!(target_id = %spec.id, error = %e, "release fetch failed");
                self.entry.record_error(e.to_string());
                self.entry.mark_checked();
                return CycleOutcome::FetchFailed(e.to_string());
            }
            Ok(Ok(list)) => list,
        };

        let Some(latest) = releases.first() else {
            info!(target_id = %spec.id, release_ref = %spec.release_ref, "no releases published");
            self.entry.mark_checked();
            return CycleOutcome::NoReleases;
        };
        let latest = latest.clone();
        let tag = latest.tag.clone();

        self.entry.clear_error();
        self.entry.publish(&releases);

        let outcome = match self.entry.stored_tag() {
            None => {
                info!(target_id = %spec.id, tag = %tag, "initial release observed");
                self.entry.raise_new_release(latest.clone());
                CycleOutcome::FirstObservation { tag: tag.clone() }
            }
            Some(previous) if previous != tag => {
                if !self.entry.desired_running() {
                    return CycleOutcome::Cancelled;
                }
                info!(
                    target_id = %spec.id,
                    previous = %previous,
                    tag = %tag,
                    "new release detected"
                );
                let reconciled = match self
                    .reconciler
                    .reconcile(&spec.namespace, &spec.deployment_name, &tag)
                    .await
                {
                    Ok(()) => true,
                    Err(e) => {
                        self.entry.record_error(e.to_string());
                        false
                    }
                };
                self.entry.raise_new_release(latest);
                CycleOutcome::NewRelease {
                    previous,
                    tag: tag.clone(),
                    reconciled,
                }
            }
            Some(_) => {
                debug!(target_id = %spec.id, tag = %tag, "no new release");
                CycleOutcome::Unchanged { tag: tag.clone() }
            }
        };

        // Advances even when the restart failed: a failed reconciliation is
        // not retried on the next cycle.
        self.entry.set_stored_tag(tag);
        self.entry.mark_checked();
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WatchError;
    use crate::test_support::{releases, FakeController, ScriptedSource};

    fn spec() -> WatchSpec {
        WatchSpec {
            id: TargetId::from("t1"),
            name: "Widget".into(),
            release_ref: "acme/widget".into(),
            credential: None,
            namespace: "prod".into(),
            deployment_name: "widget-api".into(),
            interval: Duration::from_secs(60),
        }
    }

    struct Harness {
        poller: Poller,
        entry: Arc<WatchEntry>,
        source: Arc<ScriptedSource>,
        controller: Arc<FakeController>,
    }

    fn harness(
        stored: Option<&str>,
        source: ScriptedSource,
        controller: FakeController,
    ) -> Harness {
        let entry = Arc::new(WatchEntry::new(stored.map(str::to_string)));
        let source = Arc::new(source);
        let controller = Arc::new(controller);
        let reconciler = Reconciler::new(controller.clone(), Duration::from_secs(5));
        let poller = Poller::new(
            spec(),
            Arc::clone(&entry),
            source.clone(),
            reconciler,
            Duration::from_secs(5),
        );
        Harness {
            poller,
            entry,
            source,
            controller,
        }
    }

    #[tokio::test]
    async fn first_observation_records_without_reconciling() {
        let h = harness(None, ScriptedSource::tags(&["v1.0"]), FakeController::default());

        let outcome = h.poller.poll_once().await;

        assert_eq!(outcome, CycleOutcome::FirstObservation { tag: "v1.0".into() });
        assert!(h.controller.restarts().is_empty());
        assert_eq!(h.entry.stored_tag().as_deref(), Some("v1.0"));
        assert!(h.entry.has_new_release());
    }

    #[tokio::test]
    async fn release_sequence_reconciles_once_per_tag_change() {
        let h = harness(
            None,
            ScriptedSource::new(vec![
                Ok(releases(&["v1.0"])),
                Ok(releases(&["v1.1", "v1.0"])),
                Ok(releases(&["v1.1", "v1.0"])),
            ]),
            FakeController::default(),
        );

        h.poller.poll_once().await;
        assert!(h.entry.take_new_release().is_some());
        assert!(h.controller.restarts().is_empty());

        let outcome = h.poller.poll_once().await;
        assert_eq!(
            outcome,
            CycleOutcome::NewRelease {
                previous: "v1.0".into(),
                tag: "v1.1".into(),
                reconciled: true
            }
        );
        assert_eq!(
            h.controller.restarts(),
            vec![("prod".to_string(), "widget-api".to_string())]
        );
        assert_eq!(h.entry.stored_tag().as_deref(), Some("v1.1"));
        assert_eq!(h.entry.take_new_release().unwrap().tag, "v1.1");

        let outcome = h.poller.poll_once().await;
        assert_eq!(outcome, CycleOutcome::Unchanged { tag: "v1.1".into() });
        assert_eq!(h.controller.restarts().len(), 1);
        assert!(!h.entry.has_new_release());
    }

    #[tokio::test]
    async fn failed_reconcile_still_advances_stored_tag() {
        let h = harness(Some("v1"), ScriptedSource::tags(&["v2"]), FakeController::failing());

        let outcome = h.poller.poll_once().await;

        assert_eq!(
            outcome,
            CycleOutcome::NewRelease {
                previous: "v1".into(),
                tag: "v2".into(),
                reconciled: false
            }
        );
        assert_eq!(h.controller.restarts().len(), 1);
        assert_eq!(h.entry.stored_tag().as_deref(), Some("v2"));
        assert!(h.entry.has_new_release());
        assert!(h.entry.last_error().is_some());

        // Not retried on the next cycle.
        h.poller.poll_once().await;
        assert_eq!(h.controller.restarts().len(), 1);
    }

    #[tokio::test]
    async fn fetch_failure_keeps_stored_tag() {
        let h = harness(
            Some("v1"),
            ScriptedSource::new(vec![Err(WatchError::fetch("acme/widget", "connection reset"))]),
            FakeController::default(),
        );

        let outcome = h.poller.poll_once().await;

        assert!(matches!(outcome, CycleOutcome::FetchFailed(_)));
        assert_eq!(h.entry.stored_tag().as_deref(), Some("v1"));
        assert!(h.entry.latest_release().is_none());
        assert!(!h.entry.has_new_release());
        assert!(h.entry.last_error().unwrap().contains("connection reset"));
    }

    #[tokio::test]
    async fn empty_feed_is_a_no_op() {
        let h = harness(Some("v1"), ScriptedSource::tags(&[]), FakeController::default());
        assert_eq!(h.poller.poll_once().await, CycleOutcome::NoReleases);
        assert_eq!(h.entry.stored_tag().as_deref(), Some("v1"));
        assert!(h.entry.last_checked_at().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_fetch_times_out() {
        let h = harness(
            Some("v1"),
            ScriptedSource::slow(Duration::from_secs(600), &["v2"]),
            FakeController::default(),
        );
        let outcome = h.poller.poll_once().await;
        assert!(matches!(outcome, CycleOutcome::FetchFailed(ref m) if m.contains("timed out")));
        assert_eq!(h.entry.stored_tag().as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn stopped_entry_skips_fetch() {
        let h = harness(None, ScriptedSource::tags(&["v1"]), FakeController::default());
        h.entry.request_stop();
        assert_eq!(h.poller.poll_once().await, CycleOutcome::Cancelled);
        assert_eq!(h.source.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn run_exits_promptly_when_stopped_during_sleep() {
        let h = harness(None, ScriptedSource::tags(&["v1"]), FakeController::default());
        let entry = Arc::clone(&h.entry);
        let source = Arc::clone(&h.source);
        let handle = tokio::spawn(h.poller.run());

        // Let the first cycle complete, then stop while the poller sleeps.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(source.calls(), 1);
        entry.request_stop();

        let state = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state, PollerState::Stopped);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_polls_every_interval() {
        let h = harness(None, ScriptedSource::tags(&["v1"]), FakeController::default());
        let entry = Arc::clone(&h.entry);
        let source = Arc::clone(&h.source);
        let handle = tokio::spawn(h.poller.run());

        tokio::time::sleep(Duration::from_secs(121)).await;
        assert_eq!(source.calls(), 3);

        entry.request_stop();
        handle.await.unwrap();
    }

    #[test]
    fn new_poller_is_idle() {
        let h = harness(None, ScriptedSource::tags(&["v1"]), FakeController::default());
        assert_eq!(h.poller.state(), PollerState::Idle);
    }
}
