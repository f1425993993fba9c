//! Shared state bridging poller tasks and the control plane.
//!
//! Every field of a [`WatchEntry`] sits behind its own guard, so a reader
//! never observes a half-written entry and no critical section spans an
//! await point. The map itself is only modified by the scheduler while it
//! holds its control lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::types::{Release, TargetId};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// WatchEntry
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct WatchEntry {
    running: watch::Sender<bool>,
    stored_tag: Mutex<Option<String>>,
    latest_release: Mutex<Option<Release>>,
    release_list: Mutex<Option<Vec<Release>>>,
    new_release: Mutex<Option<Release>>,
    last_checked_at: Mutex<Option<DateTime<Utc>>>,
    last_error: Mutex<Option<String>>,
}

impl WatchEntry {
    pub fn new(stored_tag: Option<String>) -> Self {
        let (running, _) = watch::channel(true);
        Self {
            running,
            stored_tag: Mutex::new(stored_tag),
            latest_release: Mutex::new(None),
            release_list: Mutex::new(None),
            new_release: Mutex::new(None),
            last_checked_at: Mutex::new(None),
            last_error: Mutex::new(None),
        }
    }

    // -- cancellation -------------------------------------------------------

    pub fn desired_running(&self) -> bool {
        *self.running.borrow()
    }

    /// Ask the owning poller to stop at its next check point.
    pub fn request_stop(&self) {
        self.running.send_replace(false);
    }

    /// Resolves once a stop has been requested (immediately if it already was).
    pub async fn stop_requested(&self) {
        let mut rx = self.running.subscribe();
        let _ = rx.wait_for(|running| !*running).await;
    }

    // -- release data -------------------------------------------------------

    pub fn stored_tag(&self) -> Option<String> {
        lock(&self.stored_tag).clone()
    }

    pub fn set_stored_tag(&self, tag: impl Into<String>) {
        *lock(&self.stored_tag) = Some(tag.into());
    }

    pub fn latest_release(&self) -> Option<Release> {
        lock(&self.latest_release).clone()
    }

    pub fn release_list(&self) -> Option<Vec<Release>> {
        lock(&self.release_list).clone()
    }

    /// Publish the result of a fetch. `releases` must be non-empty; its first
    /// element becomes the latest release.
    pub fn publish(&self, releases: &[Release]) {
        *lock(&self.latest_release) = releases.first().cloned();
        *lock(&self.release_list) = Some(releases.to_vec());
    }

    // -- notifications ------------------------------------------------------

    /// Flag `release` as newly observed. A later raise replaces an
    /// unconsumed one.
    pub fn raise_new_release(&self, release: Release) {
        *lock(&self.new_release) = Some(release);
    }

    pub fn has_new_release(&self) -> bool {
        lock(&self.new_release).is_some()
    }

    /// Consume the pending notification. Exactly one caller per raise gets
    /// the release it was raised with.
    pub fn take_new_release(&self) -> Option<Release> {
        lock(&self.new_release).take()
    }

    // -- diagnostics --------------------------------------------------------

    pub fn mark_checked(&self) {
        *lock(&self.last_checked_at) = Some(Utc::now());
    }

    pub fn last_checked_at(&self) -> Option<DateTime<Utc>> {
        *lock(&self.last_checked_at)
    }

    pub fn record_error(&self, message: impl Into<String>) {
        *lock(&self.last_error) = Some(message.into());
    }

    pub fn clear_error(&self) {
        *lock(&self.last_error) = None;
    }

    pub fn last_error(&self) -> Option<String> {
        lock(&self.last_error).clone()
    }

    pub fn snapshot(&self) -> WatchSnapshot {
        WatchSnapshot {
            desired_running: self.desired_running(),
            stored_tag: self.stored_tag(),
            latest_release: self.latest_release(),
            release_count: lock(&self.release_list).as_ref().map_or(0, Vec::len),
            new_release_pending: self.has_new_release(),
            last_checked_at: self.last_checked_at(),
            last_error: self.last_error(),
        }
    }
}

/// Point-in-time copy of a [`WatchEntry`] for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatchSnapshot {
    pub desired_running: bool,
    pub stored_tag: Option<String>,
    pub latest_release: Option<Release>,
    pub release_count: usize,
    pub new_release_pending: bool,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

// ---------------------------------------------------------------------------
// WatchState
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct WatchState {
    entries: RwLock<HashMap<TargetId, Arc<WatchEntry>>>,
}

impl WatchState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh entry for `id`, replacing any previous one.
    pub(crate) fn insert(&self, id: TargetId, entry: WatchEntry) -> Arc<WatchEntry> {
        let entry = Arc::new(entry);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::clone(&entry));
        entry
    }

    pub(crate) fn remove(&self, id: &TargetId) -> Option<Arc<WatchEntry>> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    pub fn get(&self, id: &TargetId) -> Option<Arc<WatchEntry>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn snapshot(&self, id: &TargetId) -> Option<WatchSnapshot> {
        self.get(id).map(|entry| entry.snapshot())
    }

    /// Consume the new-release notification for `id`, returning the release
    /// it was raised for.
    pub fn take_new_release(&self, id: &TargetId) -> Option<Release> {
        self.get(id)?.take_new_release()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_entry_wants_to_run() {
        let entry = WatchEntry::new(None);
        assert!(entry.desired_running());
        entry.request_stop();
        assert!(!entry.desired_running());
    }

    #[test]
    fn new_release_flag_is_consumed_once() {
        let entry = WatchEntry::new(None);
        assert!(entry.take_new_release().is_none());
        entry.raise_new_release(Release::new("v1"));
        entry.raise_new_release(Release::new("v2"));
        assert_eq!(entry.take_new_release().unwrap().tag, "v2");
        assert!(entry.take_new_release().is_none());
    }

    #[test]
    fn publish_sets_latest_and_list() {
        let entry = WatchEntry::new(Some("v0".into()));
        entry.publish(&[Release::new("v2"), Release::new("v1")]);
        assert_eq!(entry.latest_release().unwrap().tag, "v2");
        assert_eq!(entry.release_list().unwrap().len(), 2);
        assert_eq!(entry.stored_tag().as_deref(), Some("v0"));
    }

    #[test]
    fn take_new_release_returns_latest_release() {
        let state = WatchState::new();
        let id = TargetId::from("t1");
        let entry = state.insert(id.clone(), WatchEntry::new(None));
        entry.publish(&[Release::new("v1")]);
        assert!(state.take_new_release(&id).is_none());
        entry.raise_new_release(Release::new("v1"));
        assert_eq!(state.take_new_release(&id).unwrap().tag, "v1");
        assert!(state.take_new_release(&id).is_none());
    }

    #[test]
    fn notification_keeps_the_release_it_was_raised_for() {
        let state = WatchState::new();
        let id = TargetId::from("t1");
        let entry = state.insert(id.clone(), WatchEntry::new(Some("v1".into())));
        entry.publish(&[Release::new("v2"), Release::new("v1")]);
        entry.raise_new_release(Release::new("v2"));
        // A later cycle publishes v3 before its restart has been issued.
        entry.publish(&[Release::new("v3"), Release::new("v2")]);
        assert_eq!(state.take_new_release(&id).unwrap().tag, "v2");
    }

    #[test]
    fn concurrent_consumers_see_a_single_notification() {
        let entry = Arc::new(WatchEntry::new(None));
        entry.raise_new_release(Release::new("v1"));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let entry = Arc::clone(&entry);
                std::thread::spawn(move || entry.take_new_release())
            })
            .collect();
        let taken = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .count();
        assert_eq!(taken, 1);
    }

    #[test]
    fn snapshot_reflects_entry() {
        let entry = WatchEntry::new(Some("v1".into()));
        entry.publish(&[Release::new("v1")]);
        entry.record_error("boom");
        entry.mark_checked();
        let snap = entry.snapshot();
        assert_eq!(snap.stored_tag.as_deref(), Some("v1"));
        assert_eq!(snap.release_count, 1);
        assert_eq!(snap.last_error.as_deref(), Some("boom"));
        assert!(snap.last_checked_at.is_some());
        assert!(snap.desired_running);
    }

    #[tokio::test]
    async fn stop_requested_resolves_after_request() {
        let entry = Arc::new(WatchEntry::new(None));
        let waiter = {
            let entry = Arc::clone(&entry);
            tokio::spawn(async move { entry.stop_requested().await })
        };
        entry.request_stop();
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn remove_drops_entry() {
        let state = WatchState::new();
        let id = TargetId::from("t1");
        state.insert(id.clone(), WatchEntry::new(None));
        assert!(state.get(&id).is_some());
        assert!(state.remove(&id).is_some());
        assert!(state.get(&id).is_none());
    }
}
