//! Starts and stops pollers and owns the target registry for the control plane.
//!
//! All registry mutations and poller bookkeeping happen under one control
//! lock, which serializes start/stop with creation and removal of watch
//! entries. Pollers are never aborted: `stop` requests a stop and waits a
//! bounded grace period, after which a poller that has not exited is kept as
//! draining until it does.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::EngineSettings;
use crate::controller::{DeploymentController, DeploymentStatus};
use crate::error::{Result, WatchError};
use crate::poller::{Poller, PollerState, WatchSpec};
use crate::registry::TargetRegistry;
use crate::source::ReleaseSource;
use crate::store::ConfigStore;
use crate::trigger::Reconciler;
use crate::types::{Release, Target, TargetId, TargetPatch};
use crate::watch_state::{WatchEntry, WatchSnapshot, WatchState};

struct PollerHandle {
    entry: Arc<WatchEntry>,
    task: JoinHandle<PollerState>,
}

struct Control {
    registry: TargetRegistry,
    pollers: HashMap<TargetId, PollerHandle>,
    draining: HashMap<TargetId, JoinHandle<PollerState>>,
}

pub struct WatchScheduler {
    control: Mutex<Control>,
    state: Arc<WatchState>,
    store: Arc<dyn ConfigStore>,
    source: Arc<dyn ReleaseSource>,
    reconciler: Reconciler,
    settings: EngineSettings,
}

impl WatchScheduler {
    /// Load targets from `store` and build an idle scheduler. Call
    /// [`recover`](Self::recover) to restart the targets marked active.
    pub fn new(
        store: Arc<dyn ConfigStore>,
        source: Arc<dyn ReleaseSource>,
        controller: Arc<dyn DeploymentController>,
        settings: EngineSettings,
    ) -> Result<Self> {
        let loaded = store.load()?;
        let registry = TargetRegistry::from_targets(loaded.clone());
        if registry.list() != loaded.as_slice() {
            if let Err(e) = store.save(registry.list()) {
                error!(error = %e, "failed to persist normalized targets");
            }
        }

        Ok(Self {
            reconciler: Reconciler::new(controller, settings.reconcile_timeout()),
            control: Mutex::new(Control {
                registry,
                pollers: HashMap::new(),
                draining: HashMap::new(),
            }),
            state: Arc::new(WatchState::new()),
            store,
            source,
            settings,
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn watch_state(&self) -> &Arc<WatchState> {
        &self.state
    }

    fn persist(&self, registry: &TargetRegistry) {
        if let Err(e) = self.store.save(registry.list()) {
            error!(error = %e, "failed to persist targets");
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Start watching `id`.
    pub async fn start(&self, id: &TargetId) -> Result<()> {
        let mut control = self.control.lock().await;
        self.start_locked(&mut control, id)
    }

    fn start_locked(&self, control: &mut Control, id: &TargetId) -> Result<()> {
        let target = control.registry.require(id)?.clone();

        if let Some(handle) = control.pollers.get(id) {
            if !handle.task.is_finished() {
                return Err(WatchError::AlreadyRunning(id.clone()));
            }
            warn!(target_id = %id, "watcher exited unexpectedly, replacing it");
            control.pollers.remove(id);
        }
        if let Some(task) = control.draining.get(id) {
            if !task.is_finished() {
                return Err(WatchError::InvalidState(format!(
                    "previous watcher for target {id} is still stopping"
                )));
            }
            control.draining.remove(id);
        }
        target.validate_for_watch()?;

        // The previous entry's tag is never older than the recorded one, and
        // a notification it still holds must reach the registry before the
        // entry is replaced.
        let previous = self.state.get(id);
        if let Some(release) = previous.as_ref().and_then(|e| e.take_new_release()) {
            info!(target_id = %id, tag = %release.tag, "recorded latest release");
            control.registry.record_release(id, release)?;
        }
        let seed = previous
            .and_then(|e| e.stored_tag())
            .or_else(|| target.last_known_tag().map(str::to_string));
        let entry = self.state.insert(id.clone(), WatchEntry::new(seed));

        control.registry.set_active(id, true)?;
        self.persist(&control.registry);

        let poller = Poller::new(
            WatchSpec::from(&target),
            Arc::clone(&entry),
            Arc::clone(&self.source),
            self.reconciler.clone(),
            self.settings.fetch_timeout(),
        );
        let task = tokio::spawn(poller.run());
        control
            .pollers
            .insert(id.clone(), PollerHandle { entry, task });

        info!(
            target_id = %id,
            name = %target.name,
            release_ref = %target.release_ref,
            interval_secs = target.polling_interval_secs,
            "monitoring started"
        );
        Ok(())
    }

    /// Stop watching `id`. Returns `false` when no watcher was running.
    pub async fn stop(&self, id: &TargetId) -> Result<bool> {
        let mut control = self.control.lock().await;
        self.stop_locked(&mut control, id).await
    }

    async fn stop_locked(&self, control: &mut Control, id: &TargetId) -> Result<bool> {
        control.registry.require(id)?;
        let Some(handle) = control.pollers.remove(id) else {
            info!(target_id = %id, "monitoring is not running");
            return Ok(false);
        };

        handle.entry.request_stop();
        control.registry.set_active(id, false)?;
        self.persist(&control.registry);
        info!(target_id = %id, "stopping monitoring");

        self.await_exit(control, id, handle.task).await;
        Ok(true)
    }

    async fn await_exit(
        &self,
        control: &mut Control,
        id: &TargetId,
        mut task: JoinHandle<PollerState>,
    ) {
        match timeout(self.settings.stop_grace(), &mut task).await {
            Ok(Ok(state)) => debug!(target_id = %id, ?state, "watcher exited"),
            Ok(Err(e)) => warn!(target_id = %id, error = %e, "watcher task failed"),
            Err(_) => {
                warn!(
                    target_id = %id,
                    grace_secs = self.settings.stop_grace_secs,
                    "watcher did not stop within the grace period, leaving it to drain"
                );
                control.draining.insert(id.clone(), task);
            }
        }
    }

    /// Start every target whose desired state is active.
    ///
    /// Targets that cannot be started are marked inactive so the registry
    /// keeps matching the running watchers.
    pub async fn recover(&self) -> Vec<TargetId> {
        let mut control = self.control.lock().await;
        let wanted: Vec<Target> = control
            .registry
            .list()
            .iter()
            .filter(|t| t.is_active)
            .cloned()
            .collect();

        let mut started = Vec::new();
        for target in wanted {
            if control.pollers.contains_key(&target.id) {
                continue;
            }
            info!(target_id = %target.id, name = %target.name, "auto-restarting monitoring");
            match self.start_locked(&mut control, &target.id) {
                Ok(()) => started.push(target.id),
                Err(e) => {
                    warn!(target_id = %target.id, error = %e, "could not resume monitoring");
                    if control.registry.set_active(&target.id, false).is_ok() {
                        self.persist(&control.registry);
                    }
                }
            }
        }
        started
    }

    /// Stop every watcher without changing desired state, so the next
    /// [`recover`](Self::recover) resumes them.
    pub async fn shutdown(&self) -> usize {
        let mut control = self.control.lock().await;
        let handles: Vec<(TargetId, PollerHandle)> = control.pollers.drain().collect();
        for (_, handle) in &handles {
            handle.entry.request_stop();
        }
        let count = handles.len();
        for (id, handle) in handles {
            self.await_exit(&mut control, &id, handle.task).await;
        }
        info!(count, "watchers shut down");
        count
    }

    pub async fn is_running(&self, id: &TargetId) -> bool {
        let control = self.control.lock().await;
        control
            .pollers
            .get(id)
            .is_some_and(|h| !h.task.is_finished())
    }

    pub async fn running_count(&self) -> usize {
        let control = self.control.lock().await;
        control
            .pollers
            .values()
            .filter(|h| !h.task.is_finished())
            .count()
    }

    // -----------------------------------------------------------------------
    // Target management
    // -----------------------------------------------------------------------

    pub async fn list_targets(&self) -> Vec<Target> {
        self.control.lock().await.registry.list().to_vec()
    }

    pub async fn get_target(&self, id: &TargetId) -> Result<Target> {
        self.control.lock().await.registry.require(id).cloned()
    }

    pub async fn add_target(&self, defaults: TargetPatch) -> Result<Target> {
        let mut control = self.control.lock().await;
        let target = control.registry.add(defaults);
        self.persist(&control.registry);
        info!(target_id = %target.id, name = %target.name, "added monitoring target");
        Ok(target)
    }

    /// Update a target. A running watcher is restarted when the change
    /// affects what it watches.
    pub async fn update_target(&self, id: &TargetId, patch: TargetPatch) -> Result<Target> {
        let mut control = self.control.lock().await;
        let updated = control.registry.update(id, &patch)?;
        self.persist(&control.registry);

        let running = control.pollers.contains_key(id);
        if running && patch.touches_watch_fields() {
            info!(target_id = %id, "restarting watcher with updated settings");
            if let Some(handle) = control.pollers.remove(id) {
                handle.entry.request_stop();
                self.await_exit(&mut control, id, handle.task).await;
            }
            if let Err(e) = self.start_locked(&mut control, id) {
                warn!(target_id = %id, error = %e, "could not restart watcher after update");
                control.registry.set_active(id, false)?;
                self.persist(&control.registry);
                return Err(e);
            }
        }
        Ok(control.registry.get(id).cloned().unwrap_or(updated))
    }

    /// Remove a target, stopping its watcher first. The last target cannot
    /// be removed.
    pub async fn remove_target(&self, id: &TargetId) -> Result<Target> {
        let mut control = self.control.lock().await;
        control.registry.require(id)?;
        if control.registry.len() == 1 {
            return Err(WatchError::InvalidState(
                "cannot delete the last target".to_string(),
            ));
        }

        self.stop_locked(&mut control, id).await?;
        if let Some(task) = control.draining.get(id) {
            if !task.is_finished() {
                return Err(WatchError::InvalidState(format!(
                    "watcher for target {id} is still stopping; retry shortly"
                )));
            }
            control.draining.remove(id);
        }

        let removed = control.registry.remove(id)?;
        self.state.remove(id);
        self.persist(&control.registry);
        info!(target_id = %id, name = %removed.name, "removed monitoring target");
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Release data
    // -----------------------------------------------------------------------

    pub fn watch_snapshot(&self, id: &TargetId) -> Option<WatchSnapshot> {
        self.state.snapshot(id)
    }

    /// Consume pending new-release notifications, record each release on its
    /// target and persist once if anything changed.
    pub async fn sync_new_releases(&self) -> Vec<(TargetId, Release)> {
        let mut control = self.control.lock().await;
        let ids: Vec<TargetId> = control.registry.list().iter().map(|t| t.id.clone()).collect();

        let mut recorded = Vec::new();
        for id in ids {
            let Some(release) = self.state.take_new_release(&id) else {
                continue;
            };
            match control.registry.record_release(&id, release.clone()) {
                Ok(_) => {
                    info!(target_id = %id, tag = %release.tag, "recorded latest release");
                    recorded.push((id, release));
                }
                Err(e) => warn!(target_id = %id, error = %e, "could not record release"),
            }
        }
        if !recorded.is_empty() {
            self.persist(&control.registry);
        }
        recorded
    }

    /// Releases most recently fetched for a target, falling back to the last
    /// release recorded in its config.
    pub async fn releases(&self, id: &TargetId) -> Result<Vec<Release>> {
        let target = self.get_target(id).await?;
        if let Some(list) = self.state.get(id).and_then(|e| e.release_list()) {
            return Ok(list);
        }
        Ok(target.last_known_release.into_iter().collect())
    }

    /// Fetch releases right away, outside the poll schedule, and record the
    /// latest one on the target.
    pub async fn check_now(&self, id: &TargetId) -> Result<Vec<Release>> {
        let target = self.get_target(id).await?;
        if target.release_ref.trim().is_empty() {
            return Err(WatchError::InvalidConfig(format!(
                "target '{}' has no release_ref",
                target.name
            )));
        }

        let releases = match timeout(
            self.settings.fetch_timeout(),
            self.source
                .fetch(&target.release_ref, target.credential.as_deref()),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(WatchError::fetch(
                    &target.release_ref,
                    format!("timed out after {}s", self.settings.fetch_timeout_secs),
                ))
            }
        };

        if let Some(latest) = releases.first() {
            let mut control = self.control.lock().await;
            if let Some(entry) = self.state.get(id) {
                entry.publish(&releases);
            }
            if control.registry.record_release(id, latest.clone())? {
                self.persist(&control.registry);
            }
            info!(target_id = %id, tag = %latest.tag, count = releases.len(), "fetched releases");
        }
        Ok(releases)
    }

    // -----------------------------------------------------------------------
    // Deployment operations
    // -----------------------------------------------------------------------

    async fn deployment_target(&self, id: &TargetId) -> Result<Target> {
        let target = self.get_target(id).await?;
        if target.namespace.trim().is_empty() || target.deployment_name.trim().is_empty() {
            return Err(WatchError::InvalidConfig(format!(
                "deployment and namespace must be set for '{}'",
                target.name
            )));
        }
        Ok(target)
    }

    /// Point the target's deployment at `tag`.
    pub async fn rollback(&self, id: &TargetId, tag: &str) -> Result<()> {
        let target = self.deployment_target(id).await?;
        let tag = tag.trim();
        info!(target_id = %id, tag, "rolling back to version");
        self.reconciler
            .rollback(&target.namespace, &target.deployment_name, tag)
            .await
    }

    pub async fn deployment_status(&self, id: &TargetId) -> Result<DeploymentStatus> {
        let target = self.deployment_target(id).await?;
        self.reconciler
            .status(&target.namespace, &target.deployment_name)
            .await
    }
}
