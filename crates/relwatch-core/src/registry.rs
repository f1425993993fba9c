//! In-memory set of monitored targets.
//!
//! The registry is plain data. It never spawns, persists or locks anything;
//! the scheduler owns it and writes it through the config store after every
//! mutation.

use std::collections::HashSet;

use tracing::warn;

use crate::error::{Result, WatchError};
use crate::types::{Release, Target, TargetId, TargetPatch, MIN_POLLING_INTERVAL_SECS};

#[derive(Debug, Clone)]
pub struct TargetRegistry {
    targets: Vec<Target>,
}

impl TargetRegistry {
    /// Build a registry from persisted targets.
    ///
    /// Intervals below the minimum are raised to it, duplicate ids are
    /// replaced with fresh ones, and an empty list is seeded with one default
    /// target so the registry is never empty.
    pub fn from_targets(targets: Vec<Target>) -> Self {
        let mut seen = HashSet::new();
        let mut cleaned = Vec::with_capacity(targets.len());
        for mut target in targets {
            if target.polling_interval_secs < MIN_POLLING_INTERVAL_SECS {
                warn!(
                    target_id = %target.id,
                    interval = target.polling_interval_secs,
                    "polling interval below minimum, clamping to {MIN_POLLING_INTERVAL_SECS}s"
                );
                target.polling_interval_secs = MIN_POLLING_INTERVAL_SECS;
            }
            if !seen.insert(target.id.clone()) {
                let fresh = TargetId::generate();
                warn!(duplicate = %target.id, new_id = %fresh, "duplicate target id, reassigning");
                target.id = fresh.clone();
                seen.insert(fresh);
            }
            cleaned.push(target);
        }

        let mut registry = Self { targets: cleaned };
        if registry.targets.is_empty() {
            registry.add(TargetPatch {
                name: Some("Default Target".to_string()),
                ..Default::default()
            });
        }
        registry
    }

    pub fn list(&self) -> &[Target] {
        &self.targets
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn get(&self, id: &TargetId) -> Option<&Target> {
        self.targets.iter().find(|t| &t.id == id)
    }

    pub fn require(&self, id: &TargetId) -> Result<&Target> {
        self.get(id)
            .ok_or_else(|| WatchError::TargetNotFound(id.to_string()))
    }

    fn require_mut(&mut self, id: &TargetId) -> Result<&mut Target> {
        self.targets
            .iter_mut()
            .find(|t| &t.id == id)
            .ok_or_else(|| WatchError::TargetNotFound(id.to_string()))
    }

    /// Create a new inactive target seeded from `defaults`.
    ///
    /// Unlike [`update`](Self::update), this never fails: an out-of-range
    /// interval in `defaults` is raised to the minimum.
    pub fn add(&mut self, defaults: TargetPatch) -> Target {
        let mut id = TargetId::generate();
        while self.get(&id).is_some() {
            id = TargetId::generate();
        }
        let mut target = Target::new(id, self.unused_default_name());
        defaults.apply(&mut target);
        if target.name.is_empty() {
            target.name = self.unused_default_name();
        }
        target.polling_interval_secs = target.polling_interval_secs.max(MIN_POLLING_INTERVAL_SECS);
        self.targets.push(target.clone());
        target
    }

    /// `Target N`, counting up from the current size until the name is free.
    fn unused_default_name(&self) -> String {
        (self.targets.len() + 1..)
            .map(|n| format!("Target {n}"))
            .find(|name| !self.targets.iter().any(|t| &t.name == name))
            .unwrap_or_default()
    }

    /// Remove a target. The last remaining target cannot be removed.
    pub fn remove(&mut self, id: &TargetId) -> Result<Target> {
        let index = self
            .targets
            .iter()
            .position(|t| &t.id == id)
            .ok_or_else(|| WatchError::TargetNotFound(id.to_string()))?;
        if self.targets.len() == 1 {
            return Err(WatchError::InvalidState(
                "cannot delete the last target".to_string(),
            ));
        }
        Ok(self.targets.remove(index))
    }

    /// Apply `patch` to a target after validating the result.
    pub fn update(&mut self, id: &TargetId, patch: &TargetPatch) -> Result<Target> {
        if let Some(secs) = patch.polling_interval_secs {
            if secs < MIN_POLLING_INTERVAL_SECS {
                return Err(WatchError::InvalidConfig(format!(
                    "polling interval must be at least {MIN_POLLING_INTERVAL_SECS} seconds (got {secs})"
                )));
            }
        }

        let target = self.require_mut(id)?;
        let mut candidate = target.clone();
        patch.apply(&mut candidate);
        if candidate.name.is_empty() {
            return Err(WatchError::InvalidConfig(
                "target name must not be empty".to_string(),
            ));
        }
        if candidate.is_active {
            candidate.validate_for_watch()?;
        }
        *target = candidate;
        Ok(target.clone())
    }

    pub fn set_active(&mut self, id: &TargetId, active: bool) -> Result<()> {
        self.require_mut(id)?.is_active = active;
        Ok(())
    }

    /// Record `release` as the last release durably seen for the target.
    /// Returns `false` when the target already recorded the same release.
    pub fn record_release(&mut self, id: &TargetId, release: Release) -> Result<bool> {
        let target = self.require_mut(id)?;
        if target.last_known_release.as_ref() == Some(&release) {
            return Ok(false);
        }
        target.last_known_release = Some(release);
        Ok(true)
    }
}
