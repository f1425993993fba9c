pub mod check;
pub mod deploy;
pub mod serve;
pub mod target;

use anyhow::Context;
use relwatch_core::registry::TargetRegistry;
use relwatch_core::store::{ConfigStore, FileConfigStore};
use std::path::Path;

/// Open the config file and build a registry from the targets it holds.
pub fn open_registry(config: &Path) -> anyhow::Result<(FileConfigStore, TargetRegistry)> {
    let store = FileConfigStore::open(config)
        .with_context(|| format!("failed to read config {}", config.display()))?;
    let targets = store.load()?;
    Ok((store, TargetRegistry::from_targets(targets)))
}

pub fn save_registry(store: &FileConfigStore, registry: &TargetRegistry) -> anyhow::Result<()> {
    store
        .save(registry.list())
        .with_context(|| format!("failed to write config {}", store.path().display()))
}
