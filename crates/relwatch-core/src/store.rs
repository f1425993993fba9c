//! Config store: where target definitions are loaded from and saved to.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use crate::config::{ConfigDocument, EngineSettings};
use crate::error::Result;
use crate::types::Target;

pub trait ConfigStore: Send + Sync {
    fn load(&self) -> Result<Vec<Target>>;
    fn save(&self, targets: &[Target]) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Yaml,
}

impl Format {
    fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Format::Json,
            _ => Format::Yaml,
        }
    }
}

// ---------------------------------------------------------------------------
// FileConfigStore
// ---------------------------------------------------------------------------

/// Stores targets in a single file, JSON when the extension is `.json` and
/// YAML otherwise. Engine settings in the same file are read once and written
/// back unchanged on every save.
#[derive(Debug)]
pub struct FileConfigStore {
    path: PathBuf,
    format: Format,
    settings: EngineSettings,
}

impl FileConfigStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let format = Format::for_path(&path);
        let settings = match read_document(&path, format)? {
            Some(doc) => doc.settings,
            None => EngineSettings::default(),
        };
        Ok(Self {
            path,
            format,
            settings,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }
}

fn read_document(path: &Path, format: Format) -> Result<Option<ConfigDocument>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(path)?;
    if data.trim().is_empty() {
        return Ok(None);
    }
    let doc = match format {
        Format::Json => serde_json::from_str(&data)?,
        Format::Yaml => serde_yaml::from_str(&data)?,
    };
    Ok(Some(doc))
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Result<Vec<Target>> {
        let targets = read_document(&self.path, self.format)?
            .map(|doc| doc.targets)
            .unwrap_or_default();
        debug!(path = %self.path.display(), count = targets.len(), "loaded targets");
        Ok(targets)
    }

    fn save(&self, targets: &[Target]) -> Result<()> {
        let doc = ConfigDocument {
            settings: self.settings.clone(),
            targets: targets.to_vec(),
            ..Default::default()
        };
        let data = match self.format {
            Format::Json => serde_json::to_string_pretty(&doc)?,
            Format::Yaml => serde_yaml::to_string(&doc)?,
        };
        crate::io::atomic_write(&self.path, data.as_bytes())?;
        debug!(path = %self.path.display(), count = targets.len(), "saved targets");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryConfigStore
// ---------------------------------------------------------------------------

/// Keeps targets in memory. Used when embedding the engine without a config
/// file, and in tests.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    targets: Mutex<Vec<Target>>,
    saves: Mutex<usize>,
}

impl MemoryConfigStore {
    pub fn new(targets: Vec<Target>) -> Self {
        Self {
            targets: Mutex::new(targets),
            saves: Mutex::new(0),
        }
    }

    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> Vec<Target> {
        self.targets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&self) -> Result<Vec<Target>> {
        Ok(self.snapshot())
    }

    fn save(&self, targets: &[Target]) -> Result<()> {
        *self.targets.lock().unwrap_or_else(|e| e.into_inner()) = targets.to_vec();
        *self.saves.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Release, TargetId};
    use tempfile::TempDir;

    fn sample() -> Vec<Target> {
        let mut t = Target::new(TargetId::from("t1"), "Widget");
        t.release_ref = "acme/widget".into();
        t.deployment_name = "widget-api".into();
        t.is_active = true;
        t.last_known_release = Some(Release::new("v1.2.0"));
        vec![t]
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileConfigStore::open(dir.path().join("config.yaml")).unwrap();
        assert!(store.load().unwrap().is_empty());
        assert_eq!(store.settings(), &EngineSettings::default());
    }

    #[test]
    fn yaml_save_then_load_preserves_targets() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        let store = FileConfigStore::open(&path).unwrap();
        store.save(&sample()).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("release_ref: acme/widget"));
        assert!(raw.contains("tag_name: v1.2.0"));

        let loaded = FileConfigStore::open(&path).unwrap().load().unwrap();
        assert_eq!(loaded, sample());
    }

    #[test]
    fn json_extension_writes_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let store = FileConfigStore::open(&path).unwrap();
        store.save(&sample()).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["targets"][0]["polling_interval"], 60);
    }

    #[test]
    fn settings_survive_save() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "settings:\n  stop_grace_secs: 9\ntargets: []\n").unwrap();
        let store = FileConfigStore::open(&path).unwrap();
        assert_eq!(store.settings().stop_grace_secs, 9);
        store.save(&sample()).unwrap();
        let reopened = FileConfigStore::open(&path).unwrap();
        assert_eq!(reopened.settings().stop_grace_secs, 9);
    }

    #[test]
    fn loads_legacy_json_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"targets": [{"id": "target1", "name": "Default Target", "github_repo": "acme/widget",
                "github_token": "", "k8s_namespace": "default", "k8s_deployment": "widget",
                "polling_interval": 60, "is_active": false, "latest_release": null}]}"#,
        )
        .unwrap();
        let targets = FileConfigStore::open(&path).unwrap().load().unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].deployment_name, "widget");
        assert!(targets[0].last_known_release.is_none());
    }

    #[test]
    fn memory_store_counts_saves() {
        let store = MemoryConfigStore::default();
        store.save(&sample()).unwrap();
        store.save(&sample()).unwrap();
        assert_eq!(store.save_count(), 2);
        assert_eq!(store.load().unwrap(), sample());
    }
}
