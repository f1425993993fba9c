use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::source::DEFAULT_RELEASE_API_URL;
use crate::types::Target;

pub const CONFIG_FILE: &str = "config.yaml";
pub const CONFIG_DIR_ENV: &str = "RELWATCH_CONFIG_DIR";

// ---------------------------------------------------------------------------
// EngineSettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// How long `stop` waits for a watcher to acknowledge before leaving it draining.
    #[serde(default = "default_stop_grace")]
    pub stop_grace_secs: u64,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_reconcile_timeout")]
    pub reconcile_timeout_secs: u64,
    /// How often the control plane drains new-release notifications.
    #[serde(default = "default_sync_interval")]
    pub sync_interval_ms: u64,
    #[serde(default = "default_release_api_url")]
    pub release_api_url: String,
}

fn default_stop_grace() -> u64 {
    5
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_reconcile_timeout() -> u64 {
    30
}

fn default_sync_interval() -> u64 {
    1000
}

fn default_release_api_url() -> String {
    DEFAULT_RELEASE_API_URL.to_string()
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            stop_grace_secs: default_stop_grace(),
            fetch_timeout_secs: default_fetch_timeout(),
            reconcile_timeout_secs: default_reconcile_timeout(),
            sync_interval_ms: default_sync_interval(),
            release_api_url: default_release_api_url(),
        }
    }
}

impl EngineSettings {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }

    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout_secs.max(1))
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms.max(50))
    }
}

// ---------------------------------------------------------------------------
// ConfigDocument
// ---------------------------------------------------------------------------

/// On-disk layout of the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigDocument {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub settings: EngineSettings,
    #[serde(default)]
    pub targets: Vec<Target>,
}

fn default_version() -> u32 {
    1
}

impl Default for ConfigDocument {
    fn default() -> Self {
        Self {
            version: default_version(),
            settings: EngineSettings::default(),
            targets: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Path resolution
// ---------------------------------------------------------------------------

/// Resolve the config file path.
///
/// Priority:
/// 1. `--config` flag / `RELWATCH_CONFIG` env var (passed in as `explicit`)
/// 2. `$RELWATCH_CONFIG_DIR/config.yaml`
/// 3. `./config.yaml`
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    match std::env::var_os(CONFIG_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir).join(CONFIG_FILE),
        _ => PathBuf::from(CONFIG_FILE),
    }
}
