use thiserror::Error;

use crate::types::TargetId;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to fetch releases for '{release_ref}': {reason}")]
    Fetch { release_ref: String, reason: String },

    #[error("failed to reconcile deployment {namespace}/{deployment}: {reason}")]
    Reconcile {
        namespace: String,
        deployment: String,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("watcher already running for target {0}")]
    AlreadyRunning(TargetId),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("target not found: {0}")]
    TargetNotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl WatchError {
    pub fn fetch(release_ref: impl Into<String>, reason: impl ToString) -> Self {
        Self::Fetch {
            release_ref: release_ref.into(),
            reason: reason.to_string(),
        }
    }

    pub fn reconcile(
        namespace: impl Into<String>,
        deployment: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        Self::Reconcile {
            namespace: namespace.into(),
            deployment: deployment.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, WatchError>;
