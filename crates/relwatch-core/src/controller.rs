//! Deployment controller seam and the status snapshot it reports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Operations the engine needs from the cluster that runs the deployments.
#[async_trait]
pub trait DeploymentController: Send + Sync {
    /// Force a rolling restart of the deployment without changing its images.
    async fn restart(&self, namespace: &str, deployment: &str) -> Result<()>;

    /// Read the current state of the deployment and its pods.
    async fn read_status(&self, namespace: &str, deployment: &str) -> Result<DeploymentStatus>;

    /// Point every container image of the deployment at `tag`.
    async fn patch_image_tag(&self, namespace: &str, deployment: &str, tag: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Status snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplicaCounts {
    pub desired: i32,
    pub current: i32,
    pub ready: i32,
    pub available: i32,
    pub unavailable: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerImage {
    pub name: String,
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerState {
    pub name: String,
    pub ready: bool,
    pub restarts: i32,
    pub image: String,
    pub image_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodStatus {
    pub name: String,
    pub phase: Option<String>,
    pub ip: Option<String>,
    pub node: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub containers: Vec<ContainerState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentStatus {
    pub name: String,
    pub namespace: String,
    pub created_at: Option<DateTime<Utc>>,
    pub replicas: ReplicaCounts,
    pub images: Vec<ContainerImage>,
    pub strategy: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    pub pods: Vec<PodStatus>,
}

impl DeploymentStatus {
    /// True when every desired replica is ready and available.
    pub fn is_settled(&self) -> bool {
        self.replicas.ready >= self.replicas.desired
            && self.replicas.available >= self.replicas.desired
            && self.replicas.unavailable == 0
    }
}

// ---------------------------------------------------------------------------
// Image references
// ---------------------------------------------------------------------------

/// Replace the tag component of an image reference.
///
/// A registry port (`registry:5000/app`) is not mistaken for a tag, and any
/// digest (`@sha256:...`) is dropped since it would pin the old image.
pub fn retag_image(image: &str, tag: &str) -> String {
    let without_digest = image.split('@').next().unwrap_or(image);
    let name_start = without_digest.rfind('/').map_or(0, |i| i + 1);
    let repository = match without_digest[name_start..].rfind(':') {
        Some(colon) => &without_digest[..name_start + colon],
        None => without_digest,
    };
    format!("{repository}:{tag}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retag_replaces_existing_tag() {
        assert_eq!(retag_image("acme/widget:v1.0", "v1.1"), "acme/widget:v1.1");
    }

    #[test]
    fn retag_adds_tag_when_missing() {
        assert_eq!(retag_image("nginx", "1.27"), "nginx:1.27");
    }

    #[test]
    fn retag_keeps_registry_port() {
        assert_eq!(
            retag_image("registry.local:5000/team/api:2024.1", "2024.2"),
            "registry.local:5000/team/api:2024.2"
        );
        assert_eq!(
            retag_image("registry.local:5000/team/api", "2024.2"),
            "registry.local:5000/team/api:2024.2"
        );
    }

    #[test]
    fn retag_drops_digest() {
        assert_eq!(
            retag_image("ghcr.io/acme/api:v1@sha256:abcdef", "v2"),
            "ghcr.io/acme/api:v2"
        );
    }

    #[test]
    fn settled_status_requires_all_replicas() {
        let mut status = DeploymentStatus {
            name: "api".into(),
            namespace: "default".into(),
            created_at: None,
            replicas: ReplicaCounts {
                desired: 2,
                current: 2,
                ready: 2,
                available: 2,
                unavailable: 0,
            },
            images: Vec::new(),
            strategy: Some("RollingUpdate".into()),
            updated_at: None,
            pods: Vec::new(),
        };
        assert!(status.is_settled());
        status.replicas.ready = 1;
        assert!(!status.is_settled());
    }
}
