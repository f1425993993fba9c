//! Reconciliation: restart on a new release, and explicit rollback.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{error, info};

use crate::controller::{DeploymentController, DeploymentStatus};
use crate::error::{Result, WatchError};

/// Issues restart and rollback calls against a deployment controller, each
/// bounded by a timeout.
#[derive(Clone)]
pub struct Reconciler {
    controller: Arc<dyn DeploymentController>,
    timeout: Duration,
}

impl Reconciler {
    pub fn new(controller: Arc<dyn DeploymentController>, timeout: Duration) -> Self {
        Self {
            controller,
            timeout,
        }
    }

    /// Restart the deployment because `tag` was released.
    ///
    /// A failure is returned for the caller to log; it is never retried here.
    pub async fn reconcile(&self, namespace: &str, deployment: &str, tag: &str) -> Result<()> {
        info!(namespace, deployment, tag, "restarting deployment for new release");
        let outcome = self
            .bounded(namespace, deployment, self.controller.restart(namespace, deployment))
            .await;
        match &outcome {
            Ok(()) => info!(namespace, deployment, tag, "deployment restart issued"),
            Err(e) => error!(namespace, deployment, tag, error = %e, "deployment restart failed"),
        }
        outcome
    }

    /// Re-point every container image of the deployment at `tag`.
    pub async fn rollback(&self, namespace: &str, deployment: &str, tag: &str) -> Result<()> {
        if tag.trim().is_empty() {
            return Err(WatchError::InvalidConfig(
                "rollback tag must not be empty".to_string(),
            ));
        }
        info!(namespace, deployment, tag, "rolling back deployment");
        let outcome = self
            .bounded(
                namespace,
                deployment,
                self.controller.patch_image_tag(namespace, deployment, tag),
            )
            .await;
        match &outcome {
            Ok(()) => info!(namespace, deployment, tag, "rollback applied"),
            Err(e) => error!(namespace, deployment, tag, error = %e, "rollback failed"),
        }
        outcome
    }

    /// Read the current rollout state of the deployment.
    pub async fn status(&self, namespace: &str, deployment: &str) -> Result<DeploymentStatus> {
        self.bounded(
            namespace,
            deployment,
            self.controller.read_status(namespace, deployment),
        )
        .await
    }

    async fn bounded<T, F>(&self, namespace: &str, deployment: &str, call: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        match timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(WatchError::reconcile(
                namespace,
                deployment,
                format!("timed out after {}s", self.timeout.as_secs()),
            )),
        }
    }
}
