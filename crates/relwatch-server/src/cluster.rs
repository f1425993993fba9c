//! Kubernetes implementation of the deployment controller.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::Client;
use relwatch_core::controller::{
    retag_image, ContainerImage, ContainerState, DeploymentController, DeploymentStatus,
    PodStatus, ReplicaCounts,
};
use relwatch_core::{Result, WatchError};
use serde_json::{json, Value};
use tracing::debug;

const RESTARTED_AT_ANNOTATION: &str = "kubectl.kubernetes.io/restartedAt";

/// Talks to the cluster selected by the local kubeconfig, or the in-cluster
/// service account when there is none.
#[derive(Clone)]
pub struct KubeController {
    client: Client,
}

impl KubeController {
    pub async fn connect() -> anyhow::Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self { client })
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl DeploymentController for KubeController {
    async fn restart(&self, namespace: &str, deployment: &str) -> Result<()> {
        let patch = restart_patch(&chrono::Utc::now().to_rfc3339());
        self.deployments(namespace)
            .patch(deployment, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| WatchError::reconcile(namespace, deployment, e))?;
        debug!(namespace, deployment, "restart annotation patched");
        Ok(())
    }

    async fn read_status(&self, namespace: &str, deployment: &str) -> Result<DeploymentStatus> {
        let dep = self
            .deployments(namespace)
            .get(deployment)
            .await
            .map_err(|e| WatchError::reconcile(namespace, deployment, e))?;

        let pods = match label_selector(&dep) {
            Some(selector) => {
                let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
                api.list(&ListParams::default().labels(&selector))
                    .await
                    .map_err(|e| WatchError::reconcile(namespace, deployment, e))?
                    .items
            }
            None => Vec::new(),
        };

        Ok(convert_status(namespace, deployment, &dep, &pods))
    }

    async fn patch_image_tag(&self, namespace: &str, deployment: &str, tag: &str) -> Result<()> {
        let api = self.deployments(namespace);
        let dep = api
            .get(deployment)
            .await
            .map_err(|e| WatchError::reconcile(namespace, deployment, e))?;
        let patch = image_patch(&dep, tag).ok_or_else(|| {
            WatchError::reconcile(namespace, deployment, "deployment has no container images")
        })?;
        api.patch(deployment, &PatchParams::default(), &Patch::Strategic(&patch))
            .await
            .map_err(|e| WatchError::reconcile(namespace, deployment, e))?;
        debug!(namespace, deployment, tag, "container images patched");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Payload builders
// ---------------------------------------------------------------------------

/// Merge patch that bumps the pod template annotation, rolling every pod.
fn restart_patch(timestamp: &str) -> Value {
    let mut annotations = serde_json::Map::new();
    annotations.insert(RESTARTED_AT_ANNOTATION.to_string(), timestamp.into());
    json!({
        "spec": {
            "template": {
                "metadata": { "annotations": annotations }
            }
        }
    })
}

/// Strategic merge patch re-pointing every container with an image at `tag`.
/// Containers merge by name, so nothing else in the pod spec changes.
fn image_patch(dep: &Deployment, tag: &str) -> Option<Value> {
    let containers: Vec<Value> = dep
        .spec
        .as_ref()?
        .template
        .spec
        .as_ref()?
        .containers
        .iter()
        .filter_map(|c| {
            let image = c.image.as_deref()?;
            Some(json!({ "name": c.name, "image": retag_image(image, tag) }))
        })
        .collect();
    if containers.is_empty() {
        return None;
    }
    Some(json!({ "spec": { "template": { "spec": { "containers": containers } } } }))
}

/// `k=v,k2=v2` selector for the deployment's pods, from `matchLabels`.
fn label_selector(dep: &Deployment) -> Option<String> {
    let labels = dep.spec.as_ref()?.selector.match_labels.as_ref()?;
    if labels.is_empty() {
        return None;
    }
    Some(
        labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(","),
    )
}

fn convert_status(namespace: &str, name: &str, dep: &Deployment, pods: &[Pod]) -> DeploymentStatus {
    let spec = dep.spec.as_ref();
    let status = dep.status.as_ref();

    let replicas = ReplicaCounts {
        desired: spec.and_then(|s| s.replicas).unwrap_or(0),
        current: status.and_then(|s| s.replicas).unwrap_or(0),
        ready: status.and_then(|s| s.ready_replicas).unwrap_or(0),
        available: status.and_then(|s| s.available_replicas).unwrap_or(0),
        unavailable: status.and_then(|s| s.unavailable_replicas).unwrap_or(0),
    };

    let images = spec
        .and_then(|s| s.template.spec.as_ref())
        .map(|p| {
            p.containers
                .iter()
                .map(|c| ContainerImage {
                    name: c.name.clone(),
                    image: c.image.clone().unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default();

    let updated_at = status
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conds| {
            conds
                .iter()
                .filter_map(|c| c.last_update_time.as_ref().map(|t| t.0))
                .max()
        });

    DeploymentStatus {
        name: name.to_string(),
        namespace: namespace.to_string(),
        created_at: dep.metadata.creation_timestamp.as_ref().map(|t| t.0),
        replicas,
        images,
        strategy: spec
            .and_then(|s| s.strategy.as_ref())
            .and_then(|s| s.type_.clone()),
        updated_at,
        pods: pods.iter().map(convert_pod).collect(),
    }
}

fn convert_pod(pod: &Pod) -> PodStatus {
    let status = pod.status.as_ref();
    PodStatus {
        name: pod.metadata.name.clone().unwrap_or_default(),
        phase: status.and_then(|s| s.phase.clone()),
        ip: status.and_then(|s| s.pod_ip.clone()),
        node: pod.spec.as_ref().and_then(|s| s.node_name.clone()),
        start_time: status.and_then(|s| s.start_time.as_ref()).map(|t| t.0),
        containers: status
            .and_then(|s| s.container_statuses.as_ref())
            .map(|list| {
                list.iter()
                    .map(|c| ContainerState {
                        name: c.name.clone(),
                        ready: c.ready,
                        restarts: c.restart_count,
                        image: c.image.clone(),
                        image_id: c.image_id.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default(),
    }
}
