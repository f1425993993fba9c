//! In-process fakes for the collaborator traits.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::controller::{DeploymentController, DeploymentStatus, ReplicaCounts};
use crate::error::{Result, WatchError};
use crate::source::ReleaseSource;
use crate::types::Release;

pub fn releases(tags: &[&str]) -> Vec<Release> {
    tags.iter().map(|t| Release::new(*t)).collect()
}

/// Replays a fixed script of fetch results, repeating the last one forever.
#[derive(Default)]
pub struct ScriptedSource {
    script: Mutex<VecDeque<Result<Vec<Release>>>>,
    last: Mutex<Option<Vec<Release>>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedSource {
    pub fn new(script: Vec<Result<Vec<Release>>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        }
    }

    pub fn tags(tags: &[&str]) -> Self {
        Self::new(vec![Ok(releases(tags))])
    }

    pub fn slow(delay: Duration, tags: &[&str]) -> Self {
        Self {
            delay: Some(delay),
            ..Self::tags(tags)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReleaseSource for ScriptedSource {
    async fn fetch(&self, release_ref: &str, _credential: Option<&str>) -> Result<Vec<Release>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(list)) => {
                *self.last.lock().unwrap() = Some(list.clone());
                Ok(list)
            }
            Some(Err(e)) => Err(e),
            None => match self.last.lock().unwrap().clone() {
                Some(list) => Ok(list),
                None => Err(WatchError::fetch(release_ref, "script exhausted")),
            },
        }
    }
}

/// Records every call; optionally fails or stalls.
#[derive(Default)]
pub struct FakeController {
    restarts: Mutex<Vec<(String, String)>>,
    patches: Mutex<Vec<(String, String, String)>>,
    fail: bool,
    delay: Option<Duration>,
}

impl FakeController {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn restarts(&self) -> Vec<(String, String)> {
        self.restarts.lock().unwrap().clone()
    }

    pub fn patches(&self) -> Vec<(String, String, String)> {
        self.patches.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeploymentController for FakeController {
    async fn restart(&self, namespace: &str, deployment: &str) -> Result<()> {
        self.restarts
            .lock()
            .unwrap()
            .push((namespace.to_string(), deployment.to_string()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(WatchError::reconcile(namespace, deployment, "forbidden"));
        }
        Ok(())
    }

    async fn read_status(&self, namespace: &str, deployment: &str) -> Result<DeploymentStatus> {
        Ok(DeploymentStatus {
            name: deployment.to_string(),
            namespace: namespace.to_string(),
            created_at: None,
            replicas: ReplicaCounts {
                desired: 1,
                current: 1,
                ready: 1,
                available: 1,
                unavailable: 0,
            },
            images: Vec::new(),
            strategy: None,
            updated_at: None,
            pods: Vec::new(),
        })
    }

    async fn patch_image_tag(&self, namespace: &str, deployment: &str, tag: &str) -> Result<()> {
        self.patches.lock().unwrap().push((
            namespace.to_string(),
            deployment.to_string(),
            tag.to_string(),
        ));
        if self.fail {
            return Err(WatchError::reconcile(namespace, deployment, "forbidden"));
        }
        Ok(())
    }
}
