use crate::cmd::open_registry;
use crate::output::{or_dash, print_fields, print_json, print_table};
use anyhow::{bail, Context};
use relwatch_core::config::EngineSettings;
use relwatch_core::trigger::Reconciler;
use relwatch_core::{Target, TargetId};
use relwatch_server::cluster::KubeController;
use std::path::Path;
use std::sync::Arc;

fn deployment_target(config: &Path, id: &str) -> anyhow::Result<(Target, EngineSettings)> {
    let (store, registry) = open_registry(config)?;
    let target = registry.require(&TargetId::from(id))?.clone();
    if target.namespace.trim().is_empty() || target.deployment_name.trim().is_empty() {
        bail!(
            "target '{}' needs a namespace and deployment (relwatch target set {} --deployment NAME)",
            target.name,
            target.id
        );
    }
    Ok((target, store.settings().clone()))
}

async fn connect(settings: &EngineSettings) -> anyhow::Result<Reconciler> {
    let controller = KubeController::connect()
        .await
        .context("failed to connect to Kubernetes")?;
    Ok(Reconciler::new(
        Arc::new(controller),
        settings.reconcile_timeout(),
    ))
}

pub fn status(config: &Path, id: &str, json: bool) -> anyhow::Result<()> {
    let (target, settings) = deployment_target(config, id)?;
    let rt = tokio::runtime::Runtime::new()?;
    let status = rt.block_on(async {
        let reconciler = connect(&settings).await?;
        reconciler
            .status(&target.namespace, &target.deployment_name)
            .await
            .map_err(anyhow::Error::from)
    })?;

    if json {
        return print_json(&status);
    }

    let r = &status.replicas;
    print_fields(&[
        ("Deployment", format!("{}/{}", status.namespace, status.name)),
        (
            "Replicas",
            format!(
                "{} desired, {} current, {} ready, {} available",
                r.desired, r.current, r.ready, r.available
            ),
        ),
        ("Strategy", or_dash(status.strategy.as_deref())),
        (
            "Updated",
            or_dash(
                status
                    .updated_at
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                    .as_deref(),
            ),
        ),
        ("Settled", status.is_settled().to_string()),
    ]);

    if !status.images.is_empty() {
        println!();
        let rows = status
            .images
            .iter()
            .map(|c| vec![c.name.clone(), c.image.clone()])
            .collect();
        print_table(&["CONTAINER", "IMAGE"], rows);
    }

    if !status.pods.is_empty() {
        println!();
        let rows = status
            .pods
            .iter()
            .map(|p| {
                let ready = p.containers.iter().filter(|c| c.ready).count();
                let restarts: i32 = p.containers.iter().map(|c| c.restarts).sum();
                vec![
                    p.name.clone(),
                    or_dash(p.phase.as_deref()),
                    format!("{ready}/{}", p.containers.len()),
                    restarts.to_string(),
                    or_dash(p.node.as_deref()),
                ]
            })
            .collect();
        print_table(&["POD", "PHASE", "READY", "RESTARTS", "NODE"], rows);
    }
    Ok(())
}

pub fn rollback(config: &Path, id: &str, tag: &str, json: bool) -> anyhow::Result<()> {
    let (target, settings) = deployment_target(config, id)?;
    let tag = tag.trim();
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let reconciler = connect(&settings).await?;
        reconciler
            .rollback(&target.namespace, &target.deployment_name, tag)
            .await
            .map_err(anyhow::Error::from)
    })?;

    if json {
        print_json(&serde_json::json!({
            "id": target.id,
            "namespace": target.namespace,
            "deployment": target.deployment_name,
            "tag": tag,
            "status": "patched",
        }))
    } else {
        println!(
            "Rolled back {}/{} to {tag}",
            target.namespace, target.deployment_name
        );
        Ok(())
    }
}
