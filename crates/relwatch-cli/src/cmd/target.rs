use crate::cmd::{open_registry, save_registry};
use crate::output::{or_dash, print_fields, print_json, print_table};
use anyhow::bail;
use clap::{Args, Subcommand};
use relwatch_core::types::MIN_POLLING_INTERVAL_SECS;
use relwatch_core::{Target, TargetId, TargetPatch};
use std::path::Path;

#[derive(Subcommand)]
pub enum TargetSubcommand {
    /// List all targets
    List,
    /// Add a target
    Add(TargetFields),
    /// Show one target
    Show { id: String },
    /// Change target settings
    Set {
        id: String,
        #[command(flatten)]
        fields: TargetFields,
    },
    /// Remove a target (the last one cannot be removed)
    Remove { id: String },
}

#[derive(Args, Debug, Default)]
pub struct TargetFields {
    /// Display name
    #[arg(long)]
    name: Option<String>,
    /// GitHub repository to watch, as owner/repo
    #[arg(long = "repo")]
    release_ref: Option<String>,
    /// GitHub token for private repositories (empty string clears it)
    #[arg(long)]
    token: Option<String>,
    /// Kubernetes namespace of the deployment
    #[arg(long)]
    namespace: Option<String>,
    /// Kubernetes deployment to restart on a new release
    #[arg(long)]
    deployment: Option<String>,
    /// Seconds between release checks
    #[arg(long, value_name = "SECS")]
    interval: Option<u64>,
}

impl From<TargetFields> for TargetPatch {
    fn from(f: TargetFields) -> Self {
        TargetPatch {
            name: f.name,
            release_ref: f.release_ref,
            credential: f.token,
            namespace: f.namespace,
            deployment_name: f.deployment,
            polling_interval_secs: f.interval,
        }
    }
}

pub fn run(config: &Path, subcmd: TargetSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        TargetSubcommand::List => list(config, json),
        TargetSubcommand::Add(fields) => add(config, fields.into(), json),
        TargetSubcommand::Show { id } => show(config, &id, json),
        TargetSubcommand::Set { id, fields } => set(config, &id, fields.into(), json),
        TargetSubcommand::Remove { id } => remove(config, &id, json),
    }
}

fn list(config: &Path, json: bool) -> anyhow::Result<()> {
    let (_, registry) = open_registry(config)?;

    if json {
        let list: Vec<Target> = registry.list().iter().map(Target::redacted).collect();
        return print_json(&list);
    }

    let rows: Vec<Vec<String>> = registry
        .list()
        .iter()
        .map(|t| {
            vec![
                t.id.to_string(),
                t.name.clone(),
                or_dash(Some(t.release_ref.as_str())),
                format!("{}/{}", t.namespace, or_dash(Some(t.deployment_name.as_str()))),
                format!("{}s", t.polling_interval_secs),
                if t.is_active { "yes" } else { "no" }.to_string(),
                or_dash(t.last_known_tag()),
            ]
        })
        .collect();
    print_table(
        &["ID", "NAME", "REPO", "DEPLOYMENT", "INTERVAL", "ACTIVE", "LATEST"],
        rows,
    );
    Ok(())
}

fn add(config: &Path, patch: TargetPatch, json: bool) -> anyhow::Result<()> {
    let (store, mut registry) = open_registry(config)?;
    if let Some(secs) = patch.polling_interval_secs {
        if secs < MIN_POLLING_INTERVAL_SECS {
            bail!("interval must be at least {MIN_POLLING_INTERVAL_SECS} seconds");
        }
    }
    let target = registry.add(patch);
    save_registry(&store, &registry)?;

    if json {
        print_json(&target.redacted())
    } else {
        println!("Added target '{}' ({})", target.name, target.id);
        Ok(())
    }
}

fn show(config: &Path, id: &str, json: bool) -> anyhow::Result<()> {
    let (_, registry) = open_registry(config)?;
    let target = registry.require(&TargetId::from(id))?;

    if json {
        return print_json(&target.redacted());
    }

    let latest = target.last_known_release.as_ref();
    print_fields(&[
        ("ID", target.id.to_string()),
        ("Name", target.name.clone()),
        ("Repository", or_dash(Some(target.release_ref.as_str()))),
        (
            "Token",
            if target.has_credential() { "set" } else { "none" }.to_string(),
        ),
        ("Namespace", target.namespace.clone()),
        ("Deployment", or_dash(Some(target.deployment_name.as_str()))),
        ("Interval", format!("{}s", target.polling_interval_secs)),
        ("Active", target.is_active.to_string()),
        ("Latest", or_dash(latest.map(|r| r.tag.as_str()))),
        (
            "Published",
            or_dash(
                latest
                    .and_then(|r| r.published_at)
                    .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
                    .as_deref(),
            ),
        ),
    ]);
    Ok(())
}

fn set(config: &Path, id: &str, patch: TargetPatch, json: bool) -> anyhow::Result<()> {
    if patch.is_empty() {
        bail!("nothing to change; pass at least one of --name, --repo, --token, --namespace, --deployment, --interval");
    }
    let (store, mut registry) = open_registry(config)?;
    let target = registry.update(&TargetId::from(id), &patch)?;
    save_registry(&store, &registry)?;

    if json {
        print_json(&target.redacted())
    } else {
        println!("Updated target '{}' ({})", target.name, target.id);
        if target.is_active {
            println!("A running server picks this up after a restart.");
        }
        Ok(())
    }
}

fn remove(config: &Path, id: &str, json: bool) -> anyhow::Result<()> {
    let (store, mut registry) = open_registry(config)?;
    let removed = registry.remove(&TargetId::from(id))?;
    save_registry(&store, &registry)?;

    if json {
        print_json(&serde_json::json!({ "id": removed.id, "deleted": true }))
    } else {
        println!("Removed target '{}' ({})", removed.name, removed.id);
        Ok(())
    }
}
