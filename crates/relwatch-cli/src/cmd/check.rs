use crate::cmd::{open_registry, save_registry};
use crate::output::{or_dash, print_json, print_table};
use anyhow::{anyhow, bail};
use relwatch_core::source::{GitHubReleaseSource, ReleaseSource};
use relwatch_core::TargetId;
use std::path::Path;

/// Number of characters of release notes shown per row.
const NOTES_WIDTH: usize = 60;

pub fn run(config: &Path, id: &str, json: bool) -> anyhow::Result<()> {
    let (store, mut registry) = open_registry(config)?;
    let id = TargetId::from(id);
    let target = registry.require(&id)?.clone();
    if target.release_ref.trim().is_empty() {
        bail!("target '{}' has no repository set", target.name);
    }

    let settings = store.settings().clone();
    let source = GitHubReleaseSource::new(settings.release_api_url.clone());
    let rt = tokio::runtime::Runtime::new()?;
    let releases = rt
        .block_on(tokio::time::timeout(
            settings.fetch_timeout(),
            source.fetch(&target.release_ref, target.credential.as_deref()),
        ))
        .map_err(|_| {
            anyhow!(
                "timed out after {}s fetching releases for {}",
                settings.fetch_timeout_secs,
                target.release_ref
            )
        })??;

    if let Some(latest) = releases.first() {
        if registry.record_release(&id, latest.clone())? {
            save_registry(&store, &registry)?;
        }
    }

    if json {
        return print_json(&serde_json::json!({
            "id": id,
            "latest": releases.first().map(|r| &r.tag),
            "releases": releases,
        }));
    }

    if releases.is_empty() {
        println!("No releases published for {}.", target.release_ref);
        return Ok(());
    }

    let rows: Vec<Vec<String>> = releases
        .iter()
        .map(|r| {
            vec![
                r.tag.clone(),
                r.title().to_string(),
                or_dash(
                    r.published_at
                        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                        .as_deref(),
                ),
                or_dash(Some(r.body_excerpt(NOTES_WIDTH).replace('\n', " ").as_str())),
            ]
        })
        .collect();
    print_table(&["TAG", "TITLE", "PUBLISHED", "NOTES"], rows);
    Ok(())
}
