use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{Result, WatchError};

/// Shortest polling interval a target may be configured with.
pub const MIN_POLLING_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_POLLING_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_NAMESPACE: &str = "default";

// ---------------------------------------------------------------------------
// TargetId
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(String);

impl TargetId {
    /// Generate a fresh id of the form `tgt-<12 hex chars>`.
    pub fn generate() -> Self {
        let raw = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("tgt-{}", &raw[..12]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TargetId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TargetId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for TargetId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Release
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    #[serde(default)]
    pub browser_download_url: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub download_count: u64,
}

/// A release record as published by the release feed. Field names follow the
/// GitHub releases payload so fetched JSON deserializes directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    #[serde(rename = "tag_name")]
    pub tag: String,
    #[serde(default, rename = "name")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_url: Option<String>,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

impl Release {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            display_name: None,
            published_at: None,
            body: None,
            html_url: None,
            assets: Vec::new(),
        }
    }

    /// Display name, falling back to the tag when the release is unnamed.
    pub fn title(&self) -> &str {
        match self.display_name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => &self.tag,
        }
    }

    /// First `limit` characters of the release notes, with `...` appended when cut.
    pub fn body_excerpt(&self, limit: usize) -> String {
        let body = self.body.as_deref().unwrap_or("");
        if body.chars().count() <= limit {
            return body.to_string();
        }
        let mut cut: String = body.chars().take(limit).collect();
        cut.push_str("...");
        cut
    }
}

// ---------------------------------------------------------------------------
// Target
// ---------------------------------------------------------------------------

/// One release-feed-to-deployment binding.
///
/// Aliases accept the field names written by earlier releases of the monitor
/// (`github_repo`, `k8s_deployment`, ...), so existing config files load as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: TargetId,
    pub name: String,
    #[serde(default, alias = "github_repo")]
    pub release_ref: String,
    #[serde(
        default,
        alias = "github_token",
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub credential: Option<String>,
    #[serde(default = "default_namespace", alias = "k8s_namespace")]
    pub namespace: String,
    #[serde(default, alias = "k8s_deployment")]
    pub deployment_name: String,
    #[serde(default = "default_polling_interval", rename = "polling_interval")]
    pub polling_interval_secs: u64,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default, alias = "latest_release")]
    pub last_known_release: Option<Release>,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_polling_interval() -> u64 {
    DEFAULT_POLLING_INTERVAL_SECS
}

fn empty_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

impl Target {
    pub fn new(id: TargetId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            release_ref: String::new(),
            credential: None,
            namespace: default_namespace(),
            deployment_name: String::new(),
            polling_interval_secs: DEFAULT_POLLING_INTERVAL_SECS,
            is_active: false,
            last_known_release: None,
        }
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_secs)
    }

    /// Tag of the last release recorded as seen, if any.
    pub fn last_known_tag(&self) -> Option<&str> {
        self.last_known_release.as_ref().map(|r| r.tag.as_str())
    }

    /// Names of the fields that must be filled in before the target can be watched.
    pub fn missing_watch_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.release_ref.trim().is_empty() {
            missing.push("release_ref");
        }
        if self.deployment_name.trim().is_empty() {
            missing.push("deployment_name");
        }
        if self.namespace.trim().is_empty() {
            missing.push("namespace");
        }
        missing
    }

    pub fn validate_for_watch(&self) -> Result<()> {
        let missing = self.missing_watch_fields();
        if missing.is_empty() {
            return Ok(());
        }
        Err(WatchError::InvalidConfig(format!(
            "target '{}' is missing {}",
            self.name,
            missing.join(", ")
        )))
    }

    /// Copy of the target with the credential stripped, for display.
    pub fn redacted(&self) -> Self {
        Self {
            credential: None,
            ..self.clone()
        }
    }

    pub fn has_credential(&self) -> bool {
        self.credential.is_some()
    }
}

// ---------------------------------------------------------------------------
// TargetPatch
// ---------------------------------------------------------------------------

/// Field values used both to seed a new target and to update an existing one.
/// `None` leaves the field untouched (or at its default for new targets).
/// An empty `credential` clears the stored credential.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub release_ref: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub deployment_name: Option<String>,
    #[serde(default, rename = "polling_interval")]
    pub polling_interval_secs: Option<u64>,
}

impl TargetPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Whether applying this patch could change what a running watcher does.
    pub fn touches_watch_fields(&self) -> bool {
        self.release_ref.is_some()
            || self.credential.is_some()
            || self.namespace.is_some()
            || self.deployment_name.is_some()
            || self.polling_interval_secs.is_some()
    }

    pub(crate) fn apply(&self, target: &mut Target) {
        if let Some(name) = &self.name {
            target.name = name.trim().to_string();
        }
        if let Some(release_ref) = &self.release_ref {
            target.release_ref = release_ref.trim().to_string();
        }
        if let Some(credential) = &self.credential {
            target.credential = if credential.trim().is_empty() {
                None
            } else {
                Some(credential.clone())
            };
        }
        if let Some(namespace) = &self.namespace {
            target.namespace = namespace.trim().to_string();
        }
        if let Some(deployment_name) = &self.deployment_name {
            target.deployment_name = deployment_name.trim().to_string();
        }
        if let Some(secs) = self.polling_interval_secs {
            target.polling_interval_secs = secs;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_prefixed_and_distinct() {
        let a = TargetId::generate();
        let b = TargetId::generate();
        assert!(a.as_str().starts_with("tgt-"));
        assert_eq!(a.as_str().len(), 16);
        assert_ne!(a, b);
    }

    #[test]
    fn release_parses_github_payload() {
        let json = r#"{
            "tag_name": "v1.4.0",
            "name": "Spring release",
            "published_at": "2024-03-01T12:00:00Z",
            "body": "Fixes",
            "html_url": "https://github.com/acme/widget/releases/tag/v1.4.0",
            "draft": false,
            "assets": [
                {"name": "widget.tar.gz", "browser_download_url": "https://x/widget.tar.gz", "size": 1024, "download_count": 7}
            ]
        }"#;
        let release: Release = serde_json::from_str(json).unwrap();
        assert_eq!(release.tag, "v1.4.0");
        assert_eq!(release.title(), "Spring release");
        assert!(release.published_at.is_some());
        assert_eq!(release.assets.len(), 1);
        assert_eq!(release.assets[0].download_count, 7);
    }

    #[test]
    fn release_title_falls_back_to_tag() {
        let mut release = Release::new("v2.0.0");
        assert_eq!(release.title(), "v2.0.0");
        release.display_name = Some(String::new());
        assert_eq!(release.title(), "v2.0.0");
    }

    #[test]
    fn body_excerpt_truncates_long_notes() {
        let mut release = Release::new("v1");
        release.body = Some("a".repeat(600));
        let excerpt = release.body_excerpt(500);
        assert_eq!(excerpt.len(), 503);
        assert!(excerpt.ends_with("..."));

        release.body = Some("short".into());
        assert_eq!(release.body_excerpt(500), "short");
    }

    #[test]
    fn target_reads_legacy_field_names() {
        let json = r#"{
            "id": "target1",
            "name": "Default Target",
            "github_repo": "acme/widget",
            "github_token": "",
            "k8s_namespace": "prod",
            "k8s_deployment": "widget-api",
            "polling_interval": 60,
            "is_active": true,
            "latest_release": {"tag_name": "v1.0.0", "name": null, "published_at": null, "body": null, "assets": []}
        }"#;
        let target: Target = serde_json::from_str(json).unwrap();
        assert_eq!(target.id.as_str(), "target1");
        assert_eq!(target.release_ref, "acme/widget");
        assert_eq!(target.credential, None);
        assert_eq!(target.namespace, "prod");
        assert_eq!(target.deployment_name, "widget-api");
        assert!(target.is_active);
        assert_eq!(target.last_known_tag(), Some("v1.0.0"));
    }

    #[test]
    fn missing_watch_fields_lists_empty_required_fields() {
        let target = Target::new(TargetId::from("t1"), "One");
        assert_eq!(
            target.missing_watch_fields(),
            vec!["release_ref", "deployment_name"]
        );
        assert!(matches!(
            target.validate_for_watch(),
            Err(WatchError::InvalidConfig(_))
        ));
    }

    #[test]
    fn patch_clears_credential_with_empty_string() {
        let mut target = Target::new(TargetId::from("t1"), "One");
        target.credential = Some("secret".into());
        TargetPatch {
            credential: Some(String::new()),
            ..Default::default()
        }
        .apply(&mut target);
        assert_eq!(target.credential, None);
    }

    #[test]
    fn redacted_strips_credential() {
        let mut target = Target::new(TargetId::from("t1"), "One");
        target.credential = Some("secret".into());
        assert!(target.has_credential());
        assert_eq!(target.redacted().credential, None);
    }
}
