//! Release feeds.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use tracing::debug;

use crate::error::{Result, WatchError};
use crate::types::Release;

pub const DEFAULT_RELEASE_API_URL: &str = "https://api.github.com";

/// Something that can list the releases published for a reference.
///
/// Implementations return releases in feed order; callers treat the first
/// element as the latest release. An empty list means nothing is published.
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    async fn fetch(&self, release_ref: &str, credential: Option<&str>) -> Result<Vec<Release>>;
}

fn repo_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+$").expect("valid regex"))
}

/// Whether `release_ref` has the `owner/repo` shape the GitHub API expects.
pub fn is_valid_repo_ref(release_ref: &str) -> bool {
    repo_pattern().is_match(release_ref)
}

// ---------------------------------------------------------------------------
// GitHubReleaseSource
// ---------------------------------------------------------------------------

/// Lists releases through the GitHub REST API (first page only).
#[derive(Debug, Clone)]
pub struct GitHubReleaseSource {
    client: reqwest::Client,
    api_url: String,
}

impl GitHubReleaseSource {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn releases_url(&self, release_ref: &str) -> String {
        format!("{}/repos/{}/releases", self.api_url, release_ref)
    }
}

impl Default for GitHubReleaseSource {
    fn default() -> Self {
        Self::new(DEFAULT_RELEASE_API_URL)
    }
}

#[async_trait]
impl ReleaseSource for GitHubReleaseSource {
    async fn fetch(&self, release_ref: &str, credential: Option<&str>) -> Result<Vec<Release>> {
        if !is_valid_repo_ref(release_ref) {
            return Err(WatchError::fetch(
                release_ref,
                "expected a repository reference of the form owner/repo",
            ));
        }

        let url = self.releases_url(release_ref);
        debug!(url = %url, "fetching releases");

        let mut request = self
            .client
            .get(&url)
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, concat!("relwatch/", env!("CARGO_PKG_VERSION")));
        if let Some(token) = credential.filter(|t| !t.is_empty()) {
            request = request.header(AUTHORIZATION, format!("token {token}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| WatchError::fetch(release_ref, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(WatchError::fetch(
                release_ref,
                format!("release API returned {status}"),
            ));
        }

        response
            .json::<Vec<Release>>()
            .await
            .map_err(|e| WatchError::fetch(release_ref, format!("invalid release payload: {e}")))
    }
}
