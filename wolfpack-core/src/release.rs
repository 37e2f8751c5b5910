use crate::errors::PipelineError;
use serde::{Deserialize, Serialize};
use tracing::info;

const USER_AGENT: &str = "WolfpackLauncher-RS";

/// Wire shape of a GitHub release; only the fields the pipeline consumes.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GitHubRelease {
    pub tag_name: Option<String>,
    pub body: Option<String>,
    pub zipball_url: Option<String>,
}

/// Parsed release metadata. Immutable once fetched; refreshed only by
/// re-resolving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseMetadata {
    pub tag: String,
    pub changelog: String,
    pub archive_url: String,
}

impl ReleaseMetadata {
    fn from_wire(raw: GitHubRelease) -> Result<Self, PipelineError> {
        let tag = raw
            .tag_name
            .filter(|t| !t.is_empty())
            .ok_or(PipelineError::MalformedMetadata("tag_name"))?;
        let archive_url = raw
            .zipball_url
            .filter(|u| !u.is_empty())
            .ok_or(PipelineError::MalformedMetadata("zipball_url"))?;
        // GitHub serves null bodies for releases without notes
        let changelog = raw.body.unwrap_or_default();
        Ok(Self { tag, changelog, archive_url })
    }
}

/// Fetches release metadata from the GitHub release feed. The latest release
/// is memoized for the resolution cycle so repeated field reads (tag vs.
/// changelog vs. URL) do not refetch.
pub struct ReleaseResolver {
    client: reqwest::Client,
    latest: Option<ReleaseMetadata>,
}

impl ReleaseResolver {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new(), latest: None }
    }

    pub fn latest_url(owner: &str, repo: &str) -> String {
        format!("https://api.github.com/repos/{owner}/{repo}/releases/latest")
    }

    pub fn tag_url(owner: &str, repo: &str, tag: &str) -> String {
        format!("https://api.github.com/repos/{owner}/{repo}/releases/tags/{tag}")
    }

    pub async fn resolve_latest(
        &mut self,
        owner: &str,
        repo: &str,
    ) -> Result<ReleaseMetadata, PipelineError> {
        if let Some(meta) = &self.latest {
            return Ok(meta.clone());
        }
        let meta = self.fetch(&Self::latest_url(owner, repo)).await?;
        self.latest = Some(meta.clone());
        Ok(meta)
    }

    /// Re-derive metadata for an already-installed version, keyed by tag.
    pub async fn resolve_tag(
        &self,
        owner: &str,
        repo: &str,
        tag: &str,
    ) -> Result<ReleaseMetadata, PipelineError> {
        self.fetch(&Self::tag_url(owner, repo, tag)).await
    }

    /// Drop the memoized latest release so the next resolve refetches.
    pub fn invalidate(&mut self) {
        self.latest = None;
    }

    async fn fetch(&self, url: &str) -> Result<ReleaseMetadata, PipelineError> {
        info!("GitHub fetch: {}", url);
        let resp = self
            .client
            .get(url)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(PipelineError::Network(format!("GitHub API error: {status}")));
        }
        let raw: GitHubRelease = resp.json().await?;
        ReleaseMetadata::from_wire(raw)
    }
}

impl Default for ReleaseResolver {
    fn default() -> Self {
        Self::new()
    }
}
