//! Release index client.
//!
//! `ReleaseSource` is the injected capability the pipeline and guards talk
//! to; `GitHubSource` implements it over the GitHub REST API. Tests use
//! in-memory doubles.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use crate::config::Channel;

/// One published release, newest-first in the index. Immutable once fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub published_at: String,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub name: String,
    pub browser_download_url: String,
    #[serde(default)]
    pub size: u64,
}

impl Release {
    /// Version from the tag name, 'v' prefix stripped.
    pub fn version(&self) -> &str {
        crate::version::clean(&self.tag_name)
    }

    /// The archive selected as the update payload. A release without one is
    /// unusable.
    pub fn archive_asset(&self) -> Option<&Asset> {
        self.assets.iter().find(|a| {
            let lower = a.name.to_lowercase();
            lower.ends_with(".zip") || lower.ends_with(".tar.gz") || lower.ends_with(".tgz")
        })
    }
}

/// Outcome of one streamed fetch.
#[derive(Debug, Clone)]
pub struct FetchStats {
    pub bytes: u64,
    pub sha256: String,
}

/// Per-chunk progress callback: (bytes downloaded, total bytes or 0 when the
/// total is unknown). The lifetime lets callers pass closures borrowing
/// their own state; the callback only lives for the duration of one fetch.
pub type ChunkFn<'a> = dyn Fn(u64, u64) + Send + Sync + 'a;

/// Upstream release index and file transfer, injectable for tests.
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// Releases ordered newest-first.
    async fn list_releases(&self, owner: &str, repo: &str) -> Result<Vec<Release>>;

    /// Committer date of the branch head, for the commit cool-down guard.
    async fn branch_head_time(&self, owner: &str, repo: &str, branch: &str)
        -> Result<DateTime<Utc>>;

    /// Stream a URL to disk, computing the SHA-256 digest incrementally.
    /// One attempt; retrying is the downloader's job.
    async fn fetch(&self, url: &str, dest: &Path, on_chunk: &ChunkFn<'_>) -> Result<FetchStats>;
}

/// Select the target release for a channel. Beta picks the first prerelease
/// or beta-tagged release; stable picks the first non-prerelease. When no
/// release matches the channel, the newest release overall wins.
pub fn resolve_release(releases: &[Release], channel: Channel) -> Option<&Release> {
    let matched = match channel {
        Channel::Beta => releases
            .iter()
            .find(|r| r.prerelease || r.tag_name.to_lowercase().contains("beta")),
        Channel::Stable => releases.iter().find(|r| !r.prerelease),
    };
    matched.or_else(|| releases.first())
}

/// GitHub REST API client.
pub struct GitHubSource {
    client: reqwest::Client,
    api_base: String,
    user_agent: String,
}

/// Bound on release index / commit metadata queries.
const METADATA_TIMEOUT: Duration = Duration::from_secs(15);
/// Bound on the archive download request.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

impl GitHubSource {
    pub fn new() -> Result<Self> {
        Self::with_base("https://api.github.com")
    }

    /// Custom API base, for GitHub Enterprise deployments.
    pub fn with_base(api_base: impl Into<String>) -> Result<Self> {
        let user_agent = format!("aura-updater/{}", env!("CARGO_PKG_VERSION"));
        let client = reqwest::Client::builder()
            .user_agent(&user_agent)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            api_base: api_base.into(),
            user_agent,
        })
    }
}

#[async_trait]
impl ReleaseSource for GitHubSource {
    async fn list_releases(&self, owner: &str, repo: &str) -> Result<Vec<Release>> {
        let url = format!("{}/repos/{}/{}/releases", self.api_base, owner, repo);

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github.v3+json")
            .timeout(METADATA_TIMEOUT)
            .send()
            .await
            .context("failed to fetch releases")?;

        if !response.status().is_success() {
            anyhow::bail!("release index returned {}", response.status());
        }

        response
            .json::<Vec<Release>>()
            .await
            .context("failed to parse releases JSON")
    }

    async fn branch_head_time(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<DateTime<Utc>> {
        let url = format!(
            "{}/repos/{}/{}/commits/{}",
            self.api_base, owner, repo, branch
        );

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github.v3+json")
            .timeout(METADATA_TIMEOUT)
            .send()
            .await
            .context("failed to fetch branch head")?;

        if !response.status().is_success() {
            anyhow::bail!("commit query returned {}", response.status());
        }

        let json: serde_json::Value = response
            .json()
            .await
            .context("failed to parse commit JSON")?;

        let date = json["commit"]["committer"]["date"]
            .as_str()
            .context("commit has no committer date")?;

        DateTime::parse_from_rfc3339(date)
            .map(|d| d.with_timezone(&Utc))
            .context("unparseable committer date")
    }

    async fn fetch(&self, url: &str, dest: &Path, on_chunk: &ChunkFn<'_>) -> Result<FetchStats> {
        let response = self
            .client
            .get(url)
            .header("User-Agent", &self.user_agent)
            .header("Accept", "application/octet-stream")
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await
            .context("download request failed")?;

        if !response.status().is_success() {
            anyhow::bail!("download returned {}", response.status());
        }

        let total = response.content_length().unwrap_or(0);

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("failed to create download directory")?;
        }
        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("failed to create {}", dest.display()))?;

        let mut hasher = Sha256::new();
        let mut downloaded = 0u64;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("download stream error")?;
            hasher.update(&chunk);
            downloaded += chunk.len() as u64;
            file.write_all(&chunk)
                .await
                .context("failed to write download chunk")?;
            on_chunk(downloaded, total);
        }

        file.flush().await.context("failed to flush download")?;

        Ok(FetchStats {
            bytes: downloaded,
            sha256: format!("{:x}", hasher.finalize()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release(tag: &str, prerelease: bool) -> Release {
        Release {
            tag_name: tag.to_string(),
            name: tag.to_string(),
            prerelease,
            published_at: String::new(),
            assets: Vec::new(),
        }
    }

    #[test]
    fn test_stable_skips_prereleases() {
        let releases = vec![release("v1.4.0-rc.1", true), release("v1.3.0", false)];
        let picked = resolve_release(&releases, Channel::Stable).unwrap();
        assert_eq!(picked.tag_name, "v1.3.0");
    }

    #[test]
    fn test_beta_picks_prerelease_or_beta_tag() {
        let releases = vec![release("v1.3.0", false), release("v1.4.0-beta.2", false)];
        let picked = resolve_release(&releases, Channel::Beta).unwrap();
        assert_eq!(picked.tag_name, "v1.4.0-beta.2");

        let releases = vec![release("v1.3.0", false), release("v1.4.0", true)];
        let picked = resolve_release(&releases, Channel::Beta).unwrap();
        assert_eq!(picked.tag_name, "v1.4.0");
    }

    #[test]
    fn test_falls_back_to_newest_when_channel_unmatched() {
        let releases = vec![release("v2.0.0-rc.1", true), release("v2.0.0-rc.0", true)];
        let picked = resolve_release(&releases, Channel::Stable).unwrap();
        assert_eq!(picked.tag_name, "v2.0.0-rc.1");
    }

    #[test]
    fn test_empty_index_yields_none() {
        assert!(resolve_release(&[], Channel::Stable).is_none());
    }

    #[test]
    fn test_archive_asset_selection() {
        let mut rel = release("v1.3.0", false);
        rel.assets = vec![
            Asset {
                name: "checksums.txt".to_string(),
                browser_download_url: "https://example.com/checksums.txt".to_string(),
                size: 128,
            },
            Asset {
                name: "bundle.zip".to_string(),
                browser_download_url: "https://example.com/bundle.zip".to_string(),
                size: 1024,
            },
        ];
        assert_eq!(rel.archive_asset().unwrap().name, "bundle.zip");

        rel.assets[1].name = "bundle.tar.gz".to_string();
        assert_eq!(rel.archive_asset().unwrap().name, "bundle.tar.gz");

        rel.assets.truncate(1);
        assert!(rel.archive_asset().is_none());
    }

    #[test]
    fn test_release_json_shape() {
        let json = r#"[{
            "tag_name": "v1.3.0",
            "name": "Release 1.3.0",
            "prerelease": false,
            "published_at": "2025-06-01T12:00:00Z",
            "assets": [{
                "name": "bundle.zip",
                "browser_download_url": "https://example.com/bundle.zip",
                "size": 1024
            }]
        }]"#;
        let releases: Vec<Release> = serde_json::from_str(json).unwrap();
        assert_eq!(releases[0].version(), "1.3.0");
        assert_eq!(releases[0].assets[0].size, 1024);
    }
}
