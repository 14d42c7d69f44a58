//! Caller-owned configuration for one update run, plus the local version
//! marker (the manifest's `version` field).
//!
//! Protected and critical paths are injected by the caller, never hardcoded
//! into the replace logic. The defaults mirror the bot's live installation:
//! credentials, databases, dependency caches, logs and prior backups survive
//! every update verbatim.

use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Release track used to filter the release index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Stable,
    Beta,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Beta => "beta",
        }
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stable" | "main" => Ok(Self::Stable),
            "beta" => Ok(Self::Beta),
            other => Err(format!("unknown channel: {other} (expected stable or beta)")),
        }
    }
}

/// Paths that must never be overwritten by an update and must be preserved
/// byte-identical across the run, relative to the install root.
pub const DEFAULT_PROTECTED: &[&str] = &[
    "config.json",
    "appstate.json",
    "database.sqlite",
    "Fca_Database",
    "storage",
    "node_modules",
    ".env",
    "logs",
    "backups",
];

/// Entries the mirror always skips regardless of the protected set:
/// version-control metadata and the dependency cache.
pub const MIRROR_EXCLUDES: &[&str] = &[".git", "node_modules"];

/// Files that must exist after the replace for the application to start.
pub const DEFAULT_CRITICAL: &[&str] = &["package.json"];

/// Configuration for one update run. Immutable for its duration.
#[derive(Debug, Clone)]
pub struct UpdateConfig {
    /// Upstream repository owner.
    pub owner: String,
    /// Upstream repository name.
    pub repo: String,
    /// Release track.
    pub channel: Channel,
    /// Branch checked by the commit cool-down guard.
    pub branch: String,
    /// Root of the live installation tree.
    pub install_root: PathBuf,
    /// Scratch directory for downloads and extraction.
    pub temp_dir: PathBuf,
    /// Root under which per-run backup directories are created.
    pub backups_dir: PathBuf,
    /// Manifest file (relative to install root) holding the `version` field.
    pub manifest_file: String,
    /// Config file (relative to install root) reconciled after the replace.
    pub config_file: String,
    /// Paths (relative to install root) the replace must never touch.
    pub protected_paths: Vec<PathBuf>,
    /// Paths (relative to install root) checked after the replace.
    pub critical_paths: Vec<PathBuf>,
    /// Command reinstalling dependencies when the manifest's dependency set
    /// changed. Failure is non-fatal.
    pub install_command: Option<String>,
    /// Command rebuilding the application after the replace. Non-fatal.
    pub build_command: Option<String>,
    /// Refuse to update when the upstream head commit is younger than this.
    pub commit_cooldown: Duration,
    /// Download retry budget.
    pub max_download_retries: u32,
    /// Delay between the success message and the restart signal.
    pub restart_delay: Duration,
}

impl UpdateConfig {
    pub fn new(
        owner: impl Into<String>,
        repo: impl Into<String>,
        install_root: impl Into<PathBuf>,
    ) -> Self {
        let install_root = install_root.into();
        Self {
            owner: owner.into(),
            repo: repo.into(),
            channel: Channel::Stable,
            branch: "main".to_string(),
            temp_dir: install_root.join("temp"),
            backups_dir: install_root.join("backups"),
            install_root,
            manifest_file: "package.json".to_string(),
            config_file: "config.json".to_string(),
            protected_paths: DEFAULT_PROTECTED.iter().map(PathBuf::from).collect(),
            critical_paths: DEFAULT_CRITICAL.iter().map(PathBuf::from).collect(),
            install_command: None,
            build_command: None,
            commit_cooldown: Duration::from_secs(5 * 60),
            max_download_retries: 3,
            restart_delay: Duration::from_secs(2),
        }
    }

    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channel = channel;
        self
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.install_root.join(&self.manifest_file)
    }
}

/// The locally persisted current version: a JSON manifest with a `version`
/// field. Read before the run, rewritten only after a verified replace.
/// Unrelated manifest fields are preserved on rewrite.
#[derive(Debug, Clone)]
pub struct VersionMarker {
    path: PathBuf,
}

impl VersionMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Full manifest document, for dependency-set comparison.
    pub fn document(&self) -> Result<Value> {
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse {}", self.path.display()))
    }

    pub fn read(&self) -> Result<String> {
        let doc = self.document()?;
        doc.get("version")
            .and_then(Value::as_str)
            .map(str::to_string)
            .context("manifest has no version field")
    }

    pub fn write(&self, version: &str) -> Result<()> {
        let mut doc = self.document().unwrap_or_else(|_| Value::Object(Default::default()));
        if !doc.is_object() {
            doc = Value::Object(Default::default());
        }
        if let Some(obj) = doc.as_object_mut() {
            obj.insert("version".to_string(), Value::String(version.to_string()));
        }
        let pretty = serde_json::to_string_pretty(&doc)?;
        std::fs::write(&self.path, pretty)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }
}
