//! Update orchestrator.
//!
//! Drives the stages in order, short-circuiting on failure:
//! Guarding -> Resolving -> Comparing -> Downloading -> Extracting ->
//! Replacing -> Reconciling -> Rebuilding -> HealthChecking -> Finalizing.
//!
//! The replace stage is the only one that can leave the live tree partially
//! updated, so it is the only stage with a compensating action: a
//! best-effort reverse-replace from the run's own backup. Every outcome is
//! surfaced as a structured [`UpdateReport`]; the pipeline never takes the
//! host process down with it.

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::archive;
use crate::config::{UpdateConfig, VersionMarker};
use crate::download::Downloader;
use crate::error::UpdateError;
use crate::guard;
use crate::health;
use crate::progress::{Progress, ProgressFn};
use crate::release::{resolve_release, ReleaseSource};
use crate::replace::atomic_replace;
use crate::restart::{self, RestartSignal};
use crate::version;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStage {
    Guarding,
    Resolving,
    Comparing,
    Downloading,
    Extracting,
    Replacing,
    Reconciling,
    Rebuilding,
    HealthChecking,
    Finalizing,
}

impl UpdateStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Guarding => "guarding",
            Self::Resolving => "resolving",
            Self::Comparing => "comparing",
            Self::Downloading => "downloading",
            Self::Extracting => "extracting",
            Self::Replacing => "replacing",
            Self::Reconciling => "reconciling",
            Self::Rebuilding => "rebuilding",
            Self::HealthChecking => "health-checking",
            Self::Finalizing => "finalizing",
        }
    }
}

/// Terminal output of one update run.
#[derive(Debug, Clone)]
pub struct UpdateReport {
    pub success: bool,
    pub message: String,
    pub backup_path: Option<PathBuf>,
}

impl UpdateReport {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            backup_path: None,
        }
    }
}

/// One-shot update runner. Construct, optionally attach a progress sink and
/// a restart signal, then [`run`](Self::run).
pub struct UpdatePipeline {
    config: UpdateConfig,
    source: Arc<dyn ReleaseSource>,
    progress: Progress,
    restart: Option<RestartSignal>,
}

impl UpdatePipeline {
    pub fn new(config: UpdateConfig, source: Arc<dyn ReleaseSource>) -> Self {
        Self {
            config,
            source,
            progress: Progress::silent(),
            restart: Some(restart::exit_process_signal()),
        }
    }

    /// Attach the caller's progress sink.
    pub fn with_progress(mut self, sink: Box<ProgressFn>) -> Self {
        self.progress = Progress::new(Some(sink));
        self
    }

    /// Override or disable the restart signal. `None` means the caller
    /// handles restarting (or observing) itself.
    pub fn with_restart(mut self, restart: Option<RestartSignal>) -> Self {
        self.restart = restart;
        self
    }

    /// Run the full pipeline. Never panics the host; every failure comes
    /// back as a structured report.
    pub async fn run(self) -> UpdateReport {
        match self.run_inner().await {
            Ok(report) => report,
            Err(e) => UpdateReport {
                backup_path: e.backup_path().map(Path::to_path_buf),
                message: format!("❌ {e}"),
                success: false,
            },
        }
    }

    fn enter(&self, stage: UpdateStage) {
        debug!("entering stage: {}", stage.as_str());
    }

    async fn run_inner(&self) -> Result<UpdateReport, UpdateError> {
        let cfg = &self.config;

        self.enter(UpdateStage::Guarding);
        self.progress.report("📋 Checking working tree...");
        guard::working_tree_clean(&cfg.install_root).await?;
        self.progress.report("⏰ Checking upstream activity...");
        guard::commit_cooldown(self.source.as_ref(), cfg).await?;

        self.enter(UpdateStage::Resolving);
        self.progress.report("🔍 Fetching release index...");
        let releases = self
            .source
            .list_releases(&cfg.owner, &cfg.repo)
            .await
            .map_err(|e| UpdateError::ReleaseFetch(e.to_string()))?;

        let Some(release) = resolve_release(&releases, cfg.channel) else {
            return Ok(UpdateReport::failed("❌ No releases found"));
        };
        let release = release.clone();
        self.progress
            .report(&format!("📦 Found release: {}", release.tag_name));

        self.enter(UpdateStage::Comparing);
        let marker = VersionMarker::new(cfg.manifest_path());
        let old_manifest = marker.document().ok();
        let current_version = marker.read().unwrap_or_else(|e| {
            warn!("could not read version marker, assuming 0.0.0: {e}");
            "0.0.0".to_string()
        });

        let comparison = version::compare(&current_version, &release.tag_name);
        if !comparison.has_update {
            return Ok(UpdateReport::failed(format!(
                "✅ Already at the latest version: {current_version}"
            )));
        }
        let diff_note = comparison
            .diff
            .map(|d| format!(" ({} update)", d.as_str()))
            .unwrap_or_default();
        self.progress.report(&format!(
            "🔄 New version available: {}{diff_note} (current: {current_version})",
            release.tag_name
        ));

        self.enter(UpdateStage::Downloading);
        let asset = release
            .archive_asset()
            .ok_or_else(|| UpdateError::NoUsableAsset(release.tag_name.clone()))?;

        std::fs::create_dir_all(&cfg.temp_dir).map_err(|e| UpdateError::Download {
            attempts: 0,
            reason: format!("cannot create temp dir: {e}"),
        })?;
        let archive_path = cfg.temp_dir.join(&asset.name);
        let extract_dir = cfg
            .temp_dir
            .join(format!("extract-{}", chrono::Utc::now().timestamp_millis()));

        self.progress.report(&format!(
            "⬇️ Downloading {} ({:.2} MB)...",
            asset.name,
            asset.size as f64 / 1024.0 / 1024.0
        ));
        let last_percent = AtomicU8::new(0);
        let on_chunk = |done: u64, total: u64| {
            if total == 0 {
                return;
            }
            let percent = ((done * 100) / total).min(100) as u8;
            let prev = last_percent.load(Ordering::Relaxed);
            if percent != prev && (percent % 25 == 0 || percent == 100) {
                last_percent.store(percent, Ordering::Relaxed);
                self.progress.report(&format!("⬇️ Downloading: {percent}%"));
            }
        };
        // The release index publishes no digest; the checksum parameter is
        // an extension point for callers that have one.
        let downloader = Downloader::new(self.source.as_ref())
            .with_retries(cfg.max_download_retries, Duration::from_secs(1));
        let stats = downloader
            .download(&asset.browser_download_url, &archive_path, None, &on_chunk)
            .await?;

        if asset.size > 0 && stats.bytes != asset.size {
            let _ = std::fs::remove_file(&archive_path);
            return Err(UpdateError::SizeMismatch {
                expected: asset.size,
                actual: stats.bytes,
            });
        }

        self.enter(UpdateStage::Extracting);
        self.progress.report("📂 Extracting...");
        archive::extract(&archive_path, &extract_dir)?;
        let source_root = archive::effective_root(&extract_dir)?;

        self.enter(UpdateStage::Replacing);
        self.progress
            .report("🔄 Replacing files (atomic, with backup)...");
        let backup_dir = self.replace_with_rollback(&source_root, &current_version)?;

        self.enter(UpdateStage::Reconciling);
        self.reconcile_config(&source_root);
        self.reconcile_dependencies(old_manifest.as_ref(), &source_root)
            .await;

        self.enter(UpdateStage::Rebuilding);
        if let Some(build) = &cfg.build_command {
            self.progress.report("🔨 Rebuilding...");
            if let Err(e) = self
                .run_step_command(build, Duration::from_secs(120))
                .await
            {
                warn!("build failed (continuing): {e}");
            }
        }

        self.enter(UpdateStage::HealthChecking);
        self.progress.report("🏥 Running health check...");
        let missing = health::missing_critical_paths(&cfg.install_root, &cfg.critical_paths);
        if !missing.is_empty() {
            return Err(UpdateError::HealthCheck {
                missing,
                backup: Some(backup_dir),
            });
        }

        self.enter(UpdateStage::Finalizing);
        let new_version = release.version().to_string();
        if let Err(e) = marker.write(&new_version) {
            warn!("could not update version marker: {e}");
        } else {
            self.progress
                .report(&format!("✅ Version marker updated: {new_version}"));
        }

        self.cleanup_temp(&archive_path, &extract_dir);

        if let Some(signal) = &self.restart {
            self.progress.report(&format!(
                "✅ Update complete! Restarting in {}s...",
                cfg.restart_delay.as_secs()
            ));
            restart::schedule(cfg.restart_delay, Arc::clone(signal));
        }

        Ok(UpdateReport {
            success: true,
            message: format!("✅ Updated to {} successfully", release.tag_name),
            backup_path: Some(backup_dir),
        })
    }

    /// Replace stage with its compensating action: on failure, reverse-apply
    /// the partial backup before reporting. Rollback failure is appended to
    /// the original reason, never masking it.
    fn replace_with_rollback(
        &self,
        source_root: &Path,
        current_version: &str,
    ) -> Result<PathBuf, UpdateError> {
        let cfg = &self.config;
        match atomic_replace(
            source_root,
            &cfg.install_root,
            &cfg.protected_paths,
            &cfg.backups_dir,
            current_version,
        ) {
            Ok(backup_dir) => Ok(backup_dir),
            Err(UpdateError::Replace {
                mut reason,
                backup: Some(backup_dir),
            }) => {
                self.progress.report("⚠️ Replace failed, rolling back...");
                match atomic_replace(
                    &backup_dir,
                    &cfg.install_root,
                    &[],
                    &cfg.backups_dir,
                    "rollback",
                ) {
                    Ok(_) => self.progress.report("✅ Rollback complete"),
                    Err(rollback_err) => {
                        warn!("rollback failed: {rollback_err}");
                        reason = format!("{reason} (rollback also failed: {rollback_err})");
                    }
                }
                Err(UpdateError::Replace {
                    reason,
                    backup: Some(backup_dir),
                })
            }
            Err(other) => Err(other),
        }
    }

    /// Merge the shipped default config into the live config. Never fatal.
    fn reconcile_config(&self, source_root: &Path) {
        let cfg = &self.config;
        let shipped = source_root.join(&cfg.config_file);
        let live = cfg.install_root.join(&cfg.config_file);
        if !shipped.exists() || !live.exists() {
            return;
        }

        let merged = (|| -> anyhow::Result<()> {
            let live_doc: Value = serde_json::from_str(&std::fs::read_to_string(&live)?)?;
            let shipped_doc: Value = serde_json::from_str(&std::fs::read_to_string(&shipped)?)?;
            let merged = crate::config_merge::merge_config(&live_doc, &shipped_doc);
            std::fs::write(&live, serde_json::to_string_pretty(&merged)?)?;
            Ok(())
        })();

        match merged {
            Ok(()) => self
                .progress
                .report(&format!("✅ Merged {}", cfg.config_file)),
            Err(e) => warn!("could not merge {} (continuing): {e}", cfg.config_file),
        }
    }

    /// Reinstall dependencies when the manifest's dependency set changed and
    /// an install command is configured. Never fatal.
    async fn reconcile_dependencies(&self, old_manifest: Option<&Value>, source_root: &Path) {
        let cfg = &self.config;
        let Some(install) = &cfg.install_command else {
            return;
        };

        let new_manifest = VersionMarker::new(source_root.join(&cfg.manifest_file));
        let new_doc = match new_manifest.document() {
            Ok(doc) => doc,
            Err(_) => return,
        };

        let old_deps = old_manifest.and_then(|d| d.get("dependencies")).cloned();
        let new_deps = new_doc.get("dependencies").cloned();
        if old_deps == new_deps {
            return;
        }

        self.progress.report("📦 Installing dependencies...");
        match self.run_step_command(install, Duration::from_secs(300)).await {
            Ok(()) => self.progress.report("✅ Dependencies installed"),
            Err(e) => warn!("dependency install failed (continuing): {e}"),
        }
    }

    async fn run_step_command(&self, command: &str, timeout: Duration) -> anyhow::Result<()> {
        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.config.install_root)
            .output();

        let output = tokio::time::timeout(timeout, child)
            .await
            .map_err(|_| anyhow::anyhow!("command timed out: {command}"))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("command failed: {}", stderr.trim());
        }
        Ok(())
    }

    fn cleanup_temp(&self, archive_path: &Path, extract_dir: &Path) {
        if archive_path.exists() {
            if let Err(e) = std::fs::remove_file(archive_path) {
                warn!("could not remove downloaded archive: {e}");
            }
        }
        if extract_dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(extract_dir) {
                warn!("could not remove scratch directory: {e}");
            }
        }
    }
}
