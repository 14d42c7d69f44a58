//! Pre-update guards.
//!
//! Both guards are best-effort: a machine without git, or an unreachable
//! commit endpoint, never blocks the update. Only positive evidence of a
//! dirty tree or a too-recent upstream commit does.

use chrono::Utc;
use std::path::Path;
use tracing::{debug, warn};

use crate::config::UpdateConfig;
use crate::error::UpdateError;
use crate::release::ReleaseSource;

/// Longest slice of `git status` output included in the failure message.
const STATUS_PREVIEW_BYTES: usize = 500;

/// Refuse to update over uncommitted local modifications. Not a git
/// checkout, or no git binary at all, counts as clean.
pub async fn working_tree_clean(install_root: &Path) -> Result<(), UpdateError> {
    let output = tokio::process::Command::new("git")
        .args(["status", "--porcelain"])
        .current_dir(install_root)
        .output()
        .await;

    match output {
        Ok(out) if out.status.success() => {
            let status = String::from_utf8_lossy(&out.stdout);
            let status = status.trim();
            if status.is_empty() {
                Ok(())
            } else {
                let mut end = STATUS_PREVIEW_BYTES.min(status.len());
                while !status.is_char_boundary(end) {
                    end -= 1;
                }
                Err(UpdateError::Guard(format!(
                    "working tree has uncommitted changes:\n{}",
                    &status[..end]
                )))
            }
        }
        _ => {
            debug!("git unavailable or not a repository, skipping working tree check");
            Ok(())
        }
    }
}

/// Refuse to update against an upstream head younger than the cool-down
/// window. Fail-open: an unreachable endpoint allows the update.
pub async fn commit_cooldown(
    source: &dyn ReleaseSource,
    config: &UpdateConfig,
) -> Result<(), UpdateError> {
    let head_time = match source
        .branch_head_time(&config.owner, &config.repo, &config.branch)
        .await
    {
        Ok(t) => t,
        Err(e) => {
            warn!("could not check upstream head, continuing: {e}");
            return Ok(());
        }
    };

    let cooldown = chrono::Duration::from_std(config.commit_cooldown)
        .unwrap_or_else(|_| chrono::Duration::minutes(5));
    let age = Utc::now().signed_duration_since(head_time);

    if age < cooldown {
        let remaining = cooldown - age;
        let minutes = remaining.num_minutes();
        let seconds = remaining.num_seconds() % 60;
        return Err(UpdateError::Guard(format!(
            "a commit just landed upstream; wait {minutes}m {seconds}s before updating"
        )));
    }

    Ok(())
}
