//! Error taxonomy for the update pipeline.
//!
//! Stages up to and including extraction abort with no side effects beyond
//! temp files. The replace stage is the only one that can leave the live
//! tree partially updated, so its error carries the backup directory the
//! orchestrator uses for the compensating rollback. "Already up to date" and
//! "no releases found" are terminal results, not errors.

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpdateError {
    /// Dirty working tree or too-recent upstream commit. Recoverable, the
    /// user retries later.
    #[error("{0}")]
    Guard(String),

    /// Transport or HTTP failure while querying the release index.
    #[error("failed to fetch releases: {0}")]
    ReleaseFetch(String),

    /// The resolved release carries no archive we can install.
    #[error("release {0} has no .zip or .tar.gz asset")]
    NoUsableAsset(String),

    /// Download failed after exhausting the retry budget.
    #[error("download failed after {attempts} attempts: {reason}")]
    Download { attempts: u32, reason: String },

    /// Downloaded file size does not match the asset's declared size.
    #[error("file size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// Missing or corrupt archive. Fatal for the run.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// Filesystem error mid-mirror. The backup directory, when present,
    /// holds every file overwritten before the failure.
    #[error("replace failed: {reason}")]
    Replace {
        reason: String,
        backup: Option<PathBuf>,
    },

    /// Critical files missing after the replace completed.
    #[error("missing critical files after update: {}", missing.join(", "))]
    HealthCheck {
        missing: Vec<String>,
        backup: Option<PathBuf>,
    },
}

impl UpdateError {
    /// Backup directory usable for rollback, when this failure left one.
    pub fn backup_path(&self) -> Option<&Path> {
        match self {
            Self::Replace { backup, .. } | Self::HealthCheck { backup, .. } => {
                backup.as_deref()
            }
            _ => None,
        }
    }
}
