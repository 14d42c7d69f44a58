//! Aura Updater - self-update pipeline for the Aura bot
//!
//! Resolves the newest published release for a channel, downloads and
//! verifies the packaged archive, atomically replaces the live installation
//! with a per-overwrite backup, reconciles local configuration, health-checks
//! the result and signals the supervisor to restart the process.
//!
//! Pipeline stages (each failure short-circuits the rest):
//! 1. working tree guard (no uncommitted local changes)
//! 2. commit cool-down guard (upstream head not younger than 5 minutes)
//! 3. release resolution (stable / beta channel)
//! 4. version comparison (early exit when already current)
//! 5. streamed download with retry and size verification
//! 6. archive extraction with single-root normalization
//! 7. atomic replace with protected paths and backup-per-overwrite
//! 8. config / dependency reconciliation (non-fatal)
//! 9. health check, rollback on failure
//! 10. version marker rewrite + restart signal (exit code 2)

pub mod archive;
pub mod config;
pub mod config_merge;
pub mod download;
pub mod error;
pub mod guard;
pub mod health;
pub mod pipeline;
pub mod progress;
pub mod release;
pub mod replace;
pub mod restart;
pub mod version;

pub use config::{Channel, UpdateConfig, VersionMarker};
pub use error::UpdateError;
pub use pipeline::{UpdatePipeline, UpdateReport, UpdateStage};
pub use progress::Progress;
pub use release::{Asset, FetchStats, GitHubSource, Release, ReleaseSource};
pub use restart::RESTART_EXIT_CODE;
