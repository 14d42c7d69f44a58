//! aura-update - one-shot CLI runner for the update pipeline.
//!
//! Exits 0 when already current or on a reported failure message, 1 on an
//! unexpected error, and with the restart code (2) after a successful
//! update so the supervisor relaunches the application.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use aura_updater::{
    Channel, GitHubSource, UpdateConfig, UpdatePipeline, RESTART_EXIT_CODE,
};

#[derive(Parser)]
#[command(name = "aura-update")]
#[command(about = "Self-update the Aura bot installation", version)]
struct Cli {
    /// Upstream repository owner
    #[arg(long)]
    owner: String,

    /// Upstream repository name
    #[arg(long)]
    repo: String,

    /// Release channel: stable or beta
    #[arg(long, default_value = "stable")]
    channel: Channel,

    /// Branch checked by the commit cool-down guard
    #[arg(long, default_value = "main")]
    branch: String,

    /// Root of the live installation
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Report success without signaling the supervisor to restart
    #[arg(long)]
    no_restart: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = UpdateConfig::new(cli.owner, cli.repo, cli.root).with_channel(cli.channel);
    config.branch = cli.branch;

    let source = Arc::new(GitHubSource::new()?);
    let report = UpdatePipeline::new(config, source)
        // The CLI signals the supervisor itself, below.
        .with_restart(None)
        .with_progress(Box::new(|msg: &str| println!("{msg}")))
        .run()
        .await;

    println!("{}", report.message);
    if let Some(backup) = &report.backup_path {
        println!("backup: {}", backup.display());
    }

    if report.success && !cli.no_restart {
        std::process::exit(RESTART_EXIT_CODE);
    }
    Ok(())
}
