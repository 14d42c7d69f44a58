//! Restart signal.
//!
//! The pipeline never relaunches anything itself. It exits with a
//! distinguished status code that the external supervisor interprets as
//! "relaunch me", delayed slightly so the success message reaches the user
//! first. The signal is injectable so embedding applications and tests can
//! observe it instead of exiting.

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Exit status the process supervisor treats as a restart request.
pub const RESTART_EXIT_CODE: i32 = 2;

/// Invoked by the pipeline's finalizing stage.
pub type RestartSignal = Arc<dyn Fn() + Send + Sync>;

/// The default signal: terminate with the restart-requesting exit code.
pub fn exit_process_signal() -> RestartSignal {
    Arc::new(|| std::process::exit(RESTART_EXIT_CODE))
}

/// Fire `signal` after `delay` without blocking the caller.
pub fn schedule(delay: Duration, signal: RestartSignal) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        info!("signaling supervisor for restart");
        signal();
    });
}
