//! Progress sink - human-readable milestones for the caller.
//!
//! The host (a chat command handler, typically) supplies a callback that
//! relays status lines back to the user. Every milestone is also logged.

use tracing::info;

/// Callback receiving pipeline milestone strings.
pub type ProgressFn = dyn Fn(&str) + Send + Sync;

/// Wraps an optional caller-supplied sink; always logs via tracing.
pub struct Progress {
    sink: Option<Box<ProgressFn>>,
}

impl Progress {
    pub fn new(sink: Option<Box<ProgressFn>>) -> Self {
        Self { sink }
    }

    /// Log-only progress, no caller callback.
    pub fn silent() -> Self {
        Self { sink: None }
    }

    pub fn report(&self, message: &str) {
        info!("{message}");
        if let Some(sink) = &self.sink {
            sink(message);
        }
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::silent()
    }
}
