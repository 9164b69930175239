//! User-facing progress output.

/// Where the builder reports progress to a human.
///
/// Kept separate from `tracing` logs: the host decides how to present these.
pub trait Ui: Send + Sync {
    /// A top-level progress line.
    fn say(&self, message: &str);

    /// Detail under the most recent `say`.
    fn message(&self, message: &str);

    fn error(&self, message: &str);
}

/// Ui that forwards everything to `tracing`, for headless hosts.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingUi;

impl Ui for TracingUi {
    fn say(&self, message: &str) {
        tracing::info!(target: "nimbus::ui", "{message}");
    }

    fn message(&self, message: &str) {
        tracing::info!(target: "nimbus::ui", "    {message}");
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "nimbus::ui", "{message}");
    }
}
