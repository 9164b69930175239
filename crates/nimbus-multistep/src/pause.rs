//! Debug pause points between steps.

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};

use crate::state::StateBag;

/// Suspends the pipeline after a step until an operator resumes it.
#[async_trait]
pub trait Pause: Send + Sync {
    /// Block until the run may continue past `step`.
    async fn pause(&self, step: &str, state: &StateBag);
}

/// Pause handler resumed programmatically through a [`ResumeHandle`].
pub struct ChannelPause {
    paused_tx: mpsc::UnboundedSender<String>,
    resume_rx: Mutex<mpsc::UnboundedReceiver<()>>,
}

/// Control side of a [`ChannelPause`].
pub struct ResumeHandle {
    paused_rx: mpsc::UnboundedReceiver<String>,
    resume_tx: mpsc::UnboundedSender<()>,
}

impl ChannelPause {
    /// Create a connected pause handler and resume handle.
    pub fn channel() -> (ChannelPause, ResumeHandle) {
        let (paused_tx, paused_rx) = mpsc::unbounded_channel();
        let (resume_tx, resume_rx) = mpsc::unbounded_channel();
        (
            ChannelPause {
                paused_tx,
                resume_rx: Mutex::new(resume_rx),
            },
            ResumeHandle {
                paused_rx,
                resume_tx,
            },
        )
    }
}

#[async_trait]
impl Pause for ChannelPause {
    async fn pause(&self, step: &str, _state: &StateBag) {
        tracing::debug!(step, "paused, waiting for resume");
        let _ = self.paused_tx.send(step.to_string());
        // A dropped handle can never resume us, so treat it as a resume.
        let _ = self.resume_rx.lock().await.recv().await;
    }
}

impl ResumeHandle {
    /// Wait for the next pause and return the name of the step it follows.
    ///
    /// Returns `None` once the pause handler has been dropped.
    pub async fn next_pause(&mut self) -> Option<String> {
        self.paused_rx.recv().await
    }

    /// Let the paused run continue.
    pub fn resume(&self) {
        let _ = self.resume_tx.send(());
    }
}
