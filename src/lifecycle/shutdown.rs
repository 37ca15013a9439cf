//! Shutdown coordination for the server.

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Receiving half handed to long-running tasks.
pub type ShutdownSignal = watch::Receiver<bool>;

/// Coordinator for graceful shutdown.
///
/// Backed by a `watch` channel, so a task that subscribes after the trigger
/// still observes it. Clones share the same channel.
#[derive(Clone)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn subscribe(&self) -> ShutdownSignal {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the signal has been triggered, or once every
    /// coordinator handle is gone.
    pub async fn wait(mut rx: ShutdownSignal) {
        let _ = rx.wait_for(|triggered| *triggered).await;
    }

    /// Wait for a background task that is meant to run until shutdown.
    ///
    /// A task that panics, or returns before shutdown was requested,
    /// triggers shutdown. Returns `true` in that case.
    pub async fn supervise(&self, task: &'static str, handle: JoinHandle<()>) -> bool {
        let outcome = handle.await;
        let triggered = self.is_triggered();
        match outcome {
            Ok(()) if triggered => return false,
            Ok(()) => tracing::error!(task, "Background task exited before shutdown"),
            Err(e) => tracing::error!(task, error = %e, "Background task failed"),
        }
        self.trigger();
        true
    }

    /// Number of tasks still listening.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
