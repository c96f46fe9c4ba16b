//! Shutdown coordination.

use std::time::Duration;

use tokio::sync::broadcast;

use crate::invoker::ResilientInvoker;

/// Coordinator for graceful shutdown.
///
/// Provides a broadcast channel that all long-running tasks (admin server,
/// config watcher, load driver) subscribe to.
#[derive(Debug)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
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

/// Signal every task, then wait for in-flight and queued calls.
///
/// Returns `true` if the invoker went idle within `timeout`.
pub async fn shutdown_and_drain(
    shutdown: &Shutdown,
    invoker: &ResilientInvoker,
    timeout: Duration,
) -> bool {
    tracing::info!(
        listeners = shutdown.receiver_count(),
        drain_timeout_secs = timeout.as_secs(),
        "Shutdown triggered, draining"
    );
    shutdown.trigger();

    let drained = invoker.drain(timeout).await;
    let stats = invoker.admission().stats();
    if drained {
        tracing::info!(completed = stats.completed, failed = stats.failed, "Drain complete");
    } else {
        tracing::warn!(
            running = stats.running,
            queued = stats.queued,
            "Drain timed out with calls still in flight"
        );
    }
    drained
}
