//! Per-call context threaded through every layer.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Correlation and control data for one invocation.
///
/// Created by the invoker, cloned into each tier and each attempt. The raw
/// call receives the clone for the attempt it performs, so `target`,
/// `tier` and `attempt` always describe that attempt.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Logical operation name (for logs and metrics).
    pub operation: String,
    /// Correlation id for the whole invocation.
    pub request_id: String,
    /// Target the current attempt is sent to.
    pub target: String,
    /// Zero-based retry attempt within the current tier.
    pub attempt: u32,
    /// Zero-based position in the fallback route.
    pub tier: usize,
    deadline: Option<Instant>,
    cancellation: CancellationToken,
    started_at: Instant,
}

impl CallContext {
    pub fn new(
        operation: impl Into<String>,
        request_id: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            operation: operation.into(),
            request_id: request_id.into(),
            target: target.into(),
            attempt: 0,
            tier: 0,
            deadline: None,
            cancellation: CancellationToken::new(),
            started_at: Instant::now(),
        }
    }

    /// Bound the whole invocation (queueing included) by `timeout` from now.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(self.started_at + timeout);
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Context for a fallback tier: new target, attempt counter reset.
    pub fn for_target(&self, target: &str, tier: usize) -> Self {
        let mut ctx = self.clone();
        ctx.target = target.to_string();
        ctx.tier = tier;
        ctx.attempt = 0;
        ctx
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}
