//! Synthetic upstream and load driver.
//!
//! Used by the service binary's `--simulate-rps` mode to push traffic
//! through the pipeline without a real backend.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};

use crate::context::CallContext;
use crate::error::UpstreamError;
use crate::invoker::{InvokeOptions, ResilientInvoker};

/// A flaky upstream with configurable failure rates.
#[derive(Debug)]
pub struct SimulatedUpstream {
    /// Probability of a transient (retryable) failure.
    pub failure_rate: f64,
    /// Probability of a fatal client error.
    pub fatal_rate: f64,
    pub latency: Duration,
    calls: AtomicU64,
}

impl SimulatedUpstream {
    pub fn new(failure_rate: f64, fatal_rate: f64, latency: Duration) -> Self {
        Self {
            failure_rate: failure_rate.clamp(0.0, 1.0),
            fatal_rate: fatal_rate.clamp(0.0, 1.0),
            latency,
            calls: AtomicU64::new(0),
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// One raw call. Latency is jittered by up to ±50%.
    pub async fn call(&self, ctx: CallContext) -> Result<String, UpstreamError> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        let factor = 0.5 + fastrand::f64();
        tokio::time::sleep(self.latency.mul_f64(factor)).await;

        let roll = fastrand::f64();
        if roll < self.fatal_rate {
            return Err(
                UpstreamError::from_code("ValidationException", "simulated bad request")
                    .with_status(400),
            );
        }
        if roll < self.fatal_rate + self.failure_rate {
            return Err(match fastrand::u8(0..3) {
                0 => UpstreamError::rate_limited("simulated throttling"),
                1 => UpstreamError::server(503, "simulated outage"),
                _ => UpstreamError::timeout("simulated timeout"),
            });
        }

        Ok(format!("{} answered {} (attempt {})", ctx.target, ctx.request_id, ctx.attempt))
    }
}

/// Fire `rps` invocations per second at `target` until shutdown.
pub async fn run_load(
    invoker: Arc<ResilientInvoker>,
    upstream: Arc<SimulatedUpstream>,
    rps: u32,
    target: String,
    mut shutdown: broadcast::Receiver<()>,
) {
    if rps == 0 {
        return;
    }

    let mut ticker = interval(Duration::from_secs(1) / rps);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tracing::info!(rps, target = %target, "Simulated load started");

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {
                let invoker = invoker.clone();
                let upstream = upstream.clone();
                let options = InvokeOptions::new("simulate", target.clone());

                tokio::spawn(async move {
                    let call = |ctx: CallContext| {
                        let upstream = upstream.clone();
                        async move { upstream.call(ctx).await }
                    };
                    match invoker.invoke(call, options).await {
                        Ok(result) => tracing::debug!(
                            request_id = %result.metadata.request_id,
                            model_id = %result.metadata.model_id,
                            used_fallback = result.metadata.used_fallback,
                            attempts = result.metadata.attempts,
                            "Simulated call succeeded"
                        ),
                        Err(e) => tracing::warn!(
                            code = e.code(),
                            status = e.status_code(),
                            error = %e,
                            "Simulated call failed"
                        ),
                    }
                });
            }
        }
    }

    tracing::info!(calls = upstream.calls(), "Simulated load stopped");
}
