//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use resilient_invoker::config::FallbackTier;
use resilient_invoker::observability::MetricsSink;
use resilient_invoker::{CallContext, ResilienceConfig, UpstreamError};

/// Configuration with short delays, suited to paused-time tests.
pub fn test_config() -> ResilienceConfig {
    let mut config = ResilienceConfig::default();
    config.bottleneck.max_concurrent = 3;
    config.bottleneck.max_queue = 5;
    config.circuit_breaker.threshold = 3;
    config.circuit_breaker.time_window_ms = 1000;
    config.circuit_breaker.cooldown_ms = 100;
    config.retry.max_retries = 2;
    config.retry.base_delay_ms = 10;
    config.retry.max_delay_ms = 100;
    config.retry.jitter_percent = 0;
    config
}

pub fn three_tiers() -> Vec<FallbackTier> {
    vec![
        FallbackTier::new("primary", "model-a", 0),
        FallbackTier::new("fallback", "model-b", 1),
        FallbackTier::new("emergency", "model-c", 2),
    ]
}

pub type CallFuture = BoxFuture<'static, Result<String, UpstreamError>>;

/// Programmable upstream: per-target scripted outcomes plus a call log.
///
/// Targets without a script (or with an exhausted one) answer with their
/// default outcome, which is success unless set with [`always`](Self::always).
pub struct ScriptedUpstream {
    latency: Duration,
    scripts: Mutex<HashMap<String, VecDeque<Result<(), UpstreamError>>>>,
    defaults: Mutex<HashMap<String, UpstreamError>>,
    log: Mutex<Vec<(String, u32)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedUpstream {
    pub fn new(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency,
            scripts: Mutex::new(HashMap::new()),
            defaults: Mutex::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    /// Queue outcomes for `target`, consumed one per call.
    pub fn script(&self, target: &str, outcomes: Vec<Result<(), UpstreamError>>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(target.to_string())
            .or_default()
            .extend(outcomes);
    }

    /// Make every unscripted call to `target` fail with `error`.
    pub fn always(&self, target: &str, error: UpstreamError) {
        self.defaults.lock().unwrap().insert(target.to_string(), error);
    }

    pub async fn call(&self, ctx: CallContext) -> Result<String, UpstreamError> {
        self.log.lock().unwrap().push((ctx.target.clone(), ctx.attempt));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&ctx.target)
            .and_then(VecDeque::pop_front);
        let outcome = match scripted {
            Some(outcome) => outcome,
            None => match self.defaults.lock().unwrap().get(&ctx.target) {
                Some(error) => Err(error.clone()),
                None => Ok(()),
            },
        };

        outcome.map(|()| format!("{}:{}", ctx.target, ctx.request_id))
    }

    /// Closure suitable for `ResilientInvoker::invoke`.
    pub fn caller(
        self: &Arc<Self>,
    ) -> impl Fn(CallContext) -> CallFuture + Send + Sync + 'static {
        let upstream = self.clone();
        move |ctx: CallContext| -> CallFuture {
            let upstream = upstream.clone();
            Box::pin(async move { upstream.call(ctx).await })
        }
    }

    /// Targets called, in order.
    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().iter().map(|(t, _)| t.clone()).collect()
    }

    pub fn call_count(&self) -> usize {
        self.log.lock().unwrap().len()
    }

    pub fn calls_to(&self, target: &str) -> usize {
        self.log.lock().unwrap().iter().filter(|(t, _)| t == target).count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

/// Metrics sink that keeps every counter increment.
#[derive(Default)]
pub struct RecordingMetrics {
    counters: Mutex<Vec<(&'static str, Vec<(&'static str, String)>)>>,
    latencies: Mutex<Vec<(&'static str, Duration)>>,
}

impl RecordingMetrics {
    /// Increments of `name` whose labels include every pair in `labels`.
    pub fn count(&self, name: &str, labels: &[(&str, &str)]) -> usize {
        self.counters
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, have)| {
                *n == name
                    && labels
                        .iter()
                        .all(|(k, v)| have.iter().any(|(hk, hv)| hk == k && hv == v))
            })
            .count()
    }

    pub fn latency_samples(&self, name: &str) -> usize {
        self.latencies.lock().unwrap().iter().filter(|(n, _)| *n == name).count()
    }
}

impl MetricsSink for RecordingMetrics {
    fn increment_counter(&self, name: &'static str, labels: &[(&'static str, String)]) {
        self.counters.lock().unwrap().push((name, labels.to_vec()));
    }

    fn record_latency(
        &self,
        name: &'static str,
        duration: Duration,
        _labels: &[(&'static str, String)],
    ) {
        self.latencies.lock().unwrap().push((name, duration));
    }
}
