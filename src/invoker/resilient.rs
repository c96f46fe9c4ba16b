//! The composition root.
//!
//! ```text
//! invoke(call, options)
//!     → admission.schedule            (QueueFull before anything else)
//!         → fallback chain            (one tier at a time)
//!             → breaker[tier target]  (CircuitOpen without calling)
//!                 → retry + backoff
//!                     → call(ctx)
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::admission::AdmissionController;
use crate::config::{validate_config, ConfigError, ResilienceConfig};
use crate::context::CallContext;
use crate::error::{InvokeError, UpstreamError};
use crate::fallback::{FallbackChain, FallbackOutcome};
use crate::invoker::options::{Invocation, InvocationMetadata, InvokeOptions};
use crate::invoker::status::ResilienceStatus;
use crate::observability::metrics::{
    MetricsSink, PrometheusSink, CALLS_TOTAL, CALL_DURATION_SECONDS, FALLBACK_TOTAL,
    REJECTIONS_TOTAL, RETRIES_TOTAL,
};
use crate::resilience::{retry, Attempted, CircuitBreakerRegistry, RetryPolicy};

/// Resilient invocation pipeline.
///
/// Owns one admission controller, one breaker per target and the fallback
/// chain. Share it behind an `Arc`.
pub struct ResilientInvoker {
    config: ArcSwap<ResilienceConfig>,
    admission: AdmissionController,
    breakers: CircuitBreakerRegistry,
    chain: ArcSwap<FallbackChain>,
    metrics: Arc<dyn MetricsSink>,
}

impl ResilientInvoker {
    /// Build an invoker reporting to the global `metrics` recorder.
    pub fn new(config: ResilienceConfig) -> Result<Self, ConfigError> {
        Self::with_metrics(config, Arc::new(PrometheusSink))
    }

    pub fn with_metrics(
        config: ResilienceConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, ConfigError> {
        validate_config(&config).map_err(ConfigError::Validation)?;

        Ok(Self {
            admission: AdmissionController::new(config.bottleneck.clone()),
            breakers: CircuitBreakerRegistry::new(config.circuit_breaker.clone()),
            chain: ArcSwap::from_pointee(FallbackChain::from_config(&config.fallback)),
            config: ArcSwap::from_pointee(config),
            metrics,
        })
    }

    /// Run `call` through admission, fallback, circuit breaker and retry.
    ///
    /// `call` is invoked once per attempt with a context naming the target,
    /// tier and attempt it should perform.
    pub async fn invoke<T, F, Fut>(
        &self,
        call: F,
        options: InvokeOptions,
    ) -> Result<Invocation<T>, InvokeError>
    where
        F: Fn(CallContext) -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let config = self.config.load_full();
        let request_id = options
            .request_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut ctx = CallContext::new(&options.operation, &request_id, &options.target_id);
        if let Some(timeout) = options.timeout {
            ctx = ctx.with_timeout(timeout);
        }
        if let Some(token) = &options.cancellation {
            ctx = ctx.with_cancellation(token.clone());
        }

        let span = tracing::info_span!(
            "invoke",
            request_id = %request_id,
            operation = %options.operation,
            target = %options.target_id,
        );

        let started = Instant::now();
        let attempts = AtomicU32::new(0);
        let result = self
            .admission
            .schedule(&ctx, self.run_tiers(&config, &options, &ctx, &call, &attempts))
            .instrument(span)
            .await;
        let latency = started.elapsed();

        self.record_metrics(&options.operation, &result, latency);

        let outcome = result?;
        tracing::debug!(
            request_id = %request_id,
            operation = %options.operation,
            model_id = %outcome.model_id,
            used_fallback = outcome.used_fallback,
            latency_ms = latency.as_millis() as u64,
            "Invocation succeeded"
        );

        Ok(Invocation {
            value: outcome.value,
            metadata: InvocationMetadata {
                request_id,
                operation: options.operation,
                model_id: outcome.model_id,
                used_fallback: outcome.used_fallback,
                failed_models: outcome.failed_models,
                attempts: attempts.load(Ordering::Relaxed),
                latency_ms: latency.as_millis() as u64,
            },
        })
    }

    async fn run_tiers<T, F, Fut>(
        &self,
        config: &ResilienceConfig,
        options: &InvokeOptions,
        ctx: &CallContext,
        call: &F,
        attempts: &AtomicU32,
    ) -> Result<FallbackOutcome<T>, InvokeError>
    where
        F: Fn(CallContext) -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let policy = RetryPolicy::from_config(&config.retry);
        let use_breaker = options.enable_circuit_breaker;
        let policy = &policy;

        let tier_call = move |tier_ctx: CallContext| async move {
            let result = self.call_tier(policy, use_breaker, &tier_ctx, call).await;
            self.record_tier(&tier_ctx, &result, attempts);
            result.map(|attempted| attempted.value)
        };

        if config.fallback.enabled && options.enable_fallback {
            let chain = self.chain.load_full();
            chain
                .execute_with_fallback(&options.target_id, ctx, tier_call)
                .await
        } else {
            let target = options.target_id.as_str();
            let value = tier_call(ctx.for_target(target, 0)).await?;
            Ok(FallbackOutcome::direct(value, target))
        }
    }

    async fn call_tier<T, F, Fut>(
        &self,
        policy: &RetryPolicy,
        use_breaker: bool,
        ctx: &CallContext,
        call: &F,
    ) -> Result<Attempted<T>, InvokeError>
    where
        F: Fn(CallContext) -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        if !use_breaker {
            return retry(policy, ctx, call).await;
        }
        let breaker = self.breakers.get_or_create(&ctx.target);
        breaker.execute(ctx, || retry(policy, ctx, call)).await
    }

    fn record_tier<T>(
        &self,
        ctx: &CallContext,
        result: &Result<Attempted<T>, InvokeError>,
        attempts: &AtomicU32,
    ) {
        let made = match result {
            Ok(attempted) => attempted.attempts,
            Err(InvokeError::Upstream { attempts, .. }) => *attempts,
            Err(InvokeError::CircuitOpen { .. }) => {
                self.metrics
                    .increment_counter(REJECTIONS_TOTAL, &[("reason", "circuit_open".to_string())]);
                0
            }
            Err(_) => 0,
        };

        attempts.fetch_add(made, Ordering::Relaxed);
        for _ in 1..made {
            self.metrics
                .increment_counter(RETRIES_TOTAL, &[("target", ctx.target.clone())]);
        }
    }

    fn record_metrics<T>(
        &self,
        operation: &str,
        result: &Result<FallbackOutcome<T>, InvokeError>,
        latency: Duration,
    ) {
        let outcome = match result {
            Ok(_) => "success",
            Err(InvokeError::QueueFull { .. }) => {
                self.metrics
                    .increment_counter(REJECTIONS_TOTAL, &[("reason", "queue_full".to_string())]);
                "queue_full"
            }
            Err(error) => outcome_label(error),
        };

        let tried: Vec<&str> = match result {
            Ok(done) => done
                .failed_models
                .iter()
                .map(String::as_str)
                .chain(std::iter::once(done.model_id.as_str()))
                .collect(),
            Err(error) => error.failures().iter().map(|f| f.target_id.as_str()).collect(),
        };
        for hop in tried.windows(2) {
            self.metrics.increment_counter(
                FALLBACK_TOTAL,
                &[("from", hop[0].to_string()), ("to", hop[1].to_string())],
            );
        }

        self.metrics.increment_counter(
            CALLS_TOTAL,
            &[("operation", operation.to_string()), ("outcome", outcome.to_string())],
        );
        self.metrics.record_latency(
            CALL_DURATION_SECONDS,
            latency,
            &[("operation", operation.to_string())],
        );
    }

    /// Validate and apply a new configuration to every layer.
    pub fn reload(&self, config: ResilienceConfig) -> Result<(), ConfigError> {
        validate_config(&config).map_err(ConfigError::Validation)?;

        self.admission.reload(config.bottleneck.clone());
        self.breakers.reload(config.circuit_breaker.clone());
        self.chain
            .store(Arc::new(FallbackChain::from_config(&config.fallback)));

        tracing::info!(
            max_concurrent = config.bottleneck.max_concurrent,
            max_queue = config.bottleneck.max_queue,
            threshold = config.circuit_breaker.threshold,
            max_retries = config.retry.max_retries,
            tiers = config.fallback.tiers.len(),
            "Configuration reloaded"
        );
        self.config.store(Arc::new(config));
        Ok(())
    }

    pub fn resilience_status(&self) -> ResilienceStatus {
        let config = self.config.load();
        ResilienceStatus {
            bottleneck: self.admission.stats(),
            circuit_breakers: self.breakers.all_stats(),
            open_circuits: self.breakers.open_circuits(),
            fallback_enabled: config.fallback.enabled,
            fallback_tiers: self.chain.load().tiers().to_vec(),
        }
    }

    /// Trip the breaker for `target`, creating it if needed.
    pub fn force_open(&self, target: &str, reason: &str) {
        self.breakers.get_or_create(target).force_open(reason);
    }

    /// Close the breaker for `target`. Returns `false` for an unknown target.
    pub fn reset_circuit(&self, target: &str) -> bool {
        match self.breakers.get(target) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    /// Wait for queued and running calls. Returns `false` on timeout.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.admission.drain(timeout).await
    }

    pub fn config(&self) -> Arc<ResilienceConfig> {
        self.config.load_full()
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn chain(&self) -> Arc<FallbackChain> {
        self.chain.load_full()
    }
}

fn outcome_label(error: &InvokeError) -> &'static str {
    match error {
        InvokeError::QueueFull { .. } => "queue_full",
        InvokeError::CircuitOpen { .. } => "circuit_open",
        InvokeError::FallbackExhausted { .. } => "fallback_exhausted",
        InvokeError::Upstream { .. } => "upstream_error",
        InvokeError::DeadlineExceeded { .. } => "deadline_exceeded",
        InvokeError::Cancelled => "cancelled",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::FallbackTier;

    fn config() -> ResilienceConfig {
        let mut config = ResilienceConfig::default();
        config.retry.base_delay_ms = 10;
        config.retry.max_delay_ms = 100;
        config.retry.max_retries = 2;
        config.fallback.tiers = vec![
            FallbackTier::new("primary", "model-a", 0),
            FallbackTier::new("fallback", "model-b", 1),
        ];
        config
    }

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let mut bad = config();
        bad.bottleneck.max_concurrent = 0;
        assert!(matches!(
            ResilientInvoker::new(bad),
            Err(ConfigError::Validation(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_metadata_for_direct_success() {
        let invoker = ResilientInvoker::new(config()).unwrap();
        let result = invoker
            .invoke(
                |ctx: CallContext| async move { Ok::<_, UpstreamError>(ctx.target) },
                InvokeOptions::new("summarize", "model-a").with_request_id("req-42"),
            )
            .await
            .unwrap();

        assert_eq!(result.value, "model-a");
        assert_eq!(result.metadata.request_id, "req-42");
        assert_eq!(result.metadata.operation, "summarize");
        assert_eq!(result.metadata.model_id, "model-a");
        assert!(!result.metadata.used_fallback);
        assert_eq!(result.metadata.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generates_request_id() {
        let invoker = ResilientInvoker::new(config()).unwrap();
        let result = invoker
            .invoke(
                |_ctx: CallContext| async { Ok::<_, UpstreamError>(()) },
                InvokeOptions::new("op", "model-a"),
            )
            .await
            .unwrap();
        assert!(Uuid::parse_str(&result.metadata.request_id).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_without_fallback_returns_tier_error() {
        let invoker = ResilientInvoker::new(config()).unwrap();
        let err = invoker
            .invoke(
                |_ctx: CallContext| async { Err::<(), _>(UpstreamError::client(400, "bad")) },
                InvokeOptions::new("op", "model-a").without_fallback(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.code(), "UPSTREAM_ERROR");
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_swaps_chain_and_limits() {
        let invoker = ResilientInvoker::new(config()).unwrap();
        let mut next = config();
        next.bottleneck.max_concurrent = 4;
        next.fallback.tiers.push(FallbackTier::new("emergency", "model-c", 2));
        invoker.reload(next).unwrap();

        let status = invoker.resilience_status();
        assert_eq!(status.bottleneck.max_concurrent, 4);
        assert_eq!(status.fallback_tiers.len(), 3);
        assert_eq!(invoker.chain().route_from("model-b"), vec!["model-b", "model-c"]);

        let mut bad = config();
        bad.retry.jitter_percent = 101;
        assert!(invoker.reload(bad).is_err());
        assert_eq!(invoker.config().bottleneck.max_concurrent, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_open_and_reset_circuit() {
        let invoker = ResilientInvoker::new(config()).unwrap();
        assert!(!invoker.reset_circuit("model-a"));

        invoker.force_open("model-a", "maintenance");
        assert_eq!(invoker.resilience_status().open_circuits, vec!["model-a"]);
        assert!(invoker.reset_circuit("model-a"));
        assert!(invoker.resilience_status().open_circuits.is_empty());
    }
}
