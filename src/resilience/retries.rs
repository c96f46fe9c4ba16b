//! Retry logic.
//!
//! # Responsibilities
//! - Classify upstream failures as retryable or fatal
//! - Re-run the raw call with exponential backoff + jitter
//! - Bound attempts by `max_retries`; fatal errors consume no extra attempts
//!
//! Each call to [`retry`] is independent; nothing is shared between calls.

use std::future::Future;

use crate::config::schema::RetryConfig;
use crate::context::CallContext;
use crate::error::{InvokeError, UpstreamError, UpstreamErrorKind};
use crate::resilience::backoff::BackoffPolicy;
use crate::resilience::timeouts;

/// Whether a raw failure is worth another attempt.
///
/// Throttling, 5xx-class errors, timeouts and connection resets are
/// transient. Client and validation errors are not.
pub fn is_retryable_error(error: &UpstreamError) -> bool {
    matches!(
        error.kind(),
        UpstreamErrorKind::RateLimited
            | UpstreamErrorKind::Server
            | UpstreamErrorKind::Timeout
            | UpstreamErrorKind::ConnectionReset
    )
}

/// Retry settings resolved from a config snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: BackoffPolicy,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: if config.enabled { config.max_retries } else { 0 },
            backoff: BackoffPolicy::from_config(config),
        }
    }

    /// Single attempt, no backoff.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            backoff: BackoffPolicy::from_config(&RetryConfig::default()),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// A successful value plus the number of attempts it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

/// Run `call` until it succeeds, fails fatally, or the attempts run out.
///
/// The context handed to `call` carries the zero-based attempt number.
/// Every attempt and every backoff sleep is raced against the deadline and
/// cancellation token of `ctx`.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    ctx: &CallContext,
    call: &F,
) -> Result<Attempted<T>, InvokeError>
where
    F: Fn(CallContext) -> Fut,
    Fut: Future<Output = Result<T, UpstreamError>>,
{
    let mut attempt: u32 = 0;

    loop {
        let mut attempt_ctx = ctx.clone();
        attempt_ctx.attempt = attempt;

        let error = match timeouts::guard(ctx, call(attempt_ctx)).await? {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(
                        request_id = %ctx.request_id,
                        target = %ctx.target,
                        attempts = attempt + 1,
                        "Call succeeded after retry"
                    );
                }
                return Ok(Attempted {
                    value,
                    attempts: attempt + 1,
                });
            }
            Err(error) => error,
        };

        let attempts = attempt + 1;

        if !is_retryable_error(&error) {
            tracing::debug!(
                request_id = %ctx.request_id,
                target = %ctx.target,
                attempt,
                error = %error,
                "Fatal upstream error, not retrying"
            );
            return Err(InvokeError::Upstream {
                target: ctx.target.clone(),
                attempts,
                source: error,
            });
        }

        if attempt >= policy.max_retries {
            tracing::warn!(
                request_id = %ctx.request_id,
                target = %ctx.target,
                attempts,
                error = %error,
                "Retries exhausted"
            );
            return Err(InvokeError::Upstream {
                target: ctx.target.clone(),
                attempts,
                source: error,
            });
        }

        let delay = policy.backoff.calculate_backoff_delay(attempt);
        tracing::warn!(
            request_id = %ctx.request_id,
            operation = %ctx.operation,
            target = %ctx.target,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Retryable upstream error, backing off"
        );

        timeouts::sleep(ctx, delay).await?;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff: BackoffPolicy {
                base_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(1),
                jitter_percent: 0,
            },
        }
    }

    fn ctx() -> CallContext {
        CallContext::new("test", "req-1", "primary")
    }

    #[test]
    fn test_retryable_classification() {
        assert!(is_retryable_error(&UpstreamError::rate_limited("slow down")));
        assert!(is_retryable_error(&UpstreamError::server(503, "unavailable")));
        assert!(is_retryable_error(&UpstreamError::timeout("timed out")));
        assert!(is_retryable_error(&UpstreamError::from_code("ECONNRESET", "reset")));
        assert!(!is_retryable_error(&UpstreamError::client(400, "bad input")));
        assert!(!is_retryable_error(&UpstreamError::from_code("ValidationException", "bad")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let call = |ctx: CallContext| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                assert_eq!(ctx.attempt, n);
                if n < 2 {
                    Err(UpstreamError::server(500, "boom"))
                } else {
                    Ok("done")
                }
            }
        };

        let result = retry(&policy(3), &ctx(), &call).await.unwrap();
        assert_eq!(result.value, "done");
        assert_eq!(result.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_single_attempt() {
        let calls = AtomicU32::new(0);
        let call = |_ctx: CallContext| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(UpstreamError::client(422, "invalid")) }
        };

        let err = retry(&policy(5), &ctx(), &call).await.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        match err {
            InvokeError::Upstream { attempts, source, .. } => {
                assert_eq!(attempts, 1);
                assert_eq!(source.status(), Some(422));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_reports_attempts_and_waits() {
        let calls = AtomicU32::new(0);
        let call = |_ctx: CallContext| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(UpstreamError::rate_limited("throttled")) }
        };

        let start = tokio::time::Instant::now();
        let err = retry(&policy(2), &ctx(), &call).await.unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(err, InvokeError::Upstream { attempts: 3, .. }));
        // 100ms + 200ms of backoff
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_policy_is_one_attempt() {
        let config = RetryConfig {
            enabled: false,
            ..RetryConfig::default()
        };
        let calls = AtomicU32::new(0);
        let call = |_ctx: CallContext| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(UpstreamError::server(500, "boom")) }
        };

        let _ = retry(&RetryPolicy::from_config(&config), &ctx(), &call).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_backoff() {
        let token = CancellationToken::new();
        let ctx = ctx().with_cancellation(token.clone());
        let calls = AtomicU32::new(0);
        let call = |_ctx: CallContext| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(UpstreamError::server(503, "busy")) }
        };

        let long = RetryPolicy {
            max_retries: 10,
            backoff: BackoffPolicy {
                base_delay: Duration::from_secs(5),
                max_delay: Duration::from_secs(5),
                jitter_percent: 0,
            },
        };

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            token.cancel();
        });

        let err = retry(&long, &ctx, &call).await.unwrap_err();
        canceller.await.unwrap();
        assert!(matches!(err, InvokeError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
