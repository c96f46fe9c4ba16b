//! Deadline and cancellation enforcement.
//!
//! Every suspension point in the pipeline (queue wait, raw call, backoff
//! sleep) goes through [`guard`] or [`sleep`], so a caller-side deadline or
//! cancellation unwinds all layers promptly. Unwinding drops the layer
//! guards, which hand back queue and running slots.

use std::future::Future;
use std::time::Duration;

use tokio::time;

use crate::context::CallContext;
use crate::error::InvokeError;

/// Race `fut` against the call's cancellation token and deadline.
pub async fn guard<F>(ctx: &CallContext, fut: F) -> Result<F::Output, InvokeError>
where
    F: Future,
{
    let deadline = async {
        match ctx.deadline() {
            Some(at) => time::sleep_until(at).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        biased;
        _ = ctx.cancellation().cancelled() => Err(InvokeError::Cancelled),
        _ = deadline => Err(InvokeError::DeadlineExceeded { elapsed: ctx.elapsed() }),
        output = fut => Ok(output),
    }
}

/// Sleep for `delay` unless the call is cancelled or its deadline hits first.
pub async fn sleep(ctx: &CallContext, delay: Duration) -> Result<(), InvokeError> {
    guard(ctx, time::sleep(delay)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    #[tokio::test(start_paused = true)]
    async fn test_guard_passes_output_through() {
        let ctx = CallContext::new("op", "req", "t");
        let out = guard(&ctx, async { 7 }).await.unwrap();
        assert_eq!(out, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_interrupts_sleep() {
        let ctx = CallContext::new("op", "req", "t").with_timeout(Duration::from_millis(50));
        let err = sleep(&ctx, Duration::from_secs(10)).await.unwrap_err();
        assert!(matches!(err, InvokeError::DeadlineExceeded { .. }));
        assert!(ctx.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_absolute_deadline_bounds_guard() {
        let deadline = time::Instant::now() + Duration::from_millis(30);
        let ctx = CallContext::new("op", "req", "t").with_deadline(deadline);

        let err = guard(&ctx, time::sleep(Duration::from_secs(5))).await.unwrap_err();
        assert!(matches!(err, InvokeError::DeadlineExceeded { .. }));
        assert_eq!(ctx.deadline(), Some(deadline));
        assert!(time::Instant::now() < deadline + Duration::from_millis(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start() {
        let token = CancellationToken::new();
        token.cancel();
        let ctx = CallContext::new("op", "req", "t").with_cancellation(token);

        let err = guard(&ctx, async { 1 }).await.unwrap_err();
        assert!(matches!(err, InvokeError::Cancelled));
    }
}
