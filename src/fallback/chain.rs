//! Ordered fallback chain.

use std::future::Future;

use crate::config::schema::{FallbackConfig, FallbackTier};
use crate::context::CallContext;
use crate::error::{InvokeError, TierFailure};

/// Result of a chain execution that found a working tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackOutcome<T> {
    pub value: T,
    /// True when a tier other than the starting target answered.
    pub used_fallback: bool,
    /// Target that produced `value`.
    pub model_id: String,
    /// Targets that failed before `model_id`, in the order tried.
    pub failed_models: Vec<String>,
}

impl<T> FallbackOutcome<T> {
    /// Outcome for a call that went straight to its target.
    pub fn direct(value: T, model_id: impl Into<String>) -> Self {
        Self {
            value,
            used_fallback: false,
            model_id: model_id.into(),
            failed_models: Vec::new(),
        }
    }
}

/// Static list of tiers, ordered by ascending priority.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FallbackChain {
    tiers: Vec<FallbackTier>,
}

impl FallbackChain {
    /// Build a chain; tiers are sorted by priority (stable for ties).
    pub fn new(mut tiers: Vec<FallbackTier>) -> Self {
        tiers.sort_by_key(|tier| tier.priority);
        Self { tiers }
    }

    pub fn from_config(config: &FallbackConfig) -> Self {
        Self::new(config.tiers.clone())
    }

    pub fn tiers(&self) -> &[FallbackTier] {
        &self.tiers
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// Targets to try, in order, for a call that starts at `start`.
    ///
    /// A configured start target resumes the chain at its own position. An
    /// unknown start target is tried first, followed by the whole chain.
    pub fn route_from(&self, start: &str) -> Vec<String> {
        match self.tiers.iter().position(|tier| tier.target_id == start) {
            Some(pos) => self.tiers[pos..]
                .iter()
                .map(|tier| tier.target_id.clone())
                .collect(),
            None => std::iter::once(start.to_string())
                .chain(self.tiers.iter().map(|tier| tier.target_id.clone()))
                .collect(),
        }
    }

    /// Try each target on the route until one succeeds.
    ///
    /// Tiers run strictly one after another. Caller cancellation or an
    /// expired deadline ends the chain immediately with that error.
    pub async fn execute_with_fallback<T, F, Fut>(
        &self,
        start: &str,
        ctx: &CallContext,
        mut tier_call: F,
    ) -> Result<FallbackOutcome<T>, InvokeError>
    where
        F: FnMut(CallContext) -> Fut,
        Fut: Future<Output = Result<T, InvokeError>>,
    {
        let route = self.route_from(start);
        let mut failures: Vec<TierFailure> = Vec::new();

        for (tier, target) in route.iter().enumerate() {
            let tier_ctx = ctx.for_target(target, tier);

            match tier_call(tier_ctx).await {
                Ok(value) => {
                    if tier > 0 {
                        tracing::info!(
                            request_id = %ctx.request_id,
                            operation = %ctx.operation,
                            target = %target,
                            tier,
                            "Fallback tier succeeded"
                        );
                    }
                    return Ok(FallbackOutcome {
                        value,
                        used_fallback: tier > 0,
                        model_id: target.clone(),
                        failed_models: failures.into_iter().map(|f| f.target_id).collect(),
                    });
                }
                Err(error) if error.is_cancellation() => return Err(error),
                Err(error) => {
                    match route.get(tier + 1) {
                        Some(next) => tracing::warn!(
                            request_id = %ctx.request_id,
                            operation = %ctx.operation,
                            target = %target,
                            next = %next,
                            tier,
                            error = %error,
                            "Tier failed, trying next tier"
                        ),
                        None => tracing::warn!(
                            request_id = %ctx.request_id,
                            operation = %ctx.operation,
                            target = %target,
                            tier,
                            error = %error,
                            "Last tier failed"
                        ),
                    }
                    failures.push(TierFailure {
                        tier,
                        target_id: target.clone(),
                        error,
                    });
                }
            }
        }

        tracing::error!(
            request_id = %ctx.request_id,
            operation = %ctx.operation,
            tiers = failures.len(),
            "Fallback chain exhausted"
        );
        Err(InvokeError::FallbackExhausted { failures })
    }
}
