//! Per-call options and result types.

use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// Options for a single [`invoke`](crate::ResilientInvoker::invoke) call.
///
/// Per-call switches can only narrow what the configuration enables.
#[derive(Debug, Clone)]
pub struct InvokeOptions {
    pub operation: String,
    /// Correlation id; a UUID v4 is generated when absent.
    pub request_id: Option<String>,
    /// Target the call starts at.
    pub target_id: String,
    pub enable_fallback: bool,
    pub enable_circuit_breaker: bool,
    /// Bound on the whole invocation, queueing included.
    pub timeout: Option<Duration>,
    pub cancellation: Option<CancellationToken>,
}

impl InvokeOptions {
    pub fn new(operation: impl Into<String>, target_id: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            request_id: None,
            target_id: target_id.into(),
            enable_fallback: true,
            enable_circuit_breaker: true,
            timeout: None,
            cancellation: None,
        }
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    #[must_use]
    pub fn without_fallback(mut self) -> Self {
        self.enable_fallback = false;
        self
    }

    #[must_use]
    pub fn without_circuit_breaker(mut self) -> Self {
        self.enable_circuit_breaker = false;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// Successful invocation: the untouched raw value plus call metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation<T> {
    pub value: T,
    pub metadata: InvocationMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvocationMetadata {
    pub request_id: String,
    pub operation: String,
    /// Target that produced the value.
    pub model_id: String,
    pub used_fallback: bool,
    /// Targets that failed first, in the order tried.
    pub failed_models: Vec<String>,
    /// Raw call attempts across every tier.
    pub attempts: u32,
    /// Wall time including queueing.
    pub latency_ms: u64,
}
