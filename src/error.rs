//! Error taxonomy for the invocation pipeline.
//!
//! Every failure a caller can observe is one [`InvokeError`] variant with a
//! stable machine-readable code and an HTTP-style status:
//!
//! ```text
//! QueueFull          → QUEUE_FULL                503  (+ retry_after)
//! CircuitOpen        → CIRCUIT_BREAKER_OPEN      503  (+ retry_after)
//! FallbackExhausted  → FALLBACK_CHAIN_EXHAUSTED  502  (+ per-tier failures)
//! Upstream           → UPSTREAM_ERROR            upstream status, else 502
//! DeadlineExceeded   → DEADLINE_EXCEEDED         504
//! Cancelled          → CANCELLED                 499
//! ```

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Classification of a raw upstream failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamErrorKind {
    /// Throttling or rate-limit signal (429, `ThrottlingException`).
    RateLimited,
    /// 5xx-class server error.
    Server,
    /// Request or socket timeout.
    Timeout,
    /// Connection reset, refused or broken pipe.
    ConnectionReset,
    /// Client-side or validation error; never retried.
    Client,
    /// Anything the transport could not classify.
    Other,
}

impl UpstreamErrorKind {
    /// Map a transport error code (exception name or errno) to a kind.
    pub fn from_code(code: &str) -> Self {
        match code {
            "ThrottlingException" | "TooManyRequestsException" | "RateLimitExceeded"
            | "SlowDown" => Self::RateLimited,
            "ServiceUnavailableException" | "InternalServerException" | "InternalFailure"
            | "ModelNotReadyException" => Self::Server,
            "ETIMEDOUT" | "ESOCKETTIMEDOUT" | "TimeoutError" | "RequestTimeout"
            | "ModelTimeoutException" => Self::Timeout,
            "ECONNRESET" | "ECONNREFUSED" | "EPIPE" | "ECONNABORTED" => Self::ConnectionReset,
            "ValidationException" | "AccessDeniedException" | "ResourceNotFoundException"
            | "UnrecognizedClientException" => Self::Client,
            _ => Self::Other,
        }
    }

    /// Map an HTTP status code to a kind.
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => Self::RateLimited,
            408 | 504 => Self::Timeout,
            500..=599 => Self::Server,
            400..=499 => Self::Client,
            _ => Self::Other,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::RateLimited => "rate limited",
            Self::Server => "server error",
            Self::Timeout => "timeout",
            Self::ConnectionReset => "connection reset",
            Self::Client => "client error",
            Self::Other => "upstream error",
        }
    }
}

impl fmt::Display for UpstreamErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure reported by the raw transport for a single attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct UpstreamError {
    kind: UpstreamErrorKind,
    status: Option<u16>,
    message: String,
}

impl UpstreamError {
    pub fn new(kind: UpstreamErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    /// Build an error from an HTTP status, classifying it by status class.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: UpstreamErrorKind::from_status(status),
            status: Some(status),
            message: message.into(),
        }
    }

    /// Build an error from a transport error code such as `ThrottlingException`.
    pub fn from_code(code: &str, message: impl Into<String>) -> Self {
        Self::new(UpstreamErrorKind::from_code(code), message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::from_status(429, message)
    }

    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: UpstreamErrorKind::Server,
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(UpstreamErrorKind::Timeout, message)
    }

    pub fn connection_reset(message: impl Into<String>) -> Self {
        Self::new(UpstreamErrorKind::ConnectionReset, message)
    }

    pub fn client(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: UpstreamErrorKind::Client,
            status: Some(status),
            message: message.into(),
        }
    }

    /// Attach an HTTP status without changing the classification.
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn kind(&self) -> UpstreamErrorKind {
        self.kind
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// One tier's failure inside an exhausted fallback chain.
#[derive(Debug, Clone)]
pub struct TierFailure {
    /// Position in the attempted route (0 = starting target).
    pub tier: usize,
    pub target_id: String,
    pub error: InvokeError,
}

/// The single error a caller receives from the pipeline.
#[derive(Debug, Clone, Error)]
pub enum InvokeError {
    /// Admission queue exhausted; the call never reached deeper layers.
    #[error("admission queue full ({running} running, {queued} queued)")]
    QueueFull {
        running: usize,
        queued: usize,
        retry_after: Duration,
    },

    /// Target is currently unhealthy; the call was not invoked.
    #[error("circuit breaker open for target '{target}'")]
    CircuitOpen { target: String, retry_after: Duration },

    /// Every tier of the fallback chain failed.
    #[error("fallback chain exhausted after {} tier(s)", .failures.len())]
    FallbackExhausted { failures: Vec<TierFailure> },

    /// Raw upstream failure after retries (or a fatal error on the first try).
    #[error("upstream '{target}' failed after {attempts} attempt(s): {source}")]
    Upstream {
        target: String,
        attempts: u32,
        #[source]
        source: UpstreamError,
    },

    /// The caller's deadline elapsed while the call was queued or running.
    #[error("deadline exceeded after {elapsed:?}")]
    DeadlineExceeded { elapsed: Duration },

    /// The caller cancelled the call.
    #[error("call cancelled by caller")]
    Cancelled,
}

impl InvokeError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::QueueFull { .. } => "QUEUE_FULL",
            Self::CircuitOpen { .. } => "CIRCUIT_BREAKER_OPEN",
            Self::FallbackExhausted { .. } => "FALLBACK_CHAIN_EXHAUSTED",
            Self::Upstream { .. } => "UPSTREAM_ERROR",
            Self::DeadlineExceeded { .. } => "DEADLINE_EXCEEDED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// HTTP-style status the error maps to.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::QueueFull { .. } | Self::CircuitOpen { .. } => 503,
            Self::FallbackExhausted { .. } => 502,
            Self::Upstream { source, .. } => source
                .status()
                .filter(|s| (400..=599).contains(s))
                .unwrap_or(502),
            Self::DeadlineExceeded { .. } => 504,
            Self::Cancelled => 499,
        }
    }

    /// Suggested wait before the caller tries again, when known.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::QueueFull { retry_after, .. } | Self::CircuitOpen { retry_after, .. } => {
                Some(*retry_after)
            }
            _ => None,
        }
    }

    /// True for caller-side deadline or cancellation; these are never a verdict
    /// on upstream health.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::DeadlineExceeded { .. } | Self::Cancelled)
    }

    /// Per-tier failures for an exhausted chain, empty otherwise.
    pub fn failures(&self) -> &[TierFailure] {
        match self {
            Self::FallbackExhausted { failures } => failures,
            _ => &[],
        }
    }

    /// Serializable form for API responses and logs.
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code(),
            message: self.to_string(),
            status_code: self.status_code(),
            retry_after_ms: self.retry_after().map(|d| d.as_millis() as u64),
            errors: self
                .failures()
                .iter()
                .map(|failure| TierErrorBody {
                    tier: failure.tier,
                    target_id: failure.target_id.clone(),
                    code: failure.error.code(),
                    message: failure.error.to_string(),
                    status_code: failure.error.status_code(),
                })
                .collect(),
        }
    }
}

/// Wire form of an [`InvokeError`].
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<TierErrorBody>,
}

/// Wire form of a [`TierFailure`].
#[derive(Debug, Clone, Serialize)]
pub struct TierErrorBody {
    pub tier: usize,
    pub target_id: String,
    pub code: &'static str,
    pub message: String,
    pub status_code: u16,
}
