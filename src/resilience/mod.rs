//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to a target:
//!     → circuit_breaker.rs (fail fast if the target's circuit is open)
//!     → retries.rs (re-run retryable failures)
//!         → backoff.rs (exponential delay + jitter between attempts)
//!         → timeouts.rs (race every attempt and sleep against deadline/cancel)
//!     → raw call
//! ```
//!
//! # Design Decisions
//! - Every await point honors the caller's deadline and cancellation token
//! - Only transient failures are retried; fatal ones surface immediately
//! - Circuit breaker is per target and sees one verdict per retried call
//! - Breaker settings are a shared snapshot swapped on reload

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use backoff::BackoffPolicy;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerRegistry, CircuitState, CircuitStats};
pub use retries::{is_retryable_error, retry, Attempted, RetryPolicy};
