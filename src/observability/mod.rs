//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! admission / fallback / breaker / retry:
//!     → tracing events with request_id, operation, target, attempt, tier
//! invoker:
//!     → metrics.rs (MetricsSink: counters + latency histogram)
//!
//! Consumers:
//!     → logging.rs subscriber (stdout, pretty or JSON)
//!     → Prometheus scrape endpoint
//! ```
//!
//! # Design Decisions
//! - Request ID flows through all layers via `CallContext`
//! - Metric names are constants so tests and dashboards agree

pub mod logging;
pub mod metrics;

pub use metrics::{init_metrics, MetricsSink, PrometheusSink};
