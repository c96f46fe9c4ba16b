//! Resilient invocation pipeline for rate-limited, flaky upstream services.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────────────┐
//!                      │                    RESILIENT INVOKER                      │
//!                      │                                                           │
//!   invoke(call, opts) │  ┌────────────┐   ┌──────────┐   ┌─────────┐   ┌───────┐  │
//!   ───────────────────┼─▶│ admission  │──▶│ fallback │──▶│ circuit │──▶│ retry │──┼──▶ raw call
//!                      │  │(bottleneck)│   │  chain   │   │ breaker │   │backoff│  │
//!                      │  └────────────┘   └──────────┘   └─────────┘   └───────┘  │
//!                      │        │ QUEUE_FULL     │ EXHAUSTED    │ OPEN             │
//!   Invocation<T> /    │        ▼                ▼              ▼                  │
//!   InvokeError        │  ┌─────────────────────────────────────────────────────┐ │
//!   ◀──────────────────┼──│              Cross-Cutting Concerns                 │ │
//!                      │  │  config (hot reload) · observability · lifecycle    │ │
//!                      │  │  admin API · deadlines / cancellation                │ │
//!                      │  └─────────────────────────────────────────────────────┘ │
//!                      └──────────────────────────────────────────────────────────┘
//! ```

pub mod admin;
pub mod admission;
pub mod config;
pub mod context;
pub mod error;
pub mod fallback;
pub mod invoker;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod simulate;

pub use config::schema::ResilienceConfig;
pub use context::CallContext;
pub use error::{ErrorBody, InvokeError, TierFailure, UpstreamError, UpstreamErrorKind};
pub use invoker::{InvokeOptions, Invocation, InvocationMetadata, ResilientInvoker};
pub use lifecycle::Shutdown;
