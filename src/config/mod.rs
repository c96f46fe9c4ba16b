//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse, apply ENABLE_* / MAX_* environment overrides)
//!     → validation.rs (semantic checks)
//!     → ResilienceConfig (validated, immutable snapshot)
//!     → handed to ResilientInvoker::new
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → ResilientInvoker::reload swaps the snapshot
//!     → admission limits, breaker settings and tiers follow
//! ```
//!
//! # Design Decisions
//! - A snapshot is never mutated; changes arrive as a whole new snapshot
//! - All fields have defaults to allow minimal configs
//! - Invalid reloads are logged and dropped, the running snapshot stays

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, load_from_env, ConfigError};
pub use schema::{
    AdminConfig, BottleneckConfig, CircuitBreakerConfig, FallbackConfig, FallbackTier,
    LifecycleConfig, LogFormat, ObservabilityConfig, ResilienceConfig, RetryConfig,
};
pub use validation::{validate_config, ValidationError};
pub use watcher::ConfigWatcher;
