//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the invoker.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the resilience pipeline.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Admission controller ("bottleneck") limits.
    pub bottleneck: BottleneckConfig,

    /// Per-target circuit breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Retry and backoff settings.
    pub retry: RetryConfig,

    /// Ordered fallback tiers.
    pub fallback: FallbackConfig,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Startup/shutdown settings.
    pub lifecycle: LifecycleConfig,
}

/// Admission controller configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BottleneckConfig {
    /// Enable admission control. Disabled means unbounded pass-through.
    pub enabled: bool,

    /// Maximum calls executing at once across all targets.
    pub max_concurrent: usize,

    /// Maximum calls waiting for a slot.
    pub max_queue: usize,

    /// Lower bound for the `retry_after` hint on rejection, in milliseconds.
    pub min_retry_after_ms: u64,
}

impl Default for BottleneckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrent: 10,
            max_queue: 100,
            min_retry_after_ms: 1000,
        }
    }
}

/// Circuit breaker configuration, shared by every per-target breaker.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Enable the breaker. Disabled means pass-through (calls still counted).
    pub enabled: bool,

    /// Failures within the window that open the circuit.
    pub threshold: u32,

    /// Sliding failure window in milliseconds.
    pub time_window_ms: u64,

    /// Time spent open before a probe is allowed, in milliseconds.
    pub cooldown_ms: u64,
}

impl CircuitBreakerConfig {
    pub fn time_window(&self) -> Duration {
        Duration::from_millis(self.time_window_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 5,
            time_window_ms: 60_000,
            cooldown_ms: 30_000,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries. Disabled means exactly one attempt.
    pub enabled: bool,

    /// Maximum retries after the first attempt.
    pub max_retries: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Symmetric jitter applied to each delay, in percent (0-100).
    pub jitter_percent: u8,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            jitter_percent: 20,
        }
    }
}

/// Fallback chain configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct FallbackConfig {
    /// Enable failover to later tiers.
    pub enabled: bool,

    /// Tier definitions; ordered by ascending priority at load time.
    pub tiers: Vec<FallbackTier>,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tiers: Vec::new(),
        }
    }
}

/// One tier of the fallback chain.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct FallbackTier {
    /// Tier label for logs (e.g. "primary", "fallback", "emergency").
    pub tier: String,

    /// Target identifier passed to the raw call.
    pub target_id: String,

    /// Ordering key (lower = tried first).
    #[serde(default)]
    pub priority: u32,
}

impl FallbackTier {
    pub fn new(tier: impl Into<String>, target_id: impl Into<String>, priority: u32) -> Self {
        Self {
            tier: tier.into(),
            target_id: target_id.into(),
            priority,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Human-readable or JSON log lines.
    pub log_format: LogFormat,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// Lifecycle configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LifecycleConfig {
    /// How long shutdown waits for in-flight and queued calls.
    pub drain_timeout_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: 30,
        }
    }
}
