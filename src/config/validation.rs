//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges and cross-field
//! rules. Returns every problem found, not just the first.

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ResilienceConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("retry.jitter_percent must be at most 100 (got {0})")]
    JitterOutOfRange(u8),

    #[error("retry.base_delay_ms ({base}) exceeds retry.max_delay_ms ({max})")]
    DelayOrder { base: u64, max: u64 },

    #[error("fallback tier '{tier}' has an empty target_id")]
    EmptyTarget { tier: String },

    #[error("fallback target '{0}' appears in more than one tier")]
    DuplicateTarget(String),

    #[error("invalid socket address for {field}: '{value}'")]
    InvalidAddress { field: &'static str, value: String },
}

/// Validate a configuration: `ResilienceConfig → Result<(), Vec<ValidationError>>`.
pub fn validate_config(config: &ResilienceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.bottleneck.max_concurrent == 0 {
        errors.push(ValidationError::Zero {
            field: "bottleneck.max_concurrent",
        });
    }

    let breaker = &config.circuit_breaker;
    if breaker.threshold == 0 {
        errors.push(ValidationError::Zero {
            field: "circuit_breaker.threshold",
        });
    }
    if breaker.time_window_ms == 0 {
        errors.push(ValidationError::Zero {
            field: "circuit_breaker.time_window_ms",
        });
    }
    if breaker.cooldown_ms == 0 {
        errors.push(ValidationError::Zero {
            field: "circuit_breaker.cooldown_ms",
        });
    }

    let retry = &config.retry;
    if retry.base_delay_ms == 0 {
        errors.push(ValidationError::Zero {
            field: "retry.base_delay_ms",
        });
    }
    if retry.jitter_percent > 100 {
        errors.push(ValidationError::JitterOutOfRange(retry.jitter_percent));
    }
    if retry.base_delay_ms > retry.max_delay_ms {
        errors.push(ValidationError::DelayOrder {
            base: retry.base_delay_ms,
            max: retry.max_delay_ms,
        });
    }

    let mut seen = HashSet::new();
    for tier in &config.fallback.tiers {
        if tier.target_id.trim().is_empty() {
            errors.push(ValidationError::EmptyTarget {
                tier: tier.tier.clone(),
            });
        } else if !seen.insert(tier.target_id.as_str()) {
            errors.push(ValidationError::DuplicateTarget(tier.target_id.clone()));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }
    if config.admin.enabled && config.admin.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "admin.bind_address",
            value: config.admin.bind_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
