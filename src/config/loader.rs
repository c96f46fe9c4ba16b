//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use thiserror::Error;

use crate::config::schema::ResilienceConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {var}: '{value}'")]
    Env { var: &'static str, value: String },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load a TOML file, apply environment overrides, and validate.
pub fn load_config(path: &Path) -> Result<ResilienceConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config = parse_config(&content)?;

    apply_env_overrides(&mut config, |var| std::env::var(var).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Build a configuration from defaults plus environment overrides.
pub fn load_from_env() -> Result<ResilienceConfig, ConfigError> {
    let mut config = ResilienceConfig::default();
    apply_env_overrides(&mut config, |var| std::env::var(var).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Parse TOML without environment overrides or validation.
pub fn parse_config(content: &str) -> Result<ResilienceConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Apply the documented environment variables on top of `config`.
///
/// `lookup` returns the raw value of a variable, if set.
pub fn apply_env_overrides<F>(config: &mut ResilienceConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    env.flag("ENABLE_BOTTLENECK", &mut config.bottleneck.enabled)?;
    env.number("MAX_CONCURRENT", &mut config.bottleneck.max_concurrent)?;
    env.number("MAX_QUEUE", &mut config.bottleneck.max_queue)?;

    env.flag("ENABLE_CIRCUIT_BREAKER", &mut config.circuit_breaker.enabled)?;
    env.number("CIRCUIT_BREAKER_THRESHOLD", &mut config.circuit_breaker.threshold)?;
    env.number("CIRCUIT_BREAKER_WINDOW_MS", &mut config.circuit_breaker.time_window_ms)?;
    env.number("CIRCUIT_BREAKER_COOLDOWN_MS", &mut config.circuit_breaker.cooldown_ms)?;

    env.flag("ENABLE_RETRY", &mut config.retry.enabled)?;
    env.number("MAX_RETRIES", &mut config.retry.max_retries)?;
    env.number("RETRY_BASE_DELAY_MS", &mut config.retry.base_delay_ms)?;
    env.number("RETRY_MAX_DELAY_MS", &mut config.retry.max_delay_ms)?;
    env.number("RETRY_JITTER_PERCENT", &mut config.retry.jitter_percent)?;

    env.flag("ENABLE_FALLBACK", &mut config.fallback.enabled)?;

    Ok(())
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn flag(&self, var: &'static str, slot: &mut bool) -> Result<(), ConfigError> {
        let Some(raw) = (self.lookup)(var) else {
            return Ok(());
        };
        *slot = match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => return Err(ConfigError::Env { var, value: raw }),
        };
        Ok(())
    }

    fn number<T: FromStr>(&self, var: &'static str, slot: &mut T) -> Result<(), ConfigError> {
        let Some(raw) = (self.lookup)(var) else {
            return Ok(());
        };
        *slot = raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Env { var, value: raw.clone() })?;
        Ok(())
    }
}
