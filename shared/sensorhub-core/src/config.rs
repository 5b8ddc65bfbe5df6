//! Environment-driven configuration helpers shared by all services

use crate::error::{PipelineError, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Read `key` from the environment, falling back to `default` when unset.
///
/// A value that is set but does not parse is a configuration error rather
/// than a silent fallback.
pub fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| PipelineError::Config(format!("Invalid {}: {}", key, e))),
        _ => Ok(default),
    }
}

/// Read a string setting with a default.
pub fn env_string(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Reject zero for settings that size buffers or batches.
pub fn require_positive(key: &str, value: usize) -> Result<usize> {
    if value == 0 {
        return Err(PipelineError::Config(format!("{} must be greater than zero", key)));
    }
    Ok(value)
}

/// Read a delay in milliseconds; zero is rejected so that waits stay
/// bounded and retry loops cannot spin.
pub fn env_millis(key: &str, default_ms: u64) -> Result<Duration> {
    let ms: u64 = env_or(key, default_ms)?;
    if ms == 0 {
        return Err(PipelineError::Config(format!("{} must be greater than zero", key)));
    }
    Ok(Duration::from_millis(ms))
}
