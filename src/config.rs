//! Configuration types.

use std::time::Duration;

use crate::error::ConfigError;

/// Flow engine configuration.
#[derive(Debug, Clone)]
pub struct FlowConfig {
    /// Consecutive transient failures of one step before the flow aborts.
    pub max_step_attempts: u32,
    /// Pause between automatic retries of a step.
    pub retry_backoff: Duration,
    /// Capacity of the flow event broadcast channel.
    pub event_capacity: usize,
    /// Maximum number of state transitions kept in the flow history.
    pub history_limit: usize,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            max_step_attempts: 3,
            retry_backoff: Duration::from_millis(500),
            event_capacity: 64,
            history_limit: 200,
        }
    }
}

impl FlowConfig {
    /// Build a config from `MESH_SETUP_*` environment variables, falling back
    /// to defaults for unset ones.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let max_step_attempts = parse_or(
            &lookup,
            "MESH_SETUP_MAX_STEP_ATTEMPTS",
            defaults.max_step_attempts,
        )?;
        if max_step_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MESH_SETUP_MAX_STEP_ATTEMPTS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        let backoff_ms = parse_or(
            &lookup,
            "MESH_SETUP_RETRY_BACKOFF_MS",
            millis(defaults.retry_backoff),
        )?;

        let event_capacity =
            parse_or(&lookup, "MESH_SETUP_EVENT_CAPACITY", defaults.event_capacity)?;
        if event_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MESH_SETUP_EVENT_CAPACITY".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            max_step_attempts,
            retry_backoff: Duration::from_millis(backoff_ms),
            event_capacity,
            history_limit: parse_or(&lookup, "MESH_SETUP_HISTORY_LIMIT", defaults.history_limit)?,
        })
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        }),
        None => Ok(default),
    }
}
