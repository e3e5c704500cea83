//! Long-poll controller configuration.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default upper bound on a single wait: five minutes.
pub const DEFAULT_MAX_WAIT_MS: u64 = 300_000;

/// Default number of concurrent waits one requester may hold.
pub const DEFAULT_MAX_PENDING_PER_REQUESTER: usize = 64;

const MAX_WAIT_ENV: &str = "CELLS_LONG_POLL_MAX_WAIT_MS";
const MAX_PENDING_ENV: &str = "CELLS_LONG_POLL_MAX_PENDING";

/// Long-poll controller configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LongPollConfig {
    /// Milliseconds a wait may stay open before resolving `please-retry`
    pub max_wait_ms: u64,
    /// Open waits allowed per requester
    pub max_pending_per_requester: usize,
}

impl Default for LongPollConfig {
    fn default() -> Self {
        Self {
            max_wait_ms: DEFAULT_MAX_WAIT_MS,
            max_pending_per_requester: DEFAULT_MAX_PENDING_PER_REQUESTER,
        }
    }
}

impl LongPollConfig {
    /// Defaults overridden by `CELLS_LONG_POLL_MAX_WAIT_MS` and
    /// `CELLS_LONG_POLL_MAX_PENDING`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var(MAX_WAIT_ENV) {
            config.max_wait_ms = parse_env(MAX_WAIT_ENV, &raw)?;
        }
        if let Ok(raw) = std::env::var(MAX_PENDING_ENV) {
            config.max_pending_per_requester = parse_env(MAX_PENDING_ENV, &raw)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Override the wait bound.
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait_ms = u64::try_from(max_wait.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_wait_ms == 0 {
            return Err(ConfigError::InvalidMaxWait("max_wait_ms cannot be 0".into()));
        }

        if self.max_pending_per_requester == 0 {
            return Err(ConfigError::InvalidPendingLimit(
                "max_pending_per_requester cannot be 0".into(),
            ));
        }

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(var: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        var,
        value: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = LongPollConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_wait(), Duration::from_secs(300));
        assert_eq!(config.max_pending_per_requester, 64);
    }

    #[test]
    fn test_zero_values_rejected() {
        let config = LongPollConfig {
            max_wait_ms: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidMaxWait(_))
        ));

        let config = LongPollConfig {
            max_pending_per_requester: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPendingLimit(_))
        ));
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: LongPollConfig = serde_json::from_str(r#"{"max_wait_ms": 1500}"#).unwrap();
        assert_eq!(config.max_wait(), Duration::from_millis(1500));
        assert_eq!(
            config.max_pending_per_requester,
            DEFAULT_MAX_PENDING_PER_REQUESTER
        );
    }

    #[test]
    fn test_parse_env_rejects_garbage() {
        assert_eq!(parse_env::<u64>(MAX_WAIT_ENV, " 250 ").unwrap(), 250);
        assert!(matches!(
            parse_env::<usize>(MAX_PENDING_ENV, "lots"),
            Err(ConfigError::InvalidEnv { var, .. }) if var == MAX_PENDING_ENV
        ));
    }
}
