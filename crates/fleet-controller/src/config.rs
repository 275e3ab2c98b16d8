//! Fleet Controller configuration.
//!
//! Configuration is loaded from environment variables. The autoscale
//! threshold, idle grace period and termination retry policy are
//! deployment-tunable, not part of the core contract.

use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default idle grace period before an empty node is reclaimed.
pub const DEFAULT_IDLE_GRACE_PERIOD_SECONDS: u64 = 600;

/// Default number of sessions one media node can host.
pub const DEFAULT_SESSIONS_PER_NODE: u32 = 100;

/// Default spare-capacity floor (in sessions) below which a launch is requested.
pub const DEFAULT_SPARE_CAPACITY_THRESHOLD: u32 = 20;

/// Default number of termination re-requests after a failed attempt.
pub const DEFAULT_TERMINATION_MAX_RETRIES: u32 = 3;

/// Default backoff between termination re-requests.
pub const DEFAULT_TERMINATION_RETRY_BACKOFF_SECONDS: u64 = 30;

/// Fleet Controller configuration.
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// Seconds an empty node may idle before termination is requested
    /// (default: 600).
    pub idle_grace_period_seconds: u64,

    /// Session capacity of a single media node (default: 100).
    pub sessions_per_node: u32,

    /// When aggregate spare capacity across running and launching nodes
    /// falls below this many sessions, a new node is requested (default: 20).
    pub spare_capacity_threshold: u32,

    /// How many times a failed termination is re-requested before the node
    /// is escalated to operators (default: 3).
    pub termination_max_retries: u32,

    /// Seconds between termination re-requests (default: 30).
    pub termination_retry_backoff_seconds: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            idle_grace_period_seconds: DEFAULT_IDLE_GRACE_PERIOD_SECONDS,
            sessions_per_node: DEFAULT_SESSIONS_PER_NODE,
            spare_capacity_threshold: DEFAULT_SPARE_CAPACITY_THRESHOLD,
            termination_max_retries: DEFAULT_TERMINATION_MAX_RETRIES,
            termination_retry_backoff_seconds: DEFAULT_TERMINATION_RETRY_BACKOFF_SECONDS,
        }
    }
}

impl FleetConfig {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// `ConfigError::InvalidValue` if a value fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// `ConfigError::InvalidValue` if a value fails validation.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let idle_grace_period_seconds = vars
            .get("FLEET_IDLE_GRACE_PERIOD_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_IDLE_GRACE_PERIOD_SECONDS);

        let sessions_per_node = vars
            .get("FLEET_SESSIONS_PER_NODE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_SESSIONS_PER_NODE);

        let spare_capacity_threshold = vars
            .get("FLEET_SPARE_CAPACITY_THRESHOLD")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_SPARE_CAPACITY_THRESHOLD);

        let termination_max_retries = vars
            .get("FLEET_TERMINATION_MAX_RETRIES")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_TERMINATION_MAX_RETRIES);

        let termination_retry_backoff_seconds = vars
            .get("FLEET_TERMINATION_RETRY_BACKOFF_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_TERMINATION_RETRY_BACKOFF_SECONDS);

        if sessions_per_node == 0 {
            return Err(ConfigError::InvalidValue(
                "FLEET_SESSIONS_PER_NODE must be at least 1".to_string(),
            ));
        }

        Ok(FleetConfig {
            idle_grace_period_seconds,
            sessions_per_node,
            spare_capacity_threshold,
            termination_max_retries,
            termination_retry_backoff_seconds,
        })
    }

    /// Idle grace period as a `Duration`.
    #[must_use]
    pub fn idle_grace_period(&self) -> Duration {
        Duration::from_secs(self.idle_grace_period_seconds)
    }

    /// Termination retry backoff as a `Duration`.
    #[must_use]
    pub fn termination_retry_backoff(&self) -> Duration {
        Duration::from_secs(self.termination_retry_backoff_seconds)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vars_defaults() {
        let config = FleetConfig::from_vars(&HashMap::new()).expect("defaults should load");

        assert_eq!(
            config.idle_grace_period_seconds,
            DEFAULT_IDLE_GRACE_PERIOD_SECONDS
        );
        assert_eq!(config.sessions_per_node, DEFAULT_SESSIONS_PER_NODE);
        assert_eq!(
            config.spare_capacity_threshold,
            DEFAULT_SPARE_CAPACITY_THRESHOLD
        );
        assert_eq!(
            config.termination_max_retries,
            DEFAULT_TERMINATION_MAX_RETRIES
        );
        assert_eq!(
            config.termination_retry_backoff_seconds,
            DEFAULT_TERMINATION_RETRY_BACKOFF_SECONDS
        );
    }

    #[test]
    fn test_from_vars_custom_values() {
        let vars = HashMap::from([
            (
                "FLEET_IDLE_GRACE_PERIOD_SECONDS".to_string(),
                "120".to_string(),
            ),
            ("FLEET_SESSIONS_PER_NODE".to_string(), "50".to_string()),
            (
                "FLEET_SPARE_CAPACITY_THRESHOLD".to_string(),
                "10".to_string(),
            ),
            ("FLEET_TERMINATION_MAX_RETRIES".to_string(), "5".to_string()),
            (
                "FLEET_TERMINATION_RETRY_BACKOFF_SECONDS".to_string(),
                "15".to_string(),
            ),
        ]);

        let config = FleetConfig::from_vars(&vars).expect("custom config should load");

        assert_eq!(config.idle_grace_period_seconds, 120);
        assert_eq!(config.sessions_per_node, 50);
        assert_eq!(config.spare_capacity_threshold, 10);
        assert_eq!(config.termination_max_retries, 5);
        assert_eq!(config.termination_retry_backoff_seconds, 15);
    }

    #[test]
    fn test_zero_sessions_per_node_rejected() {
        let vars = HashMap::from([("FLEET_SESSIONS_PER_NODE".to_string(), "0".to_string())]);

        let result = FleetConfig::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_unparseable_value_falls_back_to_default() {
        let vars = HashMap::from([(
            "FLEET_IDLE_GRACE_PERIOD_SECONDS".to_string(),
            "not-a-number".to_string(),
        )]);

        let config = FleetConfig::from_vars(&vars).expect("config should load");
        assert_eq!(
            config.idle_grace_period_seconds,
            DEFAULT_IDLE_GRACE_PERIOD_SECONDS
        );
    }

    #[test]
    fn test_duration_helpers() {
        let config = FleetConfig::default();
        assert_eq!(
            config.idle_grace_period(),
            Duration::from_secs(DEFAULT_IDLE_GRACE_PERIOD_SECONDS)
        );
        assert_eq!(
            config.termination_retry_backoff(),
            Duration::from_secs(DEFAULT_TERMINATION_RETRY_BACKOFF_SECONDS)
        );
    }
}
