//! Migration settings

use std::time::Duration;

use crate::error::{MigrationError, MigrationResult};

/// Usage ceiling applied to a newly created subscription
pub const DEFAULT_USAGE_LIMIT: u64 = 1000;

/// Spacing between lookups while waiting for a created subscription
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Lookups made before giving up on a created subscription
pub const DEFAULT_POLL_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationConfig {
    /// Feature flag; when off the migration page redirects to the landing page
    pub enabled: bool,
    pub usage_limit: u64,
    pub poll_interval: Duration,
    pub poll_attempts: u32,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            usage_limit: DEFAULT_USAGE_LIMIT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_attempts: DEFAULT_POLL_ATTEMPTS,
        }
    }
}

impl MigrationConfig {
    /// Read settings from the environment, falling back to defaults
    pub fn from_env() -> MigrationResult<Self> {
        let defaults = Self::default();

        let enabled = match std::env::var("USAGE_MIGRATION_ENABLED") {
            Ok(value) => parse_flag("USAGE_MIGRATION_ENABLED", &value)?,
            Err(_) => defaults.enabled,
        };
        let usage_limit = parse_env("DEFAULT_USAGE_LIMIT")?.unwrap_or(defaults.usage_limit);
        let poll_interval = parse_env::<u64>("SIGNUP_POLL_INTERVAL_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.poll_interval);
        let poll_attempts = parse_env("SIGNUP_POLL_ATTEMPTS")?.unwrap_or(defaults.poll_attempts);

        if poll_attempts == 0 {
            return Err(MigrationError::Config(
                "SIGNUP_POLL_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            enabled,
            usage_limit,
            poll_interval,
            poll_attempts,
        })
    }
}

fn parse_flag(name: &str, value: &str) -> MigrationResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(MigrationError::Config(format!(
            "{} must be a boolean, got '{}'",
            name, other
        ))),
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> MigrationResult<Option<T>> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| MigrationError::Config(format!("{} has an invalid value '{}'", name, value))),
        Err(_) => Ok(None),
    }
}
