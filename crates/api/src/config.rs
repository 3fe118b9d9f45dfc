//! API server configuration

use std::time::Duration;

use paygo_migration::{MigrationConfig, MigrationError};
use thiserror::Error;

const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3000";
const DEFAULT_LANDING_URL: &str = "/";
const DEFAULT_PAGE_CONTEXT_TTL_SECS: u64 = 3600;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error(transparent)]
    Migration(#[from] MigrationError),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    /// Base URL of the billing backend's JSON API
    pub billing_api_url: String,
    /// Migration records live in memory when unset
    pub redis_url: Option<String>,
    /// Where the page sends visitors it has nothing to show
    pub landing_url: String,
    /// Idle time after which a page instance's context is dropped
    pub page_context_ttl: Duration,
    pub migration: MigrationConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let billing_api_url = non_empty_var("BILLING_API_URL")
            .ok_or(ConfigError::Missing("BILLING_API_URL"))?;

        let page_context_ttl = match non_empty_var("PAGE_CONTEXT_TTL_SECS") {
            Some(raw) => raw
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| ConfigError::Invalid {
                    name: "PAGE_CONTEXT_TTL_SECS",
                    reason: e.to_string(),
                })?,
            None => Duration::from_secs(DEFAULT_PAGE_CONTEXT_TTL_SECS),
        };

        Ok(Self {
            bind_address: non_empty_var("BIND_ADDRESS")
                .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string()),
            billing_api_url,
            redis_url: non_empty_var("REDIS_URL"),
            landing_url: non_empty_var("LANDING_URL")
                .unwrap_or_else(|| DEFAULT_LANDING_URL.to_string()),
            page_context_ttl,
            migration: MigrationConfig::from_env()?,
        })
    }

    /// Defaults pointed at the given billing backend
    pub fn with_billing_api(billing_api_url: impl Into<String>) -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            billing_api_url: billing_api_url.into(),
            redis_url: None,
            landing_url: DEFAULT_LANDING_URL.to_string(),
            page_context_ttl: Duration::from_secs(DEFAULT_PAGE_CONTEXT_TTL_SECS),
            migration: MigrationConfig::default(),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
