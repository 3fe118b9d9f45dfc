//! Worker settings read from the environment

use paygo_migration::DEFAULT_MAX_CLEANUP_ATTEMPTS;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub billing_api_url: String,
    /// Service token presented to the billing backend
    pub billing_api_token: Option<String>,
    /// Without Redis there is no shared ledger to reconcile
    pub redis_url: Option<String>,
    pub cleanup_max_attempts: u32,
}

impl WorkerSettings {
    pub fn from_env() -> Result<Self, SettingsError> {
        let billing_api_url =
            var("BILLING_API_URL").ok_or(SettingsError::Missing("BILLING_API_URL"))?;

        let cleanup_max_attempts = match var("CLEANUP_MAX_ATTEMPTS") {
            Some(raw) => match raw.parse::<u32>() {
                Ok(0) => {
                    return Err(SettingsError::Invalid {
                        name: "CLEANUP_MAX_ATTEMPTS",
                        reason: "must be at least 1".to_string(),
                    })
                }
                Ok(n) => n,
                Err(e) => {
                    return Err(SettingsError::Invalid {
                        name: "CLEANUP_MAX_ATTEMPTS",
                        reason: e.to_string(),
                    })
                }
            },
            None => DEFAULT_MAX_CLEANUP_ATTEMPTS,
        };

        Ok(Self {
            billing_api_url,
            billing_api_token: var("BILLING_API_TOKEN"),
            redis_url: var("REDIS_URL"),
            cleanup_max_attempts,
        })
    }
}

fn var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
