//! Migration error types

use thiserror::Error;

use crate::state::Phase;

/// Result alias used throughout the migration crate
pub type MigrationResult<T> = Result<T, MigrationError>;

#[derive(Debug, Clone, Error)]
pub enum MigrationError {
    /// A URL marker required by the current phase is missing
    #[error("Missing parameter: {0}")]
    Parameter(String),

    /// The legacy subscription (or another backend record) does not exist
    #[error("Not found: {0}")]
    LookupNotFound(String),

    /// The backend rejected the subscription creation request
    #[error("Failed to create subscription: {0}")]
    CreationFailure(String),

    /// The created subscription never became visible
    #[error("Subscription not found after creation ({attempts} attempts)")]
    PollTimeout { attempts: u32 },

    /// Retiring the legacy subscription failed
    #[error("Failed to retire legacy subscription: {0}")]
    CleanupFailure(String),

    #[error("Billing account {0} is not an organization")]
    InconsistentBillingAccount(String),

    #[error("Phase cannot move from {from} back to {to}")]
    PhaseRegression { from: Phase, to: Phase },

    #[error("Billing backend error: {0}")]
    Backend(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl MigrationError {
    /// Whether reloading the page can be expected to resolve the failure
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MigrationError::CreationFailure(_)
                | MigrationError::PollTimeout { .. }
                | MigrationError::Backend(_)
                | MigrationError::Storage(_)
        )
    }

    /// Message shown on the migration page
    pub fn user_message(&self) -> String {
        match self {
            MigrationError::Backend(_) | MigrationError::Storage(_) => {
                "Something went wrong while talking to the billing service. Please reload the page to try again.".to_string()
            }
            MigrationError::PollTimeout { .. } => {
                "Your new subscription is taking longer than expected to appear. Please reload the page in a moment.".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for MigrationError {
    fn from(err: reqwest::Error) -> Self {
        MigrationError::Backend(err.to_string())
    }
}

impl From<redis::RedisError> for MigrationError {
    fn from(err: redis::RedisError) -> Self {
        MigrationError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for MigrationError {
    fn from(err: serde_json::Error) -> Self {
        MigrationError::Storage(format!("invalid stored record: {}", err))
    }
}
