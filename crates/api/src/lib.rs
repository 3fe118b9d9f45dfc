// API crate clippy configuration
#![allow(clippy::result_large_err)] // ApiError wraps MigrationError
// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Paygo API Library
//!
//! HTTP surface for the usage-based billing migration page.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::{Config, ConfigError};
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::{AppState, PageContexts};
