// Migration crate clippy configuration
#![allow(clippy::result_large_err)] // MigrationError carries backend response bodies
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Usage-Based Billing Migration
//!
//! Moves a customer from a legacy quantity-based subscription onto a
//! usage-based plan.
//!
//! ## Features
//!
//! - **Parameter resolution**: which legacy subscription, and whether the
//!   payment processor just reported a successful setup
//! - **Persisted state**: a forward-only record per legacy subscription that
//!   survives page reloads (Redis or in-memory)
//! - **State machine**: call to action, signup, cleanup, done
//! - **Idempotent signup**: check-then-create-then-poll, at most one creation
//!   per page instance
//! - **Cleanup reconciliation**: failed retirements are recorded and retried
//!   by the worker

pub mod backend;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod legacy;
pub mod params;
pub mod plans;
pub mod reconcile;
pub mod state;
pub mod store;
pub mod view;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;

// Backend
pub use backend::{BillingBackend, HttpBillingBackend, LegacySubscriptionStatus};

// Config
pub use config::{MigrationConfig, DEFAULT_POLL_ATTEMPTS, DEFAULT_POLL_INTERVAL, DEFAULT_USAGE_LIMIT};

// Context
pub use context::{PageContext, VerificationToken};

// Coordinator
pub use coordinator::{SignupCoordinator, SignupOutcome};

// Error
pub use error::{MigrationError, MigrationResult};

// Legacy
pub use legacy::LegacySubscription;

// Params
pub use params::MigrationParams;

// Reconcile
pub use reconcile::{
    CleanupLedger, CleanupReconciler, InMemoryCleanupLedger, PendingCleanup, ReconcileSummary,
    RedisCleanupLedger, DEFAULT_MAX_CLEANUP_ATTEMPTS,
};

// State
pub use state::{LegacySnapshot, MigrationState, Phase};

// Store
pub use store::{
    InMemoryMigrationStore, MigrationStore, RedisMigrationStore, SaveOutcome, StorageKey,
};

// View
pub use view::{MigrationView, Screen, ViewError};

// Workflow
pub use workflow::MigrationWorkflow;

pub use paygo_shared::{BillingAccount, LegacyKind, Organization};
