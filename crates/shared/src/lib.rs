//! Shared types for the usage-based billing migration workspace
//!
//! Domain identifiers used by the migration core, the API server and the
//! reconciliation worker.

pub mod account;
pub mod legacy;

pub use account::{BillingAccount, Organization, ParseBillingAccountError};
pub use legacy::LegacyKind;
