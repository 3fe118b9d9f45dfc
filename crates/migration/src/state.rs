//! Persisted migration state
//!
//! One record per legacy subscription. The record only ever moves forward:
//! the phase advances monotonically and the billing account and legacy
//! snapshot are write-once.

use paygo_shared::BillingAccount;
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

use crate::error::{MigrationError, MigrationResult};

/// A discrete step of the migration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    CallToAction,
    TriggerSignup,
    Cleanup,
    Done,
}

impl Phase {
    pub const ALL: [Phase; 4] = [
        Phase::CallToAction,
        Phase::TriggerSignup,
        Phase::Cleanup,
        Phase::Done,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::CallToAction => "call-to-action",
            Phase::TriggerSignup => "trigger-signup",
            Phase::Cleanup => "cleanup",
            Phase::Done => "done",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the user had before migrating, captured when first verified active
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacySnapshot {
    pub plan_name: String,
    pub plan_description: String,
    /// The legacy subscription's own identifier, used for cleanup
    pub subscription_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationState {
    pub phase: Phase,
    pub billing_account: Option<BillingAccount>,
    pub payment_setup_ref: Option<String>,
    pub legacy_snapshot: Option<LegacySnapshot>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Default for MigrationState {
    fn default() -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            phase: Phase::CallToAction,
            billing_account: None,
            payment_setup_ref: None,
            legacy_snapshot: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl MigrationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move to `to`. Staying in the same phase is a no-op.
    pub fn advance(&mut self, to: Phase) -> MigrationResult<()> {
        if to < self.phase {
            return Err(MigrationError::PhaseRegression {
                from: self.phase,
                to,
            });
        }
        if to != self.phase {
            self.phase = to;
            self.touch();
        }
        Ok(())
    }

    /// Drop back to the call to action because the record lacks a billing
    /// account while waiting on signup. Refused from any other phase.
    pub fn fall_back_to_call_to_action(&mut self) -> MigrationResult<()> {
        if self.phase != Phase::TriggerSignup || self.billing_account.is_some() {
            return Err(MigrationError::PhaseRegression {
                from: self.phase,
                to: Phase::CallToAction,
            });
        }
        self.phase = Phase::CallToAction;
        self.touch();
        Ok(())
    }

    /// Set the billing account unless one is already recorded.
    /// Returns whether the record changed.
    pub fn set_billing_account_once(&mut self, account: BillingAccount) -> bool {
        if self.billing_account.is_some() {
            return false;
        }
        self.billing_account = Some(account);
        self.touch();
        true
    }

    /// Capture the legacy snapshot unless one is already recorded.
    /// Returns whether the record changed.
    pub fn capture_snapshot_once(&mut self, snapshot: LegacySnapshot) -> bool {
        if self.legacy_snapshot.is_some() {
            return false;
        }
        self.legacy_snapshot = Some(snapshot);
        self.touch();
        true
    }

    pub fn record_payment_setup(&mut self, payment_setup_ref: String) {
        if self.payment_setup_ref.as_deref() != Some(payment_setup_ref.as_str()) {
            self.payment_setup_ref = Some(payment_setup_ref);
            self.touch();
        }
    }

    fn touch(&mut self) {
        self.updated_at = OffsetDateTime::now_utc();
    }
}
