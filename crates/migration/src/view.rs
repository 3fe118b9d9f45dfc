//! What the migration page renders
//!
//! The page only needs to know which screen to show, the data for it, and
//! whether the one-time completion effects should fire on this render.

use paygo_shared::{BillingAccount, LegacyKind};
use serde::Serialize;
use uuid::Uuid;

use crate::error::MigrationError;
use crate::state::{LegacySnapshot, MigrationState, Phase};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Screen {
    /// Explain the new plan and offer to set up payment
    CallToAction,
    /// Spinner while the subscription is created and the old one retired
    Processing,
    /// Migration finished
    Complete,
}

impl Screen {
    pub fn for_phase(phase: Phase) -> Self {
        match phase {
            Phase::CallToAction => Screen::CallToAction,
            Phase::TriggerSignup | Phase::Cleanup => Screen::Processing,
            Phase::Done => Screen::Complete,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewError {
    pub message: String,
    /// Reloading the page is expected to help
    pub retry_on_reload: bool,
}

impl From<&MigrationError> for ViewError {
    fn from(err: &MigrationError) -> Self {
        Self {
            message: err.user_message(),
            retry_on_reload: err.is_recoverable(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationView {
    pub page_instance: Uuid,
    pub legacy_kind: LegacyKind,
    pub phase: Phase,
    pub screen: Screen,
    pub legacy_plan: Option<LegacySnapshot>,
    pub billing_account: Option<BillingAccount>,
    /// The page must offer an organization picker before payment setup
    pub needs_organization: bool,
    pub error: Option<ViewError>,
    pub celebrate: bool,
    pub clear_notifications: bool,
}

impl MigrationView {
    pub(crate) fn new(
        page_instance: Uuid,
        legacy_kind: LegacyKind,
        state: &MigrationState,
        needs_organization: bool,
    ) -> Self {
        Self {
            page_instance,
            legacy_kind,
            phase: state.phase,
            screen: Screen::for_phase(state.phase),
            legacy_plan: state.legacy_snapshot.clone(),
            billing_account: state.billing_account.clone(),
            needs_organization,
            error: None,
            celebrate: false,
            clear_notifications: false,
        }
    }
}
