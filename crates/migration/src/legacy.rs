//! The three legacy subscription shapes
//!
//! Each shape knows how to verify itself against the backend, which billing
//! account should own its replacement, and how to retire it.

use paygo_shared::{BillingAccount, LegacyKind};

use crate::backend::{BillingBackend, LegacySubscriptionStatus};
use crate::error::{MigrationError, MigrationResult};
use crate::params::MigrationParams;
use crate::plans::describe_plan;
use crate::state::LegacySnapshot;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegacySubscription {
    Personal { subscription_id: String },
    TeamV1 { team_subscription_id: String },
    TeamV2 { team_id: String },
}

impl LegacySubscription {
    pub fn new(kind: LegacyKind, legacy_ref: impl Into<String>) -> Self {
        let legacy_ref = legacy_ref.into();
        match kind {
            LegacyKind::PersonalSubscription => LegacySubscription::Personal {
                subscription_id: legacy_ref,
            },
            LegacyKind::TeamSubscriptionV1 => LegacySubscription::TeamV1 {
                team_subscription_id: legacy_ref,
            },
            LegacyKind::TeamSubscriptionV2 => LegacySubscription::TeamV2 { team_id: legacy_ref },
        }
    }

    pub fn from_params(params: &MigrationParams) -> Self {
        Self::new(params.legacy_kind, params.legacy_ref.clone())
    }

    pub fn kind(&self) -> LegacyKind {
        match self {
            LegacySubscription::Personal { .. } => LegacyKind::PersonalSubscription,
            LegacySubscription::TeamV1 { .. } => LegacyKind::TeamSubscriptionV1,
            LegacySubscription::TeamV2 { .. } => LegacyKind::TeamSubscriptionV2,
        }
    }

    /// The identifier the migration was entered with
    pub fn legacy_ref(&self) -> &str {
        match self {
            LegacySubscription::Personal { subscription_id } => subscription_id,
            LegacySubscription::TeamV1 {
                team_subscription_id,
            } => team_subscription_id,
            LegacySubscription::TeamV2 { team_id } => team_id,
        }
    }

    /// Fetch the current record; a missing record is `LookupNotFound`
    pub async fn verify(
        &self,
        backend: &dyn BillingBackend,
    ) -> MigrationResult<LegacySubscriptionStatus> {
        backend
            .get_legacy_subscription_status(self.kind(), self.legacy_ref())
            .await?
            .ok_or_else(|| {
                MigrationError::LookupNotFound(format!(
                    "{} subscription {}",
                    self.kind(),
                    self.legacy_ref()
                ))
            })
    }

    pub fn snapshot(&self, status: &LegacySubscriptionStatus) -> LegacySnapshot {
        let (plan_name, plan_description) = describe_plan(&status.plan_id);
        let subscription_ref = if status.subscription_ref.is_empty() {
            self.legacy_ref().to_string()
        } else {
            status.subscription_ref.clone()
        };
        LegacySnapshot {
            plan_name,
            plan_description,
            subscription_ref,
        }
    }

    /// Who should own the usage-based subscription. `None` until known; for
    /// first-generation team subscriptions that means until the user picks
    /// an organization.
    pub fn derive_billing_account(
        &self,
        status: &LegacySubscriptionStatus,
        selected_organization: Option<&str>,
    ) -> Option<BillingAccount> {
        match self {
            LegacySubscription::Personal { .. } => {
                Some(BillingAccount::User(status.owner_ref.clone()))
            }
            LegacySubscription::TeamV1 { .. } => {
                selected_organization.map(|id| BillingAccount::Organization(id.to_string()))
            }
            LegacySubscription::TeamV2 { team_id } => {
                Some(BillingAccount::Organization(team_id.clone()))
            }
        }
    }

    /// Whether the page has to offer an organization picker
    pub fn needs_organization_selection(&self) -> bool {
        matches!(self, LegacySubscription::TeamV1 { .. })
    }

    /// Issue the retirement request(s) for this shape
    ///
    /// Backend failures come back as `CleanupFailure`. A billing account that
    /// cannot be an organization for a team shape is
    /// `InconsistentBillingAccount`, and nothing is sent.
    pub async fn retire(
        &self,
        backend: &dyn BillingBackend,
        subscription_ref: &str,
        account: Option<&BillingAccount>,
    ) -> MigrationResult<()> {
        match self {
            LegacySubscription::Personal { .. } => backend
                .cancel_legacy_subscription(LegacyKind::PersonalSubscription, subscription_ref)
                .await
                .map_err(|e| cleanup_failure("cancel subscription", e)),
            LegacySubscription::TeamV1 { .. } => {
                let organization_id = require_organization(account)?;
                backend
                    .migrate_members_to_organization(subscription_ref, organization_id)
                    .await
                    .map_err(|e| cleanup_failure("migrate team members", e))?;
                backend
                    .cancel_legacy_subscription(LegacyKind::TeamSubscriptionV1, subscription_ref)
                    .await
                    .map_err(|e| cleanup_failure("cancel team subscription", e))
            }
            LegacySubscription::TeamV2 { .. } => {
                let organization_id = require_organization(account)?;
                backend
                    .cancel_legacy_subscription(LegacyKind::TeamSubscriptionV2, organization_id)
                    .await
                    .map_err(|e| cleanup_failure("cancel team subscription", e))
            }
        }
    }
}

fn require_organization(account: Option<&BillingAccount>) -> MigrationResult<&str> {
    match account {
        Some(account) => account
            .organization_id()
            .ok_or_else(|| MigrationError::InconsistentBillingAccount(account.to_string())),
        None => Err(MigrationError::InconsistentBillingAccount(
            "(none)".to_string(),
        )),
    }
}

fn cleanup_failure(step: &str, err: MigrationError) -> MigrationError {
    MigrationError::CleanupFailure(format!("{}: {}", step, err))
}
