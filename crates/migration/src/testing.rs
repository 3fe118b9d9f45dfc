//! In-memory billing backend for tests
#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use paygo_shared::{BillingAccount, LegacyKind, Organization};

use crate::backend::{BillingBackend, LegacySubscriptionStatus};
use crate::error::{MigrationError, MigrationResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Status(LegacyKind, String),
    Find(BillingAccount),
    Create(BillingAccount, String, u64),
    Cancel(LegacyKind, String),
    MigrateMembers(String, String),
    ListOrganizations,
}

#[derive(Default)]
struct Inner {
    statuses: HashMap<(LegacyKind, String), LegacySubscriptionStatus>,
    existing: HashMap<BillingAccount, String>,
    /// Poll (counted from creation) on which a created subscription appears
    visible_after: Option<u32>,
    pending_creation: Option<BillingAccount>,
    polls_since_create: u32,
    failing_polls: Vec<u32>,
    reject_creation: Option<String>,
    fail_cancel: bool,
    fail_migrate: bool,
    organizations: Vec<Organization>,
    calls: Vec<BackendCall>,
}

/// Scriptable backend that records every call it receives
pub struct FakeBackend {
    inner: Mutex<Inner>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                visible_after: Some(1),
                ..Default::default()
            }),
        }
    }

    pub fn with_status(
        self,
        kind: LegacyKind,
        legacy_ref: &str,
        status: LegacySubscriptionStatus,
    ) -> Self {
        self.inner
            .lock()
            .unwrap()
            .statuses
            .insert((kind, legacy_ref.to_string()), status);
        self
    }

    pub fn with_organizations(self, organizations: Vec<Organization>) -> Self {
        self.inner.lock().unwrap().organizations = organizations;
        self
    }

    pub fn set_existing_subscription(&self, account: &BillingAccount, subscription_id: &str) {
        self.inner
            .lock()
            .unwrap()
            .existing
            .insert(account.clone(), subscription_id.to_string());
    }

    pub fn make_visible_after_polls(&self, polls: u32) {
        self.inner.lock().unwrap().visible_after = Some(polls);
    }

    pub fn never_make_visible(&self) {
        self.inner.lock().unwrap().visible_after = None;
    }

    /// Make the given polls (1-based, counted from creation) fail
    pub fn fail_polls(&self, polls: &[u32]) {
        self.inner.lock().unwrap().failing_polls = polls.to_vec();
    }

    pub fn reject_creation(&self, reason: &str) {
        self.inner.lock().unwrap().reject_creation = Some(reason.to_string());
    }

    pub fn fail_cancellation(&self) {
        self.inner.lock().unwrap().fail_cancel = true;
    }

    pub fn fail_member_migration(&self) {
        self.inner.lock().unwrap().fail_migrate = true;
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.inner.lock().unwrap().calls.clone()
    }

    fn count(&self, pred: impl Fn(&BackendCall) -> bool) -> usize {
        self.inner.lock().unwrap().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn find_calls(&self) -> usize {
        self.count(|c| matches!(c, BackendCall::Find(_)))
    }

    pub fn create_calls(&self) -> usize {
        self.count(|c| matches!(c, BackendCall::Create(..)))
    }

    pub fn status_calls(&self) -> usize {
        self.count(|c| matches!(c, BackendCall::Status(..)))
    }

    pub fn cancel_calls(&self) -> Vec<(LegacyKind, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                BackendCall::Cancel(kind, legacy_ref) => Some((kind, legacy_ref)),
                _ => None,
            })
            .collect()
    }

    pub fn migrate_calls(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                BackendCall::MigrateMembers(team, org) => Some((team, org)),
                _ => None,
            })
            .collect()
    }

    /// Number of calls that change billing state
    pub fn mutating_calls(&self) -> usize {
        self.count(|c| {
            matches!(
                c,
                BackendCall::Create(..) | BackendCall::Cancel(..) | BackendCall::MigrateMembers(..)
            )
        })
    }
}

pub fn active_status(plan_id: &str, owner_ref: &str, subscription_ref: &str) -> LegacySubscriptionStatus {
    LegacySubscriptionStatus {
        active: true,
        cancelled: false,
        plan_id: plan_id.to_string(),
        owner_ref: owner_ref.to_string(),
        quantity: 1,
        subscription_ref: subscription_ref.to_string(),
    }
}

pub fn cancelled_status(plan_id: &str, owner_ref: &str, subscription_ref: &str) -> LegacySubscriptionStatus {
    LegacySubscriptionStatus {
        active: false,
        cancelled: true,
        ..active_status(plan_id, owner_ref, subscription_ref)
    }
}

#[async_trait]
impl BillingBackend for FakeBackend {
    async fn get_legacy_subscription_status(
        &self,
        kind: LegacyKind,
        legacy_ref: &str,
    ) -> MigrationResult<Option<LegacySubscriptionStatus>> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .calls
            .push(BackendCall::Status(kind, legacy_ref.to_string()));
        Ok(inner.statuses.get(&(kind, legacy_ref.to_string())).cloned())
    }

    async fn find_subscription(
        &self,
        account: &BillingAccount,
    ) -> MigrationResult<Option<String>> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(BackendCall::Find(account.clone()));

        if let Some(id) = inner.existing.get(account) {
            return Ok(Some(id.clone()));
        }
        if inner.pending_creation.as_ref() != Some(account) {
            return Ok(None);
        }

        inner.polls_since_create += 1;
        let poll = inner.polls_since_create;
        if inner.failing_polls.contains(&poll) {
            return Err(MigrationError::Backend("lookup unavailable".to_string()));
        }
        match inner.visible_after {
            Some(after) if poll >= after => {
                let id = format!("sub-{}", account.id());
                inner.existing.insert(account.clone(), id.clone());
                inner.pending_creation = None;
                Ok(Some(id))
            }
            _ => Ok(None),
        }
    }

    async fn create_subscription(
        &self,
        account: &BillingAccount,
        payment_setup_ref: &str,
        usage_limit: u64,
    ) -> MigrationResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(BackendCall::Create(
            account.clone(),
            payment_setup_ref.to_string(),
            usage_limit,
        ));
        if let Some(reason) = &inner.reject_creation {
            return Err(MigrationError::CreationFailure(reason.clone()));
        }
        inner.pending_creation = Some(account.clone());
        inner.polls_since_create = 0;
        Ok(())
    }

    async fn cancel_legacy_subscription(
        &self,
        kind: LegacyKind,
        legacy_ref: &str,
    ) -> MigrationResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .calls
            .push(BackendCall::Cancel(kind, legacy_ref.to_string()));
        if inner.fail_cancel {
            return Err(MigrationError::Backend("cancel rejected".to_string()));
        }
        if let Some(status) = inner.statuses.get_mut(&(kind, legacy_ref.to_string())) {
            status.cancelled = true;
        }
        Ok(())
    }

    async fn migrate_members_to_organization(
        &self,
        legacy_team_ref: &str,
        organization_id: &str,
    ) -> MigrationResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(BackendCall::MigrateMembers(
            legacy_team_ref.to_string(),
            organization_id.to_string(),
        ));
        if inner.fail_migrate {
            return Err(MigrationError::Backend("member migration rejected".to_string()));
        }
        Ok(())
    }

    async fn list_organizations(&self) -> MigrationResult<Vec<Organization>> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(BackendCall::ListOrganizations);
        Ok(inner.organizations.clone())
    }
}
