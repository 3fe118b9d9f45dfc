//! The migration state machine
//!
//! ```text
//! CallToAction ──> TriggerSignup ──> Cleanup ──> Done
//!      │                                          ^
//!      └────────── legacy already inactive ───────┘
//! ```
//!
//! Every render calls [`MigrationWorkflow::run`], which loads the persisted
//! record, runs the current phase's entry action and keeps advancing until a
//! phase has to wait (for the user, for the processor, or after an error).
//! Entry actions are safe to repeat, so a reload at any point resumes where
//! the record says.

use std::sync::Arc;

use paygo_shared::{BillingAccount, Organization};

use crate::backend::BillingBackend;
use crate::config::MigrationConfig;
use crate::context::PageContext;
use crate::coordinator::{SignupCoordinator, SignupOutcome};
use crate::error::{MigrationError, MigrationResult};
use crate::legacy::LegacySubscription;
use crate::params::MigrationParams;
use crate::reconcile::{CleanupLedger, PendingCleanup};
use crate::state::{MigrationState, Phase};
use crate::store::{MigrationStore, SaveOutcome, StorageKey};
use crate::view::{MigrationView, ViewError};

/// Upper bound on entry actions per render. A full pass needs four; the
/// extra room covers the fallback from TriggerSignup.
const MAX_ENTRY_ACTIONS: usize = 6;

/// Result of one phase entry action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// The phase changed; run the next phase's entry action
    Transitioned,
    /// Wait in the current phase
    Settled,
    /// A newer verification superseded this one; drop the result
    Stale,
}

pub struct MigrationWorkflow {
    backend: Arc<dyn BillingBackend>,
    store: Arc<dyn MigrationStore>,
    ledger: Option<Arc<dyn CleanupLedger>>,
    coordinator: SignupCoordinator,
}

impl MigrationWorkflow {
    pub fn new(
        backend: Arc<dyn BillingBackend>,
        store: Arc<dyn MigrationStore>,
        config: &MigrationConfig,
    ) -> Self {
        let coordinator = SignupCoordinator::new(backend.clone(), config);
        Self {
            backend,
            store,
            ledger: None,
            coordinator,
        }
    }

    /// Record failed cleanups for later reconciliation
    pub fn with_cleanup_ledger(mut self, ledger: Arc<dyn CleanupLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Organizations the user may pick as owner of a migrated team
    pub async fn organizations(&self) -> MigrationResult<Vec<Organization>> {
        self.backend.list_organizations().await
    }

    /// Drive the migration as far as it can go for this render
    pub async fn run(&self, ctx: &PageContext, params: &MigrationParams) -> MigrationView {
        let legacy = LegacySubscription::from_params(params);
        let key = StorageKey::for_legacy(params.legacy_kind, &params.legacy_ref);

        let mut state = match self.store.load(&key).await {
            Ok(state) => state.unwrap_or_default(),
            Err(e) => {
                tracing::error!(
                    legacy_ref = %params.legacy_ref,
                    error = %e,
                    "Failed to load migration state"
                );
                return self.render(ctx, &legacy, &MigrationState::default(), Some(&e));
            }
        };

        let mut error = None;
        for _ in 0..MAX_ENTRY_ACTIONS {
            let before = state.clone();
            let step = match state.phase {
                Phase::CallToAction => {
                    self.enter_call_to_action(ctx, &legacy, params, &mut state)
                        .await
                }
                Phase::TriggerSignup => self.enter_trigger_signup(ctx, params, &mut state).await,
                Phase::Cleanup => self.enter_cleanup(&legacy, &mut state).await,
                Phase::Done => break,
            };

            let step = match step {
                Ok(step) => step,
                Err(e) => {
                    tracing::warn!(
                        legacy_kind = %params.legacy_kind,
                        legacy_ref = %params.legacy_ref,
                        phase = %before.phase,
                        error = %e,
                        "Migration phase failed"
                    );
                    // Entry actions fail before touching the record
                    state = before;
                    error = Some(e);
                    break;
                }
            };

            if step == Step::Stale {
                state = before;
                break;
            }

            if state != before {
                match self.store.save(&key, before.phase, &state).await {
                    Ok(SaveOutcome::Saved) => {}
                    Ok(SaveOutcome::Superseded(current)) => {
                        // Another page got further; show its record rather than redo its work
                        tracing::info!(
                            legacy_kind = %params.legacy_kind,
                            legacy_ref = %params.legacy_ref,
                            ours = %state.phase,
                            stored = %current.phase,
                            "Migration record moved on elsewhere, adopting it"
                        );
                        state = current;
                        break;
                    }
                    Err(e) => {
                        tracing::error!(
                            legacy_ref = %params.legacy_ref,
                            phase = %state.phase,
                            error = %e,
                            "Failed to persist migration state"
                        );
                        state = before;
                        error = Some(e);
                        break;
                    }
                }
                if state.phase != before.phase {
                    tracing::info!(
                        legacy_kind = %params.legacy_kind,
                        legacy_ref = %params.legacy_ref,
                        from = %before.phase,
                        to = %state.phase,
                        "Migration phase changed"
                    );
                }
            }

            if step == Step::Settled {
                break;
            }
        }

        self.render(ctx, &legacy, &state, error.as_ref())
    }

    async fn enter_call_to_action(
        &self,
        ctx: &PageContext,
        legacy: &LegacySubscription,
        params: &MigrationParams,
        state: &mut MigrationState,
    ) -> MigrationResult<Step> {
        let token = ctx.begin_verification();
        let status = legacy.verify(self.backend.as_ref()).await?;

        if !token.is_current() {
            tracing::debug!(
                page_instance = %ctx.id(),
                legacy_ref = %legacy.legacy_ref(),
                "Discarding superseded verification result"
            );
            return Ok(Step::Stale);
        }

        if !status.is_chargeable() {
            tracing::info!(
                legacy_kind = %legacy.kind(),
                legacy_ref = %legacy.legacy_ref(),
                active = status.active,
                cancelled = status.cancelled,
                "Legacy subscription no longer chargeable, nothing to migrate"
            );
            state.advance(Phase::Done)?;
            return Ok(Step::Transitioned);
        }

        state.capture_snapshot_once(legacy.snapshot(&status));
        if let Some(account) =
            legacy.derive_billing_account(&status, params.selected_organization.as_deref())
        {
            state.set_billing_account_once(account);
        }

        match (&params.payment_setup_ref, &state.billing_account) {
            (Some(payment_setup_ref), Some(_)) => {
                state.record_payment_setup(payment_setup_ref.clone());
                state.advance(Phase::TriggerSignup)?;
                Ok(Step::Transitioned)
            }
            (Some(_), None) => {
                tracing::warn!(
                    legacy_ref = %legacy.legacy_ref(),
                    "Payment setup completed before an owning organization was chosen"
                );
                Ok(Step::Settled)
            }
            (None, _) => Ok(Step::Settled),
        }
    }

    async fn enter_trigger_signup(
        &self,
        ctx: &PageContext,
        params: &MigrationParams,
        state: &mut MigrationState,
    ) -> MigrationResult<Step> {
        let Some(account) = state.billing_account.clone() else {
            tracing::error!(
                legacy_ref = %params.legacy_ref,
                "No billing account recorded while waiting on signup, returning to call to action"
            );
            state.fall_back_to_call_to_action()?;
            return Ok(Step::Transitioned);
        };

        let payment_setup_ref = state
            .payment_setup_ref
            .clone()
            .or_else(|| params.payment_setup_ref.clone())
            .ok_or_else(|| {
                MigrationError::Parameter("payment setup reference (setup_intent)".to_string())
            })?;

        match self
            .coordinator
            .ensure_subscription(ctx, &payment_setup_ref, &account)
            .await?
        {
            SignupOutcome::Skipped => Ok(Step::Settled),
            SignupOutcome::Created { .. } | SignupOutcome::AlreadyExists { .. } => {
                state.advance(Phase::Cleanup)?;
                Ok(Step::Transitioned)
            }
        }
    }

    async fn enter_cleanup(
        &self,
        legacy: &LegacySubscription,
        state: &mut MigrationState,
    ) -> MigrationResult<Step> {
        let subscription_ref = state
            .legacy_snapshot
            .as_ref()
            .map(|snapshot| snapshot.subscription_ref.clone())
            .unwrap_or_else(|| legacy.legacy_ref().to_string());

        match legacy
            .retire(
                self.backend.as_ref(),
                &subscription_ref,
                state.billing_account.as_ref(),
            )
            .await
        {
            Ok(()) => {
                tracing::info!(
                    legacy_kind = %legacy.kind(),
                    subscription_ref = %subscription_ref,
                    "Legacy subscription retired"
                );
            }
            Err(e @ MigrationError::InconsistentBillingAccount(_)) => return Err(e),
            Err(e) => {
                // The user already owns the new subscription; never strand them here
                tracing::error!(
                    legacy_kind = %legacy.kind(),
                    subscription_ref = %subscription_ref,
                    error = %e,
                    "Failed to retire legacy subscription"
                );
                self.record_cleanup_failure(
                    legacy,
                    &subscription_ref,
                    state.billing_account.as_ref(),
                    &e,
                )
                .await;
            }
        }

        state.advance(Phase::Done)?;
        Ok(Step::Transitioned)
    }

    async fn record_cleanup_failure(
        &self,
        legacy: &LegacySubscription,
        subscription_ref: &str,
        account: Option<&BillingAccount>,
        err: &MigrationError,
    ) {
        let Some(ledger) = &self.ledger else {
            return;
        };
        let entry = PendingCleanup::new(legacy, subscription_ref, account, err);
        if let Err(e) = ledger.record(&entry).await {
            tracing::error!(
                legacy_ref = %legacy.legacy_ref(),
                error = %e,
                "Failed to record cleanup for reconciliation"
            );
        }
    }

    fn render(
        &self,
        ctx: &PageContext,
        legacy: &LegacySubscription,
        state: &MigrationState,
        error: Option<&MigrationError>,
    ) -> MigrationView {
        let needs_organization = state.phase == Phase::CallToAction
            && legacy.needs_organization_selection()
            && state.billing_account.is_none();

        let mut view = MigrationView::new(ctx.id(), legacy.kind(), state, needs_organization);
        view.error = error.map(ViewError::from);

        if state.phase == Phase::Done && ctx.claim_completion_effects() {
            view.celebrate = true;
            view.clear_notifications = true;
        }
        view
    }
}
