//! Idempotent signup coordinator
//!
//! Creates the usage-based subscription at most once. Three layers keep it
//! idempotent:
//!
//! 1. A one-shot guard on the page context stops duplicate calls within the
//!    same page instance.
//! 2. Before creating anything the backend is asked whether the billing
//!    account already has a subscription, which makes re-entry after a reload
//!    (or from a second tab) safe.
//! 3. Creation is asynchronous on the backend, so after requesting it the
//!    coordinator polls until the subscription shows up or the bound runs out.

use std::sync::Arc;
use std::time::Duration;

use paygo_shared::BillingAccount;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;

use crate::backend::BillingBackend;
use crate::config::MigrationConfig;
use crate::context::PageContext;
use crate::error::{MigrationError, MigrationResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignupOutcome {
    /// The subscription was created here and observed after `attempts` polls
    Created {
        subscription_id: String,
        attempts: u32,
    },
    /// A subscription already existed (another tab or an earlier attempt)
    AlreadyExists { subscription_id: String },
    /// This page instance already ran the coordinator and it is still in
    /// flight or succeeded; nothing was done
    Skipped,
}

/// Marker error for a poll that did not see the subscription
struct NotYetVisible;

#[derive(Clone)]
pub struct SignupCoordinator {
    backend: Arc<dyn BillingBackend>,
    usage_limit: u64,
    poll_interval: Duration,
    poll_attempts: u32,
}

impl SignupCoordinator {
    pub fn new(backend: Arc<dyn BillingBackend>, config: &MigrationConfig) -> Self {
        Self {
            backend,
            usage_limit: config.usage_limit,
            poll_interval: config.poll_interval,
            poll_attempts: config.poll_attempts.max(1),
        }
    }

    /// Make sure `account` owns a usage-based subscription, creating one
    /// with `payment_setup_ref` if needed
    pub async fn ensure_subscription(
        &self,
        ctx: &PageContext,
        payment_setup_ref: &str,
        account: &BillingAccount,
    ) -> MigrationResult<SignupOutcome> {
        if !ctx.try_start_signup() {
            if let Some(err) = ctx.signup_failure() {
                // The attempt is spent for this page; keep reporting its failure
                return Err(err);
            }
            tracing::debug!(
                page_instance = %ctx.id(),
                billing_account = %account,
                "Signup already started for this page instance"
            );
            return Ok(SignupOutcome::Skipped);
        }

        let outcome = self.attempt_signup(payment_setup_ref, account).await;
        if let Err(e) = &outcome {
            ctx.record_signup_failure(e);
        }
        outcome
    }

    async fn attempt_signup(
        &self,
        payment_setup_ref: &str,
        account: &BillingAccount,
    ) -> MigrationResult<SignupOutcome> {
        if let Some(subscription_id) = self.backend.find_subscription(account).await? {
            tracing::info!(
                billing_account = %account,
                subscription_id = %subscription_id,
                "Usage-based subscription already exists, skipping creation"
            );
            return Ok(SignupOutcome::AlreadyExists { subscription_id });
        }

        tracing::info!(
            billing_account = %account,
            usage_limit = self.usage_limit,
            "Creating usage-based subscription"
        );
        self.backend
            .create_subscription(account, payment_setup_ref, self.usage_limit)
            .await
            .map_err(|e| match e {
                MigrationError::CreationFailure(_) => e,
                other => MigrationError::CreationFailure(other.to_string()),
            })?;

        self.wait_for_subscription(account).await
    }

    async fn wait_for_subscription(
        &self,
        account: &BillingAccount,
    ) -> MigrationResult<SignupOutcome> {
        // First lookup is immediate, the rest are spaced by the interval
        let strategy = FixedInterval::new(self.poll_interval)
            .take(self.poll_attempts.saturating_sub(1) as usize);

        let mut attempt = 0u32;
        let found = Retry::spawn(strategy, || {
            attempt += 1;
            let attempt = attempt;
            async move { self.poll_once(account, attempt).await }
        })
        .await;

        match found {
            Ok(subscription_id) => {
                tracing::info!(
                    billing_account = %account,
                    subscription_id = %subscription_id,
                    attempts = attempt,
                    "Usage-based subscription is visible"
                );
                Ok(SignupOutcome::Created {
                    subscription_id,
                    attempts: attempt,
                })
            }
            Err(NotYetVisible) => {
                tracing::error!(
                    billing_account = %account,
                    attempts = self.poll_attempts,
                    "Subscription not found after creation"
                );
                Err(MigrationError::PollTimeout {
                    attempts: self.poll_attempts,
                })
            }
        }
    }

    async fn poll_once(
        &self,
        account: &BillingAccount,
        attempt: u32,
    ) -> Result<String, NotYetVisible> {
        match self.backend.find_subscription(account).await {
            Ok(Some(subscription_id)) => Ok(subscription_id),
            Ok(None) => {
                tracing::debug!(
                    billing_account = %account,
                    attempt = attempt,
                    "Subscription not visible yet"
                );
                Err(NotYetVisible)
            }
            Err(e) => {
                // A failed lookup counts as a miss; keep polling
                tracing::warn!(
                    billing_account = %account,
                    attempt = attempt,
                    error = %e,
                    "Subscription lookup failed while polling"
                );
                Err(NotYetVisible)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::testing::FakeBackend;

    fn coordinator(backend: &Arc<FakeBackend>) -> SignupCoordinator {
        SignupCoordinator::new(backend.clone(), &MigrationConfig::default())
    }

    fn org() -> BillingAccount {
        BillingAccount::Organization("org-1".to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn test_creates_and_polls_until_visible() {
        let backend = Arc::new(FakeBackend::new());
        backend.make_visible_after_polls(3);

        let ctx = PageContext::new();
        let outcome = coordinator(&backend)
            .ensure_subscription(&ctx, "seti_1", &org())
            .await
            .unwrap();

        assert!(matches!(outcome, SignupOutcome::Created { attempts: 3, .. }));
        assert_eq!(backend.create_calls(), 1);
        // One existence check plus three polls
        assert_eq!(backend.find_calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_existing_subscription_skips_creation() {
        let backend = Arc::new(FakeBackend::new());
        backend.set_existing_subscription(&org(), "sub-existing");

        let outcome = coordinator(&backend)
            .ensure_subscription(&PageContext::new(), "seti_1", &org())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            SignupOutcome::AlreadyExists {
                subscription_id: "sub-existing".to_string()
            }
        );
        assert_eq!(backend.create_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_invocation_same_page_is_skipped() {
        let backend = Arc::new(FakeBackend::new());
        backend.make_visible_after_polls(1);
        let ctx = PageContext::new();
        let coordinator = coordinator(&backend);

        coordinator
            .ensure_subscription(&ctx, "seti_1", &org())
            .await
            .unwrap();
        let finds_after_first = backend.find_calls();

        let second = coordinator
            .ensure_subscription(&ctx, "seti_1", &org())
            .await
            .unwrap();

        assert_eq!(second, SignupOutcome::Skipped);
        assert_eq!(backend.create_calls(), 1);
        assert_eq!(backend.find_calls(), finds_after_first);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_invocations_after_reload_create_once() {
        let backend = Arc::new(FakeBackend::new());
        backend.make_visible_after_polls(2);
        let coordinator = coordinator(&backend);

        let first = coordinator
            .ensure_subscription(&PageContext::new(), "seti_1", &org())
            .await
            .unwrap();
        // A reload gets a fresh page context
        let second = coordinator
            .ensure_subscription(&PageContext::new(), "seti_1", &org())
            .await
            .unwrap();

        assert!(matches!(first, SignupOutcome::Created { .. }));
        assert!(matches!(second, SignupOutcome::AlreadyExists { .. }));
        assert_eq!(backend.create_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_timeout_after_bound() {
        let backend = Arc::new(FakeBackend::new());
        backend.never_make_visible();

        let started = tokio::time::Instant::now();
        let err = coordinator(&backend)
            .ensure_subscription(&PageContext::new(), "seti_1", &org())
            .await
            .unwrap_err();

        assert!(matches!(err, MigrationError::PollTimeout { attempts: 10 }));
        assert_eq!(backend.create_calls(), 1);
        assert_eq!(backend.find_calls(), 1 + 10);
        // Ten polls spaced one second apart
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(9));
        assert!(elapsed < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_errors_while_polling_are_tolerated() {
        let backend = Arc::new(FakeBackend::new());
        backend.make_visible_after_polls(4);
        backend.fail_polls(&[1, 2]);

        let outcome = coordinator(&backend)
            .ensure_subscription(&PageContext::new(), "seti_1", &org())
            .await
            .unwrap();

        assert!(matches!(outcome, SignupOutcome::Created { attempts: 4, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_creation_rejection_is_terminal() {
        let backend = Arc::new(FakeBackend::new());
        backend.reject_creation("card_declined");

        let err = coordinator(&backend)
            .ensure_subscription(&PageContext::new(), "seti_1", &org())
            .await
            .unwrap_err();

        assert!(matches!(err, MigrationError::CreationFailure(_)));
        // Only the existence check ran; no polling
        assert_eq!(backend.find_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_attempt_keeps_failing_on_same_page() {
        let backend = Arc::new(FakeBackend::new());
        backend.never_make_visible();
        let ctx = PageContext::new();
        let coordinator = coordinator(&backend);

        let first = coordinator
            .ensure_subscription(&ctx, "seti_1", &org())
            .await
            .unwrap_err();
        let calls_after_first = backend.calls().len();

        let second = coordinator
            .ensure_subscription(&ctx, "seti_1", &org())
            .await
            .unwrap_err();

        assert!(matches!(first, MigrationError::PollTimeout { attempts: 10 }));
        assert!(matches!(second, MigrationError::PollTimeout { attempts: 10 }));
        assert_eq!(backend.calls().len(), calls_after_first);
        assert_eq!(backend.create_calls(), 1);
    }
}
