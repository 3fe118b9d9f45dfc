//! Per-page-instance context
//!
//! A page instance is one load of the migration page. Guards that must fire
//! at most once per load, and the tokens that let a newer verification pass
//! supersede an older one, live here instead of in process-wide globals.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::error::MigrationError;

#[derive(Debug)]
pub struct PageContext {
    id: Uuid,
    signup_started: AtomicBool,
    /// Why this page's signup attempt failed; kept until the page reloads
    signup_failure: Mutex<Option<MigrationError>>,
    completion_claimed: AtomicBool,
    verification_epoch: Arc<AtomicU64>,
}

impl PageContext {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            signup_started: AtomicBool::new(false),
            signup_failure: Mutex::new(None),
            completion_claimed: AtomicBool::new(false),
            verification_epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Claim the right to run the signup coordinator. Only the first caller
    /// for this page instance gets `true`.
    pub fn try_start_signup(&self) -> bool {
        !self.signup_started.swap(true, Ordering::SeqCst)
    }

    pub fn record_signup_failure(&self, err: &MigrationError) {
        let mut failure = self.signup_failure.lock().unwrap_or_else(|e| e.into_inner());
        *failure = Some(err.clone());
    }

    /// The failure of this page's signup attempt, if it failed
    pub fn signup_failure(&self) -> Option<MigrationError> {
        self.signup_failure
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Claim the one-time completion effects (celebration, clearing
    /// notifications). Only the first caller gets `true`.
    pub fn claim_completion_effects(&self) -> bool {
        !self.completion_claimed.swap(true, Ordering::SeqCst)
    }

    /// Start a verification pass, invalidating every earlier token
    pub fn begin_verification(&self) -> VerificationToken {
        let epoch = self.verification_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        VerificationToken {
            epoch,
            current: Arc::clone(&self.verification_epoch),
        }
    }
}

impl Default for PageContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Owned by one verification pass; results may only be applied while the
/// token is still current
#[derive(Debug, Clone)]
pub struct VerificationToken {
    epoch: u64,
    current: Arc<AtomicU64>,
}

impl VerificationToken {
    pub fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signup_guard_fires_once() {
        let ctx = PageContext::new();
        assert!(ctx.try_start_signup());
        assert!(!ctx.try_start_signup());
    }

    #[test]
    fn test_signup_failure_is_remembered() {
        let ctx = PageContext::new();
        assert!(ctx.signup_failure().is_none());

        ctx.record_signup_failure(&MigrationError::PollTimeout { attempts: 10 });
        assert!(matches!(
            ctx.signup_failure(),
            Some(MigrationError::PollTimeout { attempts: 10 })
        ));
        assert!(PageContext::new().signup_failure().is_none());
    }

    #[test]
    fn test_completion_effects_claimed_once() {
        let ctx = PageContext::new();
        assert!(ctx.claim_completion_effects());
        assert!(!ctx.claim_completion_effects());
        assert!(!ctx.claim_completion_effects());
    }

    #[test]
    fn test_new_verification_invalidates_previous() {
        let ctx = PageContext::new();
        let first = ctx.begin_verification();
        assert!(first.is_current());

        let second = ctx.begin_verification();
        assert!(!first.is_current());
        assert!(second.is_current());
    }

    #[test]
    fn test_contexts_are_independent() {
        let a = PageContext::new();
        let b = PageContext::new();
        assert!(a.try_start_signup());
        assert!(b.try_start_signup());
        assert_ne!(a.id(), b.id());
    }
}
