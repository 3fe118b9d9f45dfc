//! Reconciliation of failed legacy cleanups
//!
//! Cleanup failures never block a user from finishing the migration. They
//! are recorded here instead, and the worker retries them until they succeed
//! or run out of attempts.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use paygo_shared::{BillingAccount, LegacyKind};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::backend::BillingBackend;
use crate::error::{MigrationError, MigrationResult};
use crate::legacy::LegacySubscription;

const PENDING_KEY: &str = "paygo:cleanup:pending";
const ABANDONED_KEY: &str = "paygo:cleanup:abandoned";

/// Default number of retirement attempts before a cleanup is abandoned
pub const DEFAULT_MAX_CLEANUP_ATTEMPTS: u32 = 5;

/// A retirement request that failed and awaits another attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCleanup {
    pub id: Uuid,
    pub legacy_kind: LegacyKind,
    pub legacy_ref: String,
    pub subscription_ref: String,
    pub billing_account: Option<BillingAccount>,
    pub attempts: u32,
    pub last_error: String,
    #[serde(with = "time::serde::rfc3339")]
    pub first_failed_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_attempt_at: OffsetDateTime,
}

impl PendingCleanup {
    pub fn new(
        legacy: &LegacySubscription,
        subscription_ref: &str,
        billing_account: Option<&BillingAccount>,
        error: &MigrationError,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            legacy_kind: legacy.kind(),
            legacy_ref: legacy.legacy_ref().to_string(),
            subscription_ref: subscription_ref.to_string(),
            billing_account: billing_account.cloned(),
            attempts: 1,
            last_error: error.to_string(),
            first_failed_at: now,
            last_attempt_at: now,
        }
    }

    fn record_failure(&mut self, error: &MigrationError) {
        self.attempts += 1;
        self.last_error = error.to_string();
        self.last_attempt_at = OffsetDateTime::now_utc();
    }
}

#[async_trait]
pub trait CleanupLedger: Send + Sync {
    /// Insert or replace an entry
    async fn record(&self, entry: &PendingCleanup) -> MigrationResult<()>;

    async fn pending(&self) -> MigrationResult<Vec<PendingCleanup>>;

    async fn resolve(&self, id: Uuid) -> MigrationResult<()>;

    /// Stop retrying; the entry is kept for manual follow-up
    async fn abandon(&self, entry: &PendingCleanup) -> MigrationResult<()>;
}

#[derive(Clone, Default)]
pub struct InMemoryCleanupLedger {
    pending: Arc<RwLock<HashMap<Uuid, PendingCleanup>>>,
    abandoned: Arc<RwLock<Vec<PendingCleanup>>>,
}

impl InMemoryCleanupLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn abandoned(&self) -> Vec<PendingCleanup> {
        self.abandoned.read().await.clone()
    }
}

#[async_trait]
impl CleanupLedger for InMemoryCleanupLedger {
    async fn record(&self, entry: &PendingCleanup) -> MigrationResult<()> {
        self.pending.write().await.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn pending(&self) -> MigrationResult<Vec<PendingCleanup>> {
        let mut entries: Vec<_> = self.pending.read().await.values().cloned().collect();
        entries.sort_by_key(|e| e.first_failed_at);
        Ok(entries)
    }

    async fn resolve(&self, id: Uuid) -> MigrationResult<()> {
        self.pending.write().await.remove(&id);
        Ok(())
    }

    async fn abandon(&self, entry: &PendingCleanup) -> MigrationResult<()> {
        self.pending.write().await.remove(&entry.id);
        self.abandoned.write().await.push(entry.clone());
        Ok(())
    }
}

#[derive(Clone)]
pub struct RedisCleanupLedger {
    conn: ConnectionManager,
}

impl RedisCleanupLedger {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl CleanupLedger for RedisCleanupLedger {
    async fn record(&self, entry: &PendingCleanup) -> MigrationResult<()> {
        let json = serde_json::to_string(entry)?;
        let mut conn = self.conn.clone();
        let _: () = conn.hset(PENDING_KEY, entry.id.to_string(), json).await?;
        Ok(())
    }

    async fn pending(&self) -> MigrationResult<Vec<PendingCleanup>> {
        let mut conn = self.conn.clone();
        let raw: HashMap<String, String> = conn.hgetall(PENDING_KEY).await?;
        let mut entries = Vec::with_capacity(raw.len());
        for (id, json) in raw {
            match serde_json::from_str::<PendingCleanup>(&json) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::error!(entry_id = %id, error = %e, "Skipping unreadable cleanup entry");
                }
            }
        }
        entries.sort_by_key(|e| e.first_failed_at);
        Ok(entries)
    }

    async fn resolve(&self, id: Uuid) -> MigrationResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.hdel(PENDING_KEY, id.to_string()).await?;
        Ok(())
    }

    async fn abandon(&self, entry: &PendingCleanup) -> MigrationResult<()> {
        let json = serde_json::to_string(entry)?;
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .hset(ABANDONED_KEY, entry.id.to_string(), json)
            .ignore()
            .hdel(PENDING_KEY, entry.id.to_string())
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

/// Counts from one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub retried: usize,
    pub resolved: usize,
    pub still_failing: usize,
    pub abandoned: usize,
}

pub struct CleanupReconciler {
    backend: Arc<dyn BillingBackend>,
    ledger: Arc<dyn CleanupLedger>,
    max_attempts: u32,
}

impl CleanupReconciler {
    pub fn new(
        backend: Arc<dyn BillingBackend>,
        ledger: Arc<dyn CleanupLedger>,
        max_attempts: u32,
    ) -> Self {
        Self {
            backend,
            ledger,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Retry every pending cleanup once
    pub async fn run_once(&self) -> MigrationResult<ReconcileSummary> {
        let mut summary = ReconcileSummary::default();

        for mut entry in self.ledger.pending().await? {
            summary.retried += 1;
            let legacy = LegacySubscription::new(entry.legacy_kind, entry.legacy_ref.clone());

            match self.retry(&legacy, &entry).await {
                Ok(()) => {
                    tracing::info!(
                        entry_id = %entry.id,
                        legacy_kind = %entry.legacy_kind,
                        legacy_ref = %entry.legacy_ref,
                        attempts = entry.attempts,
                        "Legacy subscription cleanup reconciled"
                    );
                    self.ledger.resolve(entry.id).await?;
                    summary.resolved += 1;
                }
                Err(e) => {
                    entry.record_failure(&e);
                    if entry.attempts >= self.max_attempts {
                        tracing::error!(
                            entry_id = %entry.id,
                            legacy_kind = %entry.legacy_kind,
                            legacy_ref = %entry.legacy_ref,
                            billing_account = ?entry.billing_account,
                            attempts = entry.attempts,
                            error = %e,
                            "CRITICAL: Giving up on legacy subscription cleanup - manual reconciliation required"
                        );
                        self.ledger.abandon(&entry).await?;
                        summary.abandoned += 1;
                    } else {
                        tracing::warn!(
                            entry_id = %entry.id,
                            legacy_ref = %entry.legacy_ref,
                            attempts = entry.attempts,
                            error = %e,
                            "Legacy subscription cleanup still failing"
                        );
                        self.ledger.record(&entry).await?;
                        summary.still_failing += 1;
                    }
                }
            }
        }

        Ok(summary)
    }

    async fn retry(&self, legacy: &LegacySubscription, entry: &PendingCleanup) -> MigrationResult<()> {
        // Nothing left to retire if the subscription stopped charging meanwhile
        match legacy.verify(self.backend.as_ref()).await {
            Ok(status) if !status.is_chargeable() => return Ok(()),
            Ok(_) => {}
            Err(MigrationError::LookupNotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        }
        legacy
            .retire(
                self.backend.as_ref(),
                &entry.subscription_ref,
                entry.billing_account.as_ref(),
            )
            .await
    }
}
