//! Application state

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderMap};
use paygo_migration::{
    CleanupLedger, HttpBillingBackend, InMemoryCleanupLedger, InMemoryMigrationStore,
    MigrationStore, MigrationWorkflow, PageContext, RedisCleanupLedger, RedisMigrationStore,
};
use redis::aio::ConnectionManager;
use reqwest::Client;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use crate::{config::Config, error::ApiResult};

struct PageEntry {
    context: Arc<PageContext>,
    last_seen: Instant,
}

/// Live page instances, keyed by the id the page echoes back on each request
#[derive(Clone, Default)]
pub struct PageContexts {
    inner: Arc<Mutex<HashMap<Uuid, PageEntry>>>,
}

impl PageContexts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for a known page instance, or a fresh one
    pub async fn get_or_create(&self, id: Option<Uuid>) -> Arc<PageContext> {
        let mut contexts = self.inner.lock().await;
        let now = Instant::now();

        if let Some(entry) = id.and_then(|id| contexts.get_mut(&id)) {
            entry.last_seen = now;
            return entry.context.clone();
        }

        let context = Arc::new(PageContext::new());
        contexts.insert(
            context.id(),
            PageEntry {
                context: context.clone(),
                last_seen: now,
            },
        );
        context
    }

    /// Drop contexts idle for longer than `ttl`; returns how many were removed
    pub async fn prune(&self, ttl: Duration) -> usize {
        let mut contexts = self.inner.lock().await;
        let before = contexts.len();
        contexts.retain(|_, entry| entry.last_seen.elapsed() <= ttl);
        before - contexts.len()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub http_client: Client,
    pub store: Arc<dyn MigrationStore>,
    pub ledger: Arc<dyn CleanupLedger>,
    pub page_contexts: PageContexts,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn MigrationStore>,
        ledger: Arc<dyn CleanupLedger>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            http_client: Client::new(),
            store,
            ledger,
            page_contexts: PageContexts::new(),
        }
    }

    /// State backed by process memory; records are lost on restart
    pub fn in_memory(config: Config) -> Self {
        Self::new(
            config,
            Arc::new(InMemoryMigrationStore::new()),
            Arc::new(InMemoryCleanupLedger::new()),
        )
    }

    /// State backed by Redis, or by memory when no Redis URL is configured
    pub async fn connect(config: Config) -> anyhow::Result<Self> {
        let Some(redis_url) = config.redis_url.clone() else {
            tracing::warn!("REDIS_URL not set - migration records are kept in memory only");
            return Ok(Self::in_memory(config));
        };

        tracing::info!("Connecting to Redis...");
        let client = redis::Client::open(redis_url.as_str())?;
        let conn = ConnectionManager::new(client).await?;
        tracing::info!("Redis connection established");

        Ok(Self::new(
            config,
            Arc::new(RedisMigrationStore::new(conn.clone())),
            Arc::new(RedisCleanupLedger::new(conn)),
        ))
    }

    /// Workflow acting on behalf of the caller of this request
    pub fn workflow_for(&self, headers: &HeaderMap) -> ApiResult<MigrationWorkflow> {
        let authorization = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let backend = HttpBillingBackend::new(self.http_client.clone(), &self.config.billing_api_url)?
            .with_authorization(authorization);

        Ok(
            MigrationWorkflow::new(Arc::new(backend), self.store.clone(), &self.config.migration)
                .with_cleanup_ledger(self.ledger.clone()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_known_page_instance_is_reused() {
        let contexts = PageContexts::new();
        let first = contexts.get_or_create(None).await;
        let again = contexts.get_or_create(Some(first.id())).await;

        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(contexts.len().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_page_instance_gets_fresh_context() {
        let contexts = PageContexts::new();
        let stranger = Uuid::new_v4();
        let context = contexts.get_or_create(Some(stranger)).await;

        assert_ne!(context.id(), stranger);
        assert_eq!(contexts.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_drops_idle_contexts() {
        let contexts = PageContexts::new();
        let idle = contexts.get_or_create(None).await;

        tokio::time::advance(Duration::from_secs(50)).await;
        let active = contexts.get_or_create(None).await;
        tokio::time::advance(Duration::from_secs(20)).await;

        let removed = contexts.prune(Duration::from_secs(60)).await;
        assert_eq!(removed, 1);
        assert_eq!(contexts.len().await, 1);

        let still_there = contexts.get_or_create(Some(active.id())).await;
        assert!(Arc::ptr_eq(&active, &still_there));
        let replaced = contexts.get_or_create(Some(idle.id())).await;
        assert_ne!(replaced.id(), idle.id());
    }

    #[test]
    fn test_workflow_rejects_bad_billing_url() {
        let state = AppState::in_memory(Config::with_billing_api("not a url"));
        assert!(state.workflow_for(&HeaderMap::new()).is_err());
    }
}
