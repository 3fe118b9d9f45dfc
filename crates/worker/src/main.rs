// Worker clippy configuration
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Paygo Background Worker
//!
//! Handles scheduled jobs including:
//! - Legacy subscription cleanup reconciliation (every 5 minutes)
//! - Health check heartbeat (every 5 minutes)

mod settings;

use std::sync::Arc;
use std::time::Duration;

use paygo_migration::{
    CleanupReconciler, HttpBillingBackend, RedisCleanupLedger, ReconcileSummary,
};
use redis::aio::ConnectionManager;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::settings::WorkerSettings;

/// Log results of a reconciliation pass
fn log_summary(summary: &ReconcileSummary) {
    if summary.retried == 0 {
        info!("No pending legacy cleanups");
        return;
    }

    info!(
        retried = summary.retried,
        resolved = summary.resolved,
        still_failing = summary.still_failing,
        abandoned = summary.abandoned,
        "Cleanup reconciliation cycle complete"
    );

    if summary.abandoned > 0 {
        error!(
            abandoned = summary.abandoned,
            "Legacy cleanups abandoned - manual reconciliation required"
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting Paygo Worker");

    let settings = WorkerSettings::from_env()?;

    let Some(redis_url) = settings.redis_url.clone() else {
        // Failed cleanups only reach a shared ledger through Redis
        warn!("REDIS_URL not set - cleanup reconciliation disabled");
        info!("Worker running in minimal mode");
        loop {
            tokio::time::sleep(Duration::from_secs(300)).await;
            info!("Worker heartbeat (minimal mode)");
        }
    };

    let client = redis::Client::open(redis_url.as_str())?;
    let conn = ConnectionManager::new(client).await?;
    info!("Redis connection established");

    let mut backend = HttpBillingBackend::new(reqwest::Client::new(), &settings.billing_api_url)?;
    match &settings.billing_api_token {
        Some(token) => backend = backend.with_bearer_token(token),
        None => warn!("BILLING_API_TOKEN not set - billing backend calls are unauthenticated"),
    }

    let reconciler = Arc::new(CleanupReconciler::new(
        Arc::new(backend),
        Arc::new(RedisCleanupLedger::new(conn)),
        settings.cleanup_max_attempts,
    ));

    // Create scheduler
    let scheduler = JobScheduler::new().await?;

    // Job 1: Retry failed legacy cleanups every 5 minutes
    scheduler
        .add(Job::new_async("0 */5 * * * *", move |_uuid, _l| {
            let reconciler = reconciler.clone();
            Box::pin(async move {
                info!("Running scheduled cleanup reconciliation");
                match reconciler.run_once().await {
                    Ok(summary) => log_summary(&summary),
                    Err(e) => error!(error = %e, "Cleanup reconciliation failed"),
                }
            })
        })?)
        .await?;
    info!(
        max_attempts = settings.cleanup_max_attempts,
        "Scheduled: Cleanup reconciliation (every 5 minutes)"
    );

    // Job 2: Health check heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    // Start the scheduler
    info!("Starting job scheduler");
    scheduler.start().await?;

    info!("Paygo Worker started successfully with {} scheduled jobs", 2);

    // The scheduler runs jobs in background tasks
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
