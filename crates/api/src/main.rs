// API server clippy configuration
#![allow(clippy::result_large_err)]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Paygo API Server
//!
//! Serves the usage-based billing migration page.

use std::net::SocketAddr;
use std::time::Duration;

use axum::http::{header, HeaderName, Method};
use paygo_api::{create_router, AppState, Config};
use tokio::time::interval;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often idle page contexts are swept
const PAGE_CONTEXT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,paygo_api=debug,paygo_migration=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Paygo API Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!(
        migration_enabled = config.migration.enabled,
        poll_attempts = config.migration.poll_attempts,
        poll_interval_ms = config.migration.poll_interval.as_millis() as u64,
        usage_limit = config.migration.usage_limit,
        "Configuration loaded"
    );

    let state = AppState::connect(config.clone()).await?;

    // Sweep page contexts nobody has touched within the TTL
    let page_contexts = state.page_contexts.clone();
    let ttl = config.page_context_ttl;
    tokio::spawn(async move {
        let mut interval = interval(PAGE_CONTEXT_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let removed = page_contexts.prune(ttl).await;
            if removed > 0 {
                tracing::debug!(removed = removed, "Pruned idle page contexts");
            }
        }
    });
    tracing::info!("Page context sweeper started");

    // Default to localhost for development; production should set ALLOWED_ORIGINS
    let allowed_origins: Vec<axum::http::HeaderValue> = std::env::var("ALLOWED_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string())
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    tracing::info!(
        allowed_origins = ?allowed_origins,
        "CORS configured with {} allowed origins",
        allowed_origins.len()
    );

    let page_instance = HeaderName::from_static(paygo_api::routes::migration::PAGE_INSTANCE_HEADER);
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::ACCEPT,
            header::ORIGIN,
            page_instance.clone(),
        ])
        .expose_headers([header::CONTENT_TYPE, header::LOCATION, page_instance])
        .allow_credentials(true);

    let app = create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Parse bind address
    let addr: SocketAddr = config.bind_address.parse()?;
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
