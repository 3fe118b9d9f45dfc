//! API routes

mod health;
pub mod migration;

use axum::{routing::get, Router};

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route(
            "/switch-to-usage-based",
            get(migration::switch_to_usage_based),
        )
        .route(
            "/switch-to-usage-based/organizations",
            get(migration::list_organizations),
        )
        .with_state(state)
}
