//! Migration page endpoints
//!
//! The page calls `GET /switch-to-usage-based` with its own URL query on
//! every load and after every user action, echoing the `x-page-instance`
//! header it received last time. The response is the view to render, or a
//! redirect to the landing page when there is nothing to migrate.

use axum::{
    extract::{RawQuery, State},
    http::{HeaderMap, HeaderValue},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use paygo_migration::MigrationParams;
use paygo_shared::Organization;
use uuid::Uuid;

use crate::{error::ApiResult, state::AppState};

pub const PAGE_INSTANCE_HEADER: &str = "x-page-instance";

fn page_instance(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get(PAGE_INSTANCE_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
}

pub async fn switch_to_usage_based(
    State(state): State<AppState>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> ApiResult<Response> {
    if !state.config.migration.enabled {
        tracing::debug!("Usage migration disabled, redirecting to landing page");
        return Ok(Redirect::temporary(&state.config.landing_url).into_response());
    }

    let Some(params) = query.as_deref().and_then(MigrationParams::from_query) else {
        tracing::debug!("No legacy subscription marker, redirecting to landing page");
        return Ok(Redirect::temporary(&state.config.landing_url).into_response());
    };

    let ctx = state.page_contexts.get_or_create(page_instance(&headers)).await;
    let workflow = state.workflow_for(&headers)?;
    let view = workflow.run(&ctx, &params).await;

    tracing::debug!(
        page_instance = %ctx.id(),
        legacy_kind = %params.legacy_kind,
        phase = %view.phase,
        "Rendered migration view"
    );

    let mut response = Json(view).into_response();
    if let Ok(value) = HeaderValue::from_str(&ctx.id().to_string()) {
        response.headers_mut().insert(PAGE_INSTANCE_HEADER, value);
    }
    Ok(response)
}

/// Organizations the caller may choose as owner of a migrated team
pub async fn list_organizations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<Organization>>> {
    let workflow = state.workflow_for(&headers)?;
    Ok(Json(workflow.organizations().await?))
}
