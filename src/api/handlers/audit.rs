use axum::{
    Json,
    extract::{Extension, Query},
    http::HeaderMap,
    response::IntoResponse,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::instrument;

use super::types::AuditQueryParams;
use crate::api::error::ApiError;
use crate::api::gate::{READ_AUDIT, require_auth, require_permission};
use crate::api::state::AppState;
use crate::audit::{AuditEntry, AuditFilter, query};

#[utoipa::path(
    get,
    path = "/v1/audit",
    params(AuditQueryParams),
    responses(
        (status = 200, description = "Newest-first page of audit entries", body = [AuditEntry]),
        (status = 401, description = "Missing or invalid access token"),
        (status = 403, description = "Caller lacks audit:read"),
    ),
    tag = "audit",
    security(("bearer" = []))
)]
#[instrument(skip(pool, state, headers, params))]
pub async fn list(
    pool: Extension<PgPool>,
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<AuditQueryParams>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_auth(&headers, &state, &pool)?;
    require_permission(&state, &principal, READ_AUDIT).await?;

    let filter = AuditFilter {
        actor_id: params.actor_id,
        action: params.action,
        resource: params.resource,
        from: params.from,
        to: params.to,
        limit: params.limit,
        offset: params.offset,
    };

    let entries: Vec<AuditEntry> = query(&pool, &filter).await?;
    Ok(Json(entries))
}
