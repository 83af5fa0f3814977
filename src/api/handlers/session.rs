use axum::{Json, extract::Extension, http::HeaderMap, response::IntoResponse};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::instrument;

use super::types::{MessageResponse, SessionResponse};
use crate::api::error::ApiError;
use crate::api::gate::{device_fingerprint, extract_client_ip, require_auth};
use crate::api::state::AppState;
use crate::audit::AuditEvent;
use crate::sessions::{list_active_sessions, revoke_all_sessions, revoke_session};

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 200, description = "Session revoked", body = MessageResponse),
        (status = 401, description = "Missing or invalid access token"),
    ),
    tag = "sessions",
    security(("bearer" = []))
)]
#[instrument(skip(pool, state, headers))]
pub async fn logout(
    pool: Extension<PgPool>,
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_auth(&headers, &state, &pool)?;

    // Idempotent: revoking an already-revoked session still succeeds.
    revoke_session(&pool, principal.session_id).await?;

    state.audit().record(
        AuditEvent::new(Some(principal.user_id), "auth.logout", "session", "success")
            .with_caller(extract_client_ip(&headers), device_fingerprint(&headers)),
    );

    Ok(Json(MessageResponse::new("logged out")))
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout-all",
    responses(
        (status = 200, description = "All sessions revoked", body = MessageResponse),
        (status = 401, description = "Missing or invalid access token"),
    ),
    tag = "sessions",
    security(("bearer" = []))
)]
#[instrument(skip(pool, state, headers))]
pub async fn logout_all(
    pool: Extension<PgPool>,
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_auth(&headers, &state, &pool)?;

    let revoked = revoke_all_sessions(&pool, principal.user_id).await?;

    state.audit().record(
        AuditEvent::new(
            Some(principal.user_id),
            "auth.logout_all",
            "session",
            format!("revoked {revoked}"),
        )
        .with_caller(extract_client_ip(&headers), device_fingerprint(&headers)),
    );

    Ok(Json(MessageResponse::new("all sessions revoked")))
}

#[utoipa::path(
    get,
    path = "/v1/sessions",
    responses(
        (status = 200, description = "Active sessions for the caller", body = [SessionResponse]),
        (status = 401, description = "Missing or invalid access token"),
    ),
    tag = "sessions",
    security(("bearer" = []))
)]
#[instrument(skip(pool, state, headers))]
pub async fn list_sessions(
    pool: Extension<PgPool>,
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_auth(&headers, &state, &pool)?;

    let sessions = list_active_sessions(&pool, principal.user_id).await?;
    let body: Vec<SessionResponse> = sessions
        .into_iter()
        .map(|session| SessionResponse {
            id: session.id,
            device: Some(session.device),
            client_ip: session.client_ip,
            created_at: session.created_at,
            last_seen_at: session.last_seen_at,
            expires_at: session.expires_at,
        })
        .collect();

    Ok(Json(body))
}
