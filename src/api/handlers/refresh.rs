use axum::{Json, extract::Extension, http::HeaderMap, response::IntoResponse};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{instrument, warn};

use super::types::{RefreshRequest, TokenPairResponse};
use crate::api::error::ApiError;
use crate::api::gate::{device_fingerprint, extract_client_ip};
use crate::api::state::AppState;
use crate::audit::AuditEvent;
use crate::rate_limit::{RateLimitAction, RateLimitDecision};
use crate::rbac::role_names;
use crate::sessions::{RotateOutcome, rotate_refresh};
use crate::token::{generate_refresh_token, hash_refresh_token, refresh_token_session_id};

#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Rotated token pair", body = TokenPairResponse),
        (status = 401, description = "Refresh token invalid, expired, revoked, or reused"),
        (status = 429, description = "Too many attempts"),
    ),
    tag = "auth"
)]
#[instrument(skip(pool, state, headers, payload))]
pub async fn refresh(
    pool: Extension<PgPool>,
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    payload: Option<Json<RefreshRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("missing payload".to_string()));
    };

    let client_ip = extract_client_ip(&headers);
    let device = device_fingerprint(&headers);

    if state
        .rate_limiter()
        .allow(client_ip.as_deref(), RateLimitAction::Refresh)
        == RateLimitDecision::Limited
    {
        return Err(ApiError::RateLimited);
    }

    let Some(session_id) = refresh_token_session_id(&request.refresh_token) else {
        state.audit().record(
            AuditEvent::new(None, "auth.refresh", "auth", "malformed_refresh")
                .with_caller(client_ip, device),
        );
        return Err(ApiError::Authentication);
    };

    let presented_hash = hash_refresh_token(&request.refresh_token);
    let new_token = generate_refresh_token(session_id)?;
    let new_hash = hash_refresh_token(&new_token);

    let outcome = rotate_refresh(&pool, session_id, &presented_hash, &new_hash).await?;
    match outcome {
        RotateOutcome::Rotated { user_id } => {
            let roles = role_names(&pool, user_id).await?;
            let access_token = state.tokens().issue_access(user_id, session_id, roles)?;

            state.audit().record(
                AuditEvent::new(Some(user_id), "auth.refresh", "auth", "success")
                    .with_caller(client_ip, device),
            );

            Ok(Json(TokenPairResponse {
                access_token,
                refresh_token: new_token,
                token_type: "Bearer",
                expires_in: state.tokens().access_ttl_seconds(),
            }))
        }
        RotateOutcome::Reused { user_id } => {
            warn!("refresh token reuse detected, session revoked: {session_id}");
            state
                .rate_limiter()
                .observe_failure(client_ip.as_deref(), RateLimitAction::Refresh);
            state.audit().record(
                AuditEvent::new(Some(user_id), "auth.refresh", "auth", "reused_token")
                    .with_caller(client_ip, device),
            );
            Err(ApiError::Authentication)
        }
        RotateOutcome::NotFound | RotateOutcome::Revoked | RotateOutcome::Expired => {
            let reason = match outcome {
                RotateOutcome::NotFound => "unknown_session",
                RotateOutcome::Revoked => "revoked_session",
                _ => "expired_session",
            };
            state.audit().record(
                AuditEvent::new(None, "auth.refresh", "auth", reason)
                    .with_caller(client_ip, device),
            );
            Err(ApiError::Authentication)
        }
    }
}
