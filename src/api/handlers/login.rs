use axum::{Json, extract::Extension, http::HeaderMap, response::IntoResponse};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::instrument;

use super::storage::{lookup_login_record, update_last_login};
use super::types::{LoginRequest, TokenPairResponse};
use crate::api::error::ApiError;
use crate::api::gate::{device_fingerprint, extract_client_ip};
use crate::api::state::AppState;
use crate::audit::AuditEvent;
use crate::credentials::{normalize_email, verify_password};
use crate::rate_limit::{RateLimitAction, RateLimitDecision};
use crate::rbac::role_names;
use crate::sessions::create_session;

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Authenticated", body = TokenPairResponse),
        (status = 401, description = "Unknown account or wrong password"),
        (status = 429, description = "Too many attempts"),
    ),
    tag = "auth"
)]
#[instrument(skip(pool, state, headers, payload))]
pub async fn login(
    pool: Extension<PgPool>,
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    payload: Option<Json<LoginRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("missing payload".to_string()));
    };

    let email = normalize_email(&request.email);
    let client_ip = extract_client_ip(&headers);
    let device = device_fingerprint(&headers);

    let limiter = state.rate_limiter();
    let ip_decision = limiter.allow(client_ip.as_deref(), RateLimitAction::Login);
    let key_decision = limiter.allow(Some(email.as_str()), RateLimitAction::Login);
    if ip_decision == RateLimitDecision::Limited || key_decision == RateLimitDecision::Limited {
        return Err(ApiError::RateLimited);
    }

    let record = lookup_login_record(&pool, &email).await?;
    let Some(record) = record else {
        // Hash anyway so unknown accounts cost the same as wrong passwords.
        let hasher = state.hasher().clone();
        let password = request.password;
        let _ = tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(anyhow::Error::from)?;
        observe_login_failure(&state, client_ip.as_deref(), &email);
        state.audit().record(
            AuditEvent::new(None, "auth.login", "auth", "no_such_user")
                .with_caller(client_ip, device),
        );
        return Err(ApiError::Authentication);
    };

    if record.status != "active" {
        observe_login_failure(&state, client_ip.as_deref(), &email);
        state.audit().record(
            AuditEvent::new(Some(record.user_id), "auth.login", "auth", "deactivated")
                .with_caller(client_ip, device),
        );
        return Err(ApiError::Authentication);
    }

    let password = request.password;
    let stored_hash = record.password_hash.clone();
    let verified = tokio::task::spawn_blocking(move || verify_password(&password, &stored_hash))
        .await
        .map_err(anyhow::Error::from)?;
    if !verified {
        observe_login_failure(&state, client_ip.as_deref(), &email);
        state.audit().record(
            AuditEvent::new(Some(record.user_id), "auth.login", "auth", "wrong_password")
                .with_caller(client_ip, device),
        );
        return Err(ApiError::Authentication);
    }

    let session_device = request
        .device
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| value.chars().take(256).collect::<String>())
        .or_else(|| device.clone())
        .unwrap_or_else(|| "unknown".to_string());

    let (session_id, refresh_token) = create_session(
        &pool,
        record.user_id,
        &session_device,
        client_ip.as_deref(),
        state.config().refresh_ttl_seconds(),
    )
    .await?;

    let roles = role_names(&pool, record.user_id).await?;
    let access_token = state
        .tokens()
        .issue_access(record.user_id, session_id, roles)?;

    update_last_login(&pool, record.user_id).await?;

    state.audit().record(
        AuditEvent::new(Some(record.user_id), "auth.login", "auth", "success")
            .with_caller(client_ip, device),
    );

    Ok(Json(TokenPairResponse {
        access_token,
        refresh_token,
        token_type: "Bearer",
        expires_in: state.tokens().access_ttl_seconds(),
    }))
}

fn observe_login_failure(state: &AppState, client_ip: Option<&str>, email: &str) {
    let limiter = state.rate_limiter();
    limiter.observe_failure(client_ip, RateLimitAction::Login);
    limiter.observe_failure(Some(email), RateLimitAction::Login);
}
