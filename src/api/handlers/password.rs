use axum::{Json, extract::Extension, http::HeaderMap, http::StatusCode, response::IntoResponse};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, instrument};

use super::storage::{
    apply_password_reset, consume_reset_token, consume_verification_token, create_reset_token,
    password_hash_for_user, update_password,
};
use super::types::{
    ChangePasswordRequest, MessageResponse, ResetConfirmRequest, ResetRequest, VerifyEmailRequest,
};
use super::utils::hash_one_time_token;
use crate::api::error::ApiError;
use crate::api::gate::{device_fingerprint, extract_client_ip, require_auth};
use crate::api::state::AppState;
use crate::audit::AuditEvent;
use crate::credentials::{check_policy, normalize_email, verify_password};
use crate::mail::MailMessage;
use crate::rate_limit::{RateLimitAction, RateLimitDecision};

#[utoipa::path(
    post,
    path = "/v1/auth/password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = MessageResponse),
        (status = 400, description = "New password violates policy"),
        (status = 401, description = "Old password wrong or token invalid"),
    ),
    tag = "auth",
    security(("bearer" = []))
)]
#[instrument(skip(pool, state, headers, payload))]
pub async fn change_password(
    pool: Extension<PgPool>,
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    payload: Option<Json<ChangePasswordRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_auth(&headers, &state, &pool)?;

    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("missing payload".to_string()));
    };

    if let Err(violation) = check_policy(&request.new_password) {
        return Err(ApiError::Validation(violation.message().to_string()));
    }

    let Some(stored_hash) = password_hash_for_user(&pool, principal.user_id).await? else {
        return Err(ApiError::Authentication);
    };

    let old_password = request.old_password;
    let verified =
        tokio::task::spawn_blocking(move || verify_password(&old_password, &stored_hash))
            .await
            .map_err(anyhow::Error::from)?;
    if !verified {
        state.audit().record(
            AuditEvent::new(
                Some(principal.user_id),
                "user.password_change",
                "user",
                "wrong_password",
            )
            .with_caller(extract_client_ip(&headers), device_fingerprint(&headers)),
        );
        return Err(ApiError::Authentication);
    }

    let hasher = state.hasher().clone();
    let new_password = request.new_password;
    let new_hash = tokio::task::spawn_blocking(move || hasher.hash(&new_password))
        .await
        .map_err(anyhow::Error::from)??;
    update_password(&pool, principal.user_id, &new_hash).await?;

    state.audit().record(
        AuditEvent::new(
            Some(principal.user_id),
            "user.password_change",
            "user",
            "success",
        )
        .with_caller(extract_client_ip(&headers), device_fingerprint(&headers)),
    );

    Ok(Json(MessageResponse::new("password changed")))
}

#[utoipa::path(
    post,
    path = "/v1/auth/verify-email",
    request_body = VerifyEmailRequest,
    responses(
        (status = 200, description = "Email verified", body = MessageResponse),
        (status = 400, description = "Token unknown, expired, or already used"),
    ),
    tag = "auth"
)]
#[instrument(skip(pool, payload))]
pub async fn verify_email(
    pool: Extension<PgPool>,
    payload: Option<Json<VerifyEmailRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("missing payload".to_string()));
    };

    let token_hash = hash_one_time_token(&request.token);
    if consume_verification_token(&pool, &token_hash).await? {
        Ok(Json(MessageResponse::new("email verified")))
    } else {
        Err(ApiError::Validation("invalid or expired token".to_string()))
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/password-reset/request",
    request_body = ResetRequest,
    responses(
        (status = 202, description = "Reset mail queued if the account exists", body = MessageResponse),
        (status = 429, description = "Too many attempts"),
    ),
    tag = "auth"
)]
#[instrument(skip(pool, state, headers, payload))]
pub async fn reset_request(
    pool: Extension<PgPool>,
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    payload: Option<Json<ResetRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("missing payload".to_string()));
    };

    let client_ip = extract_client_ip(&headers);
    if state
        .rate_limiter()
        .allow(client_ip.as_deref(), RateLimitAction::PasswordReset)
        == RateLimitDecision::Limited
    {
        return Err(ApiError::RateLimited);
    }

    let email = normalize_email(&request.email);
    let token = create_reset_token(&pool, &email, state.config().reset_token_ttl_seconds()).await?;

    // Same answer for unknown accounts; no enumeration signal here.
    if let Some(token) = token {
        let message = MailMessage {
            to_email: email,
            template: "password_reset",
            payload_json: serde_json::json!({ "token": token }).to_string(),
        };
        if let Err(err) = state.mail().send(&message) {
            error!("failed to send reset mail: {err:?}");
        }
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse::new("if the account exists, mail is on its way")),
    ))
}

#[utoipa::path(
    post,
    path = "/v1/auth/password-reset/confirm",
    request_body = ResetConfirmRequest,
    responses(
        (status = 200, description = "Password reset, all sessions revoked", body = MessageResponse),
        (status = 400, description = "Token unknown, expired, used, or weak password"),
    ),
    tag = "auth"
)]
#[instrument(skip(pool, state, headers, payload))]
pub async fn reset_confirm(
    pool: Extension<PgPool>,
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    payload: Option<Json<ResetConfirmRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("missing payload".to_string()));
    };

    if let Err(violation) = check_policy(&request.new_password) {
        return Err(ApiError::Validation(violation.message().to_string()));
    }

    let token_hash = hash_one_time_token(&request.token);
    let Some(user_id) = consume_reset_token(&pool, &token_hash).await? else {
        return Err(ApiError::Validation("invalid or expired token".to_string()));
    };

    let hasher = state.hasher().clone();
    let new_password = request.new_password;
    let new_hash = tokio::task::spawn_blocking(move || hasher.hash(&new_password))
        .await
        .map_err(anyhow::Error::from)??;
    // A reset implies the old credential may be compromised; the new hash
    // and the revocation of every session commit as one.
    apply_password_reset(&pool, user_id, &new_hash).await?;

    state.audit().record(
        AuditEvent::new(Some(user_id), "user.password_reset", "user", "success")
            .with_caller(extract_client_ip(&headers), device_fingerprint(&headers)),
    );

    Ok(Json(MessageResponse::new("password reset")))
}
