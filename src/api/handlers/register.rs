use axum::{Json, extract::Extension, http::HeaderMap, http::StatusCode, response::IntoResponse};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, instrument};

use super::storage::{SignupOutcome, insert_user};
use super::types::{RegisterRequest, UserResponse};
use crate::api::error::ApiError;
use crate::api::gate::{device_fingerprint, extract_client_ip};
use crate::api::state::AppState;
use crate::audit::AuditEvent;
use crate::credentials::{check_policy, normalize_email, valid_email};
use crate::mail::MailMessage;
use crate::rate_limit::{RateLimitAction, RateLimitDecision};

#[utoipa::path(
    post,
    path = "/v1/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = UserResponse),
        (status = 400, description = "Invalid email or weak password"),
        (status = 409, description = "Email already registered"),
        (status = 429, description = "Too many attempts"),
    ),
    tag = "auth"
)]
#[instrument(skip(pool, state, headers, payload))]
pub async fn register(
    pool: Extension<PgPool>,
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    payload: Option<Json<RegisterRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("missing payload".to_string()));
    };

    let client_ip = extract_client_ip(&headers);
    if state
        .rate_limiter()
        .allow(client_ip.as_deref(), RateLimitAction::Register)
        == RateLimitDecision::Limited
    {
        return Err(ApiError::RateLimited);
    }

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return Err(ApiError::Validation("invalid email".to_string()));
    }
    if let Err(violation) = check_policy(&request.password) {
        return Err(ApiError::Validation(violation.message().to_string()));
    }

    let hasher = state.hasher().clone();
    let password = request.password;
    let password_hash = tokio::task::spawn_blocking(move || hasher.hash(&password))
        .await
        .map_err(anyhow::Error::from)??;

    let verification_ttl = state.config().verification_token_ttl_seconds();
    let outcome = insert_user(&pool, &email, &password_hash, verification_ttl).await?;

    match outcome {
        SignupOutcome::Created {
            user_id,
            verification_token,
        } => {
            state.audit().record(
                AuditEvent::new(Some(user_id), "user.registered", "user", "success")
                    .with_caller(client_ip, device_fingerprint(&headers)),
            );

            let message = MailMessage {
                to_email: email.clone(),
                template: "verify_email",
                payload_json: serde_json::json!({ "token": verification_token }).to_string(),
            };
            if let Err(err) = state.mail().send(&message) {
                // Registration already committed; the user can re-request.
                error!("failed to send verification mail: {err:?}");
            }

            Ok((
                StatusCode::CREATED,
                Json(UserResponse {
                    id: user_id,
                    email,
                    is_verified: false,
                }),
            ))
        }
        SignupOutcome::Conflict => Err(ApiError::Duplicate("user")),
    }
}
