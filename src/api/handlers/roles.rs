use axum::{
    Json,
    extract::{Extension, Path},
    http::HeaderMap,
    http::StatusCode,
    response::IntoResponse,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use super::types::{
    AssignRoleRequest, CreateRoleRequest, GrantPermissionRequest, MessageResponse,
    RevokePermissionRequest, RoleResponse,
};
use crate::api::error::ApiError;
use crate::api::gate::{
    MANAGE_RBAC, device_fingerprint, extract_client_ip, require_auth, require_permission,
};
use crate::api::state::AppState;
use crate::audit::AuditEvent;
use crate::rbac::{
    AssignOutcome, CreateRoleOutcome, GrantOutcome, PermissionKey, RemoveOutcome, RevokeOutcome,
    assign_role, create_role, grant_permission, remove_role, revoke_permission, users_with_role,
};

fn valid_slug(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 64
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

#[utoipa::path(
    post,
    path = "/v1/roles",
    request_body = CreateRoleRequest,
    responses(
        (status = 201, description = "Role created", body = RoleResponse),
        (status = 403, description = "Caller lacks rbac:manage"),
        (status = 409, description = "Role name already exists"),
    ),
    tag = "rbac",
    security(("bearer" = []))
)]
#[instrument(skip(pool, state, headers, payload))]
pub async fn create(
    pool: Extension<PgPool>,
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    payload: Option<Json<CreateRoleRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_auth(&headers, &state, &pool)?;
    require_permission(&state, &principal, MANAGE_RBAC).await?;

    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("missing payload".to_string()));
    };
    if !valid_slug(&request.name) {
        return Err(ApiError::Validation("invalid role name".to_string()));
    }

    let label = request.label.as_deref().unwrap_or(&request.name);
    match create_role(&pool, &request.name, label).await? {
        CreateRoleOutcome::Created(id) => {
            state.audit().record(
                AuditEvent::new(Some(principal.user_id), "rbac.role_created", "role", "success")
                    .with_caller(extract_client_ip(&headers), device_fingerprint(&headers)),
            );
            Ok((
                StatusCode::CREATED,
                Json(RoleResponse {
                    id,
                    name: request.name,
                }),
            ))
        }
        CreateRoleOutcome::Conflict => Err(ApiError::Duplicate("role")),
    }
}

#[utoipa::path(
    post,
    path = "/v1/users/{user_id}/roles",
    request_body = AssignRoleRequest,
    params(("user_id" = Uuid, Path, description = "User to grant the role to")),
    responses(
        (status = 200, description = "Role assigned", body = MessageResponse),
        (status = 403, description = "Caller lacks rbac:manage"),
        (status = 404, description = "Role or user not found"),
    ),
    tag = "rbac",
    security(("bearer" = []))
)]
#[instrument(skip(pool, state, headers, payload))]
pub async fn assign(
    pool: Extension<PgPool>,
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
    payload: Option<Json<AssignRoleRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_auth(&headers, &state, &pool)?;
    require_permission(&state, &principal, MANAGE_RBAC).await?;

    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("missing payload".to_string()));
    };

    match assign_role(&pool, user_id, &request.role).await? {
        AssignOutcome::Assigned | AssignOutcome::AlreadyAssigned => {
            // The cache must not serve the old set once the caller sees 200.
            state.evaluator().invalidate(user_id).await;
            state.audit().record(
                AuditEvent::new(
                    Some(principal.user_id),
                    "rbac.role_assigned",
                    "user_role",
                    format!("{user_id}:{}", request.role),
                )
                .with_caller(extract_client_ip(&headers), device_fingerprint(&headers)),
            );
            Ok(Json(MessageResponse::new("role assigned")))
        }
        AssignOutcome::RoleNotFound => Err(ApiError::NotFound("role")),
        AssignOutcome::UserNotFound => Err(ApiError::NotFound("user")),
    }
}

#[utoipa::path(
    delete,
    path = "/v1/users/{user_id}/roles/{role}",
    params(
        ("user_id" = Uuid, Path, description = "User to remove the role from"),
        ("role" = String, Path, description = "Role name"),
    ),
    responses(
        (status = 200, description = "Role removed", body = MessageResponse),
        (status = 403, description = "Caller lacks rbac:manage"),
        (status = 404, description = "Role not found or not assigned"),
    ),
    tag = "rbac",
    security(("bearer" = []))
)]
#[instrument(skip(pool, state, headers))]
pub async fn remove(
    pool: Extension<PgPool>,
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    Path((user_id, role)): Path<(Uuid, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_auth(&headers, &state, &pool)?;
    require_permission(&state, &principal, MANAGE_RBAC).await?;

    match remove_role(&pool, user_id, &role).await? {
        RemoveOutcome::Removed => {
            state.evaluator().invalidate(user_id).await;
            state.audit().record(
                AuditEvent::new(
                    Some(principal.user_id),
                    "rbac.role_removed",
                    "user_role",
                    format!("{user_id}:{role}"),
                )
                .with_caller(extract_client_ip(&headers), device_fingerprint(&headers)),
            );
            Ok(Json(MessageResponse::new("role removed")))
        }
        RemoveOutcome::NotAssigned | RemoveOutcome::RoleNotFound => Err(ApiError::NotFound("role")),
    }
}

#[utoipa::path(
    post,
    path = "/v1/roles/{role}/permissions",
    request_body = GrantPermissionRequest,
    params(("role" = String, Path, description = "Role to grant the permission to")),
    responses(
        (status = 200, description = "Permission granted", body = MessageResponse),
        (status = 403, description = "Caller lacks rbac:manage"),
        (status = 404, description = "Role not found"),
    ),
    tag = "rbac",
    security(("bearer" = []))
)]
#[instrument(skip(pool, state, headers, payload))]
pub async fn grant(
    pool: Extension<PgPool>,
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    Path(role): Path<String>,
    payload: Option<Json<GrantPermissionRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_auth(&headers, &state, &pool)?;
    require_permission(&state, &principal, MANAGE_RBAC).await?;

    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("missing payload".to_string()));
    };
    if !valid_slug(&request.resource) || !valid_slug(&request.action) {
        return Err(ApiError::Validation("invalid permission key".to_string()));
    }

    let key = PermissionKey::new(request.resource, request.action);
    let label = request.label.clone().unwrap_or_else(|| key.to_string());

    match grant_permission(&pool, &role, &key, &label).await? {
        GrantOutcome::Granted | GrantOutcome::AlreadyGranted => {
            invalidate_role_members(&pool, &state, &role).await?;
            state.audit().record(
                AuditEvent::new(
                    Some(principal.user_id),
                    "rbac.permission_granted",
                    "role_permission",
                    format!("{role}:{key}"),
                )
                .with_caller(extract_client_ip(&headers), device_fingerprint(&headers)),
            );
            Ok(Json(MessageResponse::new("permission granted")))
        }
        GrantOutcome::RoleNotFound => Err(ApiError::NotFound("role")),
    }
}

#[utoipa::path(
    delete,
    path = "/v1/roles/{role}/permissions",
    request_body = RevokePermissionRequest,
    params(("role" = String, Path, description = "Role to revoke the permission from")),
    responses(
        (status = 200, description = "Permission revoked", body = MessageResponse),
        (status = 403, description = "Caller lacks rbac:manage"),
        (status = 404, description = "Role not found or permission not granted"),
    ),
    tag = "rbac",
    security(("bearer" = []))
)]
#[instrument(skip(pool, state, headers, payload))]
pub async fn revoke(
    pool: Extension<PgPool>,
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    Path(role): Path<String>,
    payload: Option<Json<RevokePermissionRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_auth(&headers, &state, &pool)?;
    require_permission(&state, &principal, MANAGE_RBAC).await?;

    let Some(Json(request)) = payload else {
        return Err(ApiError::Validation("missing payload".to_string()));
    };

    let key = PermissionKey::new(request.resource, request.action);
    match revoke_permission(&pool, &role, &key).await? {
        RevokeOutcome::Revoked => {
            invalidate_role_members(&pool, &state, &role).await?;
            state.audit().record(
                AuditEvent::new(
                    Some(principal.user_id),
                    "rbac.permission_revoked",
                    "role_permission",
                    format!("{role}:{key}"),
                )
                .with_caller(extract_client_ip(&headers), device_fingerprint(&headers)),
            );
            Ok(Json(MessageResponse::new("permission revoked")))
        }
        RevokeOutcome::NotGranted | RevokeOutcome::RoleNotFound => Err(ApiError::NotFound("role")),
    }
}

/// A role-level change affects every member; drop their cached sets before
/// answering so no caller observes the pre-change permissions after the 200.
async fn invalidate_role_members(
    pool: &PgPool,
    state: &AppState,
    role: &str,
) -> Result<(), ApiError> {
    for user_id in users_with_role(pool, role).await? {
        state.evaluator().invalidate(user_id).await;
    }
    Ok(())
}
