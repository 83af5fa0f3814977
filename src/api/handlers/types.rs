//! Request and response bodies shared across handlers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

#[derive(ToSchema, Deserialize, Debug)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub is_verified: bool,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    /// Optional caller-supplied device label; falls back to the user agent.
    pub device: Option<String>,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct TokenPairResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct SessionResponse {
    pub id: Uuid,
    pub device: Option<String>,
    pub client_ip: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct VerifyEmailRequest {
    pub token: String,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct ResetRequest {
    pub email: String,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct ResetConfirmRequest {
    pub token: String,
    pub new_password: String,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct CreateRoleRequest {
    pub name: String,
    pub label: Option<String>,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct RoleResponse {
    pub id: Uuid,
    pub name: String,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct AssignRoleRequest {
    pub role: String,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct GrantPermissionRequest {
    pub resource: String,
    pub action: String,
    pub label: Option<String>,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct RevokePermissionRequest {
    pub resource: String,
    pub action: String,
}

#[derive(ToSchema, IntoParams, Deserialize, Debug, Default)]
pub struct AuditQueryParams {
    pub actor_id: Option<Uuid>,
    pub action: Option<String>,
    pub resource: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct MessageResponse {
    pub message: &'static str,
}

impl MessageResponse {
    #[must_use]
    pub const fn new(message: &'static str) -> Self {
        Self { message }
    }
}
