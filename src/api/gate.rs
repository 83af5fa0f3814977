//! Security gate: the per-request pipeline in front of guarded operations.
//!
//! Order: rate limit → payload size/shape (body-limit layer + serde-typed
//! bodies) → access-token verification → declared permission requirement →
//! device fingerprint capture. Any failure short-circuits; only a full pass
//! reaches the handler.
//!
//! Permission requirements are static consts declared next to the handlers
//! that need them, never resolved by name at request time.

use axum::http::{HeaderMap, header::AUTHORIZATION};
use sqlx::PgPool;
use uuid::Uuid;

use super::error::ApiError;
use super::state::AppState;
use crate::audit::AuditEvent;
use crate::sessions::touch_session;

/// A route's declared permission requirement.
#[derive(Clone, Copy, Debug)]
pub struct Requirement {
    pub resource: &'static str,
    pub action: &'static str,
}

pub const MANAGE_RBAC: Requirement = Requirement {
    resource: "rbac",
    action: "manage",
};

pub const READ_AUDIT: Requirement = Requirement {
    resource: "audit",
    action: "read",
};

/// Authenticated caller context derived from a verified access token.
#[derive(Clone, Debug)]
pub struct Principal {
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub roles: Vec<String>,
}

/// Verify the bearer access token and return the caller's principal.
///
/// Session activity is recorded best-effort in the background; verification
/// itself never touches the database.
///
/// # Errors
/// `ApiError::Authentication` for a missing or rejected token. The concrete
/// rejection reason goes to the audit trail only.
pub fn require_auth(
    headers: &HeaderMap,
    state: &AppState,
    pool: &PgPool,
) -> Result<Principal, ApiError> {
    let Some(token) = extract_bearer_token(headers) else {
        return Err(ApiError::Authentication);
    };

    let claims = match state.tokens().verify_access(&token) {
        Ok(claims) => claims,
        Err(err) => {
            state.audit().record(
                AuditEvent::new(None, "auth.token_rejected", "auth", err.to_string())
                    .with_caller(extract_client_ip(headers), device_fingerprint(headers)),
            );
            return Err(ApiError::Authentication);
        }
    };

    // Best-effort: a missed touch never invalidates anything.
    let session_id = claims.sid;
    let touch_pool = pool.clone();
    tokio::spawn(async move {
        if let Err(err) = touch_session(&touch_pool, session_id).await {
            tracing::debug!("session touch failed: {err}");
        }
    });

    Ok(Principal {
        user_id: claims.sub,
        session_id: claims.sid,
        roles: claims.roles,
    })
}

/// Enforce a route's declared permission requirement.
///
/// # Errors
/// `ApiError::Authorization` when the effective set lacks the capability;
/// `ApiError::Internal` if the permission source fails (fail closed).
pub async fn require_permission(
    state: &AppState,
    principal: &Principal,
    requirement: Requirement,
) -> Result<(), ApiError> {
    let allowed = state
        .evaluator()
        .check(principal.user_id, requirement.resource, requirement.action)
        .await?;
    if allowed { Ok(()) } else { Err(ApiError::Authorization) }
}

pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Extract a client IP for rate limiting from common proxy headers.
pub fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Device descriptor captured for the session registry: the user agent,
/// bounded so a hostile header can't bloat rows.
pub fn device_fingerprint(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| value.chars().take(256).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));
        assert_eq!(extract_bearer_token(&headers), Some("abc123".to_string()));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("bearer xyz"));
        assert_eq!(extract_bearer_token(&headers), Some("xyz".to_string()));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(extract_bearer_token(&headers), None);
    }

    #[test]
    fn client_ip_prefers_forwarded() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.2.3.4, 5.6.7.8"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(extract_client_ip(&headers), Some("1.2.3.4".to_string()));
    }

    #[test]
    fn client_ip_falls_back_then_none() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(extract_client_ip(&headers), Some("9.9.9.9".to_string()));
        assert_eq!(extract_client_ip(&HeaderMap::new()), None);
    }

    #[test]
    fn device_fingerprint_is_bounded() {
        let mut headers = HeaderMap::new();
        let long = "a".repeat(1000);
        headers.insert(
            axum::http::header::USER_AGENT,
            HeaderValue::from_str(&long).expect("header value"),
        );
        let fingerprint = device_fingerprint(&headers).expect("fingerprint");
        assert_eq!(fingerprint.len(), 256);

        assert_eq!(device_fingerprint(&HeaderMap::new()), None);
    }
}
