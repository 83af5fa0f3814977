//! API error taxonomy with stable machine-readable codes.
//!
//! Expected, typed outcomes map straight to status codes and are safe to
//! show callers. Internal failures are logged server-side with full detail;
//! the caller only ever sees an opaque message plus the request id header
//! for correlation. Fail closed: an infra timeout during an auth check must
//! never look like a success.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use tracing::error;
use utoipa::ToSchema;

use crate::token::TokenError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0} already exists")]
    Duplicate(&'static str),
    /// Covers bad credentials and every flavor of rejected token. The
    /// concrete reason is recorded in the audit trail, never returned.
    #[error("authentication failed")]
    Authentication,
    #[error("insufficient permissions")]
    Authorization,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("rate limited")]
    RateLimited,
    #[error("payload too large")]
    PayloadTooLarge,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize, ToSchema)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Duplicate(_) => "duplicate_resource",
            Self::Authentication => "authentication_error",
            Self::Authorization => "authorization_error",
            Self::NotFound(_) => "not_found",
            Self::RateLimited => "rate_limited",
            Self::PayloadTooLarge => "payload_too_large",
            Self::Internal(_) => "internal_error",
        }
    }

    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Duplicate(_) => StatusCode::CONFLICT,
            Self::Authentication => StatusCode::UNAUTHORIZED,
            Self::Authorization => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(_: TokenError) -> Self {
        // No signal about why a token was rejected leaves the process.
        Self::Authentication
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        Self::Internal(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self {
            Self::Internal(err) => {
                error!("internal error: {err:?}");
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        let body = ErrorBody {
            code: self.code(),
            message,
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ApiError::Validation("x".into()).code(), "validation_error");
        assert_eq!(ApiError::Duplicate("user").code(), "duplicate_resource");
        assert_eq!(ApiError::Authentication.code(), "authentication_error");
        assert_eq!(ApiError::Authorization.code(), "authorization_error");
        assert_eq!(ApiError::NotFound("role").code(), "not_found");
        assert_eq!(ApiError::RateLimited.code(), "rate_limited");
        assert_eq!(ApiError::Internal(anyhow!("boom")).code(), "internal_error");
    }

    #[test]
    fn statuses_match_taxonomy() {
        assert_eq!(
            ApiError::Validation("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::Duplicate("user").status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::Authentication.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::Authorization.status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::NotFound("role").status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::RateLimited.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn every_token_error_collapses_to_authentication() {
        for err in [
            TokenError::Expired,
            TokenError::Malformed,
            TokenError::SignatureInvalid,
        ] {
            let api: ApiError = err.into();
            assert_eq!(api.code(), "authentication_error");
        }
    }

    #[test]
    fn internal_message_is_opaque() {
        let response = ApiError::Internal(anyhow!("dsn=postgres://secret")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
