//! Token service: signed access tokens and opaque refresh tokens.
//!
//! Access tokens are stateless HS256 JWTs; verifying one is a pure
//! signature + expiry check with zero leeway and no persistence lookup.
//! Claims embed a role-name snapshot rather than raw permissions to keep
//! token size bounded.
//!
//! Refresh tokens are `<session-uuid>.<random>`: the embedded session id
//! lets rotation locate the session row, and only the SHA-256 hash of the
//! whole string is ever persisted. Presenting a refresh token whose hash no
//! longer matches the stored one is treated as reuse of a stolen token.
//! Because reuse revokes the session, only tokens whose secret half carries
//! the full 32 random bytes ever reach the rotation path; a session id
//! alone (it rides in every access token) is not enough to trip it.

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use rand::{RngCore, rngs::OsRng};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use ulid::Ulid;
use uuid::Uuid;

pub const DEFAULT_ISSUER: &str = "warden";
pub const DEFAULT_AUDIENCE: &str = "warden-clients";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("malformed token")]
    Malformed,
    #[error("invalid signature")]
    SignatureInvalid,
}

/// Access-token claims. `sid` ties the token to the issuing session so the
/// gate can record activity without a database round trip on verify.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: Uuid,
    pub sid: Uuid,
    pub roles: Vec<String>,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
    access_ttl_seconds: i64,
}

impl TokenService {
    #[must_use]
    pub fn new(signing_secret: &SecretString, access_ttl_seconds: i64) -> Self {
        let secret = signing_secret.expose_secret().as_bytes();
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer: DEFAULT_ISSUER.to_string(),
            audience: DEFAULT_AUDIENCE.to_string(),
            access_ttl_seconds,
        }
    }

    #[must_use]
    pub fn access_ttl_seconds(&self) -> i64 {
        self.access_ttl_seconds
    }

    /// Sign a fresh access token for the user/session.
    ///
    /// # Errors
    /// Returns an error if JWT encoding fails.
    pub fn issue_access(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        roles: Vec<String>,
    ) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user_id,
            sid: session_id,
            roles,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now,
            exp: now + self.access_ttl_seconds,
            jti: Ulid::new().to_string(),
        };
        self.sign(&claims)
    }

    fn sign(&self, claims: &Claims) -> Result<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .context("failed to sign access token")
    }

    /// Verify signature, issuer, audience, and expiry. Zero leeway: a token
    /// one second past expiry is rejected.
    ///
    /// # Errors
    /// Returns [`TokenError`] describing why the token was rejected. Callers
    /// facing the network collapse all variants into one authentication
    /// error; the specific reason is for the audit trail.
    pub fn verify_access(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);

        match decode::<Claims>(token, &self.decoding_key, &validation) {
            Ok(data) => Ok(data.claims),
            Err(err) => Err(match err.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::InvalidSignature => TokenError::SignatureInvalid,
                _ => TokenError::Malformed,
            }),
        }
    }
}

/// Create a refresh token bound to a session.
///
/// # Errors
/// Returns an error if the OS entropy source fails.
pub fn generate_refresh_token(session_id: Uuid) -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate refresh token")?;
    Ok(format!("{session_id}.{}", URL_SAFE_NO_PAD.encode(bytes)))
}

/// Extract the session id a refresh token claims to belong to.
/// The claim is only trusted after the token hash matches the stored one.
/// The secret half must decode to the full 32 bytes; a fabricated
/// `<sid>.<junk>` value is rejected here instead of being classified as
/// reuse, which would revoke a live session.
#[must_use]
pub fn refresh_token_session_id(token: &str) -> Option<Uuid> {
    let (sid, secret) = token.split_once('.')?;
    let decoded = URL_SAFE_NO_PAD.decode(secret).ok()?;
    if decoded.len() != 32 {
        return None;
    }
    Uuid::parse_str(sid).ok()
}

/// Hash a refresh token so raw values never touch the database.
#[must_use]
pub fn hash_refresh_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> TokenService {
        TokenService::new(
            &SecretString::from("0123456789abcdef0123456789abcdef"),
            900,
        )
    }

    #[test]
    fn issue_and_verify_round_trip() {
        let service = service();
        let user = Uuid::new_v4();
        let session = Uuid::new_v4();
        let token = service
            .issue_access(user, session, vec!["editor".to_string()])
            .expect("issue should succeed");

        let claims = service.verify_access(&token).expect("verify should succeed");
        assert_eq!(claims.sub, user);
        assert_eq!(claims.sid, session);
        assert_eq!(claims.roles, vec!["editor".to_string()]);
        assert_eq!(claims.iss, DEFAULT_ISSUER);
        assert_eq!(claims.exp - claims.iat, 900);
    }

    #[test]
    fn verify_rejects_wrong_secret() {
        let token = service()
            .issue_access(Uuid::new_v4(), Uuid::new_v4(), vec![])
            .expect("issue should succeed");
        let other = TokenService::new(
            &SecretString::from("ffffffffffffffffffffffffffffffff"),
            900,
        );
        assert_eq!(
            other.verify_access(&token),
            Err(TokenError::SignatureInvalid)
        );
    }

    #[test]
    fn verify_rejects_garbage() {
        assert_eq!(
            service().verify_access("not.a.jwt"),
            Err(TokenError::Malformed)
        );
    }

    #[test]
    fn expiry_boundary_is_strict() {
        let service = service();
        let now = Utc::now().timestamp();
        let base = Claims {
            sub: Uuid::new_v4(),
            sid: Uuid::new_v4(),
            roles: vec![],
            iss: DEFAULT_ISSUER.to_string(),
            aud: DEFAULT_AUDIENCE.to_string(),
            iat: now - 60,
            exp: now - 1,
            jti: Ulid::new().to_string(),
        };

        // One second past expiry: rejected, no leeway.
        let expired = service.sign(&base).expect("sign should succeed");
        assert_eq!(service.verify_access(&expired), Err(TokenError::Expired));

        // One second before expiry: accepted.
        let mut live = base;
        live.exp = now + 1;
        let live_token = service.sign(&live).expect("sign should succeed");
        assert!(service.verify_access(&live_token).is_ok());
    }

    #[test]
    fn verify_rejects_wrong_audience() {
        let service = service();
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: Uuid::new_v4(),
            sid: Uuid::new_v4(),
            roles: vec![],
            iss: DEFAULT_ISSUER.to_string(),
            aud: "someone-else".to_string(),
            iat: now,
            exp: now + 60,
            jti: Ulid::new().to_string(),
        };
        let token = service.sign(&claims).expect("sign should succeed");
        assert_eq!(service.verify_access(&token), Err(TokenError::Malformed));
    }

    #[test]
    fn refresh_token_embeds_session_id() {
        let session = Uuid::new_v4();
        let token = generate_refresh_token(session).expect("generation should succeed");
        assert_eq!(refresh_token_session_id(&token), Some(session));
    }

    #[test]
    fn refresh_token_parse_rejects_malformed() {
        assert_eq!(refresh_token_session_id("no-separator"), None);
        assert_eq!(refresh_token_session_id("not-a-uuid.abcd"), None);
        assert_eq!(
            refresh_token_session_id(&format!("{}.", Uuid::new_v4())),
            None
        );
    }

    #[test]
    fn refresh_token_parse_rejects_fabricated_secret() {
        // A session id with a junk secret must never reach rotation,
        // where a hash mismatch on a live session means revocation.
        let sid = Uuid::new_v4();
        assert_eq!(refresh_token_session_id(&format!("{sid}.garbage!")), None);
        assert_eq!(
            refresh_token_session_id(&format!("{sid}.{}", URL_SAFE_NO_PAD.encode([7u8; 8]))),
            None
        );
        assert_eq!(
            refresh_token_session_id(&format!("{sid}.{}", URL_SAFE_NO_PAD.encode([7u8; 33]))),
            None
        );
    }

    #[test]
    fn refresh_hash_is_stable_and_distinct() {
        let token = generate_refresh_token(Uuid::new_v4()).expect("generation should succeed");
        let other = generate_refresh_token(Uuid::new_v4()).expect("generation should succeed");
        assert_eq!(hash_refresh_token(&token), hash_refresh_token(&token));
        assert_ne!(hash_refresh_token(&token), hash_refresh_token(&other));
    }
}
