//! # Warden (Authorization & Session Lifecycle)
//!
//! `warden` answers two questions for any client: *is this caller who they
//! claim to be*, and *are they allowed to do X*. It verifies credentials,
//! issues and rotates token pairs, tracks sessions per device, resolves
//! role-based permissions, and keeps an append-only audit trail of
//! security-relevant actions.
//!
//! ## Tokens
//!
//! - **Access tokens** are short-lived HS256 JWTs carrying the user id, the
//!   session id, and a role-name snapshot. Verification is a pure
//!   signature + expiry check with zero leeway; no database lookup on the
//!   hot path.
//! - **Refresh tokens** are opaque, high-entropy strings persisted only as
//!   a SHA-256 hash on the session row. Rotation swaps the stored hash with
//!   a compare-and-swap; presenting an already-rotated token is treated as
//!   theft and revokes the whole session.
//!
//! ## Sessions
//!
//! One row per authenticated device. `Active` sessions may rotate; `Expired`
//! and `Revoked` are terminal, a new login always creates a new session.
//! Logout is idempotent and logout-all revokes every active device.
//!
//! ## Authorization (RBAC)
//!
//! A user's effective permission set is the union of `(resource, action)`
//! pairs over all currently assigned roles. Checks are exact-match only.
//! The per-user cache has a short TTL and is invalidated synchronously by
//! every role/permission mutation, so a revoke is never honored after the
//! mutating call returns.
//!
//! ## Error policy
//!
//! Login failures never distinguish unknown accounts from wrong passwords,
//! and all token rejections surface as a single authentication error; the
//! audit trail records the true reason internally.

pub mod api;
pub mod audit;
pub mod cli;
pub mod credentials;
pub mod mail;
pub mod rate_limit;
pub mod rbac;
pub mod sessions;
pub mod token;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
