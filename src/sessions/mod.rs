//! Session registry: one row per authenticated device.
//!
//! A session holds the hash of its current refresh token. `Active` sessions
//! rotate in place; `Expired` and `Revoked` are terminal states, so a new
//! login always creates a new session.
//!
//! Rotation is the one place correctness depends on a transactional
//! guarantee: the stored hash is swapped with a compare-and-swap `UPDATE`,
//! so two concurrent rotations of the same token produce exactly one
//! success. The loser (and any holder of an already-rotated token) trips
//! reuse detection, which revokes the whole session.

mod storage;

pub use storage::{
    RotateOutcome, SessionSummary, create_session, expire_sweep, list_active_sessions,
    revoke_all_sessions, revoke_session, rotate_refresh, touch_session,
};

use sqlx::PgPool;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info};

/// Session lifecycle states as stored in Postgres.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Expired,
    Revoked,
}

impl SessionState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "expired" => Some(Self::Expired),
            "revoked" => Some(Self::Revoked),
            _ => None,
        }
    }
}

/// Periodically transition overdue Active sessions to Expired.
///
/// The sweep is idempotent; a missed or doubled run never corrupts state.
pub fn spawn_expiry_sweeper(pool: PgPool, interval: Duration) {
    tokio::spawn(async move {
        loop {
            sleep(interval).await;
            match expire_sweep(&pool).await {
                Ok(0) => {}
                Ok(count) => info!(count, "expired stale sessions"),
                Err(err) => error!("session expiry sweep failed: {err}"),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_state_round_trips() {
        for state in [
            SessionState::Active,
            SessionState::Expired,
            SessionState::Revoked,
        ] {
            assert_eq!(SessionState::parse(state.as_str()), Some(state));
        }
        assert_eq!(SessionState::parse("bogus"), None);
    }
}
