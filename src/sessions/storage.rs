//! Database helpers for the session registry.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::SessionState;
use crate::token::{generate_refresh_token, hash_refresh_token};

/// Row shape for "your active devices" views.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub id: Uuid,
    pub device: String,
    pub client_ip: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// Result of a refresh rotation attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum RotateOutcome {
    /// The compare-and-swap won; the presented token was current.
    Rotated { user_id: Uuid },
    NotFound,
    Revoked,
    Expired,
    /// Active session, stale hash: the token was already rotated away.
    /// The session has been revoked as a compromise signal.
    Reused { user_id: Uuid },
}

fn unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

/// Create a session and return its id plus the raw refresh token.
/// Only the token hash is persisted; the raw value is returned once.
pub async fn create_session(
    pool: &PgPool,
    user_id: Uuid,
    device: &str,
    client_ip: Option<&str>,
    ttl_seconds: i64,
) -> Result<(Uuid, String)> {
    let query = r"
        INSERT INTO sessions (id, user_id, refresh_hash, device, client_ip, expires_at)
        VALUES ($1, $2, $3, $4, $5, NOW() + ($6 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );

    for _ in 0..3 {
        let session_id = Uuid::new_v4();
        let token = generate_refresh_token(session_id)?;
        let token_hash = hash_refresh_token(&token);
        let result = sqlx::query(query)
            .bind(session_id)
            .bind(user_id)
            .bind(&token_hash)
            .bind(device)
            .bind(client_ip)
            .bind(ttl_seconds)
            .execute(pool)
            .instrument(span.clone())
            .await;

        match result {
            Ok(_) => return Ok((session_id, token)),
            Err(err) if unique_violation(&err) => {}
            Err(err) => return Err(err).context("failed to insert session"),
        }
    }

    Err(anyhow!("failed to generate unique refresh token"))
}

/// Active, unexpired sessions for a user. Revoked/expired rows never show.
pub async fn list_active_sessions(pool: &PgPool, user_id: Uuid) -> Result<Vec<SessionSummary>> {
    let query = r"
        SELECT id, device, client_ip, created_at, expires_at, last_seen_at
        FROM sessions
        WHERE user_id = $1
          AND state = 'active'
          AND expires_at > NOW()
        ORDER BY created_at DESC
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(user_id)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list sessions")?;

    Ok(rows
        .into_iter()
        .map(|row| SessionSummary {
            id: row.get("id"),
            device: row.get("device"),
            client_ip: row.get("client_ip"),
            created_at: row.get("created_at"),
            expires_at: row.get("expires_at"),
            last_seen_at: row.get("last_seen_at"),
        })
        .collect())
}

/// Record activity without extending the session TTL. Best-effort: callers
/// spawn this and a missed touch never invalidates anything.
pub async fn touch_session(pool: &PgPool, session_id: Uuid) -> Result<()> {
    let query = "UPDATE sessions SET last_seen_at = NOW() WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(session_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to touch session")?;
    Ok(())
}

/// Revoke one session. Idempotent: revoking a non-active session is a no-op.
pub async fn revoke_session(pool: &PgPool, session_id: Uuid) -> Result<()> {
    let query = "UPDATE sessions SET state = 'revoked' WHERE id = $1 AND state = 'active'";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(session_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to revoke session")?;
    Ok(())
}

/// Revoke every active session for a user. Returns the number revoked.
pub async fn revoke_all_sessions(pool: &PgPool, user_id: Uuid) -> Result<u64> {
    let query = "UPDATE sessions SET state = 'revoked' WHERE user_id = $1 AND state = 'active'";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to revoke sessions")?;
    Ok(result.rows_affected())
}

/// Batch-transition overdue Active sessions to Expired.
pub async fn expire_sweep(pool: &PgPool) -> Result<u64> {
    let query = "UPDATE sessions SET state = 'expired' WHERE state = 'active' AND expires_at < NOW()";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to expire sessions")?;
    Ok(result.rows_affected())
}

/// Swap the stored refresh hash if and only if the presented hash is
/// current. On a miss the session row is re-read and the failure is
/// classified; an Active session with a different hash means the presented
/// token was already rotated away, which revokes the session.
pub async fn rotate_refresh(
    pool: &PgPool,
    session_id: Uuid,
    presented_hash: &[u8],
    new_hash: &[u8],
) -> Result<RotateOutcome> {
    let query = r"
        UPDATE sessions
        SET refresh_hash = $1, last_seen_at = NOW()
        WHERE id = $2
          AND refresh_hash = $3
          AND state = 'active'
          AND expires_at > NOW()
        RETURNING user_id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(new_hash)
        .bind(session_id)
        .bind(presented_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to rotate refresh token")?;

    if let Some(row) = row {
        return Ok(RotateOutcome::Rotated {
            user_id: row.get("user_id"),
        });
    }

    let query = r"
        SELECT user_id, state::text AS state, expires_at
        FROM sessions
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(session_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to inspect session after rotation miss")?;

    let Some(row) = row else {
        return Ok(RotateOutcome::NotFound);
    };

    let user_id: Uuid = row.get("user_id");
    let state: String = row.get("state");
    let expires_at: DateTime<Utc> = row.get("expires_at");

    let outcome = classify_rotation_miss(
        SessionState::parse(&state).unwrap_or(SessionState::Revoked),
        expires_at,
        Utc::now(),
        user_id,
    );

    if let RotateOutcome::Reused { .. } = outcome {
        revoke_session(pool, session_id).await?;
    }

    Ok(outcome)
}

/// Classify a rotation attempt that lost the compare-and-swap.
fn classify_rotation_miss(
    state: SessionState,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
    user_id: Uuid,
) -> RotateOutcome {
    match state {
        SessionState::Revoked => RotateOutcome::Revoked,
        SessionState::Expired => RotateOutcome::Expired,
        SessionState::Active if expires_at <= now => RotateOutcome::Expired,
        SessionState::Active => RotateOutcome::Reused { user_id },
    }
}
