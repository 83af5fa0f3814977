//! Integration tests against a transient Postgres container.
//!
//! The storage test links the library directly to race two rotations of the
//! same refresh token. The HTTP tests spawn the actual `warden` binary and
//! drive it with real requests. All tests skip when no container runtime is
//! available.

mod support;

use anyhow::{Context, Result, bail};
use reqwest::StatusCode;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::{
    net::TcpListener,
    process::{Child, Command, Stdio},
    time::Duration,
};
use support::PostgresContainer;
use tokio::time::sleep;
use uuid::Uuid;
use warden::sessions::{RotateOutcome, create_session, rotate_refresh};
use warden::token::{generate_refresh_token, hash_refresh_token};

const SIGNING_SECRET: &str = "0f1e2d3c4b5a69788796a5b4c3d2e1f0deadbeefcafe";
const PASSWORD: &str = "Sup3r-secret-pw";

struct ChildGuard(Child);

impl Drop for ChildGuard {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn pick_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").context("Failed to bind a local port")?;
    Ok(listener
        .local_addr()
        .context("Failed to read local port")?
        .port())
}

fn spawn_server(port: u16, dsn: &str) -> Result<ChildGuard> {
    let mut command = Command::new(env!("CARGO_BIN_EXE_warden"));
    // Clear conflicting env vars that might leak from the host.
    for var in [
        "WARDEN_PORT",
        "WARDEN_DSN",
        "WARDEN_SIGNING_SECRET",
        "WARDEN_LOG_LEVEL",
        "OTEL_EXPORTER_OTLP_ENDPOINT",
    ] {
        command.env_remove(var);
    }

    let child = command
        .args([
            "--port",
            &port.to_string(),
            "--dsn",
            dsn,
            "--signing-secret",
            SIGNING_SECRET,
        ])
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .context("Failed to spawn warden binary")?;

    Ok(ChildGuard(child))
}

async fn wait_for_ready(client: &reqwest::Client, base: &str) -> Result<()> {
    for _ in 0..40 {
        match client.get(format!("{base}/health")).send().await {
            Ok(resp) if resp.status().is_success() => return Ok(()),
            _ => sleep(Duration::from_millis(250)).await,
        }
    }
    bail!("warden did not become ready at {base}");
}

async fn login(
    client: &reqwest::Client,
    base: &str,
    email: &str,
    password: &str,
    device: &str,
) -> Result<(String, String)> {
    let resp = client
        .post(format!("{base}/v1/auth/login"))
        .json(&json!({ "email": email, "password": password, "device": device }))
        .send()
        .await?;
    if resp.status() != StatusCode::OK {
        bail!("login for {device} failed with {}", resp.status());
    }
    let body: Value = resp.json().await?;
    let access = body["access_token"]
        .as_str()
        .context("missing access_token")?
        .to_string();
    let refresh = body["refresh_token"]
        .as_str()
        .context("missing refresh_token")?
        .to_string();
    Ok((access, refresh))
}

#[tokio::test]
async fn concurrent_rotation_has_single_winner() -> Result<()> {
    if let Err(err) = support::ensure_container_runtime() {
        eprintln!("Skipping integration test: {err}");
        return Ok(());
    }

    let postgres = PostgresContainer::start().await?;
    let pool = postgres.pool_with_schema().await?;

    let user_id: Uuid = sqlx::query_scalar(
        "INSERT INTO users (email, password_hash) VALUES ('race@example.com', 'x') RETURNING id",
    )
    .fetch_one(&pool)
    .await?;

    let (session_id, token) = create_session(&pool, user_id, "laptop", None, 3600).await?;
    let presented = hash_refresh_token(&token);
    let first_new = hash_refresh_token(&generate_refresh_token(session_id)?);
    let second_new = hash_refresh_token(&generate_refresh_token(session_id)?);

    // Both devices present the same current token at once.
    let (first, second) = tokio::join!(
        rotate_refresh(&pool, session_id, &presented, &first_new),
        rotate_refresh(&pool, session_id, &presented, &second_new),
    );
    let (first, second) = (first?, second?);

    let rotated = |outcome: &RotateOutcome| matches!(outcome, RotateOutcome::Rotated { .. });
    let reused = |outcome: &RotateOutcome| matches!(outcome, RotateOutcome::Reused { .. });
    assert!(
        (rotated(&first) && reused(&second)) || (reused(&first) && rotated(&second)),
        "expected exactly one winner, got {first:?} and {second:?}"
    );

    // Reuse revoked the whole session, so even the winner's replacement
    // token is dead.
    let winner_hash = if rotated(&first) { &first_new } else { &second_new };
    let next = rotate_refresh(&pool, session_id, winner_hash, &hash_refresh_token("next")).await?;
    assert_eq!(next, RotateOutcome::Revoked);

    Ok(())
}

#[tokio::test]
async fn duplicate_register_conflicts_and_logout_all_revokes_devices() -> Result<()> {
    if let Err(err) = support::ensure_container_runtime() {
        eprintln!("Skipping integration test: {err}");
        return Ok(());
    }

    let postgres = PostgresContainer::start().await?;
    let _pool = postgres.pool_with_schema().await?;
    let port = pick_port()?;
    let _child = spawn_server(port, &postgres.dsn())?;

    let client = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{port}");
    wait_for_ready(&client, &base).await?;

    let credentials = json!({ "email": "ada@example.com", "password": PASSWORD });
    let resp = client
        .post(format!("{base}/v1/auth/register"))
        .json(&credentials)
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::CREATED);

    // Same email again: conflict with the stable error code.
    let resp = client
        .post(format!("{base}/v1/auth/register"))
        .json(&credentials)
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = resp.json().await?;
    assert_eq!(body["code"], "duplicate_resource");

    let (access, refresh_laptop) =
        login(&client, &base, "ada@example.com", PASSWORD, "laptop").await?;
    let (_, refresh_phone) = login(&client, &base, "ada@example.com", PASSWORD, "phone").await?;

    let resp = client
        .post(format!("{base}/v1/auth/logout-all"))
        .bearer_auth(&access)
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);

    // Both devices' refresh tokens are dead now.
    for refresh_token in [refresh_laptop, refresh_phone] {
        let resp = client
            .post(format!("{base}/v1/auth/refresh"))
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await?;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    Ok(())
}

#[tokio::test]
async fn password_reset_revokes_sessions_and_sets_new_password() -> Result<()> {
    if let Err(err) = support::ensure_container_runtime() {
        eprintln!("Skipping integration test: {err}");
        return Ok(());
    }

    let postgres = PostgresContainer::start().await?;
    let pool = postgres.pool_with_schema().await?;
    let port = pick_port()?;
    let _child = spawn_server(port, &postgres.dsn())?;

    let client = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{port}");
    wait_for_ready(&client, &base).await?;

    let resp = client
        .post(format!("{base}/v1/auth/register"))
        .json(&json!({ "email": "grace@example.com", "password": PASSWORD }))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let (_, refresh_token) = login(&client, &base, "grace@example.com", PASSWORD, "laptop").await?;

    // Seed a reset token directly; the raw value normally leaves via mail.
    let raw_token = "integration-reset-token";
    let token_hash = Sha256::digest(raw_token.as_bytes()).to_vec();
    let user_id: Uuid = sqlx::query_scalar("SELECT id FROM users WHERE email = $1")
        .bind("grace@example.com")
        .fetch_one(&pool)
        .await?;
    sqlx::query(
        r"
        INSERT INTO password_reset_tokens (user_id, token_hash, expires_at)
        VALUES ($1, $2, NOW() + INTERVAL '15 minutes')
        ",
    )
    .bind(user_id)
    .bind(&token_hash)
    .execute(&pool)
    .await?;

    let new_password = "An0ther-secret-pw";
    let resp = client
        .post(format!("{base}/v1/auth/password-reset/confirm"))
        .json(&json!({ "token": raw_token, "new_password": new_password }))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);

    // The pre-reset session must not survive the reset.
    let resp = client
        .post(format!("{base}/v1/auth/refresh"))
        .json(&json!({ "refresh_token": refresh_token }))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // Old credential gone, new one works.
    let resp = client
        .post(format!("{base}/v1/auth/login"))
        .json(&json!({ "email": "grace@example.com", "password": PASSWORD }))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    login(&client, &base, "grace@example.com", new_password, "laptop").await?;

    Ok(())
}
