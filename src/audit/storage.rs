//! Database helpers for the audit trail.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::Instrument;
use utoipa::ToSchema;
use uuid::Uuid;

use super::AuditEvent;

const DEFAULT_PAGE_LIMIT: i64 = 50;
const MAX_PAGE_LIMIT: i64 = 500;

/// Stored audit row.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AuditEntry {
    pub id: Uuid,
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub resource: String,
    pub outcome: String,
    pub client_ip: Option<String>,
    pub device: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Query filters; all optional, combined with AND.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub actor_id: Option<Uuid>,
    pub action: Option<String>,
    pub resource: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub(super) fn clamp_limit(limit: Option<i64>) -> i64 {
    limit
        .unwrap_or(DEFAULT_PAGE_LIMIT)
        .clamp(1, MAX_PAGE_LIMIT)
}

pub(super) async fn insert(pool: &PgPool, event: &AuditEvent) -> Result<()> {
    let query = r"
        INSERT INTO audit_log (actor_id, action, resource, outcome, client_ip, device)
        VALUES ($1, $2, $3, $4, $5, $6)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(event.actor_id)
        .bind(&event.action)
        .bind(&event.resource)
        .bind(&event.outcome)
        .bind(&event.client_ip)
        .bind(&event.device)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to insert audit row")?;
    Ok(())
}

/// Filtered, newest-first page of audit entries.
pub async fn query(pool: &PgPool, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
        "SELECT id, actor_id, action, resource, outcome, client_ip, device, recorded_at \
         FROM audit_log WHERE TRUE",
    );

    if let Some(actor_id) = filter.actor_id {
        builder.push(" AND actor_id = ").push_bind(actor_id);
    }
    if let Some(action) = &filter.action {
        builder.push(" AND action = ").push_bind(action);
    }
    if let Some(resource) = &filter.resource {
        builder.push(" AND resource = ").push_bind(resource);
    }
    if let Some(from) = filter.from {
        builder.push(" AND recorded_at >= ").push_bind(from);
    }
    if let Some(to) = filter.to {
        builder.push(" AND recorded_at < ").push_bind(to);
    }

    builder
        .push(" ORDER BY recorded_at DESC LIMIT ")
        .push_bind(clamp_limit(filter.limit))
        .push(" OFFSET ")
        .push_bind(filter.offset.unwrap_or(0).max(0));

    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = "audit_log filtered page"
    );
    let rows = builder
        .build()
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to query audit log")?;

    Ok(rows
        .into_iter()
        .map(|row| AuditEntry {
            id: row.get("id"),
            actor_id: row.get("actor_id"),
            action: row.get("action"),
            resource: row.get("resource"),
            outcome: row.get("outcome"),
            client_ip: row.get("client_ip"),
            device: row.get("device"),
            recorded_at: row.get("recorded_at"),
        })
        .collect())
}

/// Irreversible bulk delete of entries older than the cutoff.
pub async fn cleanup(pool: &PgPool, retention_days: i64) -> Result<u64> {
    let query = "DELETE FROM audit_log WHERE recorded_at < NOW() - ($1 * INTERVAL '1 day')";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(retention_days)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to clean up audit log")?;
    Ok(result.rows_affected())
}
