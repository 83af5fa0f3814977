//! Database helpers for roles, permissions, and their links.

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};
use std::collections::HashSet;
use tracing::Instrument;
use uuid::Uuid;

use super::PermissionKey;

#[derive(Debug, PartialEq, Eq)]
pub enum CreateRoleOutcome {
    Created(Uuid),
    Conflict,
}

#[derive(Debug, PartialEq, Eq)]
pub enum AssignOutcome {
    Assigned,
    AlreadyAssigned,
    RoleNotFound,
    UserNotFound,
}

#[derive(Debug, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotAssigned,
    RoleNotFound,
}

#[derive(Debug, PartialEq, Eq)]
pub enum GrantOutcome {
    Granted,
    AlreadyGranted,
    RoleNotFound,
}

#[derive(Debug, PartialEq, Eq)]
pub enum RevokeOutcome {
    Revoked,
    NotGranted,
    RoleNotFound,
}

fn sqlstate(err: &sqlx::Error, code: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|c| c.as_ref() == code),
        _ => false,
    }
}

/// Union of permissions over all roles currently assigned to the user.
pub async fn effective_permissions(
    pool: &PgPool,
    user_id: Uuid,
) -> Result<HashSet<PermissionKey>> {
    let query = r"
        SELECT DISTINCT p.resource, p.action
        FROM user_roles ur
        JOIN role_permissions rp ON rp.role_id = ur.role_id
        JOIN permissions p ON p.id = rp.permission_id
        WHERE ur.user_id = $1
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
        .context("failed to resolve effective permissions")?;

    Ok(rows
        .into_iter()
        .map(|row| PermissionKey {
            resource: row.get("resource"),
            action: row.get("action"),
        })
        .collect())
}

/// Role names currently assigned to the user (access-token snapshot).
pub async fn role_names(pool: &PgPool, user_id: Uuid) -> Result<Vec<String>> {
    let query = r"
        SELECT r.name
        FROM user_roles ur
        JOIN roles r ON r.id = ur.role_id
        WHERE ur.user_id = $1
        ORDER BY r.name
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
        .context("failed to list role names")?;
    Ok(rows.into_iter().map(|row| row.get("name")).collect())
}

/// Users holding a role, for synchronous cache invalidation on mutation.
pub async fn users_with_role(pool: &PgPool, role_name: &str) -> Result<Vec<Uuid>> {
    let query = r"
        SELECT ur.user_id
        FROM user_roles ur
        JOIN roles r ON r.id = ur.role_id
        WHERE r.name = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(role_name)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list role holders")?;
    Ok(rows.into_iter().map(|row| row.get("user_id")).collect())
}

/// Create a role; name uniqueness is enforced by the database.
pub async fn create_role(pool: &PgPool, name: &str, label: &str) -> Result<CreateRoleOutcome> {
    let query = "INSERT INTO roles (name, label) VALUES ($1, $2) RETURNING id";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(name)
        .bind(label)
        .fetch_one(pool)
        .instrument(span)
        .await;

    match row {
        Ok(row) => Ok(CreateRoleOutcome::Created(row.get("id"))),
        Err(err) if sqlstate(&err, "23505") => Ok(CreateRoleOutcome::Conflict),
        Err(err) => Err(err).context("failed to create role"),
    }
}

async fn role_id_by_name(pool: &PgPool, role_name: &str) -> Result<Option<Uuid>> {
    let query = "SELECT id FROM roles WHERE name = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(role_name)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup role")?;
    Ok(row.map(|row| row.get("id")))
}

/// Assign a role to a user.
pub async fn assign_role(pool: &PgPool, user_id: Uuid, role_name: &str) -> Result<AssignOutcome> {
    let Some(role_id) = role_id_by_name(pool, role_name).await? else {
        return Ok(AssignOutcome::RoleNotFound);
    };

    let query = r"
        INSERT INTO user_roles (user_id, role_id)
        VALUES ($1, $2)
        ON CONFLICT (user_id, role_id) DO NOTHING
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .bind(role_id)
        .execute(pool)
        .instrument(span)
        .await;

    match result {
        Ok(done) if done.rows_affected() == 0 => Ok(AssignOutcome::AlreadyAssigned),
        Ok(_) => Ok(AssignOutcome::Assigned),
        // 23503: the user foreign key does not exist.
        Err(err) if sqlstate(&err, "23503") => Ok(AssignOutcome::UserNotFound),
        Err(err) => Err(err).context("failed to assign role"),
    }
}

/// Remove a role from a user. Link removal is the only mutation.
pub async fn remove_role(pool: &PgPool, user_id: Uuid, role_name: &str) -> Result<RemoveOutcome> {
    let Some(role_id) = role_id_by_name(pool, role_name).await? else {
        return Ok(RemoveOutcome::RoleNotFound);
    };

    let query = "DELETE FROM user_roles WHERE user_id = $1 AND role_id = $2";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .bind(role_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to remove role")?;

    if result.rows_affected() == 0 {
        Ok(RemoveOutcome::NotAssigned)
    } else {
        Ok(RemoveOutcome::Removed)
    }
}

/// Grant a permission to a role, creating the permission row on first use.
/// Permission identity is immutable once referenced; only the label updates.
pub async fn grant_permission(
    pool: &PgPool,
    role_name: &str,
    permission: &PermissionKey,
    label: &str,
) -> Result<GrantOutcome> {
    let Some(role_id) = role_id_by_name(pool, role_name).await? else {
        return Ok(GrantOutcome::RoleNotFound);
    };

    let mut tx = pool.begin().await.context("begin grant transaction")?;

    let query = r"
        INSERT INTO permissions (resource, action, label)
        VALUES ($1, $2, $3)
        ON CONFLICT (resource, action) DO UPDATE SET label = EXCLUDED.label
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(&permission.resource)
        .bind(&permission.action)
        .bind(label)
        .fetch_one(&mut *tx)
        .instrument(span)
        .await
        .context("failed to upsert permission")?;
    let permission_id: Uuid = row.get("id");

    let query = r"
        INSERT INTO role_permissions (role_id, permission_id)
        VALUES ($1, $2)
        ON CONFLICT (role_id, permission_id) DO NOTHING
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(role_id)
        .bind(permission_id)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to link permission to role")?;

    tx.commit().await.context("commit grant transaction")?;

    if result.rows_affected() == 0 {
        Ok(GrantOutcome::AlreadyGranted)
    } else {
        Ok(GrantOutcome::Granted)
    }
}

/// Revoke a permission from a role. The permission row itself stays; audit
/// history referencing its name is never rewritten.
pub async fn revoke_permission(
    pool: &PgPool,
    role_name: &str,
    permission: &PermissionKey,
) -> Result<RevokeOutcome> {
    let Some(role_id) = role_id_by_name(pool, role_name).await? else {
        return Ok(RevokeOutcome::RoleNotFound);
    };

    let query = r"
        DELETE FROM role_permissions rp
        USING permissions p
        WHERE rp.role_id = $1
          AND rp.permission_id = p.id
          AND p.resource = $2
          AND p.action = $3
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(role_id)
        .bind(&permission.resource)
        .bind(&permission.action)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to revoke permission")?;

    if result.rows_affected() == 0 {
        Ok(RevokeOutcome::NotGranted)
    } else {
        Ok(RevokeOutcome::Revoked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_debug_names() {
        assert_eq!(format!("{:?}", AssignOutcome::Assigned), "Assigned");
        assert_eq!(format!("{:?}", RemoveOutcome::NotAssigned), "NotAssigned");
        assert_eq!(format!("{:?}", GrantOutcome::RoleNotFound), "RoleNotFound");
        assert_eq!(format!("{:?}", RevokeOutcome::Revoked), "Revoked");
    }

    #[test]
    fn sqlstate_matches_database_errors_only() {
        assert!(!sqlstate(&sqlx::Error::RowNotFound, "23505"));
    }
}
