//! Role-based access control: roles, permissions, and the evaluator.
//!
//! A user's *effective permission set* is the union of `(resource, action)`
//! pairs over all roles currently assigned to that user. No roles means an
//! empty set, never "all" or "none" as a special case. Checks are
//! exact-match only; there is no wildcard expansion.
//!
//! The per-user cache is an optimization, not a correctness requirement:
//! plain reads may be stale for at most the configured TTL, while every
//! role/permission mutation invalidates the affected users synchronously
//! before the mutating call returns. A caller can never observe a stale
//! grant after a revoke call has returned.

mod evaluator;
mod storage;

pub use evaluator::{PermissionEvaluator, PermissionSource, PgPermissionSource, RequirementMode};
pub use storage::{
    AssignOutcome, CreateRoleOutcome, GrantOutcome, RemoveOutcome, RevokeOutcome, assign_role,
    create_role, effective_permissions, grant_permission, remove_role, revoke_permission,
    role_names, users_with_role,
};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Atomic capability: a literal `(resource, action)` pair.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct PermissionKey {
    pub resource: String,
    pub action: String,
}

impl PermissionKey {
    #[must_use]
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
        }
    }
}

impl std::fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.resource, self.action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_key_display() {
        assert_eq!(PermissionKey::new("post", "create").to_string(), "post:create");
    }

    #[test]
    fn permission_key_equality_is_exact() {
        assert_eq!(
            PermissionKey::new("post", "create"),
            PermissionKey::new("post", "create")
        );
        assert_ne!(
            PermissionKey::new("post", "create"),
            PermissionKey::new("post", "delete")
        );
    }
}
