//! Point-in-time permission checks over a TTL cache.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{PermissionKey, storage};

/// Composite check mode for operations needing more than one capability.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequirementMode {
    All,
    Any,
}

/// Persistence seam the evaluator reads through. The production source is
/// Postgres; tests plug in an in-memory map.
#[async_trait]
pub trait PermissionSource: Send + Sync {
    async fn load(&self, user_id: Uuid) -> Result<HashSet<PermissionKey>>;
}

pub struct PgPermissionSource {
    pool: PgPool,
}

impl PgPermissionSource {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PermissionSource for PgPermissionSource {
    async fn load(&self, user_id: Uuid) -> Result<HashSet<PermissionKey>> {
        storage::effective_permissions(&self.pool, user_id).await
    }
}

struct CacheEntry {
    permissions: HashSet<PermissionKey>,
    loaded_at: Instant,
}

/// Resolves and caches effective permission sets per user.
///
/// Plain reads may serve an entry up to `ttl` old; that staleness window is
/// the documented bound. Mutation paths call [`invalidate`](Self::invalidate)
/// before returning, which removes the window entirely for revokes.
pub struct PermissionEvaluator<S: PermissionSource> {
    source: S,
    ttl: Duration,
    cache: Mutex<HashMap<Uuid, CacheEntry>>,
}

impl<S: PermissionSource> PermissionEvaluator<S> {
    #[must_use]
    pub fn new(source: S, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// The user's effective permission set, cached up to the TTL.
    ///
    /// # Errors
    /// Returns an error if the underlying source fails.
    pub async fn effective_permissions(&self, user_id: Uuid) -> Result<HashSet<PermissionKey>> {
        {
            let cache = self.cache.lock().await;
            if let Some(entry) = cache.get(&user_id)
                && entry.loaded_at.elapsed() < self.ttl
            {
                return Ok(entry.permissions.clone());
            }
        }

        // Lock is not held across the load; concurrent misses may load
        // twice, which is harmless.
        let permissions = self.source.load(user_id).await?;

        let mut cache = self.cache.lock().await;
        cache.retain(|_, entry| entry.loaded_at.elapsed() < self.ttl);
        cache.insert(
            user_id,
            CacheEntry {
                permissions: permissions.clone(),
                loaded_at: Instant::now(),
            },
        );
        Ok(permissions)
    }

    /// Exact-match check: `(resource, action)` must literally be in the set.
    ///
    /// # Errors
    /// Returns an error if the underlying source fails.
    pub async fn check(&self, user_id: Uuid, resource: &str, action: &str) -> Result<bool> {
        let permissions = self.effective_permissions(user_id).await?;
        Ok(permissions.contains(&PermissionKey::new(resource, action)))
    }

    /// Composite check over several requirements.
    ///
    /// # Errors
    /// Returns an error if the underlying source fails.
    pub async fn check_all(
        &self,
        user_id: Uuid,
        requirements: &[PermissionKey],
        mode: RequirementMode,
    ) -> Result<bool> {
        let permissions = self.effective_permissions(user_id).await?;
        Ok(match mode {
            RequirementMode::All => requirements.iter().all(|req| permissions.contains(req)),
            RequirementMode::Any => requirements.iter().any(|req| permissions.contains(req)),
        })
    }

    /// Drop one user's cached set. Mutation handlers call this before
    /// returning success.
    pub async fn invalidate(&self, user_id: Uuid) {
        self.cache.lock().await.remove(&user_id);
    }

    /// Drop every cached set (permission-level mutations with wide blast
    /// radius).
    pub async fn invalidate_all(&self) {
        self.cache.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct MemorySource {
        grants: StdMutex<HashMap<Uuid, HashSet<PermissionKey>>>,
        loads: StdMutex<usize>,
    }

    impl MemorySource {
        fn set(&self, user_id: Uuid, permissions: HashSet<PermissionKey>) {
            self.grants
                .lock()
                .expect("grants lock")
                .insert(user_id, permissions);
        }

        fn load_count(&self) -> usize {
            *self.loads.lock().expect("loads lock")
        }
    }

    #[async_trait]
    impl PermissionSource for &MemorySource {
        async fn load(&self, user_id: Uuid) -> Result<HashSet<PermissionKey>> {
            *self.loads.lock().expect("loads lock") += 1;
            Ok(self
                .grants
                .lock()
                .expect("grants lock")
                .get(&user_id)
                .cloned()
                .unwrap_or_default())
        }
    }

    fn editor_permissions() -> HashSet<PermissionKey> {
        [
            PermissionKey::new("post", "create"),
            PermissionKey::new("post", "update"),
        ]
        .into_iter()
        .collect()
    }

    // Assigning a role with {post:create, post:update} to a user with no
    // prior roles grants exactly those capabilities.
    #[tokio::test]
    async fn check_reflects_assigned_role() {
        let source = MemorySource::default();
        let user = Uuid::new_v4();
        let evaluator = PermissionEvaluator::new(&source, Duration::from_secs(30));

        assert!(!evaluator.check(user, "post", "create").await.expect("check"));

        source.set(user, editor_permissions());
        evaluator.invalidate(user).await;

        assert!(evaluator.check(user, "post", "create").await.expect("check"));
        assert!(!evaluator.check(user, "post", "delete").await.expect("check"));
    }

    #[tokio::test]
    async fn no_roles_means_empty_set() {
        let source = MemorySource::default();
        let evaluator = PermissionEvaluator::new(&source, Duration::from_secs(30));
        let set = evaluator
            .effective_permissions(Uuid::new_v4())
            .await
            .expect("load");
        assert!(set.is_empty());
    }

    // Removing a grant and invalidating must be visible on the very next
    // check, regardless of the TTL.
    #[tokio::test]
    async fn invalidation_beats_the_ttl_window() {
        let source = MemorySource::default();
        let user = Uuid::new_v4();
        let evaluator = PermissionEvaluator::new(&source, Duration::from_secs(3600));

        source.set(user, editor_permissions());
        assert!(evaluator.check(user, "post", "update").await.expect("check"));

        let mut reduced = editor_permissions();
        reduced.remove(&PermissionKey::new("post", "update"));
        source.set(user, reduced);

        // Without invalidation the stale grant would still be honored.
        assert!(evaluator.check(user, "post", "update").await.expect("check"));

        evaluator.invalidate(user).await;
        assert!(!evaluator.check(user, "post", "update").await.expect("check"));
    }

    #[tokio::test]
    async fn cache_serves_within_ttl() {
        let source = MemorySource::default();
        let user = Uuid::new_v4();
        let evaluator = PermissionEvaluator::new(&source, Duration::from_secs(3600));

        source.set(user, editor_permissions());
        let _ = evaluator.check(user, "post", "create").await.expect("check");
        let _ = evaluator.check(user, "post", "update").await.expect("check");
        assert_eq!(source.load_count(), 1);
    }

    #[tokio::test]
    async fn zero_ttl_always_reloads() {
        let source = MemorySource::default();
        let user = Uuid::new_v4();
        let evaluator = PermissionEvaluator::new(&source, Duration::ZERO);

        let _ = evaluator.check(user, "post", "create").await.expect("check");
        let _ = evaluator.check(user, "post", "create").await.expect("check");
        assert_eq!(source.load_count(), 2);
    }

    #[tokio::test]
    async fn check_all_modes() {
        let source = MemorySource::default();
        let user = Uuid::new_v4();
        let evaluator = PermissionEvaluator::new(&source, Duration::from_secs(30));
        source.set(user, editor_permissions());

        let both = [
            PermissionKey::new("post", "create"),
            PermissionKey::new("post", "update"),
        ];
        let mixed = [
            PermissionKey::new("post", "create"),
            PermissionKey::new("post", "delete"),
        ];

        assert!(
            evaluator
                .check_all(user, &both, RequirementMode::All)
                .await
                .expect("check_all")
        );
        assert!(
            !evaluator
                .check_all(user, &mixed, RequirementMode::All)
                .await
                .expect("check_all")
        );
        assert!(
            evaluator
                .check_all(user, &mixed, RequirementMode::Any)
                .await
                .expect("check_all")
        );
    }
}
