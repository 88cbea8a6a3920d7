//! Permission resolution with an injected, explicitly invalidated cache.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::models::PermissionMatrix;
use crate::services::error::ServiceError;
use crate::services::metrics;
use crate::services::store::RbacStore;

/// Sentinel that satisfies every permission check.
pub const WILDCARD: &str = "*";

/// Role whose members implicitly hold every permission.
pub const DEVELOPER_ROLE: &str = "developer";

/// Resolved permission slugs of one principal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeSet<String>);

impl PermissionSet {
    pub fn new<I, S>(slugs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(slugs.into_iter().map(Into::into).collect())
    }

    pub fn has(&self, permission: &str) -> bool {
        self.is_sudo() || self.0.contains(permission)
    }

    pub fn has_all<S: AsRef<str>>(&self, permissions: &[S]) -> bool {
        self.is_sudo() || permissions.iter().all(|p| self.0.contains(p.as_ref()))
    }

    pub fn is_sudo(&self) -> bool {
        self.0.contains(WILDCARD)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

struct CacheEntry {
    permissions: Arc<PermissionSet>,
    stored_at: Instant,
}

/// Per-principal cache of resolved permission sets.
///
/// Every invalidation bumps a generation counter. A resolution that started
/// under an older generation drops its own entry after inserting it, so an
/// invalidation racing with a lookup cannot leave a stale set behind.
pub struct PermissionCache {
    entries: DashMap<i64, CacheEntry>,
    generation: AtomicU64,
    ttl: Option<Duration>,
}

impl PermissionCache {
    /// `ttl = None` keeps entries until they are invalidated.
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            entries: DashMap::new(),
            generation: AtomicU64::new(0),
            ttl,
        }
    }

    pub fn get(&self, user_id: i64) -> Option<Arc<PermissionSet>> {
        {
            let entry = self.entries.get(&user_id)?;
            let fresh = self
                .ttl
                .map_or(true, |ttl| entry.stored_at.elapsed() < ttl);
            if fresh {
                return Some(entry.permissions.clone());
            }
        }
        self.entries.remove(&user_id);
        None
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Store a set resolved while `generation` was current.
    pub fn insert(&self, user_id: i64, permissions: Arc<PermissionSet>, generation: u64) {
        self.entries.insert(
            user_id,
            CacheEntry {
                permissions,
                stored_at: Instant::now(),
            },
        );
        if self.generation() != generation {
            self.entries.remove(&user_id);
        }
    }

    pub fn invalidate(&self, user_id: i64) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.entries.remove(&user_id);
    }

    pub fn invalidate_all(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for PermissionCache {
    fn default() -> Self {
        Self::new(None)
    }
}

#[derive(Clone)]
pub struct PermissionResolver {
    store: Arc<dyn RbacStore>,
    cache: Arc<PermissionCache>,
}

impl PermissionResolver {
    pub fn new(store: Arc<dyn RbacStore>, cache: Arc<PermissionCache>) -> Self {
        Self { store, cache }
    }

    /// Developers get every defined slug plus the wildcard; everyone else
    /// gets the distinct slugs granted through their roles.
    pub async fn get_user_permissions(
        &self,
        user_id: i64,
    ) -> Result<Arc<PermissionSet>, ServiceError> {
        if let Some(permissions) = self.cache.get(user_id) {
            metrics::record_permission_cache(true);
            return Ok(permissions);
        }
        metrics::record_permission_cache(false);

        let generation = self.cache.generation();
        let is_developer = self
            .store
            .user_has_role(user_id, DEVELOPER_ROLE)
            .await
            .map_err(ServiceError::Database)?;

        let slugs = if is_developer {
            let mut all = self
                .store
                .list_all_permission_slugs()
                .await
                .map_err(ServiceError::Database)?;
            all.push(WILDCARD.to_string());
            all
        } else {
            self.store
                .list_permission_slugs_for_user(user_id)
                .await
                .map_err(ServiceError::Database)?
        };

        let permissions = Arc::new(PermissionSet::new(slugs));
        self.cache.insert(user_id, permissions.clone(), generation);
        Ok(permissions)
    }

    pub async fn user_has_permission(
        &self,
        user_id: i64,
        permission: &str,
    ) -> Result<bool, ServiceError> {
        Ok(self.get_user_permissions(user_id).await?.has(permission))
    }

    pub async fn user_has_all_permissions<S: AsRef<str>>(
        &self,
        user_id: i64,
        permissions: &[S],
    ) -> Result<bool, ServiceError> {
        Ok(self.get_user_permissions(user_id).await?.has_all(permissions))
    }

    pub async fn is_sudo(&self, user_id: i64) -> Result<bool, ServiceError> {
        Ok(self.get_user_permissions(user_id).await?.is_sudo())
    }

    pub async fn permission_matrix(&self) -> Result<PermissionMatrix, ServiceError> {
        let roles = self.store.list_roles().await.map_err(ServiceError::Database)?;
        let permissions = self
            .store
            .list_permissions()
            .await
            .map_err(ServiceError::Database)?;
        let grants = self
            .store
            .list_role_permission_grants()
            .await
            .map_err(ServiceError::Database)?;
        Ok(PermissionMatrix::new(roles, permissions, &grants))
    }

    pub fn clear_cache(&self, user_id: i64) {
        self.cache.invalidate(user_id);
    }

    pub fn clear_all(&self) {
        self.cache.invalidate_all();
    }

    pub fn cache(&self) -> &Arc<PermissionCache> {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewPermission, NewRole, NewUser};
    use crate::services::memory::MemoryStore;
    use crate::services::store::UserStore;

    async fn user(store: &MemoryStore, name: &str) -> i64 {
        store
            .insert_user(NewUser {
                username: name.to_string(),
                email: format!("{}@example.com", name),
                display_name: None,
                password_hash: "x".to_string(),
            })
            .await
            .unwrap()
            .unwrap()
            .id
    }

    async fn role(store: &MemoryStore, slug: &str) -> i64 {
        store
            .insert_role(NewRole {
                name: slug.to_string(),
                slug: slug.to_string(),
                description: None,
                is_system: false,
            })
            .await
            .unwrap()
            .unwrap()
            .id
    }

    async fn permission(store: &MemoryStore, slug: &str) -> i64 {
        store
            .insert_permission(NewPermission {
                name: slug.to_string(),
                slug: slug.to_string(),
                module: "core".to_string(),
                description: None,
                is_system: false,
            })
            .await
            .unwrap()
            .unwrap()
            .id
    }

    fn resolver(store: &Arc<MemoryStore>) -> PermissionResolver {
        PermissionResolver::new(store.clone(), Arc::new(PermissionCache::default()))
    }

    #[test]
    fn test_wildcard_satisfies_everything() {
        let set = PermissionSet::new(["users.view", WILDCARD]);
        assert!(set.is_sudo());
        assert!(set.has("does.not.exist"));
        assert!(set.has_all(&["a", "b"]));

        let plain = PermissionSet::new(["users.view"]);
        assert!(!plain.is_sudo());
        assert!(plain.has("users.view"));
        assert!(!plain.has_all(&["users.view", "users.edit"]));
    }

    #[tokio::test]
    async fn test_developer_gets_all_plus_wildcard() {
        let store = Arc::new(MemoryStore::new());
        let dev = user(&store, "dev").await;
        let developer = role(&store, DEVELOPER_ROLE).await;
        permission(&store, "users.view").await;
        permission(&store, "roles.update").await;
        store.assign_role(dev, developer).await.unwrap();

        let resolver = resolver(&store);
        let set = resolver.get_user_permissions(dev).await.unwrap();
        assert_eq!(set.len(), 3);
        assert!(resolver.is_sudo(dev).await.unwrap());
        assert!(resolver
            .user_has_permission(dev, "module.not.installed")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_cache_is_stale_until_cleared() {
        let store = Arc::new(MemoryStore::new());
        let alice = user(&store, "alice").await;
        let editor = role(&store, "editor").await;
        let edit = permission(&store, "posts.edit").await;
        store.assign_role(alice, editor).await.unwrap();

        let resolver = resolver(&store);
        assert!(!resolver.user_has_permission(alice, "posts.edit").await.unwrap());

        store.grant_permission(editor, edit).await.unwrap();
        assert!(!resolver.user_has_permission(alice, "posts.edit").await.unwrap());

        resolver.clear_cache(alice);
        assert!(resolver.user_has_permission(alice, "posts.edit").await.unwrap());

        store.revoke_permission(editor, edit).await.unwrap();
        resolver.clear_all();
        assert!(!resolver.user_has_permission(alice, "posts.edit").await.unwrap());
    }

    #[test]
    fn test_insert_after_invalidation_is_dropped() {
        let cache = PermissionCache::default();
        let generation = cache.generation();
        cache.invalidate(1);
        cache.insert(1, Arc::new(PermissionSet::new(["stale"])), generation);
        assert!(cache.get(1).is_none());

        let generation = cache.generation();
        cache.insert(1, Arc::new(PermissionSet::new(["fresh"])), generation);
        assert!(cache.get(1).is_some_and(|set| set.has("fresh")));
    }

    #[test]
    fn test_ttl_expires_entries() {
        let cache = PermissionCache::new(Some(Duration::ZERO));
        cache.insert(1, Arc::new(PermissionSet::default()), cache.generation());
        assert!(cache.get(1).is_none());
        assert!(cache.is_empty());
    }
}
