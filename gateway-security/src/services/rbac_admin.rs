//! Role and permission mutations. Each path invalidates exactly the cached
//! permission sets it can affect.

use std::sync::Arc;

use crate::{
    dtos::admin::{CreateRoleRequest, RegisterPermissionRequest},
    models::{NewPermission, NewRole, Permission, PermissionMatrix, Role},
    services::{
        developer_guard::{DeveloperGuard, ROOT_PRINCIPAL},
        error::ServiceError,
        permission::{PermissionResolver, DEVELOPER_ROLE},
        store::{RbacStore, UserStore},
    },
};

#[derive(Clone)]
pub struct RbacAdminService {
    rbac: Arc<dyn RbacStore>,
    users: Arc<dyn UserStore>,
    permissions: PermissionResolver,
    guard: DeveloperGuard,
}

impl RbacAdminService {
    pub fn new(
        rbac: Arc<dyn RbacStore>,
        users: Arc<dyn UserStore>,
        permissions: PermissionResolver,
        guard: DeveloperGuard,
    ) -> Self {
        Self {
            rbac,
            users,
            permissions,
            guard,
        }
    }

    pub async fn create_role(&self, req: CreateRoleRequest) -> Result<Role, ServiceError> {
        ensure_slug(&req.slug)?;
        let role = self
            .rbac
            .insert_role(NewRole {
                name: req.name,
                slug: req.slug,
                description: req.description,
                is_system: false,
            })
            .await
            .map_err(ServiceError::Database)?
            .ok_or_else(|| ServiceError::validation("Role slug is already taken."))?;

        tracing::info!(role_id = role.id, slug = %role.slug, "Role created");
        Ok(role)
    }

    pub async fn delete_role(&self, role_id: i64) -> Result<(), ServiceError> {
        let role = self.role(role_id).await?;
        if role.is_system {
            return Err(ServiceError::Authorization(
                "System roles cannot be deleted.".to_string(),
            ));
        }

        self.rbac
            .delete_role(role_id)
            .await
            .map_err(ServiceError::Database)?;
        // Members assigned between a lookup and the delete would be missed,
        // so drop every cached set instead.
        self.permissions.clear_all();

        tracing::info!(role_id, slug = %role.slug, "Role deleted");
        Ok(())
    }

    /// `actor_id` is the principal making the change. Only a sudo principal
    /// may hand out the developer role.
    pub async fn assign_role(
        &self,
        actor_id: i64,
        user_id: i64,
        role_id: i64,
    ) -> Result<bool, ServiceError> {
        let role = self.role(role_id).await?;
        if role.slug == DEVELOPER_ROLE {
            self.ensure_sudo(actor_id).await?;
        }
        self.users
            .find_user_by_id(user_id)
            .await
            .map_err(ServiceError::Database)?
            .ok_or_else(|| ServiceError::NotFound("User not found.".to_string()))?;

        let assigned = self
            .rbac
            .assign_role(user_id, role_id)
            .await
            .map_err(ServiceError::Database)?;
        self.permissions.clear_cache(user_id);

        tracing::info!(user_id, role_id, assigned, "Role assigned");
        Ok(assigned)
    }

    pub async fn remove_role(
        &self,
        actor_id: i64,
        user_id: i64,
        role_id: i64,
    ) -> Result<bool, ServiceError> {
        let role = self.role(role_id).await?;
        if role.slug == DEVELOPER_ROLE {
            if user_id == ROOT_PRINCIPAL {
                return Err(ServiceError::Authorization(
                    "The root account cannot leave the developer role.".to_string(),
                ));
            }
            self.ensure_sudo(actor_id).await?;
        }

        let removed = self
            .rbac
            .remove_role(user_id, role_id)
            .await
            .map_err(ServiceError::Database)?;
        self.permissions.clear_cache(user_id);

        tracing::info!(user_id, role_id, removed, "Role removed");
        Ok(removed)
    }

    pub async fn grant_permission(
        &self,
        role_id: i64,
        permission_id: i64,
    ) -> Result<bool, ServiceError> {
        self.role(role_id).await?;
        self.permission(permission_id).await?;

        let granted = self
            .rbac
            .grant_permission(role_id, permission_id)
            .await
            .map_err(ServiceError::Database)?;
        self.invalidate_members(role_id).await?;

        tracing::info!(role_id, permission_id, granted, "Permission granted");
        Ok(granted)
    }

    pub async fn revoke_permission(
        &self,
        role_id: i64,
        permission_id: i64,
    ) -> Result<bool, ServiceError> {
        let role = self.role(role_id).await?;
        if role.slug == DEVELOPER_ROLE {
            return Err(ServiceError::Authorization(
                "Permissions cannot be revoked from the developer role.".to_string(),
            ));
        }

        let revoked = self
            .rbac
            .revoke_permission(role_id, permission_id)
            .await
            .map_err(ServiceError::Database)?;
        self.invalidate_members(role_id).await?;

        tracing::info!(role_id, permission_id, revoked, "Permission revoked");
        Ok(revoked)
    }

    /// Define a permission and hand it to the developer role right away.
    pub async fn register_permission(
        &self,
        req: RegisterPermissionRequest,
    ) -> Result<Permission, ServiceError> {
        ensure_slug(&req.slug)?;
        let permission = self
            .rbac
            .insert_permission(NewPermission {
                name: req.name,
                slug: req.slug,
                module: req.module,
                description: req.description,
                is_system: false,
            })
            .await
            .map_err(ServiceError::Database)?
            .ok_or_else(|| ServiceError::validation("Permission slug is already registered."))?;

        self.guard.grant_new_permission(permission.id).await?;
        self.permissions.clear_all();

        tracing::info!(
            permission_id = permission.id,
            slug = %permission.slug,
            module = %permission.module,
            "Permission registered"
        );
        Ok(permission)
    }

    pub async fn delete_permission(&self, permission_id: i64) -> Result<(), ServiceError> {
        let permission = self.permission(permission_id).await?;
        if permission.is_system {
            return Err(ServiceError::Authorization(
                "System permissions cannot be deleted.".to_string(),
            ));
        }

        self.rbac
            .delete_permission(permission_id)
            .await
            .map_err(ServiceError::Database)?;
        self.permissions.clear_all();

        tracing::info!(permission_id, slug = %permission.slug, "Permission deleted");
        Ok(())
    }

    pub async fn permission_matrix(&self) -> Result<PermissionMatrix, ServiceError> {
        self.permissions.permission_matrix().await
    }

    async fn role(&self, role_id: i64) -> Result<Role, ServiceError> {
        self.rbac
            .find_role_by_id(role_id)
            .await
            .map_err(ServiceError::Database)?
            .ok_or_else(|| ServiceError::NotFound("Role not found.".to_string()))
    }

    async fn permission(&self, permission_id: i64) -> Result<Permission, ServiceError> {
        self.rbac
            .find_permission_by_id(permission_id)
            .await
            .map_err(ServiceError::Database)?
            .ok_or_else(|| ServiceError::NotFound("Permission not found.".to_string()))
    }

    async fn ensure_sudo(&self, actor_id: i64) -> Result<(), ServiceError> {
        if self.permissions.is_sudo(actor_id).await? {
            Ok(())
        } else {
            tracing::warn!(actor_id, "Non-sudo principal attempted a developer role change");
            Err(ServiceError::Authorization(
                "Only sudo users can change developer role membership.".to_string(),
            ))
        }
    }

    async fn members(&self, role_id: i64) -> Result<Vec<i64>, ServiceError> {
        self.rbac
            .list_role_members(role_id)
            .await
            .map_err(ServiceError::Database)
    }

    async fn invalidate_members(&self, role_id: i64) -> Result<(), ServiceError> {
        for user_id in self.members(role_id).await? {
            self.permissions.clear_cache(user_id);
        }
        Ok(())
    }
}

/// Lowercase letters, digits, `.`, `-` and `_`, starting with a letter.
fn ensure_slug(slug: &str) -> Result<(), ServiceError> {
    let valid = slug.chars().next().is_some_and(|c| c.is_ascii_lowercase())
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '-' | '_'));
    if valid {
        Ok(())
    } else {
        Err(ServiceError::Validation {
            message: "Invalid slug.".to_string(),
            errors: vec![format!(
                "'{}' must start with a lowercase letter and contain only a-z, 0-9, '.', '-' or '_'.",
                slug
            )],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewUser;
    use crate::services::memory::MemoryStore;
    use crate::services::permission::PermissionCache;

    struct Harness {
        admin: RbacAdminService,
        resolver: PermissionResolver,
        store: Arc<MemoryStore>,
        alice: i64,
    }

    async fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let resolver = PermissionResolver::new(store.clone(), Arc::new(PermissionCache::default()));
        let guard = DeveloperGuard::new(store.clone(), store.clone(), resolver.clone());

        for name in ["root", "alice"] {
            store
                .insert_user(NewUser {
                    username: name.to_string(),
                    email: format!("{}@example.com", name),
                    display_name: None,
                    password_hash: "x".to_string(),
                })
                .await
                .unwrap();
        }
        guard.enforce().await.unwrap();

        Harness {
            admin: RbacAdminService::new(store.clone(), store.clone(), resolver.clone(), guard),
            resolver,
            store,
            alice: 2,
        }
    }

    fn role_request(slug: &str) -> CreateRoleRequest {
        CreateRoleRequest {
            name: slug.to_string(),
            slug: slug.to_string(),
            description: None,
        }
    }

    fn permission_request(slug: &str) -> RegisterPermissionRequest {
        RegisterPermissionRequest {
            name: slug.to_string(),
            slug: slug.to_string(),
            module: "blog".to_string(),
            description: None,
        }
    }

    #[tokio::test]
    async fn test_grant_invalidates_members() {
        let h = harness().await;
        let editor = h.admin.create_role(role_request("editor")).await.unwrap();
        let edit = h.admin.register_permission(permission_request("posts.edit")).await.unwrap();
        h.admin.assign_role(ROOT_PRINCIPAL, h.alice, editor.id).await.unwrap();

        assert!(!h.resolver.user_has_permission(h.alice, "posts.edit").await.unwrap());

        h.admin.grant_permission(editor.id, edit.id).await.unwrap();
        assert!(h.resolver.user_has_permission(h.alice, "posts.edit").await.unwrap());

        h.admin.revoke_permission(editor.id, edit.id).await.unwrap();
        assert!(!h.resolver.user_has_permission(h.alice, "posts.edit").await.unwrap());
    }

    #[tokio::test]
    async fn test_assign_and_remove_invalidate_principal() {
        let h = harness().await;
        let editor = h.admin.create_role(role_request("editor")).await.unwrap();
        let edit = h.admin.register_permission(permission_request("posts.edit")).await.unwrap();
        h.admin.grant_permission(editor.id, edit.id).await.unwrap();

        assert!(!h.resolver.user_has_permission(h.alice, "posts.edit").await.unwrap());
        h.admin.assign_role(ROOT_PRINCIPAL, h.alice, editor.id).await.unwrap();
        assert!(h.resolver.user_has_permission(h.alice, "posts.edit").await.unwrap());
        h.admin.remove_role(ROOT_PRINCIPAL, h.alice, editor.id).await.unwrap();
        assert!(!h.resolver.user_has_permission(h.alice, "posts.edit").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_role_invalidates_members() {
        let h = harness().await;
        let editor = h.admin.create_role(role_request("editor")).await.unwrap();
        let edit = h.admin.register_permission(permission_request("posts.edit")).await.unwrap();
        h.admin.grant_permission(editor.id, edit.id).await.unwrap();
        h.admin.assign_role(ROOT_PRINCIPAL, h.alice, editor.id).await.unwrap();
        assert!(h.resolver.user_has_permission(h.alice, "posts.edit").await.unwrap());

        h.admin.delete_role(editor.id).await.unwrap();
        assert!(!h.resolver.user_has_permission(h.alice, "posts.edit").await.unwrap());
    }

    #[tokio::test]
    async fn test_registered_permission_reaches_cached_developer() {
        let h = harness().await;
        let before = h.resolver.get_user_permissions(1).await.unwrap();
        assert!(!before.iter().any(|slug| slug == "reports.export"));

        h.admin.register_permission(permission_request("reports.export")).await.unwrap();

        let after = h.resolver.get_user_permissions(1).await.unwrap();
        assert!(after.iter().any(|slug| slug == "reports.export"));
        let matrix = h.admin.permission_matrix().await.unwrap();
        assert_eq!(matrix.permissions.len(), 1);
    }

    #[tokio::test]
    async fn test_developer_invariants_protected() {
        let h = harness().await;
        let developer = h.store.find_role_by_slug(DEVELOPER_ROLE).await.unwrap().unwrap();
        let permission = h.admin.register_permission(permission_request("a.b")).await.unwrap();

        assert!(matches!(
            h.admin.revoke_permission(developer.id, permission.id).await,
            Err(ServiceError::Authorization(_))
        ));
        assert!(matches!(
            h.admin.remove_role(ROOT_PRINCIPAL, ROOT_PRINCIPAL, developer.id).await,
            Err(ServiceError::Authorization(_))
        ));
        assert!(matches!(
            h.admin.delete_role(developer.id).await,
            Err(ServiceError::Authorization(_))
        ));
    }

    #[tokio::test]
    async fn test_only_sudo_changes_developer_membership() {
        let h = harness().await;
        let developer = h.store.find_role_by_slug(DEVELOPER_ROLE).await.unwrap().unwrap();

        assert!(matches!(
            h.admin.assign_role(h.alice, h.alice, developer.id).await,
            Err(ServiceError::Authorization(_))
        ));
        assert!(!h.resolver.is_sudo(h.alice).await.unwrap());

        assert!(h.admin.assign_role(ROOT_PRINCIPAL, h.alice, developer.id).await.unwrap());
        assert!(h.resolver.is_sudo(h.alice).await.unwrap());

        let carol = h
            .store
            .insert_user(NewUser {
                username: "carol".to_string(),
                email: "carol@example.com".to_string(),
                display_name: None,
                password_hash: "x".to_string(),
            })
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            h.admin.remove_role(carol.id, h.alice, developer.id).await,
            Err(ServiceError::Authorization(_))
        ));
        assert!(h.admin.remove_role(ROOT_PRINCIPAL, h.alice, developer.id).await.unwrap());
        assert!(!h.resolver.is_sudo(h.alice).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_role_drops_every_cached_set() {
        let h = harness().await;
        let editor = h.admin.create_role(role_request("editor")).await.unwrap();
        h.resolver.get_user_permissions(h.alice).await.unwrap();
        h.resolver.get_user_permissions(ROOT_PRINCIPAL).await.unwrap();
        assert_eq!(h.resolver.cache().len(), 2);

        h.admin.delete_role(editor.id).await.unwrap();
        assert!(h.resolver.cache().is_empty());
    }

    #[tokio::test]
    async fn test_duplicates_and_bad_slugs_rejected() {
        let h = harness().await;
        h.admin.create_role(role_request("editor")).await.unwrap();
        assert!(matches!(
            h.admin.create_role(role_request("editor")).await,
            Err(ServiceError::Validation { .. })
        ));
        assert!(matches!(
            h.admin.create_role(role_request("Bad Slug")).await,
            Err(ServiceError::Validation { .. })
        ));

        h.admin.register_permission(permission_request("posts.edit")).await.unwrap();
        assert!(matches!(
            h.admin.register_permission(permission_request("posts.edit")).await,
            Err(ServiceError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_targets_are_not_found() {
        let h = harness().await;
        assert!(matches!(
            h.admin.assign_role(ROOT_PRINCIPAL, h.alice, 999).await,
            Err(ServiceError::NotFound(_))
        ));
        let editor = h.admin.create_role(role_request("editor")).await.unwrap();
        assert!(matches!(
            h.admin.assign_role(ROOT_PRINCIPAL, 999, editor.id).await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            h.admin.delete_permission(999).await,
            Err(ServiceError::NotFound(_))
        ));
    }
}
