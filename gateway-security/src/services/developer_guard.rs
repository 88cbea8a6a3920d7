use serde::Serialize;
use std::sync::Arc;

use crate::models::{NewRole, Role};
use crate::services::error::ServiceError;
use crate::services::permission::{PermissionResolver, DEVELOPER_ROLE};
use crate::services::store::{RbacStore, UserStore};

/// Account that is always a developer.
pub const ROOT_PRINCIPAL: i64 = 1;

/// What one reconciliation pass changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuardReport {
    pub role_id: i64,
    pub permissions_granted: u64,
    pub root_assigned: bool,
}

impl GuardReport {
    pub fn changed(&self) -> bool {
        self.permissions_granted > 0 || self.root_assigned
    }
}

/// Keeps the developer role present, complete, and held by the root account.
/// Every step is idempotent; running it twice changes nothing the second time.
#[derive(Clone)]
pub struct DeveloperGuard {
    rbac: Arc<dyn RbacStore>,
    users: Arc<dyn UserStore>,
    permissions: PermissionResolver,
}

impl DeveloperGuard {
    pub fn new(
        rbac: Arc<dyn RbacStore>,
        users: Arc<dyn UserStore>,
        permissions: PermissionResolver,
    ) -> Self {
        Self {
            rbac,
            users,
            permissions,
        }
    }

    pub async fn enforce(&self) -> Result<GuardReport, ServiceError> {
        let role = self.developer_role().await?;

        let permissions_granted = self
            .rbac
            .grant_missing_permissions(role.id)
            .await
            .map_err(ServiceError::Database)?;

        let root_assigned = match self
            .users
            .find_user_by_id(ROOT_PRINCIPAL)
            .await
            .map_err(ServiceError::Database)?
        {
            Some(_) => self
                .rbac
                .assign_role(ROOT_PRINCIPAL, role.id)
                .await
                .map_err(ServiceError::Database)?,
            None => {
                tracing::debug!("Root principal does not exist yet; skipping assignment");
                false
            }
        };

        let report = GuardReport {
            role_id: role.id,
            permissions_granted,
            root_assigned,
        };

        if report.changed() {
            self.permissions.clear_all();
            tracing::info!(
                role_id = role.id,
                permissions_granted,
                root_assigned,
                "Developer role reconciled"
            );
        }

        Ok(report)
    }

    /// Grant the developer role whatever permissions it is missing.
    pub async fn sync_all_permissions(&self) -> Result<u64, ServiceError> {
        let role = self.developer_role().await?;
        let granted = self
            .rbac
            .grant_missing_permissions(role.id)
            .await
            .map_err(ServiceError::Database)?;
        if granted > 0 {
            self.permissions.clear_all();
        }
        Ok(granted)
    }

    /// Called right after a permission is registered.
    pub async fn grant_new_permission(&self, permission_id: i64) -> Result<bool, ServiceError> {
        let role = self.developer_role().await?;
        let granted = self
            .rbac
            .grant_permission(role.id, permission_id)
            .await
            .map_err(ServiceError::Database)?;
        if granted {
            self.permissions.clear_all();
        }
        Ok(granted)
    }

    async fn developer_role(&self) -> Result<Role, ServiceError> {
        self.rbac
            .ensure_role(NewRole {
                name: "Developer".to_string(),
                slug: DEVELOPER_ROLE.to_string(),
                description: Some("Sudo role with full system access".to_string()),
                is_system: true,
            })
            .await
            .map_err(ServiceError::Database)
    }
}
