use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Role {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Permission {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub module: String,
    pub description: Option<String>,
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewRole {
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub is_system: bool,
}

#[derive(Debug, Clone)]
pub struct NewPermission {
    pub name: String,
    pub slug: String,
    pub module: String,
    pub description: Option<String>,
    pub is_system: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, FromRow)]
pub struct RolePermissionGrant {
    pub role_id: i64,
    pub permission_id: i64,
}

/// Roles × permissions grant table for administrative display.
#[derive(Debug, Clone, Serialize)]
pub struct PermissionMatrix {
    pub roles: Vec<Role>,
    pub permissions: Vec<Permission>,
    /// Granted permission ids keyed by role id.
    pub matrix: BTreeMap<i64, Vec<i64>>,
}

impl PermissionMatrix {
    pub fn new(
        roles: Vec<Role>,
        permissions: Vec<Permission>,
        grants: &[RolePermissionGrant],
    ) -> Self {
        let mut matrix: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
        for grant in grants {
            matrix
                .entry(grant.role_id)
                .or_default()
                .push(grant.permission_id);
        }
        for ids in matrix.values_mut() {
            ids.sort_unstable();
            ids.dedup();
        }
        Self {
            roles,
            permissions,
            matrix,
        }
    }

    pub fn is_granted(&self, role_id: i64, permission_id: i64) -> bool {
        self.matrix
            .get(&role_id)
            .is_some_and(|ids| ids.binary_search(&permission_id).is_ok())
    }
}
