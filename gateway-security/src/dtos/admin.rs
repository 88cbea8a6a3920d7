use serde::Deserialize;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateRoleRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,

    #[validate(length(min = 1, max = 100, message = "Slug must be 1-100 characters"))]
    pub slug: String,

    pub description: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterPermissionRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,

    #[validate(length(min = 1, max = 100, message = "Slug must be 1-100 characters"))]
    pub slug: String,

    #[serde(default = "default_module")]
    #[validate(length(min = 1, max = 50, message = "Module must be 1-50 characters"))]
    pub module: String,

    pub description: Option<String>,
}

fn default_module() -> String {
    "core".to_string()
}

#[derive(Debug, Deserialize)]
pub struct AssignRoleRequest {
    pub role_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct GrantPermissionRequest {
    pub permission_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct ImpersonateRequest {
    pub user_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct IpWhitelistRequest {
    pub whitelisted: bool,
}

/// Most recent rows returned by the activity log endpoint when unset.
pub const DEFAULT_ACTIVITY_LIMIT: i64 = 50;
pub const MAX_ACTIVITY_LIMIT: i64 = 500;

#[derive(Debug, Default, Deserialize)]
pub struct ActivityQuery {
    pub limit: Option<i64>,
}

impl ActivityQuery {
    pub fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_ACTIVITY_LIMIT)
            .clamp(1, MAX_ACTIVITY_LIMIT)
    }
}
