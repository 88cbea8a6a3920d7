use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    /// Email or username.
    #[serde(alias = "email", alias = "username")]
    #[validate(length(min = 1, message = "Identity is required"))]
    pub identity: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RefreshRequest {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(length(min = 3, max = 50, message = "Username must be 3-50 characters"))]
    pub username: String,

    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(max = 100, message = "Display name must be at most 100 characters"))]
    pub display_name: Option<String>,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ResetPasswordRequest {
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ForgotPasswordRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
}

/// Redeems an emailed reset token.
#[derive(Debug, Deserialize, Validate)]
pub struct TokenResetRequest {
    #[validate(length(min = 1, message = "Reset token is required"))]
    pub token: String,

    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(must_match(other = "password_confirmation", message = "Passwords do not match"))]
    pub password: String,

    pub password_confirmation: String,
}

/// `?permissions=a,b` on the permission check endpoint.
#[derive(Debug, Deserialize)]
pub struct PermissionCheckQuery {
    pub permissions: String,
}

impl PermissionCheckQuery {
    pub fn slugs(&self) -> Vec<String> {
        self.permissions
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Serialize)]
pub struct PermissionCheckResponse {
    pub permissions: Vec<String>,
    pub granted: bool,
    pub is_sudo: bool,
}
