//! User accounts and the principal attached to authenticated requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// User account row. The password digest never leaves this type.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub display_name: Option<String>,
    pub password_hash: String,
    pub is_active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Convert to the public representation (password digest stripped).
    pub fn sanitized(&self) -> SanitizedUser {
        SanitizedUser::from(self)
    }
}

/// Fields needed to create an account; the password is already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub display_name: Option<String>,
    pub password_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanitizedUser {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub display_name: Option<String>,
    pub is_active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for SanitizedUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            display_name: user.display_name.clone(),
            is_active: user.is_active,
            last_login_at: user.last_login_at,
            created_at: user.created_at,
        }
    }
}

/// Principal established by the auth middleware and carried in request
/// extensions for the rest of the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct AuthenticatedUser {
    #[serde(flatten)]
    pub user: SanitizedUser,
    /// Set when a sudo principal is acting as this user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impersonated_by: Option<i64>,
    /// Set by the sudo middleware once developer membership is confirmed.
    #[serde(skip)]
    pub is_sudo: bool,
}

impl AuthenticatedUser {
    pub fn id(&self) -> i64 {
        self.user.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitized_user_has_no_password_hash() {
        let user = User {
            id: 7,
            username: "bob".to_string(),
            email: "bob@example.com".to_string(),
            display_name: None,
            password_hash: "$argon2id$secret".to_string(),
            is_active: true,
            last_login_at: None,
            created_at: Utc::now(),
        };

        let json = serde_json::to_string(&user.sanitized()).unwrap();
        assert!(!json.contains("password"));
        assert!(!json.contains("argon2"));
        assert!(json.contains("\"username\":\"bob\""));
    }
}
