//! Narrow persistence contract consumed by the security services.
//!
//! Every check-then-act sequence (rate counters, refresh-token consumption,
//! lockout counting, developer-role reconciliation) is a single call here so
//! implementations can make it atomic.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::models::{
    ActivityEntry, ApiToken, LockoutRecord, NewActivityEntry, NewApiToken, NewPasswordReset,
    NewPermission, NewRole, NewUser, PasswordReset, Permission, RateLimitCounter, Role,
    RolePermissionGrant, TokenType, User,
};

#[async_trait]
pub trait TokenLedger: Send + Sync {
    async fn insert_token(&self, token: NewApiToken) -> Result<ApiToken, anyhow::Error>;

    async fn find_token_by_hash(&self, token_hash: &str)
        -> Result<Option<ApiToken>, anyhow::Error>;

    /// Revoke a usable refresh token and return it. `None` when the digest is
    /// unknown, already revoked, expired, or not a refresh token. Two
    /// concurrent calls for the same digest never both succeed.
    async fn consume_refresh_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ApiToken>, anyhow::Error>;

    /// Returns whether an unrevoked row was revoked.
    async fn revoke_token(&self, token_hash: &str, now: DateTime<Utc>)
        -> Result<bool, anyhow::Error>;

    /// Revoke every unrevoked token of a user, optionally of one type.
    async fn revoke_user_tokens(
        &self,
        user_id: i64,
        token_type: Option<TokenType>,
        now: DateTime<Utc>,
    ) -> Result<u64, anyhow::Error>;

    async fn touch_token(&self, token_hash: &str, now: DateTime<Utc>)
        -> Result<(), anyhow::Error>;

    async fn purge_expired_tokens(&self, now: DateTime<Utc>) -> Result<u64, anyhow::Error>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Active account whose email or username equals `identity`.
    async fn find_active_user_by_identity(
        &self,
        identity: &str,
    ) -> Result<Option<User>, anyhow::Error>;

    async fn find_user_by_id(&self, user_id: i64) -> Result<Option<User>, anyhow::Error>;

    /// `None` when the username or email is taken.
    async fn insert_user(&self, user: NewUser) -> Result<Option<User>, anyhow::Error>;

    async fn set_user_active(&self, user_id: i64, active: bool) -> Result<bool, anyhow::Error>;

    async fn record_login(&self, user_id: i64, now: DateTime<Utc>) -> Result<(), anyhow::Error>;

    async fn update_password_hash(
        &self,
        user_id: i64,
        password_hash: &str,
    ) -> Result<bool, anyhow::Error>;
}

#[async_trait]
pub trait RbacStore: Send + Sync {
    async fn find_role_by_slug(&self, slug: &str) -> Result<Option<Role>, anyhow::Error>;

    async fn find_role_by_id(&self, role_id: i64) -> Result<Option<Role>, anyhow::Error>;

    /// Find-or-create by slug in one step.
    async fn ensure_role(&self, role: NewRole) -> Result<Role, anyhow::Error>;

    /// `None` when the slug is taken.
    async fn insert_role(&self, role: NewRole) -> Result<Option<Role>, anyhow::Error>;

    async fn delete_role(&self, role_id: i64) -> Result<bool, anyhow::Error>;

    async fn list_roles(&self) -> Result<Vec<Role>, anyhow::Error>;

    async fn find_permission_by_id(
        &self,
        permission_id: i64,
    ) -> Result<Option<Permission>, anyhow::Error>;

    /// `None` when the slug is taken.
    async fn insert_permission(
        &self,
        permission: NewPermission,
    ) -> Result<Option<Permission>, anyhow::Error>;

    async fn delete_permission(&self, permission_id: i64) -> Result<bool, anyhow::Error>;

    /// Ordered by module, then slug.
    async fn list_permissions(&self) -> Result<Vec<Permission>, anyhow::Error>;

    async fn list_all_permission_slugs(&self) -> Result<Vec<String>, anyhow::Error>;

    /// Distinct slugs reachable through the user's role memberships.
    async fn list_permission_slugs_for_user(
        &self,
        user_id: i64,
    ) -> Result<Vec<String>, anyhow::Error>;

    async fn user_has_role(&self, user_id: i64, role_slug: &str) -> Result<bool, anyhow::Error>;

    /// Returns whether a membership row was created.
    async fn assign_role(&self, user_id: i64, role_id: i64) -> Result<bool, anyhow::Error>;

    async fn remove_role(&self, user_id: i64, role_id: i64) -> Result<bool, anyhow::Error>;

    async fn list_role_members(&self, role_id: i64) -> Result<Vec<i64>, anyhow::Error>;

    /// Returns whether a grant row was created.
    async fn grant_permission(&self, role_id: i64, permission_id: i64)
        -> Result<bool, anyhow::Error>;

    async fn revoke_permission(
        &self,
        role_id: i64,
        permission_id: i64,
    ) -> Result<bool, anyhow::Error>;

    /// Grant the role every permission it lacks; returns how many were added.
    async fn grant_missing_permissions(&self, role_id: i64) -> Result<u64, anyhow::Error>;

    async fn list_role_permission_grants(&self)
        -> Result<Vec<RolePermissionGrant>, anyhow::Error>;
}

#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Count one hit against `key`: start a fresh window (hits = 1) when the
    /// row is absent or its window has expired, otherwise increment in place.
    async fn hit_counter(
        &self,
        key: &str,
        window_seconds: i64,
        now: DateTime<Utc>,
    ) -> Result<RateLimitCounter, anyhow::Error>;

    async fn purge_expired_counters(&self, now: DateTime<Utc>) -> Result<u64, anyhow::Error>;
}

#[async_trait]
pub trait LockoutStore: Send + Sync {
    async fn find_lockout(&self, ip_address: &str) -> Result<Option<LockoutRecord>, anyhow::Error>;

    /// Count one failure for a non-whitelisted IP. A record whose lockout has
    /// elapsed restarts at one. Once the count reaches `max_attempts` the IP
    /// is blocked until `block_until`. Whitelisted records come back
    /// unchanged.
    async fn record_failure(
        &self,
        ip_address: &str,
        max_attempts: i32,
        block_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<LockoutRecord, anyhow::Error>;

    /// Reset the counter and any block on a non-whitelisted record.
    async fn clear_lockout(&self, ip_address: &str, now: DateTime<Utc>)
        -> Result<(), anyhow::Error>;

    /// Create or update the record; whitelisting also clears counter and block.
    async fn set_whitelisted(
        &self,
        ip_address: &str,
        whitelisted: bool,
        now: DateTime<Utc>,
    ) -> Result<LockoutRecord, anyhow::Error>;
}

#[async_trait]
pub trait PasswordResetStore: Send + Sync {
    /// Mark the user's outstanding resets used and record the new one, so at
    /// most one reset per user is ever redeemable.
    async fn insert_password_reset(
        &self,
        reset: NewPasswordReset,
        now: DateTime<Utc>,
    ) -> Result<PasswordReset, anyhow::Error>;

    /// Mark a redeemable reset of `user_id` used and return it. `None` when
    /// the digest is unknown, belongs to another user, is used or expired.
    /// Two concurrent calls never both succeed.
    async fn consume_password_reset(
        &self,
        token_hash: &str,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<PasswordReset>, anyhow::Error>;

    /// Drop rows that can no longer be redeemed.
    async fn purge_expired_password_resets(&self, now: DateTime<Utc>)
        -> Result<u64, anyhow::Error>;
}

#[async_trait]
pub trait ActivityStore: Send + Sync {
    async fn record_activity(&self, entry: NewActivityEntry) -> Result<(), anyhow::Error>;

    /// Newest first.
    async fn list_recent_activity(&self, limit: i64) -> Result<Vec<ActivityEntry>, anyhow::Error>;
}

/// Everything the gateway needs from one backing store.
#[async_trait]
pub trait SecurityStore:
    TokenLedger
    + UserStore
    + RbacStore
    + RateLimitStore
    + LockoutStore
    + PasswordResetStore
    + ActivityStore
{
    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

/// End of a window of `seconds` starting at `now`, refusing spans chrono
/// cannot represent.
pub(crate) fn window_end(now: DateTime<Utc>, seconds: i64) -> Result<DateTime<Utc>, anyhow::Error> {
    Duration::try_seconds(seconds)
        .and_then(|span| now.checked_add_signed(span))
        .ok_or_else(|| anyhow::anyhow!("window of {} seconds is out of range", seconds))
}
