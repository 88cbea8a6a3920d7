//! PostgreSQL implementation of the security store contract.
//!
//! Uses sqlx runtime queries; check-then-act paths are single statements.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;

use crate::models::{
    ActivityEntry, ApiToken, LockoutRecord, NewActivityEntry, NewApiToken, NewPasswordReset,
    NewPermission, NewRole, NewUser, PasswordReset, Permission, RateLimitCounter, Role,
    RolePermissionGrant, TokenType, User,
};
use crate::services::store::{
    window_end, ActivityStore, LockoutStore, PasswordResetStore, RateLimitStore, RbacStore,
    SecurityStore, TokenLedger, UserStore,
};

const USER_COLUMNS: &str =
    "id, username, email, display_name, password_hash, is_active, last_login_at, created_at";
const TOKEN_COLUMNS: &str = "id, user_id, token_hash, token_type, expires_at, last_used_at, \
     revoked_at, ip_address, user_agent, created_at";
const ROLE_COLUMNS: &str = "id, name, slug, description, is_system, created_at";
const PERMISSION_COLUMNS: &str = "id, name, slug, module, description, is_system, created_at";
const LOCKOUT_COLUMNS: &str =
    "ip_address, failed_attempts, blocked_until, is_whitelisted, reason, updated_at";
const RESET_COLUMNS: &str = "id, user_id, token_hash, expires_at, used_at, ip_address, created_at";
const ACTIVITY_COLUMNS: &str = "id, user_id, impersonated_by, action_type, resource_type, \
     resource_id, is_admin_action, ip_address, user_agent, request_method, request_path, \
     request_payload, response_status, response_time_ms, created_at";

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ==================== Token Ledger ====================

#[async_trait]
impl TokenLedger for Database {
    async fn insert_token(&self, token: NewApiToken) -> Result<ApiToken, anyhow::Error> {
        let row = sqlx::query_as::<_, ApiToken>(&format!(
            r#"
            INSERT INTO api_tokens (user_id, token_hash, token_type, expires_at, ip_address, user_agent)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {TOKEN_COLUMNS}
            "#
        ))
        .bind(token.user_id)
        .bind(&token.token_hash)
        .bind(token.token_type.as_str())
        .bind(token.expires_at)
        .bind(&token.ip_address)
        .bind(&token.user_agent)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_token_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<ApiToken>, anyhow::Error> {
        let row = sqlx::query_as::<_, ApiToken>(&format!(
            "SELECT {TOKEN_COLUMNS} FROM api_tokens WHERE token_hash = $1"
        ))
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn consume_refresh_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ApiToken>, anyhow::Error> {
        // The row lock taken by UPDATE serialises concurrent consumers; the
        // loser re-evaluates the predicate and matches nothing.
        let row = sqlx::query_as::<_, ApiToken>(&format!(
            r#"
            UPDATE api_tokens SET revoked_at = $2
            WHERE token_hash = $1
              AND token_type = 'refresh'
              AND revoked_at IS NULL
              AND expires_at > $2
            RETURNING {TOKEN_COLUMNS}
            "#
        ))
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn revoke_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, anyhow::Error> {
        let result = sqlx::query(
            "UPDATE api_tokens SET revoked_at = $2 WHERE token_hash = $1 AND revoked_at IS NULL",
        )
        .bind(token_hash)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_user_tokens(
        &self,
        user_id: i64,
        token_type: Option<TokenType>,
        now: DateTime<Utc>,
    ) -> Result<u64, anyhow::Error> {
        let result = sqlx::query(
            r#"
            UPDATE api_tokens SET revoked_at = $2
            WHERE user_id = $1
              AND revoked_at IS NULL
              AND ($3::TEXT IS NULL OR token_type = $3)
            "#,
        )
        .bind(user_id)
        .bind(now)
        .bind(token_type.map(|t| t.as_str()))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn touch_token(&self, token_hash: &str, now: DateTime<Utc>) -> Result<(), anyhow::Error> {
        sqlx::query("UPDATE api_tokens SET last_used_at = $2 WHERE token_hash = $1")
            .bind(token_hash)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_expired_tokens(&self, now: DateTime<Utc>) -> Result<u64, anyhow::Error> {
        let result = sqlx::query("DELETE FROM api_tokens WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

// ==================== Users ====================

#[async_trait]
impl UserStore for Database {
    async fn find_active_user_by_identity(
        &self,
        identity: &str,
    ) -> Result<Option<User>, anyhow::Error> {
        let row = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE (email = $1 OR username = $1) AND is_active"
        ))
        .bind(identity)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_user_by_id(&self, user_id: i64) -> Result<Option<User>, anyhow::Error> {
        let row = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn insert_user(&self, user: NewUser) -> Result<Option<User>, anyhow::Error> {
        let row = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (username, email, display_name, password_hash)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT DO NOTHING
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(&user.password_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn set_user_active(&self, user_id: i64, active: bool) -> Result<bool, anyhow::Error> {
        let result = sqlx::query("UPDATE users SET is_active = $2 WHERE id = $1")
            .bind(user_id)
            .bind(active)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_login(&self, user_id: i64, now: DateTime<Utc>) -> Result<(), anyhow::Error> {
        sqlx::query("UPDATE users SET last_login_at = $2 WHERE id = $1")
            .bind(user_id)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_password_hash(
        &self,
        user_id: i64,
        password_hash: &str,
    ) -> Result<bool, anyhow::Error> {
        let result = sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(user_id)
            .bind(password_hash)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// ==================== Roles & Permissions ====================

#[async_trait]
impl RbacStore for Database {
    async fn find_role_by_slug(&self, slug: &str) -> Result<Option<Role>, anyhow::Error> {
        let row = sqlx::query_as::<_, Role>(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE slug = $1"
        ))
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_role_by_id(&self, role_id: i64) -> Result<Option<Role>, anyhow::Error> {
        let row = sqlx::query_as::<_, Role>(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE id = $1"
        ))
        .bind(role_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn ensure_role(&self, role: NewRole) -> Result<Role, anyhow::Error> {
        // The no-op update makes RETURNING yield the existing row on conflict.
        let row = sqlx::query_as::<_, Role>(&format!(
            r#"
            INSERT INTO roles (name, slug, description, is_system)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (slug) DO UPDATE SET slug = EXCLUDED.slug
            RETURNING {ROLE_COLUMNS}
            "#
        ))
        .bind(&role.name)
        .bind(&role.slug)
        .bind(&role.description)
        .bind(role.is_system)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn insert_role(&self, role: NewRole) -> Result<Option<Role>, anyhow::Error> {
        let row = sqlx::query_as::<_, Role>(&format!(
            r#"
            INSERT INTO roles (name, slug, description, is_system)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (slug) DO NOTHING
            RETURNING {ROLE_COLUMNS}
            "#
        ))
        .bind(&role.name)
        .bind(&role.slug)
        .bind(&role.description)
        .bind(role.is_system)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn delete_role(&self, role_id: i64) -> Result<bool, anyhow::Error> {
        let result = sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(role_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_roles(&self) -> Result<Vec<Role>, anyhow::Error> {
        let rows = sqlx::query_as::<_, Role>(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn find_permission_by_id(
        &self,
        permission_id: i64,
    ) -> Result<Option<Permission>, anyhow::Error> {
        let row = sqlx::query_as::<_, Permission>(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions WHERE id = $1"
        ))
        .bind(permission_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn insert_permission(
        &self,
        permission: NewPermission,
    ) -> Result<Option<Permission>, anyhow::Error> {
        let row = sqlx::query_as::<_, Permission>(&format!(
            r#"
            INSERT INTO permissions (name, slug, module, description, is_system)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (slug) DO NOTHING
            RETURNING {PERMISSION_COLUMNS}
            "#
        ))
        .bind(&permission.name)
        .bind(&permission.slug)
        .bind(&permission.module)
        .bind(&permission.description)
        .bind(permission.is_system)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn delete_permission(&self, permission_id: i64) -> Result<bool, anyhow::Error> {
        let result = sqlx::query("DELETE FROM permissions WHERE id = $1")
            .bind(permission_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_permissions(&self) -> Result<Vec<Permission>, anyhow::Error> {
        let rows = sqlx::query_as::<_, Permission>(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions ORDER BY module, slug"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_all_permission_slugs(&self) -> Result<Vec<String>, anyhow::Error> {
        let slugs = sqlx::query_scalar::<_, String>("SELECT slug FROM permissions ORDER BY slug")
            .fetch_all(&self.pool)
            .await?;
        Ok(slugs)
    }

    async fn list_permission_slugs_for_user(
        &self,
        user_id: i64,
    ) -> Result<Vec<String>, anyhow::Error> {
        let slugs = sqlx::query_scalar::<_, String>(
            r#"
            SELECT DISTINCT p.slug
            FROM permissions p
            JOIN role_permissions rp ON rp.permission_id = p.id
            JOIN user_roles ur ON ur.role_id = rp.role_id
            WHERE ur.user_id = $1
            ORDER BY p.slug
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(slugs)
    }

    async fn user_has_role(&self, user_id: i64, role_slug: &str) -> Result<bool, anyhow::Error> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM user_roles ur
                JOIN roles r ON r.id = ur.role_id
                WHERE ur.user_id = $1 AND r.slug = $2
            )
            "#,
        )
        .bind(user_id)
        .bind(role_slug)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn assign_role(&self, user_id: i64, role_id: i64) -> Result<bool, anyhow::Error> {
        let result = sqlx::query(
            "INSERT INTO user_roles (user_id, role_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(user_id)
        .bind(role_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_role(&self, user_id: i64, role_id: i64) -> Result<bool, anyhow::Error> {
        let result = sqlx::query("DELETE FROM user_roles WHERE user_id = $1 AND role_id = $2")
            .bind(user_id)
            .bind(role_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_role_members(&self, role_id: i64) -> Result<Vec<i64>, anyhow::Error> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT user_id FROM user_roles WHERE role_id = $1 ORDER BY user_id",
        )
        .bind(role_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn grant_permission(
        &self,
        role_id: i64,
        permission_id: i64,
    ) -> Result<bool, anyhow::Error> {
        let result = sqlx::query(
            "INSERT INTO role_permissions (role_id, permission_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(role_id)
        .bind(permission_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_permission(
        &self,
        role_id: i64,
        permission_id: i64,
    ) -> Result<bool, anyhow::Error> {
        let result =
            sqlx::query("DELETE FROM role_permissions WHERE role_id = $1 AND permission_id = $2")
                .bind(role_id)
                .bind(permission_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn grant_missing_permissions(&self, role_id: i64) -> Result<u64, anyhow::Error> {
        let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM roles WHERE id = $1)")
            .bind(role_id)
            .fetch_one(&self.pool)
            .await?;
        if !exists {
            anyhow::bail!("role {} does not exist", role_id);
        }

        let result = sqlx::query(
            r#"
            INSERT INTO role_permissions (role_id, permission_id)
            SELECT $1, p.id FROM permissions p
            ON CONFLICT (role_id, permission_id) DO NOTHING
            "#,
        )
        .bind(role_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn list_role_permission_grants(
        &self,
    ) -> Result<Vec<RolePermissionGrant>, anyhow::Error> {
        let rows = sqlx::query_as::<_, RolePermissionGrant>(
            "SELECT role_id, permission_id FROM role_permissions ORDER BY role_id, permission_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

// ==================== Rate Limits ====================

#[async_trait]
impl RateLimitStore for Database {
    async fn hit_counter(
        &self,
        key: &str,
        window_seconds: i64,
        now: DateTime<Utc>,
    ) -> Result<RateLimitCounter, anyhow::Error> {
        let expires_at = window_end(now, window_seconds)?;

        // SET expressions read the pre-update row, so the three CASEs agree.
        let row = sqlx::query_as::<_, RateLimitCounter>(
            r#"
            INSERT INTO rate_limits (key, hits, window_start, expires_at)
            VALUES ($1, 1, $2, $3)
            ON CONFLICT (key) DO UPDATE SET
                hits = CASE WHEN rate_limits.expires_at <= EXCLUDED.window_start
                            THEN 1 ELSE rate_limits.hits + 1 END,
                window_start = CASE WHEN rate_limits.expires_at <= EXCLUDED.window_start
                            THEN EXCLUDED.window_start ELSE rate_limits.window_start END,
                expires_at = CASE WHEN rate_limits.expires_at <= EXCLUDED.window_start
                            THEN EXCLUDED.expires_at ELSE rate_limits.expires_at END
            RETURNING key, hits, window_start, expires_at
            "#,
        )
        .bind(key)
        .bind(now)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn purge_expired_counters(&self, now: DateTime<Utc>) -> Result<u64, anyhow::Error> {
        let result = sqlx::query("DELETE FROM rate_limits WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

// ==================== IP Lockout ====================

#[async_trait]
impl LockoutStore for Database {
    async fn find_lockout(&self, ip_address: &str) -> Result<Option<LockoutRecord>, anyhow::Error> {
        let row = sqlx::query_as::<_, LockoutRecord>(&format!(
            "SELECT {LOCKOUT_COLUMNS} FROM ip_blocks WHERE ip_address = $1"
        ))
        .bind(ip_address)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn record_failure(
        &self,
        ip_address: &str,
        max_attempts: i32,
        block_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<LockoutRecord, anyhow::Error> {
        let row = sqlx::query_as::<_, LockoutRecord>(&format!(
            r#"
            INSERT INTO ip_blocks (ip_address, failed_attempts, blocked_until, reason, updated_at)
            VALUES ($1, 1, CASE WHEN 1 >= $2 THEN $3::TIMESTAMPTZ END, 'Failed login', $4)
            ON CONFLICT (ip_address) DO UPDATE SET
                failed_attempts = CASE WHEN ip_blocks.blocked_until <= EXCLUDED.updated_at
                                       THEN 1 ELSE ip_blocks.failed_attempts + 1 END,
                blocked_until = CASE
                    WHEN (CASE WHEN ip_blocks.blocked_until <= EXCLUDED.updated_at
                               THEN 1 ELSE ip_blocks.failed_attempts + 1 END) >= $2
                    THEN $3::TIMESTAMPTZ
                    ELSE NULL
                END,
                reason = EXCLUDED.reason,
                updated_at = EXCLUDED.updated_at
            WHERE NOT ip_blocks.is_whitelisted
            RETURNING {LOCKOUT_COLUMNS}
            "#
        ))
        .bind(ip_address)
        .bind(max_attempts)
        .bind(block_until)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(record) => Ok(record),
            // Whitelisted: the conflict update was skipped.
            None => self
                .find_lockout(ip_address)
                .await?
                .ok_or_else(|| anyhow::anyhow!("lockout record for {} vanished", ip_address)),
        }
    }

    async fn clear_lockout(&self, ip_address: &str, now: DateTime<Utc>) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
            UPDATE ip_blocks SET failed_attempts = 0, blocked_until = NULL, updated_at = $2
            WHERE ip_address = $1 AND NOT is_whitelisted
            "#,
        )
        .bind(ip_address)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_whitelisted(
        &self,
        ip_address: &str,
        whitelisted: bool,
        now: DateTime<Utc>,
    ) -> Result<LockoutRecord, anyhow::Error> {
        let row = sqlx::query_as::<_, LockoutRecord>(&format!(
            r#"
            INSERT INTO ip_blocks (ip_address, failed_attempts, is_whitelisted, reason, updated_at)
            VALUES ($1, 0, $2, CASE WHEN $2 THEN 'Whitelisted' END, $3)
            ON CONFLICT (ip_address) DO UPDATE SET
                is_whitelisted = EXCLUDED.is_whitelisted,
                failed_attempts = CASE WHEN EXCLUDED.is_whitelisted
                                       THEN 0 ELSE ip_blocks.failed_attempts END,
                blocked_until = CASE WHEN EXCLUDED.is_whitelisted
                                     THEN NULL ELSE ip_blocks.blocked_until END,
                reason = CASE WHEN EXCLUDED.is_whitelisted
                              THEN 'Whitelisted' ELSE ip_blocks.reason END,
                updated_at = EXCLUDED.updated_at
            RETURNING {LOCKOUT_COLUMNS}
            "#
        ))
        .bind(ip_address)
        .bind(whitelisted)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }
}

// ==================== Password Resets ====================

#[async_trait]
impl PasswordResetStore for Database {
    async fn insert_password_reset(
        &self,
        reset: NewPasswordReset,
        now: DateTime<Utc>,
    ) -> Result<PasswordReset, anyhow::Error> {
        let row = sqlx::query_as::<_, PasswordReset>(&format!(
            r#"
            WITH superseded AS (
                UPDATE password_resets SET used_at = $5
                WHERE user_id = $1 AND used_at IS NULL
            )
            INSERT INTO password_resets (user_id, token_hash, expires_at, ip_address, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {RESET_COLUMNS}
            "#
        ))
        .bind(reset.user_id)
        .bind(&reset.token_hash)
        .bind(reset.expires_at)
        .bind(&reset.ip_address)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn consume_password_reset(
        &self,
        token_hash: &str,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<PasswordReset>, anyhow::Error> {
        let row = sqlx::query_as::<_, PasswordReset>(&format!(
            r#"
            UPDATE password_resets SET used_at = $3
            WHERE token_hash = $1
              AND user_id = $2
              AND used_at IS NULL
              AND expires_at > $3
            RETURNING {RESET_COLUMNS}
            "#
        ))
        .bind(token_hash)
        .bind(user_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn purge_expired_password_resets(
        &self,
        now: DateTime<Utc>,
    ) -> Result<u64, anyhow::Error> {
        let result =
            sqlx::query("DELETE FROM password_resets WHERE used_at IS NOT NULL OR expires_at <= $1")
                .bind(now)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}

// ==================== Activity Log ====================

#[async_trait]
impl ActivityStore for Database {
    async fn record_activity(&self, entry: NewActivityEntry) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
            INSERT INTO activity_log (
                user_id, impersonated_by, action_type, resource_type, resource_id,
                is_admin_action, ip_address, user_agent, request_method, request_path,
                request_payload, response_status, response_time_ms
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(entry.user_id)
        .bind(entry.impersonated_by)
        .bind(entry.action_type.as_str())
        .bind(&entry.resource_type)
        .bind(&entry.resource_id)
        .bind(entry.is_admin_action)
        .bind(&entry.ip_address)
        .bind(&entry.user_agent)
        .bind(&entry.request_method)
        .bind(&entry.request_path)
        .bind(&entry.request_payload)
        .bind(entry.response_status)
        .bind(entry.response_time_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_recent_activity(&self, limit: i64) -> Result<Vec<ActivityEntry>, anyhow::Error> {
        let rows = sqlx::query_as::<_, ActivityEntry>(&format!(
            "SELECT {ACTIVITY_COLUMNS} FROM activity_log ORDER BY id DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl SecurityStore for Database {
    async fn health_check(&self) -> Result<(), anyhow::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(|e| {
            tracing::error!("Database health check failed: {}", e);
            anyhow::anyhow!("Database health check failed: {}", e)
        })?;
        Ok(())
    }
}
