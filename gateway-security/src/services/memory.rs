//! In-process store for tests and local development.
//!
//! All tables sit behind one mutex so every trait call is a single critical
//! section, giving the same atomicity the SQL statements provide.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use crate::models::{
    ActivityEntry, ApiToken, LockoutRecord, NewActivityEntry, NewApiToken, NewPasswordReset,
    NewPermission, NewRole, NewUser, PasswordReset, Permission, RateLimitCounter, Role,
    RolePermissionGrant, TokenType, User,
};
use crate::services::store::{
    window_end, ActivityStore, LockoutStore, PasswordResetStore, RateLimitStore, RbacStore,
    SecurityStore, TokenLedger, UserStore,
};

#[derive(Default)]
struct Tables {
    users: BTreeMap<i64, User>,
    tokens: BTreeMap<i64, ApiToken>,
    roles: BTreeMap<i64, Role>,
    permissions: BTreeMap<i64, Permission>,
    user_roles: BTreeSet<(i64, i64)>,
    role_permissions: BTreeSet<(i64, i64)>,
    rate_limits: HashMap<String, RateLimitCounter>,
    ip_blocks: HashMap<String, LockoutRecord>,
    password_resets: BTreeMap<i64, PasswordReset>,
    activity: Vec<ActivityEntry>,
    next_user_id: i64,
    next_token_id: i64,
    next_role_id: i64,
    next_permission_id: i64,
    next_reset_id: i64,
    next_activity_id: i64,
}

impl Tables {
    fn next_id(counter: &mut i64) -> i64 {
        *counter += 1;
        *counter
    }

    fn token_by_hash_mut(&mut self, token_hash: &str) -> Option<&mut ApiToken> {
        self.tokens
            .values_mut()
            .find(|t| t.token_hash == token_hash)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, anyhow::Error> {
        self.tables
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store mutex poisoned"))
    }
}

#[async_trait]
impl TokenLedger for MemoryStore {
    async fn insert_token(&self, token: NewApiToken) -> Result<ApiToken, anyhow::Error> {
        let mut tables = self.lock()?;
        if tables.tokens.values().any(|t| t.token_hash == token.token_hash) {
            anyhow::bail!("duplicate token hash");
        }
        let id = Tables::next_id(&mut tables.next_token_id);
        let row = ApiToken {
            id,
            user_id: token.user_id,
            token_hash: token.token_hash,
            token_type: token.token_type.as_str().to_string(),
            expires_at: token.expires_at,
            last_used_at: None,
            revoked_at: None,
            ip_address: token.ip_address,
            user_agent: token.user_agent,
            created_at: Utc::now(),
        };
        tables.tokens.insert(id, row.clone());
        Ok(row)
    }

    async fn find_token_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<ApiToken>, anyhow::Error> {
        let tables = self.lock()?;
        Ok(tables
            .tokens
            .values()
            .find(|t| t.token_hash == token_hash)
            .cloned())
    }

    async fn consume_refresh_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ApiToken>, anyhow::Error> {
        let mut tables = self.lock()?;
        match tables.token_by_hash_mut(token_hash) {
            Some(token) if token.kind() == Some(TokenType::Refresh) && token.is_usable(now) => {
                token.revoked_at = Some(now);
                Ok(Some(token.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn revoke_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, anyhow::Error> {
        let mut tables = self.lock()?;
        match tables.token_by_hash_mut(token_hash) {
            Some(token) if token.revoked_at.is_none() => {
                token.revoked_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_user_tokens(
        &self,
        user_id: i64,
        token_type: Option<TokenType>,
        now: DateTime<Utc>,
    ) -> Result<u64, anyhow::Error> {
        let mut tables = self.lock()?;
        let mut revoked = 0;
        for token in tables.tokens.values_mut() {
            let type_matches = token_type.map_or(true, |t| token.kind() == Some(t));
            if token.user_id == user_id && token.revoked_at.is_none() && type_matches {
                token.revoked_at = Some(now);
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn touch_token(&self, token_hash: &str, now: DateTime<Utc>) -> Result<(), anyhow::Error> {
        let mut tables = self.lock()?;
        if let Some(token) = tables.token_by_hash_mut(token_hash) {
            token.last_used_at = Some(now);
        }
        Ok(())
    }

    async fn purge_expired_tokens(&self, now: DateTime<Utc>) -> Result<u64, anyhow::Error> {
        let mut tables = self.lock()?;
        let before = tables.tokens.len();
        tables.tokens.retain(|_, t| t.expires_at > now);
        Ok((before - tables.tokens.len()) as u64)
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_active_user_by_identity(
        &self,
        identity: &str,
    ) -> Result<Option<User>, anyhow::Error> {
        let tables = self.lock()?;
        Ok(tables
            .users
            .values()
            .find(|u| u.is_active && (u.email == identity || u.username == identity))
            .cloned())
    }

    async fn find_user_by_id(&self, user_id: i64) -> Result<Option<User>, anyhow::Error> {
        let tables = self.lock()?;
        Ok(tables.users.get(&user_id).cloned())
    }

    async fn insert_user(&self, user: NewUser) -> Result<Option<User>, anyhow::Error> {
        let mut tables = self.lock()?;
        let taken = tables
            .users
            .values()
            .any(|u| u.username == user.username || u.email == user.email);
        if taken {
            return Ok(None);
        }
        let id = Tables::next_id(&mut tables.next_user_id);
        let row = User {
            id,
            username: user.username,
            email: user.email,
            display_name: user.display_name,
            password_hash: user.password_hash,
            is_active: true,
            last_login_at: None,
            created_at: Utc::now(),
        };
        tables.users.insert(id, row.clone());
        Ok(Some(row))
    }

    async fn set_user_active(&self, user_id: i64, active: bool) -> Result<bool, anyhow::Error> {
        let mut tables = self.lock()?;
        Ok(match tables.users.get_mut(&user_id) {
            Some(user) => {
                user.is_active = active;
                true
            }
            None => false,
        })
    }

    async fn record_login(&self, user_id: i64, now: DateTime<Utc>) -> Result<(), anyhow::Error> {
        let mut tables = self.lock()?;
        if let Some(user) = tables.users.get_mut(&user_id) {
            user.last_login_at = Some(now);
        }
        Ok(())
    }

    async fn update_password_hash(
        &self,
        user_id: i64,
        password_hash: &str,
    ) -> Result<bool, anyhow::Error> {
        let mut tables = self.lock()?;
        Ok(match tables.users.get_mut(&user_id) {
            Some(user) => {
                user.password_hash = password_hash.to_string();
                true
            }
            None => false,
        })
    }
}

#[async_trait]
impl RbacStore for MemoryStore {
    async fn find_role_by_slug(&self, slug: &str) -> Result<Option<Role>, anyhow::Error> {
        let tables = self.lock()?;
        Ok(tables.roles.values().find(|r| r.slug == slug).cloned())
    }

    async fn find_role_by_id(&self, role_id: i64) -> Result<Option<Role>, anyhow::Error> {
        let tables = self.lock()?;
        Ok(tables.roles.get(&role_id).cloned())
    }

    async fn ensure_role(&self, role: NewRole) -> Result<Role, anyhow::Error> {
        let mut tables = self.lock()?;
        if let Some(existing) = tables.roles.values().find(|r| r.slug == role.slug) {
            return Ok(existing.clone());
        }
        let id = Tables::next_id(&mut tables.next_role_id);
        let row = role_row(id, role);
        tables.roles.insert(id, row.clone());
        Ok(row)
    }

    async fn insert_role(&self, role: NewRole) -> Result<Option<Role>, anyhow::Error> {
        let mut tables = self.lock()?;
        if tables.roles.values().any(|r| r.slug == role.slug) {
            return Ok(None);
        }
        let id = Tables::next_id(&mut tables.next_role_id);
        let row = role_row(id, role);
        tables.roles.insert(id, row.clone());
        Ok(Some(row))
    }

    async fn delete_role(&self, role_id: i64) -> Result<bool, anyhow::Error> {
        let mut tables = self.lock()?;
        let removed = tables.roles.remove(&role_id).is_some();
        if removed {
            tables.user_roles.retain(|(_, r)| *r != role_id);
            tables.role_permissions.retain(|(r, _)| *r != role_id);
        }
        Ok(removed)
    }

    async fn list_roles(&self) -> Result<Vec<Role>, anyhow::Error> {
        let tables = self.lock()?;
        Ok(tables.roles.values().cloned().collect())
    }

    async fn find_permission_by_id(
        &self,
        permission_id: i64,
    ) -> Result<Option<Permission>, anyhow::Error> {
        let tables = self.lock()?;
        Ok(tables.permissions.get(&permission_id).cloned())
    }

    async fn insert_permission(
        &self,
        permission: NewPermission,
    ) -> Result<Option<Permission>, anyhow::Error> {
        let mut tables = self.lock()?;
        if tables.permissions.values().any(|p| p.slug == permission.slug) {
            return Ok(None);
        }
        let id = Tables::next_id(&mut tables.next_permission_id);
        let row = Permission {
            id,
            name: permission.name,
            slug: permission.slug,
            module: permission.module,
            description: permission.description,
            is_system: permission.is_system,
            created_at: Utc::now(),
        };
        tables.permissions.insert(id, row.clone());
        Ok(Some(row))
    }

    async fn delete_permission(&self, permission_id: i64) -> Result<bool, anyhow::Error> {
        let mut tables = self.lock()?;
        let removed = tables.permissions.remove(&permission_id).is_some();
        if removed {
            tables
                .role_permissions
                .retain(|(_, p)| *p != permission_id);
        }
        Ok(removed)
    }

    async fn list_permissions(&self) -> Result<Vec<Permission>, anyhow::Error> {
        let tables = self.lock()?;
        let mut permissions: Vec<Permission> = tables.permissions.values().cloned().collect();
        permissions.sort_by(|a, b| (&a.module, &a.slug).cmp(&(&b.module, &b.slug)));
        Ok(permissions)
    }

    async fn list_all_permission_slugs(&self) -> Result<Vec<String>, anyhow::Error> {
        let tables = self.lock()?;
        let mut slugs: Vec<String> = tables.permissions.values().map(|p| p.slug.clone()).collect();
        slugs.sort();
        Ok(slugs)
    }

    async fn list_permission_slugs_for_user(
        &self,
        user_id: i64,
    ) -> Result<Vec<String>, anyhow::Error> {
        let tables = self.lock()?;
        let slugs: BTreeSet<String> = tables
            .user_roles
            .iter()
            .filter(|(u, _)| *u == user_id)
            .flat_map(|(_, role_id)| {
                tables
                    .role_permissions
                    .iter()
                    .filter(move |(r, _)| r == role_id)
            })
            .filter_map(|(_, permission_id)| tables.permissions.get(permission_id))
            .map(|p| p.slug.clone())
            .collect();
        Ok(slugs.into_iter().collect())
    }

    async fn user_has_role(&self, user_id: i64, role_slug: &str) -> Result<bool, anyhow::Error> {
        let tables = self.lock()?;
        Ok(tables.user_roles.iter().any(|(u, r)| {
            *u == user_id
                && tables
                    .roles
                    .get(r)
                    .is_some_and(|role| role.slug == role_slug)
        }))
    }

    async fn assign_role(&self, user_id: i64, role_id: i64) -> Result<bool, anyhow::Error> {
        let mut tables = self.lock()?;
        if !tables.users.contains_key(&user_id) || !tables.roles.contains_key(&role_id) {
            anyhow::bail!("role membership references a missing user or role");
        }
        Ok(tables.user_roles.insert((user_id, role_id)))
    }

    async fn remove_role(&self, user_id: i64, role_id: i64) -> Result<bool, anyhow::Error> {
        let mut tables = self.lock()?;
        Ok(tables.user_roles.remove(&(user_id, role_id)))
    }

    async fn list_role_members(&self, role_id: i64) -> Result<Vec<i64>, anyhow::Error> {
        let tables = self.lock()?;
        Ok(tables
            .user_roles
            .iter()
            .filter(|(_, r)| *r == role_id)
            .map(|(u, _)| *u)
            .collect())
    }

    async fn grant_permission(
        &self,
        role_id: i64,
        permission_id: i64,
    ) -> Result<bool, anyhow::Error> {
        let mut tables = self.lock()?;
        if !tables.roles.contains_key(&role_id) || !tables.permissions.contains_key(&permission_id)
        {
            anyhow::bail!("grant references a missing role or permission");
        }
        Ok(tables.role_permissions.insert((role_id, permission_id)))
    }

    async fn revoke_permission(
        &self,
        role_id: i64,
        permission_id: i64,
    ) -> Result<bool, anyhow::Error> {
        let mut tables = self.lock()?;
        Ok(tables.role_permissions.remove(&(role_id, permission_id)))
    }

    async fn grant_missing_permissions(&self, role_id: i64) -> Result<u64, anyhow::Error> {
        let mut tables = self.lock()?;
        if !tables.roles.contains_key(&role_id) {
            anyhow::bail!("role {} does not exist", role_id);
        }
        let permission_ids: Vec<i64> = tables.permissions.keys().copied().collect();
        let mut granted = 0;
        for permission_id in permission_ids {
            if tables.role_permissions.insert((role_id, permission_id)) {
                granted += 1;
            }
        }
        Ok(granted)
    }

    async fn list_role_permission_grants(
        &self,
    ) -> Result<Vec<RolePermissionGrant>, anyhow::Error> {
        let tables = self.lock()?;
        Ok(tables
            .role_permissions
            .iter()
            .map(|(role_id, permission_id)| RolePermissionGrant {
                role_id: *role_id,
                permission_id: *permission_id,
            })
            .collect())
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn hit_counter(
        &self,
        key: &str,
        window_seconds: i64,
        now: DateTime<Utc>,
    ) -> Result<RateLimitCounter, anyhow::Error> {
        let expires_at = window_end(now, window_seconds)?;
        let mut tables = self.lock()?;
        let fresh = RateLimitCounter {
            key: key.to_string(),
            hits: 1,
            window_start: now,
            expires_at,
        };
        let counter = tables
            .rate_limits
            .entry(key.to_string())
            .and_modify(|c| {
                if c.is_expired(now) {
                    *c = fresh.clone();
                } else {
                    c.hits += 1;
                }
            })
            .or_insert_with(|| fresh.clone());
        Ok(counter.clone())
    }

    async fn purge_expired_counters(&self, now: DateTime<Utc>) -> Result<u64, anyhow::Error> {
        let mut tables = self.lock()?;
        let before = tables.rate_limits.len();
        tables.rate_limits.retain(|_, c| !c.is_expired(now));
        Ok((before - tables.rate_limits.len()) as u64)
    }
}

#[async_trait]
impl LockoutStore for MemoryStore {
    async fn find_lockout(&self, ip_address: &str) -> Result<Option<LockoutRecord>, anyhow::Error> {
        let tables = self.lock()?;
        Ok(tables.ip_blocks.get(ip_address).cloned())
    }

    async fn record_failure(
        &self,
        ip_address: &str,
        max_attempts: i32,
        block_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<LockoutRecord, anyhow::Error> {
        let mut tables = self.lock()?;
        let record = tables
            .ip_blocks
            .entry(ip_address.to_string())
            .or_insert_with(|| LockoutRecord {
                ip_address: ip_address.to_string(),
                failed_attempts: 0,
                blocked_until: None,
                is_whitelisted: false,
                reason: None,
                updated_at: now,
            });

        if record.is_whitelisted {
            return Ok(record.clone());
        }

        record.failed_attempts = if record.lockout_elapsed(now) {
            1
        } else {
            record.failed_attempts + 1
        };
        record.blocked_until = (record.failed_attempts >= max_attempts).then_some(block_until);
        record.reason = Some("Failed login".to_string());
        record.updated_at = now;
        Ok(record.clone())
    }

    async fn clear_lockout(&self, ip_address: &str, now: DateTime<Utc>) -> Result<(), anyhow::Error> {
        let mut tables = self.lock()?;
        if let Some(record) = tables.ip_blocks.get_mut(ip_address) {
            if !record.is_whitelisted {
                record.failed_attempts = 0;
                record.blocked_until = None;
                record.updated_at = now;
            }
        }
        Ok(())
    }

    async fn set_whitelisted(
        &self,
        ip_address: &str,
        whitelisted: bool,
        now: DateTime<Utc>,
    ) -> Result<LockoutRecord, anyhow::Error> {
        let mut tables = self.lock()?;
        let record = tables
            .ip_blocks
            .entry(ip_address.to_string())
            .or_insert_with(|| LockoutRecord {
                ip_address: ip_address.to_string(),
                failed_attempts: 0,
                blocked_until: None,
                is_whitelisted: false,
                reason: None,
                updated_at: now,
            });
        record.is_whitelisted = whitelisted;
        if whitelisted {
            record.failed_attempts = 0;
            record.blocked_until = None;
            record.reason = Some("Whitelisted".to_string());
        }
        record.updated_at = now;
        Ok(record.clone())
    }
}

#[async_trait]
impl PasswordResetStore for MemoryStore {
    async fn insert_password_reset(
        &self,
        reset: NewPasswordReset,
        now: DateTime<Utc>,
    ) -> Result<PasswordReset, anyhow::Error> {
        let mut tables = self.lock()?;
        if !tables.users.contains_key(&reset.user_id) {
            anyhow::bail!("password reset references a missing user");
        }
        if tables
            .password_resets
            .values()
            .any(|r| r.token_hash == reset.token_hash)
        {
            anyhow::bail!("duplicate reset token hash");
        }

        for earlier in tables.password_resets.values_mut() {
            if earlier.user_id == reset.user_id && earlier.used_at.is_none() {
                earlier.used_at = Some(now);
            }
        }

        let id = Tables::next_id(&mut tables.next_reset_id);
        let row = PasswordReset {
            id,
            user_id: reset.user_id,
            token_hash: reset.token_hash,
            expires_at: reset.expires_at,
            used_at: None,
            ip_address: reset.ip_address,
            created_at: now,
        };
        tables.password_resets.insert(id, row.clone());
        Ok(row)
    }

    async fn consume_password_reset(
        &self,
        token_hash: &str,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<PasswordReset>, anyhow::Error> {
        let mut tables = self.lock()?;
        match tables
            .password_resets
            .values_mut()
            .find(|r| r.token_hash == token_hash && r.user_id == user_id)
        {
            Some(reset) if reset.is_redeemable(now) => {
                reset.used_at = Some(now);
                Ok(Some(reset.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn purge_expired_password_resets(
        &self,
        now: DateTime<Utc>,
    ) -> Result<u64, anyhow::Error> {
        let mut tables = self.lock()?;
        let before = tables.password_resets.len();
        tables.password_resets.retain(|_, r| r.is_redeemable(now));
        Ok((before - tables.password_resets.len()) as u64)
    }
}

#[async_trait]
impl ActivityStore for MemoryStore {
    async fn record_activity(&self, entry: NewActivityEntry) -> Result<(), anyhow::Error> {
        let mut tables = self.lock()?;
        let id = Tables::next_id(&mut tables.next_activity_id);
        tables.activity.push(ActivityEntry {
            id,
            user_id: entry.user_id,
            impersonated_by: entry.impersonated_by,
            action_type: entry.action_type.as_str().to_string(),
            resource_type: entry.resource_type,
            resource_id: entry.resource_id,
            is_admin_action: entry.is_admin_action,
            ip_address: entry.ip_address,
            user_agent: entry.user_agent,
            request_method: entry.request_method,
            request_path: entry.request_path,
            request_payload: entry.request_payload,
            response_status: entry.response_status,
            response_time_ms: entry.response_time_ms,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn list_recent_activity(&self, limit: i64) -> Result<Vec<ActivityEntry>, anyhow::Error> {
        let tables = self.lock()?;
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        Ok(tables.activity.iter().rev().take(limit).cloned().collect())
    }
}

#[async_trait]
impl SecurityStore for MemoryStore {
    async fn health_check(&self) -> Result<(), anyhow::Error> {
        self.lock().map(|_| ())
    }
}

fn role_row(id: i64, role: NewRole) -> Role {
    Role {
        id,
        name: role.name,
        slug: role.slug,
        description: role.description,
        is_system: role.is_system,
        created_at: Utc::now(),
    }
}
