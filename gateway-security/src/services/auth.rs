use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::{
    dtos::auth::CreateUserRequest,
    models::{AuthenticatedUser, NewApiToken, NewUser, SanitizedUser, TokenType},
    services::{
        error::ServiceError,
        ip_blocker::IpBlocker,
        jwt::{IssuedToken, TokenService},
        metrics,
        store::{TokenLedger, UserStore},
    },
    utils::{check_strength, PasswordHasher},
};

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginResult {
    #[serde(flatten)]
    pub tokens: TokenPair,
    pub user: SanitizedUser,
}

/// Access-only credential minted for a sudo principal acting as another user.
#[derive(Debug, Clone, Serialize)]
pub struct ImpersonationGrant {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub impersonating: SanitizedUser,
}

#[derive(Clone)]
pub struct AuthService {
    tokens: TokenService,
    ledger: Arc<dyn TokenLedger>,
    users: Arc<dyn UserStore>,
    hasher: PasswordHasher,
    ip_blocker: IpBlocker,
    min_password_length: usize,
}

impl AuthService {
    pub fn new(
        tokens: TokenService,
        ledger: Arc<dyn TokenLedger>,
        users: Arc<dyn UserStore>,
        hasher: PasswordHasher,
        ip_blocker: IpBlocker,
        min_password_length: usize,
    ) -> Self {
        Self {
            tokens,
            ledger,
            users,
            hasher,
            ip_blocker,
            min_password_length,
        }
    }

    pub async fn login(
        &self,
        identity: &str,
        password: &str,
        ip: &str,
        user_agent: &str,
    ) -> Result<LoginResult, ServiceError> {
        self.ip_blocker.check(ip).await?;

        let user = self
            .users
            .find_active_user_by_identity(identity)
            .await
            .map_err(ServiceError::Database)?;

        // Unknown identities still pay for one verification.
        let verified = match &user {
            Some(user) => self.hasher.verify(password, &user.password_hash).await?,
            None => {
                self.hasher.verify_dummy(password).await?;
                false
            }
        };

        let mut user = match user {
            Some(user) if verified => user,
            _ => {
                let record = self.ip_blocker.record_failed_attempt(ip).await?;
                metrics::record_auth_event("login", "failure");
                tracing::warn!(
                    ip = %ip,
                    failed_attempts = record.failed_attempts,
                    "Failed login attempt"
                );
                return Err(ServiceError::invalid_credentials());
            }
        };

        let now = Utc::now();
        self.ip_blocker.clear_attempts(ip).await?;
        self.users
            .record_login(user.id, now)
            .await
            .map_err(ServiceError::Database)?;
        user.last_login_at = Some(now);

        let tokens = self.issue_pair(user.id, ip, user_agent).await?;

        metrics::record_auth_event("login", "success");
        tracing::info!(user_id = user.id, ip = %ip, "User logged in");

        Ok(LoginResult {
            tokens,
            user: user.sanitized(),
        })
    }

    /// One-time-use rotation: the presented refresh token is revoked in the
    /// same step that checks it, then a fresh pair is issued.
    pub async fn refresh(
        &self,
        raw_refresh_token: &str,
        ip: &str,
        user_agent: &str,
    ) -> Result<TokenPair, ServiceError> {
        let claims = self.tokens.decode_as(raw_refresh_token, TokenType::Refresh)?;
        let token_hash = TokenService::hash_token(raw_refresh_token);
        let now = Utc::now();

        let consumed = self
            .ledger
            .consume_refresh_token(&token_hash, now)
            .await
            .map_err(ServiceError::Database)?;

        let consumed = match consumed {
            Some(row) if row.user_id == claims.sub => row,
            _ => {
                self.note_refresh_replay(&token_hash, claims.sub, ip).await;
                metrics::record_auth_event("refresh", "failure");
                return Err(ServiceError::Authentication(
                    "Refresh token is invalid or expired.".to_string(),
                ));
            }
        };

        let active = self
            .users
            .find_user_by_id(consumed.user_id)
            .await
            .map_err(ServiceError::Database)?
            .is_some_and(|user| user.is_active);
        if !active {
            metrics::record_auth_event("refresh", "failure");
            return Err(ServiceError::Authentication(
                "User account is deactivated.".to_string(),
            ));
        }

        let tokens = self.issue_pair(consumed.user_id, ip, user_agent).await?;

        metrics::record_auth_event("refresh", "success");
        tracing::info!(user_id = consumed.user_id, "Refresh token rotated");
        Ok(tokens)
    }

    async fn note_refresh_replay(&self, token_hash: &str, user_id: i64, ip: &str) {
        match self.ledger.find_token_by_hash(token_hash).await {
            Ok(Some(row)) if row.revoked_at.is_some() => {
                metrics::record_auth_event("refresh", "replay");
                tracing::warn!(
                    user_id,
                    ip = %ip,
                    revoked_at = ?row.revoked_at,
                    "Revoked refresh token presented again"
                );
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to inspect rejected refresh token"),
        }
    }

    /// Revoke the presented token and, best effort, the owner's refresh
    /// tokens. Never fails because the token is expired or malformed.
    pub async fn logout(&self, raw_access_token: &str) -> Result<(), ServiceError> {
        let now = Utc::now();
        let token_hash = TokenService::hash_token(raw_access_token);

        let revoked = self
            .ledger
            .revoke_token(&token_hash, now)
            .await
            .map_err(ServiceError::Database)?;

        match self.tokens.decode(raw_access_token) {
            // An impersonation session must not end the target's own sessions.
            Ok(claims) if claims.impersonated_by.is_none() => {
                match self
                    .ledger
                    .revoke_user_tokens(claims.sub, Some(TokenType::Refresh), now)
                    .await
                {
                    Ok(count) => {
                        tracing::info!(user_id = claims.sub, refresh_revoked = count, "User logged out")
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, user_id = claims.sub, "Failed to revoke refresh tokens on logout")
                    }
                }
            }
            Ok(claims) => {
                tracing::info!(user_id = claims.sub, impersonated_by = ?claims.impersonated_by, "Impersonation session ended")
            }
            Err(_) => tracing::debug!(revoked, "Logout with undecodable token"),
        }

        metrics::record_auth_event("logout", "success");
        Ok(())
    }

    pub async fn validate_access_token(
        &self,
        raw_token: &str,
    ) -> Result<AuthenticatedUser, ServiceError> {
        let claims = self.tokens.decode_as(raw_token, TokenType::Access)?;
        let token_hash = TokenService::hash_token(raw_token);
        let now = Utc::now();

        let usable = self
            .ledger
            .find_token_by_hash(&token_hash)
            .await
            .map_err(ServiceError::Database)?
            .is_some_and(|row| {
                row.kind() == Some(TokenType::Access)
                    && row.user_id == claims.sub
                    && row.is_usable(now)
            });
        if !usable {
            return Err(ServiceError::Authentication(
                "Token is invalid or expired.".to_string(),
            ));
        }

        self.ledger
            .touch_token(&token_hash, now)
            .await
            .map_err(ServiceError::Database)?;

        let user = self
            .users
            .find_user_by_id(claims.sub)
            .await
            .map_err(ServiceError::Database)?
            .filter(|user| user.is_active)
            .ok_or_else(|| {
                ServiceError::Authentication("User not found or deactivated.".to_string())
            })?;

        Ok(AuthenticatedUser {
            user: user.sanitized(),
            impersonated_by: claims.impersonated_by,
            is_sudo: false,
        })
    }

    pub async fn create_impersonation_token(
        &self,
        sudo_user_id: i64,
        target_user_id: i64,
        ip: &str,
        user_agent: &str,
    ) -> Result<ImpersonationGrant, ServiceError> {
        let target = self
            .users
            .find_user_by_id(target_user_id)
            .await
            .map_err(ServiceError::Database)?
            .ok_or_else(|| ServiceError::NotFound("Target user not found.".to_string()))?;

        if !target.is_active {
            return Err(ServiceError::validation("Target user is deactivated."));
        }

        let mut extra = Map::new();
        extra.insert("impersonated_by".to_string(), Value::from(sudo_user_id));

        let access = self.tokens.create_access_token(target.id, extra)?;
        self.persist(&access, ip, user_agent).await?;

        metrics::record_auth_event("impersonate", "success");
        tracing::info!(
            sudo_user_id,
            target_user_id = target.id,
            "Impersonation token issued"
        );

        Ok(ImpersonationGrant {
            access_token: access.token,
            token_type: "Bearer",
            expires_in: self.tokens.access_ttl(),
            impersonating: target.sanitized(),
        })
    }

    /// Provision an account with a hashed password.
    pub async fn create_user(&self, req: CreateUserRequest) -> Result<SanitizedUser, ServiceError> {
        self.ensure_strong(&req.password)?;
        let password_hash = self.hasher.hash(&req.password).await?;

        let user = self
            .users
            .insert_user(NewUser {
                username: req.username,
                email: req.email,
                display_name: req.display_name,
                password_hash,
            })
            .await
            .map_err(ServiceError::Database)?
            .ok_or_else(|| ServiceError::validation("Username or email is already registered."))?;

        tracing::info!(user_id = user.id, "User created");
        Ok(user.sanitized())
    }

    /// Store a new password and end every session of the user. Returns the
    /// number of tokens revoked.
    pub async fn reset_password(
        &self,
        user_id: i64,
        new_password: &str,
    ) -> Result<u64, ServiceError> {
        self.ensure_strong(new_password)?;
        let password_hash = self.hasher.hash(new_password).await?;

        let updated = self
            .users
            .update_password_hash(user_id, &password_hash)
            .await
            .map_err(ServiceError::Database)?;
        if !updated {
            return Err(ServiceError::NotFound("User not found.".to_string()));
        }

        let revoked = self.revoke_all_tokens(user_id).await?;
        tracing::info!(user_id, revoked, "Password reset");
        Ok(revoked)
    }

    pub async fn revoke_all_tokens(&self, user_id: i64) -> Result<u64, ServiceError> {
        self.ledger
            .revoke_user_tokens(user_id, None, Utc::now())
            .await
            .map_err(ServiceError::Database)
    }

    pub async fn purge_expired_tokens(&self) -> Result<u64, ServiceError> {
        self.ledger
            .purge_expired_tokens(Utc::now())
            .await
            .map_err(ServiceError::Database)
    }

    pub(crate) fn ensure_strong(&self, password: &str) -> Result<(), ServiceError> {
        let errors = check_strength(password, self.min_password_length);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::Validation {
                message: "Password does not meet requirements.".to_string(),
                errors,
            })
        }
    }

    async fn issue_pair(
        &self,
        user_id: i64,
        ip: &str,
        user_agent: &str,
    ) -> Result<TokenPair, ServiceError> {
        let access = self.tokens.create_access_token(user_id, Map::new())?;
        let refresh = self.tokens.create_refresh_token(user_id)?;

        self.persist(&access, ip, user_agent).await?;
        self.persist(&refresh, ip, user_agent).await?;

        Ok(TokenPair {
            access_token: access.token,
            refresh_token: refresh.token,
            token_type: "Bearer",
            expires_in: self.tokens.access_ttl(),
        })
    }

    async fn persist(
        &self,
        issued: &IssuedToken,
        ip: &str,
        user_agent: &str,
    ) -> Result<(), ServiceError> {
        let expires_at = timestamp(issued.claims.exp)?;
        self.ledger
            .insert_token(NewApiToken::new(
                issued.claims.sub,
                TokenService::hash_token(&issued.token),
                issued.claims.token_type,
                expires_at,
                ip,
                user_agent,
            ))
            .await
            .map_err(ServiceError::Database)?;
        Ok(())
    }
}

fn timestamp(seconds: i64) -> Result<DateTime<Utc>, ServiceError> {
    Utc.timestamp_opt(seconds, 0)
        .single()
        .ok_or_else(|| ServiceError::Internal(anyhow::anyhow!("Timestamp out of range: {}", seconds)))
}
