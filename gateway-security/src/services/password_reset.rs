//! Self-service password reset: a single-use, short-lived token delivered
//! out of band and redeemed together with the account email.

use chrono::Utc;
use rand::Rng;
use std::sync::Arc;

use crate::{
    models::{NewPasswordReset, User},
    services::{
        auth::AuthService,
        error::ServiceError,
        jwt::TokenService,
        metrics,
        reset_delivery::ResetDelivery,
        store::{window_end, PasswordResetStore, UserStore},
    },
};

const INVALID_RESET: &str = "Reset token is invalid or expired.";

#[derive(Clone)]
pub struct PasswordResetService {
    resets: Arc<dyn PasswordResetStore>,
    users: Arc<dyn UserStore>,
    auth: AuthService,
    delivery: Arc<dyn ResetDelivery>,
    ttl_seconds: i64,
}

impl PasswordResetService {
    pub fn new(
        resets: Arc<dyn PasswordResetStore>,
        users: Arc<dyn UserStore>,
        auth: AuthService,
        delivery: Arc<dyn ResetDelivery>,
        ttl_seconds: i64,
    ) -> Self {
        Self {
            resets,
            users,
            auth,
            delivery,
            ttl_seconds,
        }
    }

    pub fn with_delivery(mut self, delivery: Arc<dyn ResetDelivery>) -> Self {
        self.delivery = delivery;
        self
    }

    /// Issue and deliver a reset token when `email` belongs to an active
    /// account. Callers answer identically either way.
    pub async fn forgot_password(&self, email: &str, ip: &str) -> Result<(), ServiceError> {
        let Some(user) = self.active_user_by_email(email).await? else {
            metrics::record_auth_event("forgot_password", "unknown");
            tracing::debug!("Password reset requested for unknown email");
            return Ok(());
        };

        let token = generate_reset_token();
        let now = Utc::now();
        let expires_at = window_end(now, self.ttl_seconds).map_err(ServiceError::Internal)?;
        self.resets
            .insert_password_reset(
                NewPasswordReset {
                    user_id: user.id,
                    token_hash: TokenService::hash_token(&token),
                    expires_at,
                    ip_address: (!ip.is_empty()).then(|| ip.to_string()),
                },
                now,
            )
            .await
            .map_err(ServiceError::Database)?;

        // The reset is already recorded; a failed delivery only means the
        // user has to ask again.
        if let Err(e) = self.delivery.send_password_reset(&user, &token).await {
            tracing::error!(user_id = user.id, error = %e, "Failed to deliver password reset");
        }

        metrics::record_auth_event("forgot_password", "issued");
        tracing::info!(user_id = user.id, "Password reset issued");
        Ok(())
    }

    /// Redeem a reset token: set the new password and revoke every token of
    /// the account. Returns the number of tokens revoked.
    pub async fn reset_password_with_token(
        &self,
        token: &str,
        email: &str,
        new_password: &str,
    ) -> Result<u64, ServiceError> {
        self.auth.ensure_strong(new_password)?;

        let Some(user) = self.active_user_by_email(email).await? else {
            metrics::record_auth_event("password_reset", "failure");
            return Err(ServiceError::validation(INVALID_RESET));
        };

        let consumed = self
            .resets
            .consume_password_reset(&TokenService::hash_token(token), user.id, Utc::now())
            .await
            .map_err(ServiceError::Database)?;
        if consumed.is_none() {
            metrics::record_auth_event("password_reset", "failure");
            tracing::warn!(user_id = user.id, "Rejected password reset token");
            return Err(ServiceError::validation(INVALID_RESET));
        }

        let revoked = self.auth.reset_password(user.id, new_password).await?;
        metrics::record_auth_event("password_reset", "success");
        Ok(revoked)
    }

    pub async fn purge_expired(&self) -> Result<u64, ServiceError> {
        self.resets
            .purge_expired_password_resets(Utc::now())
            .await
            .map_err(ServiceError::Database)
    }

    async fn active_user_by_email(&self, email: &str) -> Result<Option<User>, ServiceError> {
        let user = self
            .users
            .find_active_user_by_identity(email)
            .await
            .map_err(ServiceError::Database)?;
        Ok(user.filter(|u| u.is_active && u.email.eq_ignore_ascii_case(email)))
    }
}

/// 256 random bits, hex encoded.
fn generate_reset_token() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    hex::encode(bytes)
}
