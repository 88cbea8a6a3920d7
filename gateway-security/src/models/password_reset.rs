use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// Self-service reset ledger row. Only the SHA-256 digest of the emailed
/// token is stored.
#[derive(Debug, Clone, FromRow)]
pub struct PasswordReset {
    pub id: i64,
    pub user_id: i64,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PasswordReset {
    /// Redeemable iff unused and not yet expired.
    pub fn is_redeemable(&self, now: DateTime<Utc>) -> bool {
        self.used_at.is_none() && self.expires_at > now
    }
}

#[derive(Debug, Clone)]
pub struct NewPasswordReset {
    pub user_id: i64,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub ip_address: Option<String>,
}
