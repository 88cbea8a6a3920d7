use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// Failed-login lockout state for one IP address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct LockoutRecord {
    pub ip_address: String,
    pub failed_attempts: i32,
    pub blocked_until: Option<DateTime<Utc>>,
    pub is_whitelisted: bool,
    pub reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl LockoutRecord {
    pub fn is_blocked_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_whitelisted && self.blocked_until.is_some_and(|until| until > now)
    }

    /// A lockout that has run out; the next failure starts a fresh count.
    pub fn lockout_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.blocked_until.is_some_and(|until| until <= now)
    }
}
