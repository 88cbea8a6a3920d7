use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// One live fixed-window counter per key.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct RateLimitCounter {
    pub key: String,
    pub hits: i64,
    pub window_start: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl RateLimitCounter {
    /// The window is over once `expires_at` is reached.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
