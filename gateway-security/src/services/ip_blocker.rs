use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::config::{LockoutConfig, MAX_LOCKOUT_MINUTES};
use crate::models::LockoutRecord;
use crate::services::error::ServiceError;
use crate::services::metrics;
use crate::services::store::LockoutStore;

/// Per-IP failed-login lockout.
#[derive(Clone)]
pub struct IpBlocker {
    store: Arc<dyn LockoutStore>,
    max_attempts: i32,
    lockout: Duration,
}

impl IpBlocker {
    pub fn new(store: Arc<dyn LockoutStore>, config: &LockoutConfig) -> Self {
        Self {
            store,
            max_attempts: i32::try_from(config.max_attempts).unwrap_or(i32::MAX),
            lockout: Duration::minutes(config.minutes.clamp(1, MAX_LOCKOUT_MINUTES)),
        }
    }

    pub async fn is_blocked(&self, ip: &str) -> Result<bool, ServiceError> {
        self.is_blocked_at(ip, Utc::now()).await
    }

    pub async fn is_blocked_at(&self, ip: &str, now: DateTime<Utc>) -> Result<bool, ServiceError> {
        Ok(self
            .find(ip)
            .await?
            .is_some_and(|record| record.is_blocked_at(now)))
    }

    /// Refuse a blocked IP with the moment the lockout ends.
    pub async fn check(&self, ip: &str) -> Result<(), ServiceError> {
        let now = Utc::now();
        match self.find(ip).await? {
            Some(record) if record.is_blocked_at(now) => {
                let until = record.blocked_until.unwrap_or(now);
                Err(ServiceError::RateLimited {
                    message: "Too many failed login attempts. Try again later.".to_string(),
                    reset: until.timestamp(),
                })
            }
            _ => Ok(()),
        }
    }

    pub async fn record_failed_attempt(&self, ip: &str) -> Result<LockoutRecord, ServiceError> {
        self.record_failed_attempt_at(ip, Utc::now()).await
    }

    pub async fn record_failed_attempt_at(
        &self,
        ip: &str,
        now: DateTime<Utc>,
    ) -> Result<LockoutRecord, ServiceError> {
        let record = self
            .store
            .record_failure(ip, self.max_attempts, now + self.lockout, now)
            .await
            .map_err(ServiceError::Database)?;

        if record.failed_attempts == self.max_attempts && record.is_blocked_at(now) {
            metrics::record_ip_lockout();
            tracing::warn!(
                ip = %ip,
                attempts = record.failed_attempts,
                blocked_until = ?record.blocked_until,
                "IP locked out after repeated failed logins"
            );
        }

        Ok(record)
    }

    pub async fn clear_attempts(&self, ip: &str) -> Result<(), ServiceError> {
        self.store
            .clear_lockout(ip, Utc::now())
            .await
            .map_err(ServiceError::Database)
    }

    pub async fn set_whitelisted(
        &self,
        ip: &str,
        whitelisted: bool,
    ) -> Result<LockoutRecord, ServiceError> {
        let record = self
            .store
            .set_whitelisted(ip, whitelisted, Utc::now())
            .await
            .map_err(ServiceError::Database)?;
        tracing::info!(ip = %ip, whitelisted, "IP whitelist updated");
        Ok(record)
    }

    async fn find(&self, ip: &str) -> Result<Option<LockoutRecord>, ServiceError> {
        self.store
            .find_lockout(ip)
            .await
            .map_err(ServiceError::Database)
    }
}
