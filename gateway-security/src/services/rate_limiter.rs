use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::config::RateLimitConfig;
use crate::services::error::ServiceError;
use crate::services::metrics;
use crate::services::store::RateLimitStore;

/// Used when neither the requested group nor the default group is configured.
const FALLBACK_LIMIT: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub limit: u32,
    pub remaining: u32,
    /// Unix timestamp at which the current window ends.
    pub reset: i64,
}

/// Fixed-window counter per key. A window starts on the first hit after the
/// previous one expired, so a client can land up to twice the limit across a
/// window boundary.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    pub fn limit_for(&self, group: &str) -> u32 {
        self.config
            .groups
            .get(group)
            .or_else(|| self.config.groups.get(&self.config.default_group))
            .copied()
            .unwrap_or(FALLBACK_LIMIT)
    }

    pub async fn hit(&self, key: &str, group: &str) -> Result<RateLimitDecision, ServiceError> {
        self.hit_at(key, group, Utc::now()).await
    }

    pub async fn hit_at(
        &self,
        key: &str,
        group: &str,
        now: DateTime<Utc>,
    ) -> Result<RateLimitDecision, ServiceError> {
        let limit = self.limit_for(group);
        let counter = self
            .store
            .hit_counter(key, self.config.window, now)
            .await
            .map_err(ServiceError::Database)?;

        let reset = counter.expires_at.timestamp();
        let hits = u32::try_from(counter.hits).unwrap_or(u32::MAX);

        if hits > limit {
            metrics::record_rate_limit_rejection(group);
            tracing::warn!(key = %key, group = %group, hits, limit, "Rate limit exceeded");
            return Err(ServiceError::RateLimited {
                message: format!(
                    "Rate limit exceeded. Try again after {}.",
                    counter.expires_at.format("%H:%M:%S")
                ),
                reset,
            });
        }

        Ok(RateLimitDecision {
            limit,
            remaining: limit - hits,
            reset,
        })
    }

    /// Drop counters whose window has passed.
    pub async fn clean_expired(&self) -> Result<u64, ServiceError> {
        self.store
            .purge_expired_counters(Utc::now())
            .await
            .map_err(ServiceError::Database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory::MemoryStore;
    use chrono::Duration;
    use std::collections::HashMap;

    fn limiter(limit: u32, window: i64) -> RateLimiter {
        RateLimiter::new(
            Arc::new(MemoryStore::new()),
            RateLimitConfig {
                window,
                default_group: "authenticated".to_string(),
                groups: HashMap::from([
                    ("test".to_string(), limit),
                    ("authenticated".to_string(), 50),
                ]),
            },
        )
    }

    #[tokio::test]
    async fn test_limit_then_reject() {
        let limiter = limiter(3, 60);
        let now = Utc::now();

        let remaining: Vec<u32> = {
            let mut out = Vec::new();
            for _ in 0..3 {
                out.push(limiter.hit_at("k", "test", now).await.unwrap().remaining);
            }
            out
        };
        assert_eq!(remaining, vec![2, 1, 0]);

        match limiter.hit_at("k", "test", now).await {
            Err(ServiceError::RateLimited { reset, message }) => {
                assert_eq!(reset, (now + Duration::seconds(60)).timestamp());
                assert!(message.starts_with("Rate limit exceeded."));
            }
            other => panic!("expected rate limit error, got {:?}", other.map(|d| d.limit)),
        }
    }

    #[tokio::test]
    async fn test_new_key_and_elapsed_window_reset() {
        let limiter = limiter(3, 60);
        let now = Utc::now();
        for _ in 0..4 {
            let _ = limiter.hit_at("a", "test", now).await;
        }

        assert_eq!(limiter.hit_at("b", "test", now).await.unwrap().remaining, 2);

        let later = now + Duration::seconds(60);
        assert_eq!(limiter.hit_at("a", "test", later).await.unwrap().remaining, 2);
    }

    #[tokio::test]
    async fn test_boundary_burst_is_allowed() {
        let limiter = limiter(3, 60);
        let now = Utc::now();
        let tail = now + Duration::seconds(59);
        let head = now + Duration::seconds(60);

        limiter.hit_at("k", "test", now).await.unwrap();
        limiter.hit_at("k", "test", tail).await.unwrap();
        limiter.hit_at("k", "test", tail).await.unwrap();
        for _ in 0..3 {
            limiter.hit_at("k", "test", head).await.unwrap();
        }
    }

    #[test]
    fn test_unknown_group_uses_default() {
        let limiter = limiter(3, 60);
        assert_eq!(limiter.limit_for("test"), 3);
        assert_eq!(limiter.limit_for("nope"), 50);
    }
}
