use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use crate::models::RateLimitRecord;

/// Stale records are swept once the table grows past this many identities.
const PRUNE_THRESHOLD: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed { remaining: u32 },
    Limited { retry_after_secs: u64 },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed { .. })
    }
}

/// Per-identity request quota. Implementations may be process-local or shared.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Count one request for `identity` and report whether it may proceed.
    async fn check(&self, identity: &str) -> RateLimitDecision;
}

/// Fixed-window counter kept in process memory.
#[derive(Debug)]
pub struct InMemoryRateLimiter {
    quota: u32,
    window: ChronoDuration,
    records: Mutex<HashMap<String, RateLimitRecord>>,
}

impl InMemoryRateLimiter {
    pub fn new(quota: u32, window: Duration) -> Self {
        Self {
            quota,
            window: ChronoDuration::from_std(window).unwrap_or_else(|_| ChronoDuration::hours(1)),
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn quota(&self) -> u32 {
        self.quota
    }

    pub async fn check_at(&self, identity: &str, now: DateTime<Utc>) -> RateLimitDecision {
        let mut records = self.records.lock().await;

        if records.len() > PRUNE_THRESHOLD {
            records.retain(|_, record| record.window_reset_at > now);
        }

        let record = records
            .entry(identity.to_string())
            .or_insert_with(|| RateLimitRecord {
                identity: identity.to_string(),
                count: 0,
                window_reset_at: now + self.window,
            });

        if record.window_reset_at <= now {
            record.count = 0;
            record.window_reset_at = now + self.window;
        }

        if record.count >= self.quota {
            let remaining_ms = (record.window_reset_at - now).num_milliseconds().max(0) as u64;
            let retry_after_secs = remaining_ms.div_ceil(1000).max(1);
            debug!(
                identity = %crate::logging::mask_identity(identity),
                retry_after_secs = retry_after_secs,
                "Rate limit reached"
            );
            return RateLimitDecision::Limited { retry_after_secs };
        }

        record.count += 1;
        RateLimitDecision::Allowed {
            remaining: self.quota - record.count,
        }
    }

    pub async fn snapshot(&self, identity: &str) -> Option<RateLimitRecord> {
        self.records.lock().await.get(identity).cloned()
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn check(&self, identity: &str) -> RateLimitDecision {
        self.check_at(identity, Utc::now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_eleventh_request_in_window_is_limited() {
        let limiter = InMemoryRateLimiter::new(10, Duration::from_secs(3600));
        let start = Utc::now();

        for i in 0..10 {
            let decision = limiter.check_at("user-1", start + ChronoDuration::minutes(i)).await;
            assert_eq!(decision, RateLimitDecision::Allowed { remaining: 9 - i as u32 });
        }

        let decision = limiter.check_at("user-1", start + ChronoDuration::minutes(30)).await;
        assert_eq!(decision, RateLimitDecision::Limited { retry_after_secs: 1800 });
    }

    #[tokio::test]
    async fn test_new_window_resets_quota() {
        let limiter = InMemoryRateLimiter::new(10, Duration::from_secs(3600));
        let start = Utc::now();

        for _ in 0..11 {
            limiter.check_at("user-1", start).await;
        }
        assert!(!limiter.check_at("user-1", start).await.is_allowed());

        let next_window = start + ChronoDuration::seconds(3600);
        assert_eq!(
            limiter.check_at("user-1", next_window).await,
            RateLimitDecision::Allowed { remaining: 9 }
        );
        let record = limiter.snapshot("user-1").await.unwrap();
        assert_eq!(record.count, 1);
        assert_eq!(record.window_reset_at, next_window + ChronoDuration::seconds(3600));
    }

    #[tokio::test]
    async fn test_identities_are_counted_independently() {
        let limiter = InMemoryRateLimiter::new(1, Duration::from_secs(60));

        assert!(limiter.check("user-1").await.is_allowed());
        assert!(!limiter.check("user-1").await.is_allowed());
        assert!(limiter.check("user-2").await.is_allowed());
    }
}
