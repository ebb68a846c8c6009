//! Per-subscriber token-bucket rate limiting.
//!
//! The bucket math is pure ([`TokenBucket`]) and operates on explicit
//! timestamps so it can be tested without sleeping. The database-backed
//! [`RateLimiter`] runs the same math inside a transaction holding the bucket
//! row `FOR UPDATE`, so concurrent dispatch workers cannot over-spend the
//! same bucket.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::WebhookError;
use simfleet_db::models::RateLimitBucket;

/// Token bucket configuration.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Tokens added per second.
    pub refill_rate: f64,
    /// Maximum tokens the bucket can hold (burst size).
    pub capacity: f64,
}

impl RateLimitConfig {
    #[must_use]
    pub fn new(refill_rate: f64, capacity: u32) -> Self {
        Self {
            refill_rate,
            capacity: f64::from(capacity),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        // 10 deliveries/second sustained, bursts of 20.
        Self::new(10.0, 20)
    }
}

/// Pure token bucket state.
#[derive(Debug, Clone, Copy)]
pub struct TokenBucket {
    /// Tokens currently available; never negative.
    pub tokens: f64,
    /// When the bucket was last refilled.
    pub last_refill: DateTime<Utc>,
}

impl TokenBucket {
    /// A full bucket as of `now`.
    #[must_use]
    pub fn full(config: &RateLimitConfig, now: DateTime<Utc>) -> Self {
        Self {
            tokens: config.capacity,
            last_refill: now,
        }
    }

    /// Refill tokens for the time elapsed since `last_refill`, capped at
    /// capacity. Monotonic: a `now` earlier than `last_refill` adds nothing.
    pub fn refill(&mut self, config: &RateLimitConfig, now: DateTime<Utc>) {
        let elapsed_secs = (now - self.last_refill).num_milliseconds() as f64 / 1000.0;
        if elapsed_secs > 0.0 {
            self.tokens = (self.tokens + elapsed_secs * config.refill_rate).min(config.capacity);
            self.last_refill = now;
        }
    }

    /// Refill, then take `cost` tokens if available.
    ///
    /// Returns true on admission. On denial the bucket keeps its refilled
    /// token count but spends nothing.
    pub fn try_acquire(&mut self, config: &RateLimitConfig, now: DateTime<Utc>, cost: f64) -> bool {
        self.refill(config, now);
        if self.tokens >= cost {
            self.tokens -= cost;
            true
        } else {
            false
        }
    }
}

/// Database-backed rate limiter keyed by an arbitrary bucket key.
#[derive(Clone)]
pub struct RateLimiter {
    pool: PgPool,
    config: RateLimitConfig,
}

impl RateLimiter {
    #[must_use]
    pub fn new(pool: PgPool, config: RateLimitConfig) -> Self {
        Self { pool, config }
    }

    /// Try to take `cost` tokens from the bucket for `bucket_key`.
    ///
    /// The row is created at full capacity on first use. Acquisition locks
    /// the row for the duration of the transaction; state is persisted only
    /// when tokens were actually spent.
    pub async fn try_acquire(&self, bucket_key: &str, cost: f64) -> Result<bool, WebhookError> {
        let mut tx = self.pool.begin().await?;

        RateLimitBucket::ensure(&mut *tx, bucket_key, self.config.capacity).await?;
        let row = RateLimitBucket::lock(&mut *tx, bucket_key)
            .await?
            .ok_or_else(|| {
                WebhookError::Internal(format!("rate limit bucket {bucket_key} vanished"))
            })?;

        let mut bucket = TokenBucket {
            tokens: row.tokens,
            last_refill: row.last_refill,
        };

        let now = Utc::now();
        let admitted = bucket.try_acquire(&self.config, now, cost);
        if admitted {
            RateLimitBucket::store(&mut *tx, bucket_key, bucket.tokens, bucket.last_refill)
                .await?;
            tx.commit().await?;
        } else {
            // Nothing spent; drop the lock without writing.
            tx.rollback().await?;
        }

        Ok(admitted)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(base: DateTime<Utc>, millis: i64) -> DateTime<Utc> {
        base + Duration::milliseconds(millis)
    }

    #[test]
    fn test_burst_up_to_capacity_then_denied() {
        let config = RateLimitConfig::new(10.0, 5);
        let now = Utc::now();
        let mut bucket = TokenBucket::full(&config, now);

        for i in 0..5 {
            assert!(bucket.try_acquire(&config, now, 1.0), "request {i}");
        }
        assert!(!bucket.try_acquire(&config, now, 1.0), "6th must be denied");
    }

    #[test]
    fn test_tokens_never_go_negative() {
        let config = RateLimitConfig::new(1.0, 2);
        let now = Utc::now();
        let mut bucket = TokenBucket::full(&config, now);

        while bucket.try_acquire(&config, now, 1.0) {}
        assert!(bucket.tokens >= 0.0);

        // Denied acquisition must not mutate the balance.
        let before = bucket.tokens;
        assert!(!bucket.try_acquire(&config, now, 1.0));
        assert_eq!(bucket.tokens, before);
    }

    #[test]
    fn test_refill_is_proportional_to_elapsed_time() {
        let config = RateLimitConfig::new(100.0, 5);
        let base = Utc::now();
        let mut bucket = TokenBucket::full(&config, base);

        for _ in 0..5 {
            assert!(bucket.try_acquire(&config, base, 1.0));
        }
        assert!(!bucket.try_acquire(&config, base, 1.0));

        // 30ms at 100 tokens/sec refills ~3 tokens.
        bucket.refill(&config, at(base, 30));
        assert!((2.9..=3.1).contains(&bucket.tokens), "got {}", bucket.tokens);
    }

    #[test]
    fn test_refill_caps_at_capacity() {
        let config = RateLimitConfig::new(1000.0, 5);
        let base = Utc::now();
        let mut bucket = TokenBucket::full(&config, base);

        bucket.refill(&config, at(base, 60_000));
        assert_eq!(bucket.tokens, 5.0);
    }

    #[test]
    fn test_empty_bucket_back_to_full_after_capacity_over_rate() {
        let config = RateLimitConfig::new(2.0, 10);
        let base = Utc::now();
        let mut bucket = TokenBucket::full(&config, base);

        for _ in 0..10 {
            assert!(bucket.try_acquire(&config, base, 1.0));
        }

        // capacity / refill_rate = 5 seconds to a full bucket, bounded above.
        bucket.refill(&config, at(base, 5_000));
        assert_eq!(bucket.tokens, 10.0);
        bucket.refill(&config, at(base, 10_000));
        assert_eq!(bucket.tokens, 10.0);
    }

    #[test]
    fn test_clock_going_backwards_adds_nothing() {
        let config = RateLimitConfig::new(10.0, 5);
        let base = Utc::now();
        let mut bucket = TokenBucket::full(&config, base);
        assert!(bucket.try_acquire(&config, base, 1.0));

        let before = bucket.tokens;
        bucket.refill(&config, at(base, -5_000));
        assert_eq!(bucket.tokens, before);
    }

    #[test]
    fn test_multi_token_cost() {
        let config = RateLimitConfig::new(1.0, 10);
        let now = Utc::now();
        let mut bucket = TokenBucket::full(&config, now);

        assert!(bucket.try_acquire(&config, now, 7.0));
        assert!(!bucket.try_acquire(&config, now, 5.0));
        assert!(bucket.try_acquire(&config, now, 3.0));
        assert_eq!(bucket.tokens, 0.0);
    }
}
