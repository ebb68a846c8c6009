//! Persisted token bucket state for per-subscriber rate limiting.
//!
//! One row per bucket key. Acquisition locks the row `FOR UPDATE` inside the
//! caller's transaction so concurrent dispatch workers cannot over-spend the
//! same bucket.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgExecutor};

/// Persisted token bucket.
#[derive(Debug, Clone, FromRow)]
pub struct RateLimitBucket {
    /// Bucket key, e.g. a webhook ID or client ID.
    pub bucket_key: String,
    /// Tokens remaining; never negative.
    pub tokens: f64,
    /// Last refill computation time.
    pub last_refill: DateTime<Utc>,
}

impl RateLimitBucket {
    /// Ensure a bucket row exists, seeding a new bucket at full capacity.
    ///
    /// Existing rows are left untouched.
    pub async fn ensure<'e, E>(
        executor: E,
        bucket_key: &str,
        capacity: f64,
    ) -> Result<(), sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query(
            r"
            INSERT INTO rate_limit_buckets (bucket_key, tokens, last_refill)
            VALUES ($1, $2, NOW())
            ON CONFLICT (bucket_key) DO NOTHING
            ",
        )
        .bind(bucket_key)
        .bind(capacity)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Load a bucket and lock its row for the current transaction.
    pub async fn lock<'e, E>(executor: E, bucket_key: &str) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Self>(
            r"
            SELECT bucket_key, tokens, last_refill
            FROM rate_limit_buckets
            WHERE bucket_key = $1
            FOR UPDATE
            ",
        )
        .bind(bucket_key)
        .fetch_optional(executor)
        .await
    }

    /// Persist the bucket state after an admitted acquisition.
    pub async fn store<'e, E>(
        executor: E,
        bucket_key: &str,
        tokens: f64,
        last_refill: DateTime<Utc>,
    ) -> Result<(), sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query(
            r"
            UPDATE rate_limit_buckets
            SET tokens = $2, last_refill = $3
            WHERE bucket_key = $1
            ",
        )
        .bind(bucket_key)
        .bind(tokens)
        .bind(last_refill)
        .execute(executor)
        .await?;
        Ok(())
    }
}
