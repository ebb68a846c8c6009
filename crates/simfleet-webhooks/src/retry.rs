//! Exponential backoff policy for delivery retries.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

/// Default attempt budget per delivery.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;

/// Default backoff cap in seconds.
pub const DEFAULT_CAP_SECS: u64 = 300;

/// Retry policy: `delay = min(2^attempt, cap)` seconds, plus uniform jitter
/// of up to half the delay to avoid thundering-herd retries against a
/// recovering endpoint.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum attempts (initial + retries) per delivery.
    pub max_attempts: i32,
    /// Upper bound on the computed delay, in seconds.
    pub cap_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            cap_secs: DEFAULT_CAP_SECS,
        }
    }
}

impl RetryPolicy {
    /// Deterministic backoff delay for a given attempt count, without jitter.
    #[must_use]
    pub fn delay_secs(&self, attempt_count: i32) -> u64 {
        let exp = attempt_count.clamp(0, 62) as u32;
        2u64.saturating_pow(exp).min(self.cap_secs)
    }

    /// Compute the next retry timestamp after a failed attempt.
    ///
    /// `attempt_count` is the number of attempts already performed. Returns
    /// `None` once the attempt budget is exhausted; the delivery must then be
    /// abandoned, never retried again.
    #[must_use]
    pub fn next_retry_at(&self, attempt_count: i32, max_attempts: i32) -> Option<DateTime<Utc>> {
        if attempt_count >= max_attempts {
            return None;
        }

        let delay = self.delay_secs(attempt_count);
        let jitter = if delay > 1 {
            rand::thread_rng().gen_range(0..=delay / 2)
        } else {
            0
        };

        Some(Utc::now() + Duration::seconds((delay + jitter) as i64))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
