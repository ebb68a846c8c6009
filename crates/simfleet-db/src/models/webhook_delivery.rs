//! Webhook delivery attempt model.
//!
//! Delivery rows are the durable at-least-once queue for outbound
//! notifications. Workers claim due rows with `FOR UPDATE SKIP LOCKED` plus a
//! `claimed_at` lease so two workers never process the same delivery.
//!
//! Status machine:
//!
//! ```text
//! pending --(attempt fails, retries left)--> failed (next_retry_at set)
//! pending/failed --(2xx)-----------------> delivered   [terminal]
//! pending/failed --(retries exhausted)----> abandoned  [terminal]
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgExecutor};
use uuid::Uuid;

/// Delivery attempt status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "delivery_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Enqueued, not yet attempted.
    Pending,
    /// Delivered with a 2xx response. Terminal.
    Delivered,
    /// Last attempt failed; awaiting retry at `next_retry_at`.
    Failed,
    /// Retries exhausted or subscription gone. Terminal.
    Abandoned,
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryStatus::Pending => write!(f, "pending"),
            DeliveryStatus::Delivered => write!(f, "delivered"),
            DeliveryStatus::Failed => write!(f, "failed"),
            DeliveryStatus::Abandoned => write!(f, "abandoned"),
        }
    }
}

impl DeliveryStatus {
    /// Terminal statuses are never picked up again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Abandoned)
    }
}

/// One outbound notification job.
#[derive(Debug, Clone, FromRow)]
pub struct WebhookDelivery {
    /// Unique identifier.
    pub id: Uuid,
    /// Event this delivery carries; subscribers de-duplicate by this.
    pub event_id: Uuid,
    /// Event type string (e.g. `sim.activated`).
    pub event_type: String,
    /// Target subscription.
    pub webhook_id: Uuid,
    /// Event snapshot delivered as the request body.
    pub payload: JsonValue,
    /// Current status.
    pub status: DeliveryStatus,
    /// Attempts performed so far.
    pub attempt_count: i32,
    /// Attempt budget for this delivery.
    pub max_attempts: i32,
    /// HTTP status of the last attempt.
    pub response_code: Option<i16>,
    /// Latency of the last attempt in milliseconds.
    pub response_time_ms: Option<i32>,
    /// Error message of the last failed attempt.
    pub last_error: Option<String>,
    /// When the delivery becomes due again; set only while retries remain.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Worker lease timestamp; NULL when unclaimed.
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

/// Input for enqueuing a delivery.
#[derive(Debug, Clone)]
pub struct CreateWebhookDelivery {
    pub event_id: Uuid,
    pub event_type: String,
    pub webhook_id: Uuid,
    pub payload: JsonValue,
    pub max_attempts: i32,
}

const DELIVERY_COLUMNS: &str = "id, event_id, event_type, webhook_id, payload, status, \
     attempt_count, max_attempts, response_code, response_time_ms, last_error, \
     next_retry_at, claimed_at, created_at, last_attempt_at, delivered_at";

impl WebhookDelivery {
    /// Enqueue a new pending delivery, immediately due.
    pub async fn create<'e, E>(
        executor: E,
        input: CreateWebhookDelivery,
    ) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!(
            r"
            INSERT INTO webhook_deliveries
                (event_id, event_type, webhook_id, payload, max_attempts, next_retry_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            RETURNING {DELIVERY_COLUMNS}
            "
        );
        sqlx::query_as::<_, Self>(&query)
            .bind(input.event_id)
            .bind(input.event_type)
            .bind(input.webhook_id)
            .bind(input.payload)
            .bind(input.max_attempts)
            .fetch_one(executor)
            .await
    }

    /// Find a delivery by ID.
    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!("SELECT {DELIVERY_COLUMNS} FROM webhook_deliveries WHERE id = $1");
        sqlx::query_as::<_, Self>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Atomically claim a batch of due deliveries for a worker.
    ///
    /// A delivery is due when it is non-terminal, its `next_retry_at` has
    /// passed, and no live lease exists. `SKIP LOCKED` keeps concurrent
    /// workers from contending on the same rows.
    pub async fn claim_due<'e, E>(
        executor: E,
        batch_size: i64,
        lease_secs: i64,
    ) -> Result<Vec<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!(
            r"
            UPDATE webhook_deliveries
            SET claimed_at = NOW()
            WHERE id IN (
                SELECT id FROM webhook_deliveries
                WHERE status IN ('pending', 'failed')
                  AND next_retry_at <= NOW()
                  AND (claimed_at IS NULL OR claimed_at < NOW() - make_interval(secs => $2))
                ORDER BY next_retry_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {DELIVERY_COLUMNS}
            "
        );
        sqlx::query_as::<_, Self>(&query)
            .bind(batch_size)
            .bind(lease_secs as f64)
            .fetch_all(executor)
            .await
    }

    /// Release a claim without consuming an attempt (rate-limit denial,
    /// paused subscription). `next_retry_at` is left untouched.
    pub async fn release_claim<'e, E>(executor: E, id: Uuid) -> Result<(), sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query("UPDATE webhook_deliveries SET claimed_at = NULL WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(())
    }

    /// Release leases older than `lease_secs` (crashed worker recovery).
    pub async fn release_stale_claims<'e, E>(
        executor: E,
        lease_secs: i64,
    ) -> Result<u64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            r"
            UPDATE webhook_deliveries
            SET claimed_at = NULL
            WHERE status IN ('pending', 'failed')
              AND claimed_at IS NOT NULL
              AND claimed_at < NOW() - make_interval(secs => $1)
            ",
        )
        .bind(lease_secs as f64)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    /// Record a successful attempt. Terminal.
    pub async fn mark_delivered<'e, E>(
        executor: E,
        id: Uuid,
        attempt_count: i32,
        response_code: i16,
        response_time_ms: i32,
    ) -> Result<(), sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query(
            r"
            UPDATE webhook_deliveries
            SET status = 'delivered', attempt_count = $2, response_code = $3,
                response_time_ms = $4, last_error = NULL, next_retry_at = NULL,
                claimed_at = NULL, last_attempt_at = NOW(), delivered_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(attempt_count)
        .bind(response_code)
        .bind(response_time_ms)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Record a failed attempt with a scheduled retry.
    pub async fn mark_failed<'e, E>(
        executor: E,
        id: Uuid,
        attempt_count: i32,
        error: &str,
        response_code: Option<i16>,
        response_time_ms: Option<i32>,
        next_retry_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query(
            r"
            UPDATE webhook_deliveries
            SET status = 'failed', attempt_count = $2, last_error = $3,
                response_code = $4, response_time_ms = $5, next_retry_at = $6,
                claimed_at = NULL, last_attempt_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(attempt_count)
        .bind(error)
        .bind(response_code)
        .bind(response_time_ms)
        .bind(next_retry_at)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Record a final failed attempt with no retry. Terminal.
    pub async fn mark_abandoned<'e, E>(
        executor: E,
        id: Uuid,
        attempt_count: i32,
        error: &str,
        response_code: Option<i16>,
        response_time_ms: Option<i32>,
    ) -> Result<(), sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query(
            r"
            UPDATE webhook_deliveries
            SET status = 'abandoned', attempt_count = $2, last_error = $3,
                response_code = $4, response_time_ms = $5, next_retry_at = NULL,
                claimed_at = NULL, last_attempt_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(attempt_count)
        .bind(error)
        .bind(response_code)
        .bind(response_time_ms)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Abandon every non-terminal delivery for a subscription (used when the
    /// subscription is auto-failed or deleted).
    pub async fn abandon_for_subscription<'e, E>(
        executor: E,
        webhook_id: Uuid,
        reason: &str,
    ) -> Result<u64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            r"
            UPDATE webhook_deliveries
            SET status = 'abandoned', last_error = $2, next_retry_at = NULL,
                claimed_at = NULL, last_attempt_at = NOW()
            WHERE webhook_id = $1 AND status IN ('pending', 'failed')
            ",
        )
        .bind(webhook_id)
        .bind(reason)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    /// List deliveries for an event, newest first (status inquiry surface).
    pub async fn list_by_event<'e, E>(
        executor: E,
        event_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!(
            r"
            SELECT {DELIVERY_COLUMNS}
            FROM webhook_deliveries
            WHERE event_id = $1
            ORDER BY created_at DESC
            "
        );
        sqlx::query_as::<_, Self>(&query)
            .bind(event_id)
            .fetch_all(executor)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(DeliveryStatus::Delivered.is_terminal());
        assert!(DeliveryStatus::Abandoned.is_terminal());
        assert!(!DeliveryStatus::Pending.is_terminal());
        assert!(!DeliveryStatus::Failed.is_terminal());
    }
}
