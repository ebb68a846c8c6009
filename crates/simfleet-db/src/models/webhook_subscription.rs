//! Webhook subscription model.
//!
//! Subscriptions are owned by the administrative surface; the dispatcher only
//! reads them and maintains `failure_count`/`status` bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor};
use uuid::Uuid;

/// Subscription dispatch status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "subscription_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Eligible for dispatch.
    Active,
    /// Operator-paused; excluded from dispatch, deliveries stay queued.
    Paused,
    /// Auto-failed after too many consecutive delivery failures; requires
    /// operator reactivation.
    Failed,
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriptionStatus::Active => write!(f, "active"),
            SubscriptionStatus::Paused => write!(f, "paused"),
            SubscriptionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// An external party's interest in lifecycle events.
#[derive(Debug, Clone, FromRow)]
pub struct WebhookSubscription {
    /// Unique identifier.
    pub id: Uuid,
    /// Delivery URL (HTTPS).
    pub url: String,
    /// Event types this subscription receives.
    pub event_types: Vec<String>,
    /// Sealed signing secret (AES-256-GCM, base64).
    pub secret_enc: Option<String>,
    /// Dispatch status.
    pub status: SubscriptionStatus,
    /// Consecutive delivery failures since the last success.
    pub failure_count: i32,
    /// Owning client, if tenant-scoped.
    pub client_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a subscription.
#[derive(Debug, Clone)]
pub struct CreateWebhookSubscription {
    pub url: String,
    pub event_types: Vec<String>,
    pub secret_enc: Option<String>,
    pub client_id: Option<Uuid>,
}

const SUB_COLUMNS: &str =
    "id, url, event_types, secret_enc, status, failure_count, client_id, created_at, updated_at";

impl WebhookSubscription {
    /// Insert a new subscription (active by default).
    pub async fn create<'e, E>(
        executor: E,
        input: CreateWebhookSubscription,
    ) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!(
            r"
            INSERT INTO webhook_subscriptions (url, event_types, secret_enc, client_id)
            VALUES ($1, $2, $3, $4)
            RETURNING {SUB_COLUMNS}
            "
        );
        sqlx::query_as::<_, Self>(&query)
            .bind(input.url)
            .bind(input.event_types)
            .bind(input.secret_enc)
            .bind(input.client_id)
            .fetch_one(executor)
            .await
    }

    /// Find a subscription by ID.
    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!("SELECT {SUB_COLUMNS} FROM webhook_subscriptions WHERE id = $1");
        sqlx::query_as::<_, Self>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Find all active subscriptions interested in an event type.
    pub async fn find_active_by_event_type<'e, E>(
        executor: E,
        event_type: &str,
    ) -> Result<Vec<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!(
            r"
            SELECT {SUB_COLUMNS}
            FROM webhook_subscriptions
            WHERE status = 'active' AND $1 = ANY(event_types)
            ORDER BY created_at
            "
        );
        sqlx::query_as::<_, Self>(&query)
            .bind(event_type)
            .fetch_all(executor)
            .await
    }

    /// List subscriptions, newest first.
    pub async fn list<'e, E>(
        executor: E,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!(
            r"
            SELECT {SUB_COLUMNS}
            FROM webhook_subscriptions
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
            "
        );
        sqlx::query_as::<_, Self>(&query)
            .bind(limit)
            .bind(offset)
            .fetch_all(executor)
            .await
    }

    /// Increment the consecutive failure counter, returning the new value.
    pub async fn increment_failure_count<'e, E>(executor: E, id: Uuid) -> Result<i32, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let row: (i32,) = sqlx::query_as(
            r"
            UPDATE webhook_subscriptions
            SET failure_count = failure_count + 1, updated_at = NOW()
            WHERE id = $1
            RETURNING failure_count
            ",
        )
        .bind(id)
        .fetch_one(executor)
        .await?;
        Ok(row.0)
    }

    /// Reset the consecutive failure counter after a successful delivery.
    pub async fn reset_failure_count<'e, E>(executor: E, id: Uuid) -> Result<(), sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query(
            r"
            UPDATE webhook_subscriptions
            SET failure_count = 0, updated_at = NOW()
            WHERE id = $1 AND failure_count > 0
            ",
        )
        .bind(id)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Mark a subscription failed after crossing the failure threshold.
    pub async fn mark_failed<'e, E>(executor: E, id: Uuid) -> Result<(), sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query(
            r"
            UPDATE webhook_subscriptions
            SET status = 'failed', updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Operator pause: exclude the subscription from dispatch.
    pub async fn pause<'e, E>(executor: E, id: Uuid) -> Result<(), sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query(
            r"
            UPDATE webhook_subscriptions
            SET status = 'paused', updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Operator reactivation: restore dispatch and clear the failure counter.
    pub async fn reactivate<'e, E>(executor: E, id: Uuid) -> Result<(), sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query(
            r"
            UPDATE webhook_subscriptions
            SET status = 'active', failure_count = 0, updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .execute(executor)
        .await?;
        Ok(())
    }
}
