//! Event publisher: fans a lifecycle event out to matching subscriptions.
//!
//! Publishing only enqueues durable delivery rows; the dispatch worker
//! performs the actual HTTP calls independently of the request that produced
//! the event.

use sqlx::PgPool;

use crate::error::WebhookError;
use crate::models::{LifecycleEvent, WebhookPayload};
use crate::retry::DEFAULT_MAX_ATTEMPTS;
use simfleet_db::models::{CreateWebhookDelivery, WebhookDelivery, WebhookSubscription};

/// Enqueues notification deliveries for lifecycle events.
#[derive(Clone)]
pub struct EventPublisher {
    pool: PgPool,
    max_attempts: i32,
}

impl EventPublisher {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Set the attempt budget for deliveries created by this publisher.
    #[must_use]
    pub fn with_max_attempts(mut self, max: i32) -> Self {
        self.max_attempts = max;
        self
    }

    /// Create one pending delivery per active subscription matching the
    /// event's type. Returns how many deliveries were enqueued.
    pub async fn publish(&self, event: &LifecycleEvent) -> Result<usize, WebhookError> {
        let subscriptions =
            WebhookSubscription::find_active_by_event_type(&self.pool, event.event_type.as_str())
                .await?;

        if subscriptions.is_empty() {
            tracing::debug!(
                target: "webhook_delivery",
                event_id = %event.event_id,
                event_type = %event.event_type,
                "No active subscriptions match event type"
            );
            return Ok(0);
        }

        let payload = serde_json::to_value(WebhookPayload::from(event))
            .map_err(|e| WebhookError::Internal(format!("Failed to serialize payload: {e}")))?;

        let mut enqueued = 0;
        for sub in &subscriptions {
            match WebhookDelivery::create(
                &self.pool,
                CreateWebhookDelivery {
                    event_id: event.event_id,
                    event_type: event.event_type.to_string(),
                    webhook_id: sub.id,
                    payload: payload.clone(),
                    max_attempts: self.max_attempts,
                },
            )
            .await
            {
                Ok(_) => enqueued += 1,
                Err(e) => {
                    tracing::error!(
                        target: "webhook_delivery",
                        event_id = %event.event_id,
                        webhook_id = %sub.id,
                        error = %e,
                        "Failed to enqueue delivery"
                    );
                }
            }
        }

        tracing::info!(
            target: "webhook_delivery",
            event_id = %event.event_id,
            event_type = %event.event_type,
            sim_id = %event.sim_id,
            enqueued,
            "Enqueued lifecycle event for delivery"
        );

        Ok(enqueued)
    }
}
