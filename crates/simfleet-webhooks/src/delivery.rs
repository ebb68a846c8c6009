//! Webhook delivery execution.
//!
//! [`HttpDeliverer`] performs one signed HTTP POST and classifies the result;
//! it holds no database state so it can be exercised directly against a mock
//! server. [`DeliveryService`] owns the orchestration around it: subscription
//! checks, rate limiting, retry scheduling, and failure quarantine.
//!
//! Delivery is at-least-once: a delivery that fails transiently is retried
//! until it is either delivered or abandoned, never silently dropped.

use std::time::{Duration, Instant};

use chrono::Utc;
use reqwest::Client;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::WebhookError;
use crate::rate_limiter::RateLimiter;
use crate::retry::RetryPolicy;
use simfleet_db::models::{SubscriptionStatus, WebhookDelivery, WebhookSubscription};

/// Default per-attempt HTTP timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default consecutive abandoned deliveries before a subscription is
/// quarantined as failed.
pub const DEFAULT_FAIL_THRESHOLD: i32 = 10;

/// Result of a single HTTP delivery attempt.
#[derive(Debug, Clone)]
pub enum DeliveryOutcome {
    /// Endpoint answered 2xx.
    Success { response_code: i16, latency_ms: i32 },
    /// Non-2xx response, timeout, or connection error.
    Failure {
        error: String,
        response_code: Option<i16>,
        latency_ms: Option<i32>,
    },
}

/// Performs one signed webhook POST with a bounded timeout.
#[derive(Clone)]
pub struct HttpDeliverer {
    client: Client,
    timeout: Duration,
}

impl HttpDeliverer {
    /// Build a deliverer with a shared HTTP client.
    ///
    /// Redirects are disabled: a redirect from a validated URL could point
    /// anywhere, including internal addresses.
    pub fn new(timeout: Duration) -> Result<Self, WebhookError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("simfleet-webhooks/1.0")
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| WebhookError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { client, timeout })
    }

    /// POST `body` to `url`, signing with `secret` when present.
    ///
    /// Headers: `Content-Type`, `X-Webhook-Timestamp`, `X-Event-ID`, and
    /// `X-Webhook-Signature: sha256=<hex>` covering `{timestamp}.{body}`.
    pub async fn post(
        &self,
        url: &str,
        event_id: Uuid,
        body: &[u8],
        secret: Option<&str>,
    ) -> DeliveryOutcome {
        let timestamp = Utc::now().timestamp().to_string();

        // Header values come from constants and UUIDs; parse failures are
        // unreachable, so they are skipped rather than unwrapped.
        let mut headers = reqwest::header::HeaderMap::new();
        if let Ok(v) = "application/json".parse() {
            headers.insert("Content-Type", v);
        }
        if let Ok(v) = timestamp.parse() {
            headers.insert("X-Webhook-Timestamp", v);
        }
        if let Ok(v) = event_id.to_string().parse() {
            headers.insert("X-Event-ID", v);
        }
        if let Some(secret) = secret {
            let signature = simfleet_crypto::compute_hmac_signature(secret, &timestamp, body);
            if let Ok(v) = format!("sha256={signature}").parse() {
                headers.insert("X-Webhook-Signature", v);
            }
        }

        let start = Instant::now();
        let result = self
            .client
            .post(url)
            .headers(headers)
            .body(body.to_vec())
            .send()
            .await;
        let latency_ms = start.elapsed().as_millis() as i32;

        match result {
            Ok(response) => {
                let response_code = response.status().as_u16() as i16;
                if (200..300).contains(&(response_code as u16)) {
                    DeliveryOutcome::Success {
                        response_code,
                        latency_ms,
                    }
                } else {
                    DeliveryOutcome::Failure {
                        error: format!("HTTP {response_code}"),
                        response_code: Some(response_code),
                        latency_ms: Some(latency_ms),
                    }
                }
            }
            Err(e) => {
                let error = if e.is_timeout() {
                    format!("Request timeout ({}s)", self.timeout.as_secs())
                } else if e.is_connect() {
                    format!("Connection failed: {e}")
                } else {
                    format!("Request error: {e}")
                };
                DeliveryOutcome::Failure {
                    error,
                    response_code: None,
                    latency_ms: Some(latency_ms),
                }
            }
        }
    }
}

/// Service executing claimed delivery rows.
///
/// Side effects are confined to delivery rows, rate-limit buckets, and
/// subscription failure bookkeeping; SIM rows are never touched here.
#[derive(Clone)]
pub struct DeliveryService {
    pool: PgPool,
    deliverer: HttpDeliverer,
    rate_limiter: RateLimiter,
    retry_policy: RetryPolicy,
    secret_key: Vec<u8>,
    fail_threshold: i32,
}

impl DeliveryService {
    pub fn new(
        pool: PgPool,
        rate_limiter: RateLimiter,
        secret_key: Vec<u8>,
    ) -> Result<Self, WebhookError> {
        Ok(Self {
            pool,
            deliverer: HttpDeliverer::new(DEFAULT_TIMEOUT)?,
            rate_limiter,
            retry_policy: RetryPolicy::default(),
            secret_key,
            fail_threshold: DEFAULT_FAIL_THRESHOLD,
        })
    }

    /// Set the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Set the consecutive-failure threshold for subscription quarantine.
    #[must_use]
    pub fn with_fail_threshold(mut self, threshold: i32) -> Self {
        self.fail_threshold = threshold;
        self
    }

    /// Get a reference to the connection pool (for the worker).
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Execute one claimed delivery end to end.
    pub async fn process_delivery(&self, delivery: &WebhookDelivery) {
        debug_assert!(!delivery.status.is_terminal());

        // Resolve the subscription; its state decides whether to proceed.
        let subscription =
            match WebhookSubscription::find_by_id(&self.pool, delivery.webhook_id).await {
                Ok(Some(sub)) => sub,
                Ok(None) => {
                    tracing::info!(
                        target: "webhook_delivery",
                        delivery_id = %delivery.id,
                        webhook_id = %delivery.webhook_id,
                        "Abandoning delivery, subscription deleted"
                    );
                    self.abandon(delivery, "Subscription deleted", None, None)
                        .await;
                    return;
                }
                Err(e) => {
                    tracing::error!(
                        target: "webhook_delivery",
                        delivery_id = %delivery.id,
                        error = %e,
                        "Failed to load subscription; releasing claim"
                    );
                    self.release(delivery).await;
                    return;
                }
            };

        match subscription.status {
            SubscriptionStatus::Active => {}
            SubscriptionStatus::Paused => {
                // Operator pause: leave the delivery queued, untouched.
                tracing::debug!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    webhook_id = %subscription.id,
                    "Subscription paused; requeueing delivery unchanged"
                );
                self.release(delivery).await;
                return;
            }
            SubscriptionStatus::Failed => {
                self.abandon(delivery, "Subscription quarantined as failed", None, None)
                    .await;
                return;
            }
        }

        // Rate limit per subscription. Denial is not a failed attempt:
        // release the claim and leave next_retry_at alone.
        match self
            .rate_limiter
            .try_acquire(&subscription.id.to_string(), 1.0)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    webhook_id = %subscription.id,
                    "Rate limited; releasing claim without consuming an attempt"
                );
                self.release(delivery).await;
                return;
            }
            Err(e) => {
                tracing::error!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    error = %e,
                    "Rate limiter error; releasing claim"
                );
                self.release(delivery).await;
                return;
            }
        }

        let secret = match &subscription.secret_enc {
            Some(sealed) => match simfleet_crypto::open_secret(sealed, &self.secret_key) {
                Ok(s) => Some(s),
                Err(e) => {
                    tracing::warn!(
                        target: "webhook_delivery",
                        delivery_id = %delivery.id,
                        webhook_id = %subscription.id,
                        error = %e,
                        "Failed to unseal subscription secret; delivering unsigned"
                    );
                    None
                }
            },
            None => None,
        };

        let body = match serde_json::to_vec(&delivery.payload) {
            Ok(b) => b,
            Err(e) => {
                self.handle_failure(
                    delivery,
                    &subscription,
                    &format!("Failed to serialize payload: {e}"),
                    None,
                    None,
                )
                .await;
                return;
            }
        };

        let outcome = self
            .deliverer
            .post(&subscription.url, delivery.event_id, &body, secret.as_deref())
            .await;

        match outcome {
            DeliveryOutcome::Success {
                response_code,
                latency_ms,
            } => {
                self.handle_success(delivery, &subscription, response_code, latency_ms)
                    .await;
            }
            DeliveryOutcome::Failure {
                error,
                response_code,
                latency_ms,
            } => {
                self.handle_failure(delivery, &subscription, &error, response_code, latency_ms)
                    .await;
            }
        }
    }

    async fn handle_success(
        &self,
        delivery: &WebhookDelivery,
        subscription: &WebhookSubscription,
        response_code: i16,
        latency_ms: i32,
    ) {
        let attempt_count = delivery.attempt_count + 1;

        tracing::info!(
            target: "webhook_delivery",
            delivery_id = %delivery.id,
            webhook_id = %subscription.id,
            event_id = %delivery.event_id,
            event_type = %delivery.event_type,
            response_code,
            latency_ms,
            attempt_count,
            "Webhook delivery succeeded"
        );

        if let Err(e) = WebhookDelivery::mark_delivered(
            &self.pool,
            delivery.id,
            attempt_count,
            response_code,
            latency_ms,
        )
        .await
        {
            tracing::error!(
                target: "webhook_delivery",
                delivery_id = %delivery.id,
                error = %e,
                "Failed to mark delivery as delivered"
            );
        }

        if subscription.failure_count > 0 {
            if let Err(e) =
                WebhookSubscription::reset_failure_count(&self.pool, subscription.id).await
            {
                tracing::error!(
                    target: "webhook_delivery",
                    webhook_id = %subscription.id,
                    error = %e,
                    "Failed to reset failure count"
                );
            }
        }
    }

    async fn handle_failure(
        &self,
        delivery: &WebhookDelivery,
        subscription: &WebhookSubscription,
        error: &str,
        response_code: Option<i16>,
        latency_ms: Option<i32>,
    ) {
        let attempt_count = delivery.attempt_count + 1;
        let next_retry_at = self
            .retry_policy
            .next_retry_at(attempt_count, delivery.max_attempts);

        tracing::warn!(
            target: "webhook_delivery",
            delivery_id = %delivery.id,
            webhook_id = %subscription.id,
            event_id = %delivery.event_id,
            event_type = %delivery.event_type,
            error = %error,
            attempt_count,
            max_attempts = delivery.max_attempts,
            has_next_retry = next_retry_at.is_some(),
            "Webhook delivery failed"
        );

        match next_retry_at {
            Some(next_retry_at) => {
                if let Err(e) = WebhookDelivery::mark_failed(
                    &self.pool,
                    delivery.id,
                    attempt_count,
                    error,
                    response_code,
                    latency_ms,
                    next_retry_at,
                )
                .await
                {
                    tracing::error!(
                        target: "webhook_delivery",
                        delivery_id = %delivery.id,
                        error = %e,
                        "Failed to schedule delivery retry"
                    );
                }
            }
            None => {
                // Retries exhausted: terminal abandonment plus subscription
                // failure bookkeeping.
                if let Err(e) = WebhookDelivery::mark_abandoned(
                    &self.pool,
                    delivery.id,
                    attempt_count,
                    error,
                    response_code,
                    latency_ms,
                )
                .await
                {
                    tracing::error!(
                        target: "webhook_delivery",
                        delivery_id = %delivery.id,
                        error = %e,
                        "Failed to mark delivery as abandoned"
                    );
                    return;
                }
                self.record_subscription_failure(subscription).await;
            }
        }
    }

    /// Increment the subscription failure counter and quarantine it once the
    /// threshold is crossed.
    async fn record_subscription_failure(&self, subscription: &WebhookSubscription) {
        let failures =
            match WebhookSubscription::increment_failure_count(&self.pool, subscription.id).await {
                Ok(n) => n,
                Err(e) => {
                    tracing::error!(
                        target: "webhook_delivery",
                        webhook_id = %subscription.id,
                        error = %e,
                        "Failed to increment failure count"
                    );
                    return;
                }
            };

        if failures < self.fail_threshold {
            return;
        }

        tracing::warn!(
            target: "webhook_delivery",
            webhook_id = %subscription.id,
            consecutive_failures = failures,
            threshold = self.fail_threshold,
            "Quarantining subscription after consecutive failures"
        );

        if let Err(e) = WebhookSubscription::mark_failed(&self.pool, subscription.id).await {
            tracing::error!(
                target: "webhook_delivery",
                webhook_id = %subscription.id,
                error = %e,
                "Failed to quarantine subscription"
            );
            return;
        }

        match WebhookDelivery::abandon_for_subscription(
            &self.pool,
            subscription.id,
            "Subscription quarantined as failed",
        )
        .await
        {
            Ok(abandoned) if abandoned > 0 => {
                tracing::info!(
                    target: "webhook_delivery",
                    webhook_id = %subscription.id,
                    abandoned,
                    "Abandoned queued deliveries for quarantined subscription"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(
                    target: "webhook_delivery",
                    webhook_id = %subscription.id,
                    error = %e,
                    "Failed to abandon queued deliveries"
                );
            }
        }
    }

    async fn abandon(
        &self,
        delivery: &WebhookDelivery,
        reason: &str,
        response_code: Option<i16>,
        latency_ms: Option<i32>,
    ) {
        if let Err(e) = WebhookDelivery::mark_abandoned(
            &self.pool,
            delivery.id,
            delivery.attempt_count,
            reason,
            response_code,
            latency_ms,
        )
        .await
        {
            tracing::error!(
                target: "webhook_delivery",
                delivery_id = %delivery.id,
                error = %e,
                "Failed to abandon delivery"
            );
        }
    }

    async fn release(&self, delivery: &WebhookDelivery) {
        if let Err(e) = WebhookDelivery::release_claim(&self.pool, delivery.id).await {
            tracing::error!(
                target: "webhook_delivery",
                delivery_id = %delivery.id,
                error = %e,
                "Failed to release delivery claim"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_classification_boundaries() {
        // 2xx is the success window; everything else is a failure.
        for code in [200i16, 201, 204, 299] {
            assert!((200..300).contains(&(code as u16)));
        }
        for code in [199i16, 300, 301, 400, 404, 500, 503] {
            assert!(!(200..300).contains(&(code as u16)));
        }
    }
}
