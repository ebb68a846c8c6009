//! Webhook subscription administration.
//!
//! Owned by the administrative surface; the dispatcher only reads
//! subscriptions. Creation validates the destination URL (HTTPS, SSRF
//! protection) and event types, and seals the signing secret before it
//! touches the database.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::WebhookError;
use crate::validation;
use simfleet_db::models::{CreateWebhookSubscription, WebhookSubscription};

/// Request to register a subscription.
#[derive(Debug, Clone)]
pub struct CreateSubscriptionRequest {
    pub url: String,
    pub event_types: Vec<String>,
    /// Plaintext signing secret; sealed at rest, never stored as-is.
    pub secret: Option<String>,
    pub client_id: Option<Uuid>,
}

/// Service for subscription CRUD operations.
#[derive(Clone)]
pub struct SubscriptionService {
    pool: PgPool,
    secret_key: Vec<u8>,
    allow_http: bool,
}

impl SubscriptionService {
    #[must_use]
    pub fn new(pool: PgPool, secret_key: Vec<u8>) -> Self {
        Self {
            pool,
            secret_key,
            allow_http: false,
        }
    }

    /// Allow HTTP URLs (for development/testing).
    #[must_use]
    pub fn with_allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }

    /// Register a new subscription.
    pub async fn create(
        &self,
        request: CreateSubscriptionRequest,
    ) -> Result<WebhookSubscription, WebhookError> {
        validation::validate_webhook_url(&request.url, self.allow_http)?;
        validation::validate_event_types(&request.event_types)?;

        let secret_enc = match &request.secret {
            Some(secret) if !secret.is_empty() => {
                Some(simfleet_crypto::seal_secret(secret, &self.secret_key)?)
            }
            _ => None,
        };

        let subscription = WebhookSubscription::create(
            &self.pool,
            CreateWebhookSubscription {
                url: request.url,
                event_types: request.event_types,
                secret_enc,
                client_id: request.client_id,
            },
        )
        .await?;

        tracing::info!(
            webhook_id = %subscription.id,
            url = %subscription.url,
            event_types = ?subscription.event_types,
            "Created webhook subscription"
        );

        Ok(subscription)
    }

    /// Fetch a subscription by ID.
    pub async fn get(&self, id: Uuid) -> Result<WebhookSubscription, WebhookError> {
        WebhookSubscription::find_by_id(&self.pool, id)
            .await?
            .ok_or(WebhookError::SubscriptionNotFound)
    }

    /// List subscriptions.
    pub async fn list(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WebhookSubscription>, WebhookError> {
        Ok(WebhookSubscription::list(&self.pool, limit, offset).await?)
    }

    /// Pause a subscription: dispatch stops, queued deliveries stay queued.
    pub async fn pause(&self, id: Uuid) -> Result<(), WebhookError> {
        self.get(id).await?;
        WebhookSubscription::pause(&self.pool, id).await?;
        tracing::info!(webhook_id = %id, "Paused webhook subscription");
        Ok(())
    }

    /// Reactivate a paused or quarantined subscription, clearing its failure
    /// counter.
    pub async fn reactivate(&self, id: Uuid) -> Result<(), WebhookError> {
        self.get(id).await?;
        WebhookSubscription::reactivate(&self.pool, id).await?;
        tracing::info!(webhook_id = %id, "Reactivated webhook subscription");
        Ok(())
    }
}
