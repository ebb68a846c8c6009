//! Webhook notification pipeline for SIM lifecycle events.
//!
//! Provides durable at-least-once delivery with HMAC-SHA256 signing,
//! exponential backoff retries, per-subscriber token-bucket rate limiting,
//! and failure quarantine for persistently unreachable endpoints.

pub mod delivery;
pub mod error;
pub mod models;
pub mod publisher;
pub mod rate_limiter;
pub mod retry;
pub mod subscriptions;
pub mod validation;
pub mod worker;

pub use delivery::{DeliveryOutcome, DeliveryService, HttpDeliverer};
pub use error::WebhookError;
pub use models::{LifecycleEvent, SimEventType, WebhookPayload};
pub use publisher::EventPublisher;
pub use rate_limiter::{RateLimitConfig, RateLimiter, TokenBucket};
pub use retry::RetryPolicy;
pub use subscriptions::SubscriptionService;
pub use worker::{DispatchWorker, WorkerConfig};
