//! Database models.

pub mod rate_limit_bucket;
pub mod sim_audit_log;
pub mod sim_card;
pub mod webhook_delivery;
pub mod webhook_subscription;

pub use rate_limit_bucket::RateLimitBucket;
pub use sim_audit_log::{CreateSimAuditEntry, SimAuditAction, SimAuditFilter, SimAuditLog};
pub use sim_card::{CreateSimCard, SimCard, SimCardFilter, SimStatus, UpdateSimCardProfile};
pub use webhook_delivery::{CreateWebhookDelivery, DeliveryStatus, WebhookDelivery};
pub use webhook_subscription::{
    CreateWebhookSubscription, SubscriptionStatus, WebhookSubscription,
};
