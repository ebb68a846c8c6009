//! Event and wire payload types for the notification pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use simfleet_db::models::SimStatus;
use uuid::Uuid;

/// Lifecycle event types subscribers may register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimEventType {
    #[serde(rename = "sim.created")]
    Created,
    #[serde(rename = "sim.updated")]
    Updated,
    #[serde(rename = "sim.activated")]
    Activated,
    #[serde(rename = "sim.deactivated")]
    Deactivated,
    #[serde(rename = "sim.blocked")]
    Blocked,
    #[serde(rename = "sim.unblocked")]
    Unblocked,
}

impl SimEventType {
    /// Wire name of the event type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SimEventType::Created => "sim.created",
            SimEventType::Updated => "sim.updated",
            SimEventType::Activated => "sim.activated",
            SimEventType::Deactivated => "sim.deactivated",
            SimEventType::Blocked => "sim.blocked",
            SimEventType::Unblocked => "sim.unblocked",
        }
    }

    /// All known event types.
    #[must_use]
    pub fn all() -> &'static [SimEventType] {
        &[
            SimEventType::Created,
            SimEventType::Updated,
            SimEventType::Activated,
            SimEventType::Deactivated,
            SimEventType::Blocked,
            SimEventType::Unblocked,
        ]
    }
}

impl std::fmt::Display for SimEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SimEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SimEventType::all()
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("Unknown event type: {s}"))
    }
}

/// A lifecycle change handed from the lifecycle service to the publisher.
#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    pub event_id: Uuid,
    pub event_type: SimEventType,
    pub sim_id: Uuid,
    pub iccid: String,
    pub previous_status: Option<SimStatus>,
    pub new_status: Option<SimStatus>,
    pub timestamp: DateTime<Utc>,
}

impl LifecycleEvent {
    /// Build a new event with a fresh event ID and current timestamp.
    #[must_use]
    pub fn new(
        event_type: SimEventType,
        sim_id: Uuid,
        iccid: impl Into<String>,
        previous_status: Option<SimStatus>,
        new_status: Option<SimStatus>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            sim_id,
            iccid: iccid.into(),
            previous_status,
            new_status,
            timestamp: Utc::now(),
        }
    }
}

/// Versioned JSON body POSTed to webhook endpoints.
///
/// Delivery is at-least-once and unordered: the same `event_id` may arrive
/// more than once, and retries may arrive after a later event has already
/// been observed. Subscribers must de-duplicate by `event_id` and treat the
/// payload as an idempotent upsert keyed by `sim_id`, not an ordered stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    /// Payload schema version.
    pub version: u16,
    pub event_id: Uuid,
    pub event_type: String,
    pub sim_id: Uuid,
    pub iccid: String,
    pub previous_status: Option<SimStatus>,
    pub new_status: Option<SimStatus>,
    pub timestamp: DateTime<Utc>,
}

/// Current payload schema version.
pub const PAYLOAD_VERSION: u16 = 1;

impl From<&LifecycleEvent> for WebhookPayload {
    fn from(event: &LifecycleEvent) -> Self {
        Self {
            version: PAYLOAD_VERSION,
            event_id: event.event_id,
            event_type: event.event_type.to_string(),
            sim_id: event.sim_id,
            iccid: event.iccid.clone(),
            previous_status: event.previous_status,
            new_status: event.new_status,
            timestamp: event.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_roundtrip() {
        for t in SimEventType::all() {
            let parsed: SimEventType = t.as_str().parse().unwrap();
            assert_eq!(parsed, *t);
        }
        assert!("sim.deleted".parse::<SimEventType>().is_err());
    }

    #[test]
    fn test_payload_serializes_wire_names() {
        let event = LifecycleEvent::new(
            SimEventType::Activated,
            Uuid::new_v4(),
            "8941000000000000001",
            Some(SimStatus::Provisioned),
            Some(SimStatus::Active),
        );
        let payload = WebhookPayload::from(&event);
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["version"], 1);
        assert_eq!(json["event_type"], "sim.activated");
        assert_eq!(json["previous_status"], "provisioned");
        assert_eq!(json["new_status"], "active");
        assert_eq!(json["iccid"], "8941000000000000001");
    }
}
