//! Request, response, and context types for the lifecycle service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use simfleet_db::models::{SimCard, SimStatus};

/// Who initiated a lifecycle change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Initiator {
    /// A caller on the public API surface.
    Api,
    /// A scheduled or internal job.
    System,
    /// A named operator.
    Operator(String),
}

impl std::fmt::Display for Initiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Initiator::Api => write!(f, "api"),
            Initiator::System => write!(f, "system"),
            Initiator::Operator(id) => write!(f, "operator:{id}"),
        }
    }
}

/// Per-call context supplied by the caller on every operation.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub client_id: Uuid,
    pub request_id: Uuid,
    pub correlation_id: Option<Uuid>,
    pub ip_address: Option<String>,
    pub initiator: Initiator,
}

impl RequestContext {
    /// Context for an API caller with fresh request ID.
    #[must_use]
    pub fn api(client_id: Uuid) -> Self {
        Self {
            client_id,
            request_id: Uuid::new_v4(),
            correlation_id: None,
            ip_address: None,
            initiator: Initiator::Api,
        }
    }
}

/// Request to provision a new SIM.
#[derive(Debug, Clone)]
pub struct CreateSimRequest {
    pub iccid: String,
    pub imsi: String,
    pub msisdn: String,
    pub imei: Option<String>,
    pub apn: Option<String>,
    pub rate_plan_id: Option<Uuid>,
    pub data_limit_bytes: Option<i64>,
    pub billing_account_id: Option<Uuid>,
    pub customer_id: Option<Uuid>,
    pub metadata: Option<JsonValue>,
    /// Plaintext secrets; sealed before persistence, never stored or logged
    /// as-is.
    pub pin: Option<String>,
    pub puk: Option<String>,
    pub ki: Option<String>,
    pub opc: Option<String>,
    /// Skip the provisioned state and go straight to active.
    pub activate_immediately: bool,
}

/// Partial update for a SIM profile.
///
/// `metadata` is merged additively into the stored document; all other
/// supplied fields overwrite.
#[derive(Debug, Clone, Default)]
pub struct UpdateSimRequest {
    pub imsi: Option<String>,
    pub msisdn: Option<String>,
    pub imei: Option<String>,
    pub apn: Option<String>,
    pub rate_plan_id: Option<Uuid>,
    pub data_limit_bytes: Option<i64>,
    pub billing_account_id: Option<Uuid>,
    pub customer_id: Option<Uuid>,
    pub metadata: Option<JsonValue>,
}

/// Lookup key for `get`.
#[derive(Debug, Clone)]
pub enum SimLookup {
    Id(Uuid),
    Iccid(String),
    Msisdn(String),
}

/// Public projection of a SIM card. Never carries secret fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimView {
    pub id: Uuid,
    pub iccid: String,
    pub imsi: String,
    pub msisdn: String,
    pub imei: Option<String>,
    pub apn: Option<String>,
    pub rate_plan_id: Option<Uuid>,
    pub data_limit_bytes: Option<i64>,
    pub billing_account_id: Option<Uuid>,
    pub customer_id: Option<Uuid>,
    pub metadata: JsonValue,
    pub status: SimStatus,
    pub previous_status: Option<SimStatus>,
    pub block_reason: Option<String>,
    pub block_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub blocked_at: Option<DateTime<Utc>>,
}

impl From<SimCard> for SimView {
    fn from(sim: SimCard) -> Self {
        Self {
            id: sim.id,
            iccid: sim.iccid,
            imsi: sim.imsi,
            msisdn: sim.msisdn,
            imei: sim.imei,
            apn: sim.apn,
            rate_plan_id: sim.rate_plan_id,
            data_limit_bytes: sim.data_limit_bytes,
            billing_account_id: sim.billing_account_id,
            customer_id: sim.customer_id,
            metadata: sim.metadata,
            status: sim.status,
            previous_status: sim.previous_status,
            block_reason: sim.block_reason,
            block_notes: sim.block_notes,
            created_at: sim.created_at,
            updated_at: sim.updated_at,
            activated_at: sim.activated_at,
            deactivated_at: sim.deactivated_at,
            blocked_at: sim.blocked_at,
        }
    }
}

/// Result of a mutating lifecycle operation.
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub sim: SimView,
    /// Whether a durable notification job was enqueued for this change.
    pub webhook_scheduled: bool,
}

/// Search parameters for listing SIMs.
#[derive(Debug, Clone, Default)]
pub struct SearchParams {
    pub status: Option<SimStatus>,
    pub customer_id: Option<Uuid>,
    pub billing_account_id: Option<Uuid>,
    pub iccid_prefix: Option<String>,
    pub msisdn: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Paging envelope returned by `search`.
#[derive(Debug, Clone, Serialize)]
pub struct SimPage {
    pub data: Vec<SimView>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Serialize)]
pub struct Pagination {
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
    pub has_more: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initiator_display() {
        assert_eq!(Initiator::Api.to_string(), "api");
        assert_eq!(Initiator::System.to_string(), "system");
        assert_eq!(
            Initiator::Operator("ops-42".into()).to_string(),
            "operator:ops-42"
        );
    }

    #[test]
    fn test_view_serialization_has_no_secret_fields() {
        // SimView is built without secret columns by construction; make sure
        // none leak through serde naming either.
        let json = serde_json::to_string(&sample_view()).unwrap();
        for needle in ["pin", "puk", "\"ki\"", "opc"] {
            assert!(!json.contains(needle), "secret field {needle} leaked");
        }
    }

    fn sample_view() -> SimView {
        SimView {
            id: Uuid::new_v4(),
            iccid: "8941000000000000001".into(),
            imsi: "262011234567890".into(),
            msisdn: "+4915112345678".into(),
            imei: None,
            apn: Some("iot.example".into()),
            rate_plan_id: None,
            data_limit_bytes: Some(1_073_741_824),
            billing_account_id: None,
            customer_id: None,
            metadata: serde_json::json!({}),
            status: SimStatus::Provisioned,
            previous_status: None,
            block_reason: None,
            block_notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            activated_at: None,
            deactivated_at: None,
            blocked_at: None,
        }
    }
}
