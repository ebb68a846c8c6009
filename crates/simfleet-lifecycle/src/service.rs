//! SIM lifecycle orchestration.
//!
//! Every mutating operation follows the same shape: lock the row, validate
//! the transition against the status state machine, apply the change, commit,
//! then append the audit entry and enqueue webhook deliveries. The state
//! change is the source of truth; audit and notification are post-commit and
//! can never roll it back.

use serde_json::{Map, Value as JsonValue};
use sqlx::PgPool;
use uuid::Uuid;

use crate::audit::AuditWriter;
use crate::error::SimError;
use crate::merge::{deep_merge, record_change};
use crate::types::{
    CreateSimRequest, Pagination, RequestContext, SearchParams, SimLookup, SimPage, SimView,
    TransitionOutcome, UpdateSimRequest,
};
use crate::validation;
use simfleet_db::models::{
    CreateSimAuditEntry, CreateSimCard, SimAuditAction, SimCard, SimCardFilter, SimStatus,
    UpdateSimCardProfile,
};
use simfleet_webhooks::models::{LifecycleEvent, SimEventType};
use simfleet_webhooks::publisher::EventPublisher;

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

/// Orchestrates SIM lifecycle operations.
#[derive(Clone)]
pub struct SimLifecycleService {
    pool: PgPool,
    secret_key: Vec<u8>,
    publisher: EventPublisher,
    audit: AuditWriter,
}

impl SimLifecycleService {
    #[must_use]
    pub fn new(pool: PgPool, secret_key: Vec<u8>) -> Self {
        let publisher = EventPublisher::new(pool.clone());
        let audit = AuditWriter::new(pool.clone());
        Self {
            pool,
            secret_key,
            publisher,
            audit,
        }
    }

    /// Provision a new SIM card.
    ///
    /// The SIM lands in `provisioned`, or directly in `active` when
    /// `activate_immediately` is set. Secrets are sealed before the insert;
    /// plaintext never reaches the database or the logs.
    pub async fn create(
        &self,
        ctx: &RequestContext,
        request: CreateSimRequest,
    ) -> Result<TransitionOutcome, SimError> {
        validation::validate_iccid(&request.iccid)?;
        validation::validate_imsi(&request.imsi)?;
        validation::validate_msisdn(&request.msisdn)?;
        if let Some(imei) = &request.imei {
            validation::validate_imei(imei)?;
        }

        if SimCard::iccid_exists(&self.pool, &request.iccid).await? {
            return Err(SimError::DuplicateIccid(request.iccid));
        }

        let status = if request.activate_immediately {
            SimStatus::Active
        } else {
            SimStatus::Provisioned
        };

        let iccid = request.iccid.clone();
        let input = CreateSimCard {
            iccid: request.iccid,
            imsi: request.imsi,
            msisdn: request.msisdn,
            imei: request.imei,
            apn: request.apn,
            rate_plan_id: request.rate_plan_id,
            data_limit_bytes: request.data_limit_bytes,
            billing_account_id: request.billing_account_id,
            customer_id: request.customer_id,
            metadata: request.metadata.unwrap_or_else(|| JsonValue::Object(Map::new())),
            pin_enc: self.seal(request.pin.as_deref())?,
            puk_enc: self.seal(request.puk.as_deref())?,
            ki_enc: self.seal(request.ki.as_deref())?,
            opc_enc: self.seal(request.opc.as_deref())?,
            status,
        };

        let sim = match SimCard::create(&self.pool, input).await {
            Ok(sim) => sim,
            // Concurrent insert may slip past the existence check; the
            // unique index is the real guard.
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                return Err(SimError::DuplicateIccid(iccid));
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            sim_id = %sim.id,
            iccid = %sim.iccid,
            status = %sim.status,
            "Provisioned SIM card"
        );

        self.audit
            .record(self.audit_entry(
                ctx,
                &sim,
                SimAuditAction::Create,
                None,
                Some(sim.status),
                None,
                None,
                JsonValue::Object(Map::new()),
            ))
            .await;

        let scheduled = self
            .publish(SimEventType::Created, &sim, None, Some(sim.status))
            .await;

        Ok(TransitionOutcome {
            sim: sim.into(),
            webhook_scheduled: scheduled,
        })
    }

    /// Update a SIM's profile fields.
    ///
    /// Metadata is merged additively into the stored document; other fields
    /// overwrite. An update that changes nothing succeeds without an audit
    /// entry or a notification.
    pub async fn update(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        request: UpdateSimRequest,
    ) -> Result<TransitionOutcome, SimError> {
        if let Some(imsi) = &request.imsi {
            validation::validate_imsi(imsi)?;
        }
        if let Some(msisdn) = &request.msisdn {
            validation::validate_msisdn(msisdn)?;
        }
        if let Some(imei) = &request.imei {
            validation::validate_imei(imei)?;
        }

        let mut tx = self.pool.begin().await?;
        let sim = SimCard::find_by_id_for_update(&mut *tx, id)
            .await?
            .ok_or(SimError::SimNotFound)?;

        let merged_metadata = request
            .metadata
            .as_ref()
            .map(|patch| deep_merge(&sim.metadata, patch));

        let mut changes = Map::new();
        diff_profile(&mut changes, &sim, &request, merged_metadata.as_ref());

        if changes.is_empty() {
            tx.rollback().await?;
            return Ok(TransitionOutcome {
                sim: sim.into(),
                webhook_scheduled: false,
            });
        }

        let updated = SimCard::update_profile(
            &mut *tx,
            id,
            UpdateSimCardProfile {
                imsi: request.imsi,
                msisdn: request.msisdn,
                imei: request.imei,
                apn: request.apn,
                rate_plan_id: request.rate_plan_id,
                data_limit_bytes: request.data_limit_bytes,
                billing_account_id: request.billing_account_id,
                customer_id: request.customer_id,
                metadata: merged_metadata,
            },
        )
        .await?;
        tx.commit().await?;

        tracing::info!(
            sim_id = %updated.id,
            fields = changes.len(),
            "Updated SIM profile"
        );

        self.audit
            .record(self.audit_entry(
                ctx,
                &updated,
                SimAuditAction::Update,
                Some(updated.status),
                Some(updated.status),
                None,
                None,
                JsonValue::Object(changes),
            ))
            .await;

        let scheduled = self
            .publish(SimEventType::Updated, &updated, None, None)
            .await;

        Ok(TransitionOutcome {
            sim: updated.into(),
            webhook_scheduled: scheduled,
        })
    }

    /// Activate a SIM from `provisioned`, `inactive`, or `blocked`.
    ///
    /// `notify: false` suppresses the webhook event (bulk imports, replays);
    /// the audit entry is written regardless.
    pub async fn activate(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        notify: bool,
    ) -> Result<TransitionOutcome, SimError> {
        let mut tx = self.pool.begin().await?;
        let sim = SimCard::find_by_id_for_update(&mut *tx, id)
            .await?
            .ok_or(SimError::SimNotFound)?;

        let from = sim.status;
        if !from.can_transition_to(SimStatus::Active) {
            tx.rollback().await?;
            return Err(SimError::InvalidStateTransition {
                from,
                to: SimStatus::Active,
            });
        }

        let updated = SimCard::mark_active(&mut *tx, id).await?;
        tx.commit().await?;

        tracing::info!(sim_id = %updated.id, from = %from, "Activated SIM");

        self.audit
            .record(self.audit_entry(
                ctx,
                &updated,
                SimAuditAction::Activate,
                Some(from),
                Some(SimStatus::Active),
                None,
                None,
                JsonValue::Object(Map::new()),
            ))
            .await;

        let scheduled = if notify {
            self.publish(
                SimEventType::Activated,
                &updated,
                Some(from),
                Some(SimStatus::Active),
            )
            .await
        } else {
            false
        };

        Ok(TransitionOutcome {
            sim: updated.into(),
            webhook_scheduled: scheduled,
        })
    }

    /// Deactivate an active SIM.
    pub async fn deactivate(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        notify: bool,
    ) -> Result<TransitionOutcome, SimError> {
        let mut tx = self.pool.begin().await?;
        let sim = SimCard::find_by_id_for_update(&mut *tx, id)
            .await?
            .ok_or(SimError::SimNotFound)?;

        let from = sim.status;
        if !from.can_transition_to(SimStatus::Inactive) {
            tx.rollback().await?;
            return Err(SimError::InvalidStateTransition {
                from,
                to: SimStatus::Inactive,
            });
        }

        let updated = SimCard::mark_inactive(&mut *tx, id).await?;
        tx.commit().await?;

        tracing::info!(sim_id = %updated.id, from = %from, "Deactivated SIM");

        self.audit
            .record(self.audit_entry(
                ctx,
                &updated,
                SimAuditAction::Deactivate,
                Some(from),
                Some(SimStatus::Inactive),
                None,
                None,
                JsonValue::Object(Map::new()),
            ))
            .await;

        let scheduled = if notify {
            self.publish(
                SimEventType::Deactivated,
                &updated,
                Some(from),
                Some(SimStatus::Inactive),
            )
            .await
        } else {
            false
        };

        Ok(TransitionOutcome {
            sim: updated.into(),
            webhook_scheduled: scheduled,
        })
    }

    /// Block an active or inactive SIM, remembering its prior status.
    pub async fn block(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        reason: Option<String>,
        notes: Option<String>,
        notify: bool,
    ) -> Result<TransitionOutcome, SimError> {
        let mut tx = self.pool.begin().await?;
        let sim = SimCard::find_by_id_for_update(&mut *tx, id)
            .await?
            .ok_or(SimError::SimNotFound)?;

        let from = sim.status;
        if !from.is_blockable() {
            tx.rollback().await?;
            return Err(SimError::InvalidStateTransition {
                from,
                to: SimStatus::Blocked,
            });
        }

        let updated =
            SimCard::mark_blocked(&mut *tx, id, from, reason.as_deref(), notes.as_deref()).await?;
        tx.commit().await?;

        tracing::info!(
            sim_id = %updated.id,
            from = %from,
            reason = reason.as_deref().unwrap_or("unspecified"),
            "Blocked SIM"
        );

        self.audit
            .record(self.audit_entry(
                ctx,
                &updated,
                SimAuditAction::Block,
                Some(from),
                Some(SimStatus::Blocked),
                reason,
                notes,
                JsonValue::Object(Map::new()),
            ))
            .await;

        let scheduled = if notify {
            self.publish(
                SimEventType::Blocked,
                &updated,
                Some(from),
                Some(SimStatus::Blocked),
            )
            .await
        } else {
            false
        };

        Ok(TransitionOutcome {
            sim: updated.into(),
            webhook_scheduled: scheduled,
        })
    }

    /// Unblock a blocked SIM, restoring the status it held before the block.
    ///
    /// A SIM blocked while active returns to active; one blocked while
    /// inactive returns to inactive. A missing prior status (legacy rows)
    /// restores to inactive, which is the safe side.
    pub async fn unblock(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        reason: Option<String>,
        notify: bool,
    ) -> Result<TransitionOutcome, SimError> {
        let mut tx = self.pool.begin().await?;
        let sim = SimCard::find_by_id_for_update(&mut *tx, id)
            .await?
            .ok_or(SimError::SimNotFound)?;

        let from = sim.status;
        if from != SimStatus::Blocked {
            tx.rollback().await?;
            return Err(SimError::NotBlocked(from));
        }

        let restored = match sim.previous_status {
            Some(status) => status,
            None => {
                tracing::warn!(
                    sim_id = %sim.id,
                    "Blocked SIM has no recorded prior status, restoring to inactive"
                );
                SimStatus::Inactive
            }
        };

        let updated = SimCard::mark_unblocked(&mut *tx, id, restored).await?;
        tx.commit().await?;

        tracing::info!(sim_id = %updated.id, restored = %restored, "Unblocked SIM");

        self.audit
            .record(self.audit_entry(
                ctx,
                &updated,
                SimAuditAction::Unblock,
                Some(SimStatus::Blocked),
                Some(restored),
                reason,
                None,
                JsonValue::Object(Map::new()),
            ))
            .await;

        let scheduled = if notify {
            self.publish(
                SimEventType::Unblocked,
                &updated,
                Some(SimStatus::Blocked),
                Some(restored),
            )
            .await
        } else {
            false
        };

        Ok(TransitionOutcome {
            sim: updated.into(),
            webhook_scheduled: scheduled,
        })
    }

    /// Fetch one SIM by ID, ICCID, or MSISDN.
    pub async fn get(&self, lookup: SimLookup) -> Result<SimView, SimError> {
        let sim = match lookup {
            SimLookup::Id(id) => SimCard::find_by_id(&self.pool, id).await?,
            SimLookup::Iccid(iccid) => SimCard::find_by_iccid(&self.pool, &iccid).await?,
            SimLookup::Msisdn(msisdn) => SimCard::find_by_msisdn(&self.pool, &msisdn).await?,
        };
        sim.map(SimView::from).ok_or(SimError::SimNotFound)
    }

    /// List SIMs matching the given filters, newest first.
    pub async fn search(&self, params: SearchParams) -> Result<SimPage, SimError> {
        let limit = params
            .limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        let offset = params.offset.unwrap_or(0).max(0);

        let filter = SimCardFilter {
            status: params.status,
            customer_id: params.customer_id,
            billing_account_id: params.billing_account_id,
            iccid_prefix: params.iccid_prefix,
            msisdn: params.msisdn,
        };

        let total = SimCard::count(&self.pool, &filter).await?;
        let sims = SimCard::list(&self.pool, &filter, limit, offset).await?;
        let data: Vec<SimView> = sims.into_iter().map(SimView::from).collect();
        let has_more = offset + (data.len() as i64) < total;

        Ok(SimPage {
            data,
            pagination: Pagination {
                total,
                limit,
                offset,
                has_more,
            },
        })
    }

    fn seal(&self, value: Option<&str>) -> Result<Option<String>, SimError> {
        match value {
            Some(v) if !v.is_empty() => {
                Ok(Some(simfleet_crypto::seal_secret(v, &self.secret_key)?))
            }
            _ => Ok(None),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn audit_entry(
        &self,
        ctx: &RequestContext,
        sim: &SimCard,
        action: SimAuditAction,
        previous_status: Option<SimStatus>,
        new_status: Option<SimStatus>,
        reason: Option<String>,
        notes: Option<String>,
        changes: JsonValue,
    ) -> CreateSimAuditEntry {
        CreateSimAuditEntry {
            sim_id: sim.id,
            iccid: sim.iccid.clone(),
            action,
            previous_status,
            new_status,
            reason,
            notes,
            initiator: ctx.initiator.to_string(),
            client_id: ctx.client_id,
            correlation_id: ctx.correlation_id,
            request_id: ctx.request_id,
            ip_address: ctx.ip_address.clone(),
            changes,
        }
    }

    /// Enqueue webhook deliveries for a committed change. Publish failures
    /// are logged and reported as `webhook_scheduled: false`; they never fail
    /// the operation itself.
    async fn publish(
        &self,
        event_type: SimEventType,
        sim: &SimCard,
        previous_status: Option<SimStatus>,
        new_status: Option<SimStatus>,
    ) -> bool {
        let event = LifecycleEvent::new(
            event_type,
            sim.id,
            sim.iccid.clone(),
            previous_status,
            new_status,
        );
        match self.publisher.publish(&event).await {
            Ok(enqueued) => enqueued > 0,
            Err(e) => {
                tracing::error!(
                    sim_id = %sim.id,
                    event_type = %event_type,
                    error = %e,
                    "Failed to enqueue lifecycle event"
                );
                false
            }
        }
    }
}

/// Collect old/new pairs for every profile field the request touches.
fn diff_profile(
    changes: &mut Map<String, JsonValue>,
    sim: &SimCard,
    request: &UpdateSimRequest,
    merged_metadata: Option<&JsonValue>,
) {
    if let Some(imsi) = &request.imsi {
        record_change(
            changes,
            "imsi",
            JsonValue::from(sim.imsi.clone()),
            JsonValue::from(imsi.clone()),
        );
    }
    if let Some(msisdn) = &request.msisdn {
        record_change(
            changes,
            "msisdn",
            JsonValue::from(sim.msisdn.clone()),
            JsonValue::from(msisdn.clone()),
        );
    }
    if let Some(imei) = &request.imei {
        record_change(
            changes,
            "imei",
            option_json(sim.imei.as_deref()),
            JsonValue::from(imei.clone()),
        );
    }
    if let Some(apn) = &request.apn {
        record_change(
            changes,
            "apn",
            option_json(sim.apn.as_deref()),
            JsonValue::from(apn.clone()),
        );
    }
    if let Some(rate_plan_id) = request.rate_plan_id {
        record_change(
            changes,
            "rate_plan_id",
            option_json(sim.rate_plan_id.map(|v| v.to_string()).as_deref()),
            JsonValue::from(rate_plan_id.to_string()),
        );
    }
    if let Some(limit) = request.data_limit_bytes {
        record_change(
            changes,
            "data_limit_bytes",
            sim.data_limit_bytes.map_or(JsonValue::Null, JsonValue::from),
            JsonValue::from(limit),
        );
    }
    if let Some(billing_account_id) = request.billing_account_id {
        record_change(
            changes,
            "billing_account_id",
            option_json(sim.billing_account_id.map(|v| v.to_string()).as_deref()),
            JsonValue::from(billing_account_id.to_string()),
        );
    }
    if let Some(customer_id) = request.customer_id {
        record_change(
            changes,
            "customer_id",
            option_json(sim.customer_id.map(|v| v.to_string()).as_deref()),
            JsonValue::from(customer_id.to_string()),
        );
    }
    if let Some(merged) = merged_metadata {
        record_change(changes, "metadata", sim.metadata.clone(), merged.clone());
    }
}

fn option_json(value: Option<&str>) -> JsonValue {
    value.map_or(JsonValue::Null, JsonValue::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn sample_sim() -> SimCard {
        SimCard {
            id: Uuid::new_v4(),
            iccid: "8941000000000000001".into(),
            imsi: "262011234567890".into(),
            msisdn: "+4915112345678".into(),
            imei: None,
            apn: Some("iot.example".into()),
            rate_plan_id: None,
            data_limit_bytes: Some(1024),
            billing_account_id: None,
            customer_id: None,
            metadata: json!({"fleet": "alpha"}),
            pin_enc: None,
            puk_enc: None,
            ki_enc: None,
            opc_enc: None,
            status: SimStatus::Active,
            previous_status: None,
            block_reason: None,
            block_notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            activated_at: Some(Utc::now()),
            deactivated_at: None,
            blocked_at: None,
        }
    }

    #[test]
    fn test_diff_empty_when_values_unchanged() {
        let sim = sample_sim();
        let request = UpdateSimRequest {
            apn: Some("iot.example".into()),
            data_limit_bytes: Some(1024),
            ..Default::default()
        };
        let mut changes = Map::new();
        diff_profile(&mut changes, &sim, &request, None);
        assert!(changes.is_empty());
    }

    #[test]
    fn test_diff_records_old_and_new() {
        let sim = sample_sim();
        let request = UpdateSimRequest {
            apn: Some("iot.other".into()),
            imei: Some("35847509123456".into()),
            ..Default::default()
        };
        let mut changes = Map::new();
        diff_profile(&mut changes, &sim, &request, None);

        assert_eq!(
            changes.get("apn"),
            Some(&json!({"old": "iot.example", "new": "iot.other"}))
        );
        assert_eq!(
            changes.get("imei"),
            Some(&json!({"old": null, "new": "35847509123456"}))
        );
    }

    #[test]
    fn test_diff_includes_merged_metadata() {
        let sim = sample_sim();
        let request = UpdateSimRequest {
            metadata: Some(json!({"region": "eu"})),
            ..Default::default()
        };
        let merged = deep_merge(&sim.metadata, request.metadata.as_ref().unwrap());
        let mut changes = Map::new();
        diff_profile(&mut changes, &sim, &request, Some(&merged));

        assert_eq!(
            changes.get("metadata"),
            Some(&json!({
                "old": {"fleet": "alpha"},
                "new": {"fleet": "alpha", "region": "eu"},
            }))
        );
    }
}
