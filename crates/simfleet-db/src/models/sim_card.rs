//! SIM card model and lifecycle status state machine.
//!
//! A SIM row is created once by provisioning and is never physically deleted;
//! removal is modeled as a status transition. The status enum carries the
//! full transition table so validity checks are pure and need no I/O.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgExecutor};
use uuid::Uuid;

/// Lifecycle status of a SIM card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "sim_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SimStatus {
    /// Created but not yet activated on the network.
    Provisioned,
    /// In service.
    Active,
    /// Suspended by the customer or a scheduled job.
    Inactive,
    /// Administratively blocked (fraud, lost device, non-payment).
    Blocked,
}

impl std::fmt::Display for SimStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimStatus::Provisioned => write!(f, "provisioned"),
            SimStatus::Active => write!(f, "active"),
            SimStatus::Inactive => write!(f, "inactive"),
            SimStatus::Blocked => write!(f, "blocked"),
        }
    }
}

impl std::str::FromStr for SimStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "provisioned" => Ok(SimStatus::Provisioned),
            "active" => Ok(SimStatus::Active),
            "inactive" => Ok(SimStatus::Inactive),
            "blocked" => Ok(SimStatus::Blocked),
            _ => Err(format!("Invalid SIM status: {s}")),
        }
    }
}

impl SimStatus {
    /// Check whether a transition from this status to `target` is legal.
    ///
    /// The transition graph:
    ///
    /// ```text
    /// provisioned -> active
    /// active      -> inactive, blocked
    /// inactive    -> active, blocked
    /// blocked     -> active, inactive   (via unblock only)
    /// ```
    ///
    /// Self-transitions are illegal; every other pair returns false.
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        match (self, target) {
            (Self::Provisioned, Self::Active) => true,
            (Self::Active, Self::Inactive | Self::Blocked) => true,
            (Self::Inactive, Self::Active | Self::Blocked) => true,
            (Self::Blocked, Self::Active | Self::Inactive) => true,
            _ => false,
        }
    }

    /// Check whether this status may be blocked.
    #[must_use]
    pub fn is_blockable(&self) -> bool {
        self.can_transition_to(Self::Blocked)
    }
}

/// A provisioned SIM card.
///
/// Secret columns (`pin_enc`, `puk_enc`, `ki_enc`, `opc_enc`) hold
/// AES-256-GCM sealed blobs and must never be logged or exposed through
/// public projections.
#[derive(Debug, Clone, FromRow)]
pub struct SimCard {
    /// Unique identifier.
    pub id: Uuid,
    /// ICCID, globally unique, 19-20 digits.
    pub iccid: String,
    /// IMSI.
    pub imsi: String,
    /// MSISDN (subscriber number).
    pub msisdn: String,
    /// IMEI of the paired device, if known.
    pub imei: Option<String>,
    /// Access point name.
    pub apn: Option<String>,
    /// Rate plan identifier.
    pub rate_plan_id: Option<Uuid>,
    /// Monthly data cap in bytes.
    pub data_limit_bytes: Option<i64>,
    /// Billing account the SIM is charged to.
    pub billing_account_id: Option<Uuid>,
    /// Owning customer.
    pub customer_id: Option<Uuid>,
    /// Free-form metadata, merged additively on update.
    pub metadata: JsonValue,
    /// Sealed PIN.
    pub pin_enc: Option<String>,
    /// Sealed PUK.
    pub puk_enc: Option<String>,
    /// Sealed Ki authentication key.
    pub ki_enc: Option<String>,
    /// Sealed OPC operator code.
    pub opc_enc: Option<String>,
    /// Current lifecycle status.
    pub status: SimStatus,
    /// Status held before blocking; non-null iff `status` is blocked.
    pub previous_status: Option<SimStatus>,
    /// Why the SIM was blocked.
    pub block_reason: Option<String>,
    /// Operator notes attached to the block.
    pub block_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub blocked_at: Option<DateTime<Utc>>,
}

/// Input for inserting a new SIM card.
#[derive(Debug, Clone)]
pub struct CreateSimCard {
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
    pub pin_enc: Option<String>,
    pub puk_enc: Option<String>,
    pub ki_enc: Option<String>,
    pub opc_enc: Option<String>,
    pub status: SimStatus,
}

/// Profile fields that may be overwritten by an update.
///
/// `None` leaves the column untouched; `metadata` carries the already-merged
/// document (the service owns merge semantics, the model just stores it).
#[derive(Debug, Clone, Default)]
pub struct UpdateSimCardProfile {
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

/// Filter options for listing SIM cards.
#[derive(Debug, Clone, Default)]
pub struct SimCardFilter {
    pub status: Option<SimStatus>,
    pub customer_id: Option<Uuid>,
    pub billing_account_id: Option<Uuid>,
    pub iccid_prefix: Option<String>,
    pub msisdn: Option<String>,
}

const SIM_COLUMNS: &str = "id, iccid, imsi, msisdn, imei, apn, rate_plan_id, data_limit_bytes, \
     billing_account_id, customer_id, metadata, pin_enc, puk_enc, ki_enc, opc_enc, \
     status, previous_status, block_reason, block_notes, \
     created_at, updated_at, activated_at, deactivated_at, blocked_at";

impl SimCard {
    /// Insert a new SIM card.
    ///
    /// A unique-violation on `iccid` surfaces as `sqlx::Error::Database`;
    /// callers translate it to their duplicate-ICCID error.
    pub async fn create<'e, E>(executor: E, input: CreateSimCard) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!(
            r"
            INSERT INTO sim_cards
                (iccid, imsi, msisdn, imei, apn, rate_plan_id, data_limit_bytes,
                 billing_account_id, customer_id, metadata,
                 pin_enc, puk_enc, ki_enc, opc_enc, status, activated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                    CASE WHEN $15 = 'active'::sim_status THEN NOW() ELSE NULL END)
            RETURNING {SIM_COLUMNS}
            "
        );

        sqlx::query_as::<_, Self>(&query)
            .bind(input.iccid)
            .bind(input.imsi)
            .bind(input.msisdn)
            .bind(input.imei)
            .bind(input.apn)
            .bind(input.rate_plan_id)
            .bind(input.data_limit_bytes)
            .bind(input.billing_account_id)
            .bind(input.customer_id)
            .bind(input.metadata)
            .bind(input.pin_enc)
            .bind(input.puk_enc)
            .bind(input.ki_enc)
            .bind(input.opc_enc)
            .bind(input.status)
            .fetch_one(executor)
            .await
    }

    /// Find a SIM card by ID.
    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!("SELECT {SIM_COLUMNS} FROM sim_cards WHERE id = $1");
        sqlx::query_as::<_, Self>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Find a SIM card by ICCID.
    pub async fn find_by_iccid<'e, E>(executor: E, iccid: &str) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!("SELECT {SIM_COLUMNS} FROM sim_cards WHERE iccid = $1");
        sqlx::query_as::<_, Self>(&query)
            .bind(iccid)
            .fetch_optional(executor)
            .await
    }

    /// Find a SIM card by MSISDN.
    pub async fn find_by_msisdn<'e, E>(
        executor: E,
        msisdn: &str,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!("SELECT {SIM_COLUMNS} FROM sim_cards WHERE msisdn = $1");
        sqlx::query_as::<_, Self>(&query)
            .bind(msisdn)
            .fetch_optional(executor)
            .await
    }

    /// Find a SIM card by ID and lock the row for the current transaction.
    ///
    /// `FOR UPDATE` serializes concurrent transitions on the same SIM.
    pub async fn find_by_id_for_update<'e, E>(
        executor: E,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!("SELECT {SIM_COLUMNS} FROM sim_cards WHERE id = $1 FOR UPDATE");
        sqlx::query_as::<_, Self>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Check whether an ICCID is already registered.
    pub async fn iccid_exists<'e, E>(executor: E, iccid: &str) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let row: (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM sim_cards WHERE iccid = $1)")
                .bind(iccid)
                .fetch_one(executor)
                .await?;
        Ok(row.0)
    }

    /// Transition a SIM to active, stamping `activated_at`.
    pub async fn mark_active<'e, E>(executor: E, id: Uuid) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!(
            r"
            UPDATE sim_cards
            SET status = 'active', activated_at = NOW(), updated_at = NOW()
            WHERE id = $1
            RETURNING {SIM_COLUMNS}
            "
        );
        sqlx::query_as::<_, Self>(&query)
            .bind(id)
            .fetch_one(executor)
            .await
    }

    /// Transition a SIM to inactive, stamping `deactivated_at`.
    pub async fn mark_inactive<'e, E>(executor: E, id: Uuid) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!(
            r"
            UPDATE sim_cards
            SET status = 'inactive', deactivated_at = NOW(), updated_at = NOW()
            WHERE id = $1
            RETURNING {SIM_COLUMNS}
            "
        );
        sqlx::query_as::<_, Self>(&query)
            .bind(id)
            .fetch_one(executor)
            .await
    }

    /// Transition a SIM to blocked, recording the status it held before.
    pub async fn mark_blocked<'e, E>(
        executor: E,
        id: Uuid,
        previous_status: SimStatus,
        reason: Option<&str>,
        notes: Option<&str>,
    ) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!(
            r"
            UPDATE sim_cards
            SET status = 'blocked', previous_status = $2, block_reason = $3,
                block_notes = $4, blocked_at = NOW(), updated_at = NOW()
            WHERE id = $1
            RETURNING {SIM_COLUMNS}
            "
        );
        sqlx::query_as::<_, Self>(&query)
            .bind(id)
            .bind(previous_status)
            .bind(reason)
            .bind(notes)
            .fetch_one(executor)
            .await
    }

    /// Restore a blocked SIM to `restored_status`, clearing all block fields.
    pub async fn mark_unblocked<'e, E>(
        executor: E,
        id: Uuid,
        restored_status: SimStatus,
    ) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!(
            r"
            UPDATE sim_cards
            SET status = $2, previous_status = NULL, block_reason = NULL,
                block_notes = NULL, blocked_at = NULL, updated_at = NOW()
            WHERE id = $1
            RETURNING {SIM_COLUMNS}
            "
        );
        sqlx::query_as::<_, Self>(&query)
            .bind(id)
            .bind(restored_status)
            .fetch_one(executor)
            .await
    }

    /// Overwrite supplied profile fields; absent fields keep their value.
    pub async fn update_profile<'e, E>(
        executor: E,
        id: Uuid,
        fields: UpdateSimCardProfile,
    ) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!(
            r"
            UPDATE sim_cards
            SET imsi = COALESCE($2, imsi),
                msisdn = COALESCE($3, msisdn),
                imei = COALESCE($4, imei),
                apn = COALESCE($5, apn),
                rate_plan_id = COALESCE($6, rate_plan_id),
                data_limit_bytes = COALESCE($7, data_limit_bytes),
                billing_account_id = COALESCE($8, billing_account_id),
                customer_id = COALESCE($9, customer_id),
                metadata = COALESCE($10, metadata),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {SIM_COLUMNS}
            "
        );
        sqlx::query_as::<_, Self>(&query)
            .bind(id)
            .bind(fields.imsi)
            .bind(fields.msisdn)
            .bind(fields.imei)
            .bind(fields.apn)
            .bind(fields.rate_plan_id)
            .bind(fields.data_limit_bytes)
            .bind(fields.billing_account_id)
            .bind(fields.customer_id)
            .bind(fields.metadata)
            .fetch_one(executor)
            .await
    }

    /// List SIM cards with optional filters, newest first.
    pub async fn list<'e, E>(
        executor: E,
        filter: &SimCardFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let (where_clause, next_idx) = filter_conditions(filter, 1);
        let query = format!(
            r"
            SELECT {SIM_COLUMNS}
            FROM sim_cards
            WHERE {where_clause}
            ORDER BY created_at DESC
            LIMIT ${next_idx} OFFSET ${}
            ",
            next_idx + 1
        );

        let q = bind_filter(sqlx::query_as::<_, Self>(&query), filter);
        q.bind(limit).bind(offset).fetch_all(executor).await
    }

    /// Count SIM cards matching the filter.
    pub async fn count<'e, E>(executor: E, filter: &SimCardFilter) -> Result<i64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let (where_clause, _) = filter_conditions(filter, 1);
        let query = format!("SELECT COUNT(*) FROM sim_cards WHERE {where_clause}");

        let q = bind_filter(sqlx::query_as::<_, (i64,)>(&query), filter);
        let row = q.fetch_one(executor).await?;
        Ok(row.0)
    }
}

/// Build the WHERE clause for a filter, returning it plus the next bind index.
fn filter_conditions(filter: &SimCardFilter, start_idx: usize) -> (String, usize) {
    let mut conditions: Vec<String> = Vec::new();
    let mut idx = start_idx;

    if filter.status.is_some() {
        conditions.push(format!("status = ${idx}"));
        idx += 1;
    }
    if filter.customer_id.is_some() {
        conditions.push(format!("customer_id = ${idx}"));
        idx += 1;
    }
    if filter.billing_account_id.is_some() {
        conditions.push(format!("billing_account_id = ${idx}"));
        idx += 1;
    }
    if filter.iccid_prefix.is_some() {
        conditions.push(format!("iccid LIKE ${idx} || '%'"));
        idx += 1;
    }
    if filter.msisdn.is_some() {
        conditions.push(format!("msisdn = ${idx}"));
        idx += 1;
    }

    if conditions.is_empty() {
        ("TRUE".to_string(), idx)
    } else {
        (conditions.join(" AND "), idx)
    }
}

/// Bind filter values in the same order `filter_conditions` numbered them.
fn bind_filter<'q, O>(
    mut q: sqlx::query::QueryAs<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments>,
    filter: &'q SimCardFilter,
) -> sqlx::query::QueryAs<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments>
where
    O: for<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow>,
{
    if let Some(status) = filter.status {
        q = q.bind(status);
    }
    if let Some(customer_id) = filter.customer_id {
        q = q.bind(customer_id);
    }
    if let Some(billing_account_id) = filter.billing_account_id {
        q = q.bind(billing_account_id);
    }
    if let Some(prefix) = &filter.iccid_prefix {
        q = q.bind(prefix);
    }
    if let Some(msisdn) = &filter.msisdn {
        q = q.bind(msisdn);
    }
    q
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [SimStatus; 4] = [
        SimStatus::Provisioned,
        SimStatus::Active,
        SimStatus::Inactive,
        SimStatus::Blocked,
    ];

    #[test]
    fn test_legal_transitions() {
        assert!(SimStatus::Provisioned.can_transition_to(SimStatus::Active));
        assert!(SimStatus::Active.can_transition_to(SimStatus::Inactive));
        assert!(SimStatus::Active.can_transition_to(SimStatus::Blocked));
        assert!(SimStatus::Inactive.can_transition_to(SimStatus::Active));
        assert!(SimStatus::Inactive.can_transition_to(SimStatus::Blocked));
        assert!(SimStatus::Blocked.can_transition_to(SimStatus::Active));
        assert!(SimStatus::Blocked.can_transition_to(SimStatus::Inactive));
    }

    #[test]
    fn test_self_transitions_are_illegal() {
        for status in ALL {
            assert!(
                !status.can_transition_to(status),
                "{status} -> {status} must be illegal"
            );
        }
    }

    #[test]
    fn test_transition_table_is_total() {
        // Exactly 7 of the 16 (from, to) pairs are legal.
        let legal = ALL
            .iter()
            .flat_map(|from| ALL.iter().map(move |to| (from, to)))
            .filter(|(from, to)| from.can_transition_to(**to))
            .count();
        assert_eq!(legal, 7);
    }

    #[test]
    fn test_provisioned_cannot_skip_activation() {
        assert!(!SimStatus::Provisioned.can_transition_to(SimStatus::Inactive));
        assert!(!SimStatus::Provisioned.can_transition_to(SimStatus::Blocked));
    }

    #[test]
    fn test_nothing_returns_to_provisioned() {
        for status in [SimStatus::Active, SimStatus::Inactive, SimStatus::Blocked] {
            assert!(!status.can_transition_to(SimStatus::Provisioned));
        }
    }

    #[test]
    fn test_status_display_parse_roundtrip() {
        for status in ALL {
            let parsed: SimStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("deleted".parse::<SimStatus>().is_err());
    }

    #[test]
    fn test_blockable_states() {
        assert!(SimStatus::Active.is_blockable());
        assert!(SimStatus::Inactive.is_blockable());
        assert!(!SimStatus::Provisioned.is_blockable());
        assert!(!SimStatus::Blocked.is_blockable());
    }

    #[test]
    fn test_filter_conditions_numbering() {
        let filter = SimCardFilter {
            status: Some(SimStatus::Active),
            customer_id: None,
            billing_account_id: None,
            iccid_prefix: Some("8941".to_string()),
            msisdn: None,
        };
        let (clause, next) = filter_conditions(&filter, 1);
        assert_eq!(clause, "status = $1 AND iccid LIKE $2 || '%'");
        assert_eq!(next, 3);
    }

    #[test]
    fn test_empty_filter_matches_all() {
        let (clause, next) = filter_conditions(&SimCardFilter::default(), 1);
        assert_eq!(clause, "TRUE");
        assert_eq!(next, 1);
    }
}
