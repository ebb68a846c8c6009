//! Append-only audit log for SIM lifecycle transitions.
//!
//! One row per attempted or applied transition. Rows are never updated or
//! deleted; the model deliberately exposes no mutating operations beyond
//! `create`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgExecutor};
use uuid::Uuid;

use super::sim_card::SimStatus;

/// Lifecycle action recorded by an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimAuditAction {
    Create,
    Update,
    Activate,
    Deactivate,
    Block,
    Unblock,
}

impl std::fmt::Display for SimAuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimAuditAction::Create => write!(f, "create"),
            SimAuditAction::Update => write!(f, "update"),
            SimAuditAction::Activate => write!(f, "activate"),
            SimAuditAction::Deactivate => write!(f, "deactivate"),
            SimAuditAction::Block => write!(f, "block"),
            SimAuditAction::Unblock => write!(f, "unblock"),
        }
    }
}

impl std::str::FromStr for SimAuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "create" => Ok(SimAuditAction::Create),
            "update" => Ok(SimAuditAction::Update),
            "activate" => Ok(SimAuditAction::Activate),
            "deactivate" => Ok(SimAuditAction::Deactivate),
            "block" => Ok(SimAuditAction::Block),
            "unblock" => Ok(SimAuditAction::Unblock),
            _ => Err(format!("Invalid audit action: {s}")),
        }
    }
}

/// Immutable audit log entry for one lifecycle transition.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SimAuditLog {
    /// Unique identifier.
    pub id: Uuid,
    /// SIM the transition applied to.
    pub sim_id: Uuid,
    /// ICCID at the time of the transition.
    pub iccid: String,
    /// Action performed.
    pub action: String,
    /// Status before the transition.
    pub previous_status: Option<SimStatus>,
    /// Status after the transition.
    pub new_status: Option<SimStatus>,
    /// Reason supplied by the caller (block/unblock).
    pub reason: Option<String>,
    /// Operator notes.
    pub notes: Option<String>,
    /// Who initiated the change (api, system, or an operator id).
    pub initiator: String,
    /// Calling client.
    pub client_id: Uuid,
    /// Correlation ID spanning multi-step operations.
    pub correlation_id: Option<Uuid>,
    /// Request that triggered the change.
    pub request_id: Uuid,
    /// Client IP address.
    pub ip_address: Option<String>,
    /// Structured old/new field diff.
    pub changes: JsonValue,
    /// When the transition occurred.
    pub created_at: DateTime<Utc>,
}

/// Input for appending an audit entry.
#[derive(Debug, Clone)]
pub struct CreateSimAuditEntry {
    pub sim_id: Uuid,
    pub iccid: String,
    pub action: SimAuditAction,
    pub previous_status: Option<SimStatus>,
    pub new_status: Option<SimStatus>,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub initiator: String,
    pub client_id: Uuid,
    pub correlation_id: Option<Uuid>,
    pub request_id: Uuid,
    pub ip_address: Option<String>,
    pub changes: JsonValue,
}

/// Filter options for querying the audit log.
#[derive(Debug, Clone, Default)]
pub struct SimAuditFilter {
    pub sim_id: Option<Uuid>,
    pub action: Option<String>,
    pub client_id: Option<Uuid>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

impl SimAuditLog {
    /// Get the action as enum.
    #[must_use]
    pub fn action_enum(&self) -> Option<SimAuditAction> {
        self.action.parse().ok()
    }

    /// Append a new audit entry.
    pub async fn create<'e, E>(
        executor: E,
        input: CreateSimAuditEntry,
    ) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Self>(
            r"
            INSERT INTO sim_audit_log
                (sim_id, iccid, action, previous_status, new_status, reason, notes,
                 initiator, client_id, correlation_id, request_id, ip_address, changes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING id, sim_id, iccid, action, previous_status, new_status, reason, notes,
                      initiator, client_id, correlation_id, request_id, ip_address, changes,
                      created_at
            ",
        )
        .bind(input.sim_id)
        .bind(input.iccid)
        .bind(input.action.to_string())
        .bind(input.previous_status)
        .bind(input.new_status)
        .bind(input.reason)
        .bind(input.notes)
        .bind(input.initiator)
        .bind(input.client_id)
        .bind(input.correlation_id)
        .bind(input.request_id)
        .bind(input.ip_address)
        .bind(input.changes)
        .fetch_one(executor)
        .await
    }

    /// List audit entries with optional filters, newest first.
    ///
    /// Read-only surface for the reporting collaborator; `cursor` pages by
    /// `created_at` strictly older than the given timestamp.
    pub async fn list<'e, E>(
        executor: E,
        filter: &SimAuditFilter,
        cursor: Option<DateTime<Utc>>,
        limit: i32,
    ) -> Result<Vec<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let mut conditions: Vec<String> = Vec::new();
        let mut param_idx = 1;

        if filter.sim_id.is_some() {
            conditions.push(format!("sim_id = ${param_idx}"));
            param_idx += 1;
        }
        if filter.action.is_some() {
            conditions.push(format!("action = ${param_idx}"));
            param_idx += 1;
        }
        if filter.client_id.is_some() {
            conditions.push(format!("client_id = ${param_idx}"));
            param_idx += 1;
        }
        if filter.start_date.is_some() {
            conditions.push(format!("created_at >= ${param_idx}"));
            param_idx += 1;
        }
        if filter.end_date.is_some() {
            conditions.push(format!("created_at <= ${param_idx}"));
            param_idx += 1;
        }
        if cursor.is_some() {
            conditions.push(format!("created_at < ${param_idx}"));
            param_idx += 1;
        }

        let where_clause = if conditions.is_empty() {
            "TRUE".to_string()
        } else {
            conditions.join(" AND ")
        };
        let query = format!(
            r"
            SELECT id, sim_id, iccid, action, previous_status, new_status, reason, notes,
                   initiator, client_id, correlation_id, request_id, ip_address, changes,
                   created_at
            FROM sim_audit_log
            WHERE {where_clause}
            ORDER BY created_at DESC
            LIMIT ${param_idx}
            "
        );

        let mut q = sqlx::query_as::<_, Self>(&query);

        if let Some(sim_id) = filter.sim_id {
            q = q.bind(sim_id);
        }
        if let Some(action) = &filter.action {
            q = q.bind(action);
        }
        if let Some(client_id) = filter.client_id {
            q = q.bind(client_id);
        }
        if let Some(start_date) = filter.start_date {
            q = q.bind(start_date);
        }
        if let Some(end_date) = filter.end_date {
            q = q.bind(end_date);
        }
        if let Some(c) = cursor {
            q = q.bind(c);
        }
        q = q.bind(limit);

        q.fetch_all(executor).await
    }

    /// Count audit entries for one SIM.
    pub async fn count_for_sim<'e, E>(executor: E, sim_id: Uuid) -> Result<i64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sim_audit_log WHERE sim_id = $1")
            .bind(sim_id)
            .fetch_one(executor)
            .await?;
        Ok(row.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_display_parse_roundtrip() {
        for action in [
            SimAuditAction::Create,
            SimAuditAction::Update,
            SimAuditAction::Activate,
            SimAuditAction::Deactivate,
            SimAuditAction::Block,
            SimAuditAction::Unblock,
        ] {
            let parsed: SimAuditAction = action.to_string().parse().unwrap();
            assert_eq!(parsed, action);
        }
    }

    #[test]
    fn test_invalid_action_rejected() {
        assert!("delete".parse::<SimAuditAction>().is_err());
    }
}
