//! Audit trail writer.
//!
//! Entries are appended after the state change has committed, so an audit
//! insert failure can never roll back a completed transition. The cost is a
//! small window where a crash loses the entry; `record` narrows it with a
//! handful of out-of-band retries before giving up loudly.

use std::time::Duration;

use sqlx::PgPool;

use simfleet_db::models::{CreateSimAuditEntry, SimAuditLog};

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(250);

/// Appends entries to the SIM audit log.
#[derive(Clone)]
pub struct AuditWriter {
    pool: PgPool,
}

impl AuditWriter {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append an audit entry, retrying in the background on failure.
    ///
    /// Never returns an error: the transition this entry describes has
    /// already committed, so the caller has nothing useful to do with one.
    pub async fn record(&self, entry: CreateSimAuditEntry) {
        match SimAuditLog::create(&self.pool, entry.clone()).await {
            Ok(_) => {}
            Err(e) => {
                tracing::error!(
                    sim_id = %entry.sim_id,
                    action = %entry.action,
                    error = %e,
                    "Audit insert failed, scheduling retries"
                );
                let pool = self.pool.clone();
                tokio::spawn(async move {
                    for attempt in 1..=RETRY_ATTEMPTS {
                        tokio::time::sleep(RETRY_DELAY * attempt).await;
                        match SimAuditLog::create(&pool, entry.clone()).await {
                            Ok(_) => {
                                tracing::info!(
                                    sim_id = %entry.sim_id,
                                    action = %entry.action,
                                    attempt,
                                    "Audit insert succeeded on retry"
                                );
                                return;
                            }
                            Err(e) => {
                                tracing::warn!(
                                    sim_id = %entry.sim_id,
                                    action = %entry.action,
                                    attempt,
                                    error = %e,
                                    "Audit insert retry failed"
                                );
                            }
                        }
                    }
                    tracing::error!(
                        sim_id = %entry.sim_id,
                        action = %entry.action,
                        "Audit entry lost after {RETRY_ATTEMPTS} retries"
                    );
                });
            }
        }
    }
}
