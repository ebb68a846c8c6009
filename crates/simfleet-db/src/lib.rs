//! Database layer for the SIM fleet core.
//!
//! Provides sqlx/Postgres models for the five record sets the lifecycle and
//! notification pipeline operate on: SIM cards, the append-only lifecycle
//! audit log, webhook subscriptions, delivery attempts, and rate-limit
//! buckets.
//!
//! Model methods are generic over [`sqlx::PgExecutor`] so callers can pass
//! either a pool or an open transaction.

pub mod error;
pub mod models;

pub use error::DbError;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Connect to Postgres with a bounded connection pool.
///
/// # Errors
///
/// Returns [`DbError::ConnectionFailed`] if the pool cannot be established.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, DbError> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(DbError::ConnectionFailed)
}
