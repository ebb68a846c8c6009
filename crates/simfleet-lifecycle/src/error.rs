//! Error taxonomy for the lifecycle service.
//!
//! Client errors (`SimNotFound`, `DuplicateIccid`, `InvalidStateTransition`,
//! `NotBlocked`, `Validation`) are recoverable and caller-fixable; `Database`
//! and `Crypto`
//! are infrastructure failures the caller may retry. Expected errors are
//! always returned as values, never panics.

use simfleet_crypto::CryptoError;
use simfleet_db::models::SimStatus;

/// Lifecycle service error variants.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("SIM not found")]
    SimNotFound,

    #[error("ICCID {0} is already registered")]
    DuplicateIccid(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: SimStatus, to: SimStatus },

    #[error("SIM is not blocked (current status {0})")]
    NotBlocked(SimStatus),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Storage error: {0}")]
    Database(#[from] sqlx::Error),
}

impl SimError {
    /// Client errors are caller-fixable (4xx class); the rest are
    /// infrastructure failures (5xx class).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SimError::SimNotFound
                | SimError::DuplicateIccid(_)
                | SimError::InvalidStateTransition { .. }
                | SimError::NotBlocked(_)
                | SimError::Validation(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(SimError::SimNotFound.is_client_error());
        assert!(SimError::DuplicateIccid("8941".into()).is_client_error());
        assert!(SimError::InvalidStateTransition {
            from: SimStatus::Active,
            to: SimStatus::Active,
        }
        .is_client_error());
        assert!(SimError::NotBlocked(SimStatus::Active).is_client_error());
        assert!(SimError::Validation("bad iccid".into()).is_client_error());
        assert!(!SimError::Database(sqlx::Error::PoolClosed).is_client_error());
    }
}
