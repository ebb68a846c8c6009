//! SIM lifecycle service.
//!
//! Orchestrates provisioning actions over SIM cards: validates transitions
//! against the status state machine, persists state changes transactionally,
//! appends to the audit trail, and hands lifecycle events to the webhook
//! pipeline. Callers receive immediate confirmation of the state change plus
//! a flag saying whether a durable notification job was scheduled; delivery
//! success is only observable through delivery status queries.

pub mod audit;
pub mod error;
pub mod merge;
pub mod service;
pub mod types;
pub mod validation;

pub use audit::AuditWriter;
pub use error::SimError;
pub use service::SimLifecycleService;
pub use types::{
    CreateSimRequest, Initiator, Pagination, RequestContext, SearchParams, SimLookup, SimPage,
    SimView, TransitionOutcome, UpdateSimRequest,
};
