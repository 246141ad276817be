//! Error types for store access and feedback submission.
//!
//! Aggregation never fails; everything that can go wrong lives at the
//! store boundary and is described here.

use thiserror::Error;

/// Errors raised by the store, the loader and feedback submission.
#[derive(Debug, Error)]
pub enum DashboardError {
    /// The database could not be opened.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A query ran but failed, or a row could not be decoded.
    #[error("query failed: {0}")]
    Query(String),

    /// The referenced triage event does not exist.
    #[error("triage event {0} not found")]
    NotFound(i64),

    /// Input rejected before touching the store.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The triage event already carries clinician feedback.
    #[error("triage event {0} already has clinician feedback")]
    Conflict(i64),
}

/// Result alias for store-facing operations.
pub type DashboardResult<T> = std::result::Result<T, DashboardError>;

impl DashboardError {
    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            DashboardError::StoreUnavailable(_) => "store_unavailable",
            DashboardError::Query(_) => "query",
            DashboardError::NotFound(_) => "not_found",
            DashboardError::Validation(_) => "validation",
            DashboardError::Conflict(_) => "conflict",
        }
    }
}
