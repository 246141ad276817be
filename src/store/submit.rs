//! Recording clinician feedback.

use super::Store;
use crate::error::{DashboardError, DashboardResult};
use crate::models::{ClinicianFeedback, FeedbackSubmission};
use rusqlite::{params, TransactionBehavior};
use tracing::info;

/// Validate and insert one feedback row.
///
/// Runs in a single immediate transaction: the event must exist and must
/// not already carry feedback. Nothing is written on any error.
pub fn submit_feedback(
    store: &Store,
    submission: &FeedbackSubmission,
) -> DashboardResult<ClinicianFeedback> {
    let submission = submission.validate()?;
    let triage_log_id = submission.triage_log_id;

    let mut conn = store.connect()?;
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| DashboardError::Query(format!("failed to begin transaction: {}", e)))?;

    let event_exists: bool = tx
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM triage_events WHERE id = ?1)",
            params![triage_log_id],
            |row| row.get(0),
        )
        .map_err(|e| DashboardError::Query(e.to_string()))?;
    if !event_exists {
        return Err(DashboardError::NotFound(triage_log_id));
    }

    let has_feedback: bool = tx
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM clinician_feedback WHERE triage_log_id = ?1)",
            params![triage_log_id],
            |row| row.get(0),
        )
        .map_err(|e| DashboardError::Query(e.to_string()))?;
    if has_feedback {
        return Err(DashboardError::Conflict(triage_log_id));
    }

    tx.execute(
        "INSERT INTO clinician_feedback (triage_log_id, clinician_scan, accepted_recommendation, comment)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            triage_log_id,
            submission.clinician_scan,
            submission.accepted,
            submission.comment,
        ],
    )
    .map_err(|e| map_insert_error(e, triage_log_id))?;
    let id = tx.last_insert_rowid();

    tx.commit()
        .map_err(|e| DashboardError::Query(format!("failed to commit feedback: {}", e)))?;

    info!(
        "Recorded feedback {} for triage event {} (accepted: {})",
        id, triage_log_id, submission.accepted
    );

    Ok(ClinicianFeedback {
        id,
        triage_log_id,
        clinician_scan: submission.clinician_scan,
        accepted_recommendation: submission.accepted,
        comment: submission.comment,
    })
}

fn map_insert_error(err: rusqlite::Error, triage_log_id: i64) -> DashboardError {
    match err {
        rusqlite::Error::SqliteFailure(ref failure, _)
            if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            DashboardError::Conflict(triage_log_id)
        }
        other => DashboardError::Query(format!("failed to insert feedback: {}", other)),
    }
}
