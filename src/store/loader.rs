//! Loading triage events and joined feedback into memory.
//!
//! Each half is loaded independently. A failure yields an empty collection
//! with the error attached, so the dashboard can render whatever succeeded.

use super::{parse_timestamp, Store};
use crate::error::{DashboardError, DashboardResult};
use crate::models::{JoinedFeedback, TriageEvent, TriageLevel};
use rusqlite::Row;
use tracing::{debug, warn};

const EVENTS_SQL: &str = "
    SELECT id, created_at, symptoms_text, age, sex, pregnancy, implants, location,
           triage, recommendation, primary_modality, primary_priority, model_name, notes
    FROM triage_events
    ORDER BY id ASC";

const FEEDBACK_SQL: &str = "
    SELECT f.id, f.triage_log_id, f.clinician_scan, f.accepted_recommendation, f.comment,
           e.created_at, e.primary_modality, e.symptoms_text
    FROM clinician_feedback f
    INNER JOIN triage_events e ON f.triage_log_id = e.id
    ORDER BY f.id DESC";

/// Rows from one table, or the error that prevented loading them.
#[derive(Debug)]
pub struct Loaded<T> {
    pub rows: Vec<T>,
    pub error: Option<DashboardError>,
}

impl<T> Loaded<T> {
    pub fn ok(rows: Vec<T>) -> Self {
        Self { rows, error: None }
    }

    pub fn failed(error: DashboardError) -> Self {
        Self {
            rows: Vec::new(),
            error: Some(error),
        }
    }

    /// True when the rows are missing because loading failed.
    pub fn is_degraded(&self) -> bool {
        self.error.is_some()
    }

    fn from_result(result: DashboardResult<Vec<T>>, what: &str) -> Self {
        match result {
            Ok(rows) => {
                debug!("Loaded {} {}", rows.len(), what);
                Self::ok(rows)
            }
            Err(e) => {
                warn!("Failed to load {}: {}", what, e);
                Self::failed(e)
            }
        }
    }
}

/// Load every triage event, ordered by id.
pub fn load_events(store: &Store) -> Loaded<TriageEvent> {
    Loaded::from_result(query_events(store), "triage events")
}

/// Load every feedback row joined to its event, newest feedback first.
pub fn load_feedback(store: &Store) -> Loaded<JoinedFeedback> {
    Loaded::from_result(query_feedback(store), "feedback rows")
}

struct RawEvent {
    id: i64,
    created_at: String,
    symptoms_text: String,
    age: Option<i64>,
    sex: Option<String>,
    pregnancy: Option<bool>,
    implants: Option<String>,
    location: Option<String>,
    triage: String,
    recommendation: Option<String>,
    primary_modality: Option<String>,
    primary_priority: Option<String>,
    model_name: Option<String>,
    notes: Option<String>,
}

impl RawEvent {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            created_at: row.get(1)?,
            symptoms_text: row.get(2)?,
            age: row.get(3)?,
            sex: row.get(4)?,
            pregnancy: row.get(5)?,
            implants: row.get(6)?,
            location: row.get(7)?,
            triage: row.get(8)?,
            recommendation: row.get(9)?,
            primary_modality: row.get(10)?,
            primary_priority: row.get(11)?,
            model_name: row.get(12)?,
            notes: row.get(13)?,
        })
    }

    fn normalize(self) -> DashboardResult<TriageEvent> {
        let created_at = parse_timestamp(&self.created_at).ok_or_else(|| {
            DashboardError::Query(format!(
                "triage event {} has unreadable created_at '{}'",
                self.id, self.created_at
            ))
        })?;

        Ok(TriageEvent {
            id: self.id,
            created_at,
            event_date: created_at.date_naive(),
            symptoms_text: self.symptoms_text,
            age: self.age,
            sex: self.sex,
            pregnancy: self.pregnancy,
            implants: self.implants,
            location: self.location,
            triage: TriageLevel::from(self.triage),
            recommendation: self.recommendation,
            primary_modality: self.primary_modality,
            primary_priority: self.primary_priority,
            model_name: self.model_name,
            notes: self.notes,
        })
    }
}

fn query_events(store: &Store) -> DashboardResult<Vec<TriageEvent>> {
    let conn = store.connect()?;
    let mut stmt = conn
        .prepare(EVENTS_SQL)
        .map_err(|e| DashboardError::Query(e.to_string()))?;

    let raw = stmt
        .query_map([], RawEvent::from_row)
        .map_err(|e| DashboardError::Query(e.to_string()))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| DashboardError::Query(e.to_string()))?;

    raw.into_iter().map(RawEvent::normalize).collect()
}

fn query_feedback(store: &Store) -> DashboardResult<Vec<JoinedFeedback>> {
    let conn = store.connect()?;
    let mut stmt = conn
        .prepare(FEEDBACK_SQL)
        .map_err(|e| DashboardError::Query(e.to_string()))?;

    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<bool>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, String>(7)?,
            ))
        })
        .map_err(|e| DashboardError::Query(e.to_string()))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| DashboardError::Query(e.to_string()))?;

    rows.into_iter()
        .map(
            |(feedback_id, triage_log_id, clinician_scan, accepted, comment, created_at, primary_modality, symptoms_text)| {
                let created_at = parse_timestamp(&created_at).ok_or_else(|| {
                    DashboardError::Query(format!(
                        "triage event {} has unreadable created_at '{}'",
                        triage_log_id, created_at
                    ))
                })?;

                let accepted_recommendation = accepted.unwrap_or_else(|| {
                    warn!(
                        "Feedback {} has no accepted_recommendation; counting as not accepted",
                        feedback_id
                    );
                    false
                });

                Ok(JoinedFeedback {
                    feedback_id,
                    triage_log_id,
                    clinician_scan,
                    accepted_recommendation,
                    comment,
                    created_at,
                    primary_modality,
                    symptoms_text,
                })
            },
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FeedbackSubmission;
    use crate::store::submit_feedback;
    use crate::store::test_support::*;
    use chrono::NaiveDate;

    fn feedback(id: i64, scan: &str, accepted: bool) -> FeedbackSubmission {
        FeedbackSubmission {
            triage_log_id: id,
            clinician_scan: scan.to_string(),
            accepted,
            comment: None,
        }
    }

    #[test]
    fn test_load_events_normalizes_dates() {
        let (_dir, store) = temp_store();
        store
            .record_event(&event_at("2025-02-01 23:30:00", TriageLevel::UrgentEmergency, "CT"))
            .unwrap();
        store
            .record_event(&event_at("2025-02-02 00:15:00", TriageLevel::NonEmergency, "MRI"))
            .unwrap();

        let loaded = load_events(&store);
        assert!(!loaded.is_degraded());
        assert_eq!(loaded.rows.len(), 2);
        assert_eq!(loaded.rows[0].triage, TriageLevel::UrgentEmergency);
        assert_eq!(
            loaded.rows[0].event_date,
            NaiveDate::from_ymd_opt(2025, 2, 1).unwrap()
        );
        assert_eq!(
            loaded.rows[1].event_date,
            NaiveDate::from_ymd_opt(2025, 2, 2).unwrap()
        );
        assert!(loaded.rows[0].id < loaded.rows[1].id);
    }

    #[test]
    fn test_load_feedback_is_joined_newest_first() {
        let (_dir, store) = temp_store();
        let a = store
            .record_event(&event_at("2025-02-01 09:00:00", TriageLevel::NonEmergency, "CT"))
            .unwrap();
        let b = store
            .record_event(&event_at("2025-02-01 10:00:00", TriageLevel::NonEmergency, "MRI"))
            .unwrap();
        store
            .record_event(&event_at("2025-02-01 11:00:00", TriageLevel::NonEmergency, "XR"))
            .unwrap();

        submit_feedback(&store, &feedback(a, "CT", true)).unwrap();
        submit_feedback(&store, &feedback(b, "CT", false)).unwrap();

        let loaded = load_feedback(&store);
        assert!(!loaded.is_degraded());
        assert_eq!(loaded.rows.len(), 2);
        assert_eq!(loaded.rows[0].triage_log_id, b);
        assert_eq!(loaded.rows[0].primary_modality.as_deref(), Some("MRI"));
        assert!(!loaded.rows[0].accepted_recommendation);
        assert_eq!(loaded.rows[1].triage_log_id, a);
        assert!(loaded.rows[0].feedback_id > loaded.rows[1].feedback_id);
    }

    #[test]
    fn test_missing_store_degrades_both_halves() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Store::open(dir.path().join("missing.db").to_str().unwrap()).unwrap();

        let events = load_events(&store);
        let feedback = load_feedback(&store);
        assert!(events.rows.is_empty());
        assert!(matches!(
            events.error,
            Some(DashboardError::StoreUnavailable(_))
        ));
        assert!(feedback.rows.is_empty());
        assert!(feedback.is_degraded());
    }

    #[test]
    fn test_one_half_failing_leaves_other_intact() {
        let (_dir, store) = temp_store();
        store
            .record_event(&event_at("2025-02-01 09:00:00", TriageLevel::NonEmergency, "CT"))
            .unwrap();

        let conn = store.connect().unwrap();
        conn.execute_batch("DROP TABLE clinician_feedback;").unwrap();
        drop(conn);

        let events = load_events(&store);
        let feedback = load_feedback(&store);
        assert_eq!(events.rows.len(), 1);
        assert!(!events.is_degraded());
        assert!(matches!(feedback.error, Some(DashboardError::Query(_))));
    }

    #[test]
    fn test_unreadable_timestamp_fails_events_half() {
        let (_dir, store) = temp_store();
        let conn = store.connect().unwrap();
        conn.execute(
            "INSERT INTO triage_events (created_at, symptoms_text, triage) VALUES ('soon', 'x', 'NON_EMERGENCY')",
            [],
        )
        .unwrap();
        drop(conn);

        let events = load_events(&store);
        assert!(events.rows.is_empty());
        assert!(matches!(events.error, Some(DashboardError::Query(_))));
    }

    #[test]
    fn test_null_acceptance_counts_as_not_accepted() {
        let (_dir, store) = temp_store();
        let id = store
            .record_event(&event_at("2025-02-01 09:00:00", TriageLevel::NonEmergency, "CT"))
            .unwrap();
        let conn = store.connect().unwrap();
        conn.execute(
            "INSERT INTO clinician_feedback (triage_log_id, clinician_scan) VALUES (?1, 'CT')",
            [id],
        )
        .unwrap();
        drop(conn);

        let feedback = load_feedback(&store);
        assert_eq!(feedback.rows.len(), 1);
        assert!(!feedback.rows[0].accepted_recommendation);
    }
}
