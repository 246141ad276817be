//! SQLite-backed store for triage events and clinician feedback.
//!
//! A [`Store`] is only a handle: every operation opens its own connection
//! and drops it before returning, so no session is shared between renders.

pub mod loader;
pub mod submit;

pub use loader::{load_events, load_feedback, Loaded};
pub use submit::submit_feedback;

use crate::error::{DashboardError, DashboardResult};
use crate::models::NewTriageEvent;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

const SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS triage_events (
        id INTEGER PRIMARY KEY,
        created_at TEXT NOT NULL,
        symptoms_text TEXT NOT NULL,
        age INTEGER,
        sex TEXT,
        pregnancy INTEGER,
        implants TEXT,
        location TEXT,
        triage TEXT NOT NULL,
        recommendation TEXT,
        primary_modality TEXT,
        primary_priority TEXT,
        model_name TEXT,
        notes TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_triage_events_created_at
        ON triage_events(created_at);
    CREATE TABLE IF NOT EXISTS clinician_feedback (
        id INTEGER PRIMARY KEY,
        triage_log_id INTEGER NOT NULL UNIQUE REFERENCES triage_events(id),
        clinician_scan TEXT,
        accepted_recommendation INTEGER,
        comment TEXT
    );
";

/// Format used when writing timestamps.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Naive layouts accepted when reading timestamps, interpreted as UTC.
const NAIVE_TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to a SQLite database file.
#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
    busy_timeout: Duration,
}

impl Store {
    /// Create a store handle from a connection string.
    ///
    /// Accepts `sqlite:///relative/or/absolute`, `sqlite://path` or a bare
    /// path. Nothing is opened until an operation runs.
    pub fn open(connection_string: &str) -> DashboardResult<Self> {
        let trimmed = connection_string.trim();
        let path = trimmed
            .strip_prefix("sqlite:///")
            .or_else(|| trimmed.strip_prefix("sqlite://"))
            .unwrap_or(trimmed);

        if path.is_empty() {
            return Err(DashboardError::Validation(
                "store connection string is empty".to_string(),
            ));
        }
        if path == ":memory:" {
            return Err(DashboardError::Validation(
                "in-memory databases cannot be shared between operations".to_string(),
            ));
        }

        Ok(Self {
            path: PathBuf::from(path),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        })
    }

    /// Override how long a connection waits on a locked database.
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a connection to an existing database.
    ///
    /// A missing file is reported as [`DashboardError::StoreUnavailable`]
    /// rather than created.
    pub(crate) fn connect(&self) -> DashboardResult<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&self.path, flags).map_err(|e| {
            DashboardError::StoreUnavailable(format!("{}: {}", self.path.display(), e))
        })?;
        self.configure(&conn)?;
        Ok(conn)
    }

    fn connect_or_create(&self) -> DashboardResult<Connection> {
        let conn = Connection::open(&self.path).map_err(|e| {
            DashboardError::StoreUnavailable(format!("{}: {}", self.path.display(), e))
        })?;
        self.configure(&conn)?;
        Ok(conn)
    }

    fn configure(&self, conn: &Connection) -> DashboardResult<()> {
        conn.busy_timeout(self.busy_timeout)
            .map_err(|e| DashboardError::StoreUnavailable(e.to_string()))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| DashboardError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    /// Create both tables if they do not exist yet. Safe to call repeatedly.
    pub fn init_schema(&self) -> DashboardResult<()> {
        info!("Initializing schema at {}", self.path.display());
        let conn = self.connect_or_create()?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| DashboardError::Query(format!("failed to create schema: {}", e)))?;
        Ok(())
    }

    /// Insert one triage event and return its id.
    pub fn record_event(&self, event: &NewTriageEvent) -> DashboardResult<i64> {
        if event.symptoms_text.trim().is_empty() {
            return Err(DashboardError::Validation(
                "symptoms_text is required".to_string(),
            ));
        }

        let created_at = event.created_at.unwrap_or_else(Utc::now);
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO triage_events (
                created_at, symptoms_text, age, sex, pregnancy, implants, location,
                triage, recommendation, primary_modality, primary_priority, model_name, notes
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                format_timestamp(&created_at),
                event.symptoms_text,
                event.age,
                event.sex,
                event.pregnancy,
                event.implants,
                event.location,
                event.triage.as_str(),
                event.recommendation,
                event.primary_modality,
                event.primary_priority,
                event.model_name,
                event.notes,
            ],
        )
        .map_err(|e| DashboardError::Query(format!("failed to insert triage event: {}", e)))?;

        let id = conn.last_insert_rowid();
        debug!("Recorded triage event {}", id);
        Ok(id)
    }
}

/// Render a timestamp the way the store writes it.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a stored timestamp.
///
/// RFC 3339 values keep their offset; naive values and bare dates are
/// taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    for format in NAIVE_TIMESTAMP_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
