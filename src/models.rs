//! Data models for triage events and clinician feedback.
//!
//! This module contains the row types produced by the loader and the
//! input types accepted by the store.

use crate::error::{DashboardError, DashboardResult};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Label used when a modality column is NULL.
pub const UNSPECIFIED_MODALITY: &str = "(unspecified)";

/// Number of symptom characters shown in a case label.
const CASE_LABEL_SYMPTOM_CHARS: usize = 60;

/// Triage classification produced by the model.
///
/// The set is open: unknown labels are kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TriageLevel {
    UrgentEmergency,
    NonEmergency,
    Other(String),
}

impl TriageLevel {
    pub const URGENT_EMERGENCY: &'static str = "URGENT_EMERGENCY";
    pub const NON_EMERGENCY: &'static str = "NON_EMERGENCY";

    /// Returns the label as stored in the database.
    pub fn as_str(&self) -> &str {
        match self {
            TriageLevel::UrgentEmergency => Self::URGENT_EMERGENCY,
            TriageLevel::NonEmergency => Self::NON_EMERGENCY,
            TriageLevel::Other(s) => s,
        }
    }

    pub fn is_emergency(&self) -> bool {
        matches!(self, TriageLevel::UrgentEmergency)
    }
}

impl fmt::Display for TriageLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for TriageLevel {
    fn from(s: &str) -> Self {
        match s {
            Self::URGENT_EMERGENCY => TriageLevel::UrgentEmergency,
            Self::NON_EMERGENCY => TriageLevel::NonEmergency,
            other => TriageLevel::Other(other.to_string()),
        }
    }
}

impl From<String> for TriageLevel {
    fn from(s: String) -> Self {
        TriageLevel::from(s.as_str())
    }
}

impl From<TriageLevel> for String {
    fn from(level: TriageLevel) -> Self {
        level.as_str().to_string()
    }
}

/// One AI triage recommendation as loaded from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageEvent {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    /// Calendar date of `created_at`.
    pub event_date: NaiveDate,
    pub symptoms_text: String,
    pub age: Option<i64>,
    pub sex: Option<String>,
    pub pregnancy: Option<bool>,
    pub implants: Option<String>,
    pub location: Option<String>,
    pub triage: TriageLevel,
    pub recommendation: Option<String>,
    pub primary_modality: Option<String>,
    pub primary_priority: Option<String>,
    pub model_name: Option<String>,
    pub notes: Option<String>,
}

impl TriageEvent {
    /// Creates an event with only the required fields set.
    #[cfg(test)]
    pub fn new(
        id: i64,
        created_at: DateTime<Utc>,
        symptoms_text: impl Into<String>,
        triage: TriageLevel,
    ) -> Self {
        Self {
            id,
            created_at,
            event_date: created_at.date_naive(),
            symptoms_text: symptoms_text.into(),
            age: None,
            sex: None,
            pregnancy: None,
            implants: None,
            location: None,
            triage,
            recommendation: None,
            primary_modality: None,
            primary_priority: None,
            model_name: None,
            notes: None,
        }
    }

    /// Sets the recommended modality.
    #[cfg(test)]
    pub fn with_modality(mut self, modality: impl Into<String>) -> Self {
        self.primary_modality = Some(modality.into());
        self
    }

    /// Modality used for grouping; NULL maps to [`UNSPECIFIED_MODALITY`].
    pub fn modality_label(&self) -> &str {
        self.primary_modality
            .as_deref()
            .unwrap_or(UNSPECIFIED_MODALITY)
    }

    /// Label shown when picking a case to review.
    pub fn case_label(&self) -> String {
        let symptoms: String = self
            .symptoms_text
            .chars()
            .take(CASE_LABEL_SYMPTOM_CHARS)
            .collect();
        format!(
            "{} | {} | {}",
            self.id,
            self.created_at.format("%Y-%m-%d %H:%M:%S"),
            symptoms
        )
    }
}

/// A triage event to be written by the upstream triage process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTriageEvent {
    /// Defaults to the insert time when absent.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    pub symptoms_text: String,
    #[serde(default)]
    pub age: Option<i64>,
    #[serde(default)]
    pub sex: Option<String>,
    #[serde(default)]
    pub pregnancy: Option<bool>,
    #[serde(default)]
    pub implants: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    pub triage: TriageLevel,
    #[serde(default)]
    pub recommendation: Option<String>,
    #[serde(default)]
    pub primary_modality: Option<String>,
    #[serde(default)]
    pub primary_priority: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl NewTriageEvent {
    #[cfg(test)]
    pub fn new(symptoms_text: impl Into<String>, triage: TriageLevel) -> Self {
        Self {
            created_at: None,
            symptoms_text: symptoms_text.into(),
            age: None,
            sex: None,
            pregnancy: None,
            implants: None,
            location: None,
            triage,
            recommendation: None,
            primary_modality: None,
            primary_priority: None,
            model_name: None,
            notes: None,
        }
    }
}

/// A stored clinician feedback row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClinicianFeedback {
    pub id: i64,
    pub triage_log_id: i64,
    pub clinician_scan: String,
    pub accepted_recommendation: bool,
    pub comment: Option<String>,
}

/// Clinician feedback joined with the triage event it reviews.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinedFeedback {
    pub feedback_id: i64,
    pub triage_log_id: i64,
    pub clinician_scan: Option<String>,
    pub accepted_recommendation: bool,
    pub comment: Option<String>,
    /// From the parent event.
    pub created_at: DateTime<Utc>,
    /// From the parent event.
    pub primary_modality: Option<String>,
    /// From the parent event.
    pub symptoms_text: String,
}

impl JoinedFeedback {
    /// The AI-recommended modality, NULL mapped to [`UNSPECIFIED_MODALITY`].
    pub fn ai_modality(&self) -> &str {
        self.primary_modality
            .as_deref()
            .unwrap_or(UNSPECIFIED_MODALITY)
    }

    /// The clinician-chosen modality, NULL mapped to [`UNSPECIFIED_MODALITY`].
    pub fn clinician_modality(&self) -> &str {
        self.clinician_scan
            .as_deref()
            .unwrap_or(UNSPECIFIED_MODALITY)
    }
}

/// Input for recording clinician feedback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackSubmission {
    pub triage_log_id: i64,
    pub clinician_scan: String,
    pub accepted: bool,
    pub comment: Option<String>,
}

impl FeedbackSubmission {
    /// Checks the input and returns a normalized copy.
    ///
    /// The scan is trimmed and must be non-empty; a blank comment becomes `None`.
    pub fn validate(&self) -> DashboardResult<Self> {
        if self.triage_log_id <= 0 {
            return Err(DashboardError::Validation(format!(
                "triage_log_id must be positive, got {}",
                self.triage_log_id
            )));
        }

        let clinician_scan = self.clinician_scan.trim();
        if clinician_scan.is_empty() {
            return Err(DashboardError::Validation(
                "clinician_scan is required".to_string(),
            ));
        }

        let comment = self
            .comment
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(String::from);

        Ok(Self {
            triage_log_id: self.triage_log_id,
            clinician_scan: clinician_scan.to_string(),
            accepted: self.accepted,
            comment,
        })
    }
}
