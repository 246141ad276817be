//! Everything one dashboard render needs, computed in a single pass.

use super::aggregator::{
    agreement_rate, confusion_matrix, daily_volume, disagreement_summary, modality_agreement,
    override_rate, recent_events, recent_feedback, summary_counts, top_modalities,
    triage_distribution, AgreementBand, ConfusionMatrix, DailyVolume, DisagreementSummary,
    MatrixCell, ModalityAgreement, SummaryCounts, ValueCount,
};
use crate::config::DashboardConfig;
use crate::models::{JoinedFeedback, TriageEvent};
use crate::store::Loaded;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A load failure surfaced alongside the results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadWarning {
    /// Which half failed: `triage_events` or `clinician_feedback`.
    pub source: String,
    pub kind: String,
    pub message: String,
}

/// Serializable form of the confusion matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfusionTable {
    pub ai_modalities: Vec<String>,
    pub clinician_modalities: Vec<String>,
    /// `counts[i][j]` pairs `ai_modalities[i]` with `clinician_modalities[j]`.
    pub counts: Vec<Vec<usize>>,
    /// Non-empty cells, largest first.
    pub breakdown: Vec<MatrixCell>,
}

impl From<&ConfusionMatrix> for ConfusionTable {
    fn from(matrix: &ConfusionMatrix) -> Self {
        Self {
            ai_modalities: matrix.rows(),
            clinician_modalities: matrix.columns(),
            counts: matrix.dense(),
            breakdown: matrix.cells(),
        }
    }
}

/// Per-modality agreement with its presentation band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatedModality {
    #[serde(flatten)]
    pub stats: ModalityAgreement,
    pub band: AgreementBand,
}

/// Feedback-derived section; absent when there is no feedback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSection {
    pub feedback_count: usize,
    pub agreement_rate: f64,
    pub override_rate: f64,
    pub band: AgreementBand,
    pub confusion: ConfusionTable,
    pub by_modality: Vec<RatedModality>,
    pub disagreements: DisagreementSummary,
    pub recent_feedback: Vec<JoinedFeedback>,
}

/// All aggregates for one render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub generated_at: DateTime<Utc>,
    pub store: String,
    pub warnings: Vec<LoadWarning>,
    pub summary: SummaryCounts,
    pub agreement_target: f64,
    pub performance: Option<PerformanceSection>,
    pub daily_volume: Vec<DailyVolume>,
    pub triage_distribution: Vec<ValueCount>,
    pub top_modalities: Vec<ValueCount>,
    pub recent_events: Vec<TriageEvent>,
}

impl DashboardSnapshot {
    /// Compute every aggregate from one load of both tables.
    pub fn build(
        store: &str,
        events: &Loaded<TriageEvent>,
        feedback: &Loaded<JoinedFeedback>,
        config: &DashboardConfig,
        generated_at: DateTime<Utc>,
    ) -> Self {
        let mut warnings = Vec::new();
        if let Some(ref e) = events.error {
            warnings.push(LoadWarning {
                source: "triage_events".to_string(),
                kind: e.kind().to_string(),
                message: e.to_string(),
            });
        }
        if let Some(ref e) = feedback.error {
            warnings.push(LoadWarning {
                source: "clinician_feedback".to_string(),
                kind: e.kind().to_string(),
                message: e.to_string(),
            });
        }

        let events = &events.rows;
        let feedback = &feedback.rows;

        Self {
            generated_at,
            store: store.to_string(),
            warnings,
            summary: summary_counts(events, feedback),
            agreement_target: config.agreement_target,
            performance: performance_section(feedback, config),
            daily_volume: daily_volume(events),
            triage_distribution: triage_distribution(events),
            top_modalities: top_modalities(events, config.top_modalities),
            recent_events: recent_events(events, config.recent_events),
        }
    }

    /// True when either table failed to load.
    pub fn is_degraded(&self) -> bool {
        !self.warnings.is_empty()
    }
}

fn performance_section(
    feedback: &[JoinedFeedback],
    config: &DashboardConfig,
) -> Option<PerformanceSection> {
    let agreement = agreement_rate(feedback)?;
    let overrides = override_rate(feedback)?;

    let by_modality = modality_agreement(feedback)
        .into_iter()
        .map(|stats| RatedModality {
            band: AgreementBand::classify(stats.rate, config.agreement_target),
            stats,
        })
        .collect();

    Some(PerformanceSection {
        feedback_count: feedback.len(),
        agreement_rate: agreement,
        override_rate: overrides,
        band: AgreementBand::classify(agreement, config.agreement_target),
        confusion: ConfusionTable::from(&confusion_matrix(feedback)),
        by_modality,
        disagreements: disagreement_summary(
            feedback,
            config.top_disagreements,
            config.recent_disagreements,
        ),
        recent_feedback: recent_feedback(feedback, config.recent_feedback),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DashboardError;
    use crate::models::TriageLevel;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap()
    }

    fn events() -> Vec<TriageEvent> {
        vec![
            TriageEvent::new(1, now(), "a", TriageLevel::UrgentEmergency).with_modality("CT"),
            TriageEvent::new(2, now(), "b", TriageLevel::NonEmergency).with_modality("CT"),
            TriageEvent::new(3, now(), "c", TriageLevel::NonEmergency).with_modality("MRI"),
        ]
    }

    fn feedback() -> Vec<JoinedFeedback> {
        let row = |id: i64, event: i64, scan: &str, accepted: bool| JoinedFeedback {
            feedback_id: id,
            triage_log_id: event,
            clinician_scan: Some(scan.to_string()),
            accepted_recommendation: accepted,
            comment: None,
            created_at: now(),
            primary_modality: Some("CT".to_string()),
            symptoms_text: "a".to_string(),
        };
        vec![row(2, 2, "MRI", false), row(1, 1, "CT", true)]
    }

    #[test]
    fn test_build_full_snapshot() {
        let config = DashboardConfig::default();
        let snapshot = DashboardSnapshot::build(
            "triage.db",
            &Loaded::ok(events()),
            &Loaded::ok(feedback()),
            &config,
            now(),
        );

        assert!(!snapshot.is_degraded());
        assert_eq!(snapshot.summary.total, 3);

        let performance = snapshot.performance.as_ref().unwrap();
        assert_eq!(performance.agreement_rate, 0.5);
        assert_eq!(performance.band, AgreementBand::Low);
        assert_eq!(performance.confusion.ai_modalities, vec!["CT"]);
        assert_eq!(performance.confusion.counts, vec![vec![1, 1]]);
        assert_eq!(performance.by_modality[0].stats.rate, 0.5);
        assert_eq!(performance.disagreements.count, 1);
        assert_eq!(snapshot.top_modalities[0], ValueCount::new("CT", 2));
    }

    #[test]
    fn test_no_feedback_omits_performance() {
        let snapshot = DashboardSnapshot::build(
            "triage.db",
            &Loaded::ok(events()),
            &Loaded::ok(Vec::new()),
            &DashboardConfig::default(),
            now(),
        );
        assert!(snapshot.performance.is_none());
        assert_eq!(snapshot.summary.feedback_coverage, 0.0);
    }

    #[test]
    fn test_degraded_snapshot_keeps_other_half() {
        let snapshot = DashboardSnapshot::build(
            "triage.db",
            &Loaded::failed(DashboardError::StoreUnavailable("locked".to_string())),
            &Loaded::ok(feedback()),
            &DashboardConfig::default(),
            now(),
        );

        assert!(snapshot.is_degraded());
        assert_eq!(snapshot.warnings.len(), 1);
        assert_eq!(snapshot.warnings[0].source, "triage_events");
        assert_eq!(snapshot.warnings[0].kind, "store_unavailable");
        assert_eq!(snapshot.summary.total, 0);
        assert_eq!(snapshot.summary.feedback_coverage, 0.0);
        assert!(snapshot.performance.is_some());
    }

    #[test]
    fn test_snapshot_serializes_to_json() {
        let snapshot = DashboardSnapshot::build(
            "triage.db",
            &Loaded::ok(events()),
            &Loaded::ok(feedback()),
            &DashboardConfig::default(),
            now(),
        );
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["summary"]["total"], 3);
        assert_eq!(json["performance"]["by_modality"][0]["modality"], "CT");
        assert_eq!(json["performance"]["by_modality"][0]["band"], "low");
    }
}
