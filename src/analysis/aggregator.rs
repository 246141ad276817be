//! Triage and feedback aggregation.
//!
//! Pure functions over the loaded collections: counts, rates, group-bys
//! and the AI-vs-clinician pivot. Nothing here performs I/O or fails.

use crate::models::{JoinedFeedback, TriageEvent, TriageLevel};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Headline case counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryCounts {
    pub total: usize,
    pub emergencies: usize,
    pub non_emergencies: usize,
    /// Distinct triage events with at least one feedback row.
    pub cases_with_feedback: usize,
    /// `cases_with_feedback / total`, 0 when there are no events.
    pub feedback_coverage: f64,
    pub emergency_share: f64,
    pub non_emergency_share: f64,
}

/// Agreement statistics for one AI-recommended modality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModalityAgreement {
    pub modality: String,
    pub agreements: usize,
    pub total: usize,
    pub rate: f64,
}

/// One calendar day of triage volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyVolume {
    pub date: NaiveDate,
    pub count: usize,
}

/// A value and how often it occurred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueCount {
    pub value: String,
    pub count: usize,
}

impl ValueCount {
    pub fn new(value: impl Into<String>, count: usize) -> Self {
        Self {
            value: value.into(),
            count,
        }
    }
}

/// Cross-tabulation of AI modality against clinician modality.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfusionMatrix {
    cells: BTreeMap<(String, String), usize>,
}

/// One non-empty cell of a [`ConfusionMatrix`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MatrixCell {
    pub ai_modality: String,
    pub clinician_modality: String,
    pub count: usize,
}

impl ConfusionMatrix {
    /// Count for a pair; 0 for pairs never seen.
    pub fn get(&self, ai_modality: &str, clinician_modality: &str) -> usize {
        self.cells
            .get(&(ai_modality.to_string(), clinician_modality.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Distinct AI modalities (pivot rows).
    pub fn rows(&self) -> Vec<String> {
        self.cells
            .keys()
            .map(|(ai, _)| ai.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Distinct clinician modalities (pivot columns).
    pub fn columns(&self) -> Vec<String> {
        self.cells
            .keys()
            .map(|(_, clinician)| clinician.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Dense pivot aligned with [`rows`](Self::rows) and [`columns`](Self::columns).
    pub fn dense(&self) -> Vec<Vec<usize>> {
        let columns = self.columns();
        self.rows()
            .iter()
            .map(|row| columns.iter().map(|col| self.get(row, col)).collect())
            .collect()
    }

    /// Non-empty cells, largest count first.
    pub fn cells(&self) -> Vec<MatrixCell> {
        let mut cells: Vec<MatrixCell> = self
            .cells
            .iter()
            .map(|((ai, clinician), count)| MatrixCell {
                ai_modality: ai.clone(),
                clinician_modality: clinician.clone(),
                count: *count,
            })
            .collect();
        cells.sort_by_key(|c| std::cmp::Reverse(c.count));
        cells
    }

    /// Sum of all cells.
    #[cfg(test)]
    pub fn total(&self) -> usize {
        self.cells.values().sum()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Disagreement breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisagreementSummary {
    /// Size of the full disagreement set.
    pub count: usize,
    pub most_overridden: Vec<ValueCount>,
    pub clinician_preferred: Vec<ValueCount>,
    pub recent: Vec<JoinedFeedback>,
}

/// Agreement quality band used when presenting a rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgreementBand {
    Low,
    Fair,
    OnTarget,
}

/// Rates below this are `Low`, unless the target itself is lower.
pub const LOW_AGREEMENT_THRESHOLD: f64 = 0.6;

impl AgreementBand {
    /// Classify a rate against the target.
    pub fn classify(rate: f64, target: f64) -> Self {
        if rate < LOW_AGREEMENT_THRESHOLD.min(target) {
            AgreementBand::Low
        } else if rate < target {
            AgreementBand::Fair
        } else {
            AgreementBand::OnTarget
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            AgreementBand::Low => "🔴",
            AgreementBand::Fair => "🟡",
            AgreementBand::OnTarget => "🟢",
        }
    }
}

/// `numerator / denominator`, or 0 when the denominator is 0.
fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Count values keeping first-seen order, then sort by count descending.
///
/// The sort is stable, so ties keep first-seen order.
fn value_counts<'a, I>(values: I) -> Vec<ValueCount>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut counts: Vec<ValueCount> = Vec::new();

    for value in values {
        match index.get(value) {
            Some(&i) => counts[i].count += 1,
            None => {
                index.insert(value, counts.len());
                counts.push(ValueCount::new(value, 1));
            }
        }
    }

    counts.sort_by_key(|vc| std::cmp::Reverse(vc.count));
    counts
}

/// Compute headline counts and coverage.
pub fn summary_counts(events: &[TriageEvent], feedback: &[JoinedFeedback]) -> SummaryCounts {
    let total = events.len();
    let emergencies = events.iter().filter(|e| e.triage.is_emergency()).count();
    let non_emergencies = events
        .iter()
        .filter(|e| e.triage == TriageLevel::NonEmergency)
        .count();
    let cases_with_feedback = feedback
        .iter()
        .map(|f| f.triage_log_id)
        .collect::<HashSet<_>>()
        .len();

    SummaryCounts {
        total,
        emergencies,
        non_emergencies,
        cases_with_feedback,
        feedback_coverage: ratio(cases_with_feedback, total).min(1.0),
        emergency_share: ratio(emergencies, total),
        non_emergency_share: ratio(non_emergencies, total),
    }
}

/// Fraction of feedback rows that accepted the recommendation.
///
/// `None` when there is no feedback.
pub fn agreement_rate(feedback: &[JoinedFeedback]) -> Option<f64> {
    if feedback.is_empty() {
        return None;
    }
    let accepted = feedback.iter().filter(|f| f.accepted_recommendation).count();
    Some(ratio(accepted, feedback.len()))
}

/// Fraction of feedback rows that overrode the recommendation.
pub fn override_rate(feedback: &[JoinedFeedback]) -> Option<f64> {
    agreement_rate(feedback).map(|rate| 1.0 - rate)
}

/// Build the AI-vs-clinician confusion matrix.
pub fn confusion_matrix(feedback: &[JoinedFeedback]) -> ConfusionMatrix {
    let mut cells: BTreeMap<(String, String), usize> = BTreeMap::new();

    for row in feedback {
        *cells
            .entry((
                row.ai_modality().to_string(),
                row.clinician_modality().to_string(),
            ))
            .or_default() += 1;
    }

    ConfusionMatrix { cells }
}

/// Agreement per AI modality, worst rate first.
///
/// Ties are broken by modality name so the order is deterministic.
pub fn modality_agreement(feedback: &[JoinedFeedback]) -> Vec<ModalityAgreement> {
    let mut grouped: HashMap<&str, (usize, usize)> = HashMap::new();

    for row in feedback {
        let entry = grouped.entry(row.ai_modality()).or_default();
        if row.accepted_recommendation {
            entry.0 += 1;
        }
        entry.1 += 1;
    }

    let mut result: Vec<ModalityAgreement> = grouped
        .into_iter()
        .map(|(modality, (agreements, total))| ModalityAgreement {
            modality: modality.to_string(),
            agreements,
            total,
            rate: ratio(agreements, total),
        })
        .collect();

    result.sort_by(|a, b| {
        a.rate
            .total_cmp(&b.rate)
            .then_with(|| a.modality.cmp(&b.modality))
    });

    result
}

/// Feedback rows where the clinician overrode the AI, in input order.
pub fn disagreements(feedback: &[JoinedFeedback]) -> Vec<&JoinedFeedback> {
    feedback
        .iter()
        .filter(|f| !f.accepted_recommendation)
        .collect()
}

/// Summarize the disagreement set.
///
/// `top` bounds both frequency lists, `recent` bounds the sample of rows.
pub fn disagreement_summary(
    feedback: &[JoinedFeedback],
    top: usize,
    recent: usize,
) -> DisagreementSummary {
    let rows = disagreements(feedback);

    let mut most_overridden = value_counts(rows.iter().map(|f| f.ai_modality()));
    most_overridden.truncate(top);

    let mut clinician_preferred = value_counts(rows.iter().map(|f| f.clinician_modality()));
    clinician_preferred.truncate(top);

    DisagreementSummary {
        count: rows.len(),
        most_overridden,
        clinician_preferred,
        recent: rows.iter().take(recent).map(|f| (*f).clone()).collect(),
    }
}

/// Events per calendar day, ascending, without gap filling.
pub fn daily_volume(events: &[TriageEvent]) -> Vec<DailyVolume> {
    let mut by_date: BTreeMap<NaiveDate, usize> = BTreeMap::new();

    for event in events {
        *by_date.entry(event.event_date).or_default() += 1;
    }

    by_date
        .into_iter()
        .map(|(date, count)| DailyVolume { date, count })
        .collect()
}

/// The `n` most recommended modalities.
pub fn top_modalities(events: &[TriageEvent], n: usize) -> Vec<ValueCount> {
    let mut counts = value_counts(events.iter().map(|e| e.modality_label()));
    counts.truncate(n);
    counts
}

/// Count of events per triage label.
pub fn triage_distribution(events: &[TriageEvent]) -> Vec<ValueCount> {
    value_counts(events.iter().map(|e| e.triage.as_str()))
}

/// The `n` most recent events, newest first.
pub fn recent_events(events: &[TriageEvent], n: usize) -> Vec<TriageEvent> {
    let mut sorted: Vec<&TriageEvent> = events.iter().collect();
    sorted.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
    sorted.into_iter().take(n).cloned().collect()
}

/// The first `n` feedback rows (the loader orders them newest first).
pub fn recent_feedback(feedback: &[JoinedFeedback], n: usize) -> Vec<JoinedFeedback> {
    feedback.iter().take(n).cloned().collect()
}
