//! Markdown and JSON dashboard rendering.
//!
//! This module turns a [`DashboardSnapshot`] into the text written to the
//! terminal or a file. All number formatting happens here.

use crate::analysis::aggregator::{AgreementBand, ValueCount};
use crate::analysis::{DashboardSnapshot, LoadWarning, PerformanceSection};
use crate::models::{JoinedFeedback, TriageEvent};
use anyhow::Result;

/// Generate the complete Markdown dashboard.
pub fn generate_markdown_report(snapshot: &DashboardSnapshot) -> String {
    let mut output = String::new();

    // Title
    output.push_str("# Triage Insights Dashboard\n\n");

    output.push_str(&generate_metadata_section(snapshot));
    output.push_str(&generate_warnings_section(&snapshot.warnings));

    let has_events = snapshot.summary.total > 0;
    if has_events {
        output.push_str(&generate_key_metrics_section(snapshot));
    } else {
        output.push_str("> ⚠️ No triage logs found yet.\n\n");
    }

    // Feedback sections stand on their own when the events half is missing
    if has_events || snapshot.performance.is_some() {
        output.push_str(&generate_performance_section(
            snapshot.performance.as_ref(),
            snapshot.summary.total,
            snapshot.agreement_target,
        ));
        output.push_str(&generate_agreement_section(snapshot.performance.as_ref()));
    }

    if has_events {
        output.push_str(&generate_volume_section(snapshot));
        output.push_str(&generate_distribution_section(&snapshot.top_modalities));
        output.push_str(&generate_recent_events_section(&snapshot.recent_events));
    }

    // Footer
    output.push_str(&generate_footer());

    output
}

/// Format a fraction as a percentage.
fn pct(fraction: f64) -> String {
    format!("{:.1}%", fraction * 100.0)
}

/// Make free text safe for a Markdown table cell.
fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace(['\r', '\n'], " ")
}

fn optional_cell(text: Option<&str>) -> String {
    text.map(cell).unwrap_or_else(|| "-".to_string())
}

fn generate_metadata_section(snapshot: &DashboardSnapshot) -> String {
    let mut section = String::new();

    section.push_str(&format!(
        "- **Generated:** {}\n",
        snapshot.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Store:** `{}`\n", snapshot.store));
    let status = if snapshot.is_degraded() {
        "🟠 Degraded"
    } else {
        "🟢 Online"
    };
    section.push_str(&format!("- **Status:** {}\n\n", status));

    section
}

fn generate_warnings_section(warnings: &[LoadWarning]) -> String {
    if warnings.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("## Load Warnings\n\n");
    for warning in warnings {
        section.push_str(&format!(
            "- ❌ Error loading `{}`: {}\n",
            warning.source, warning.message
        ));
    }
    section.push('\n');

    section
}

fn generate_key_metrics_section(snapshot: &DashboardSnapshot) -> String {
    let summary = &snapshot.summary;
    let mut section = String::new();

    section.push_str("## Key Metrics\n\n");
    section.push_str("| Total Cases | Emergencies | Non-Emergency | Feedback |\n");
    section.push_str("|:---:|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} ({}) | {} ({}) | {} ({}) |\n\n",
        summary.total,
        summary.emergencies,
        pct(summary.emergency_share),
        summary.non_emergencies,
        pct(summary.non_emergency_share),
        summary.cases_with_feedback,
        pct(summary.feedback_coverage),
    ));

    section
}

fn generate_performance_section(
    performance: Option<&PerformanceSection>,
    total_cases: usize,
    target: f64,
) -> String {
    let mut section = String::new();
    section.push_str("## AI Performance\n\n");

    let Some(performance) = performance else {
        section.push_str("Waiting for clinician feedback...\n\n");
        return section;
    };

    section.push_str("| Agreement Rate | Override Rate | Disagreements | Feedback Rows |\n");
    section.push_str("|:---:|:---:|:---:|:---:|\n");
    let coverage = if total_cases > 0 {
        format!("{} of {} cases", performance.feedback_count, total_cases)
    } else {
        performance.feedback_count.to_string()
    };
    section.push_str(&format!(
        "| {} {} | {} | {} | {} |\n\n",
        performance.band.emoji(),
        pct(performance.agreement_rate),
        pct(performance.override_rate),
        performance.disagreements.count,
        coverage,
    ));
    section.push_str(&format!("*Target agreement: {}*\n\n", pct(target)));

    section
}

fn generate_agreement_section(performance: Option<&PerformanceSection>) -> String {
    let Some(performance) = performance else {
        return String::new();
    };

    let mut section = String::new();
    section.push_str("## Agreement Analysis\n\n");

    // AI vs clinician matrix
    let confusion = &performance.confusion;
    section.push_str("### AI vs Clinician Decisions\n\n");
    section.push_str("| AI \\ Clinician |");
    for column in &confusion.clinician_modalities {
        section.push_str(&format!(" {} |", cell(column)));
    }
    section.push('\n');
    section.push_str("|:---|");
    section.push_str(&":---:|".repeat(confusion.clinician_modalities.len()));
    section.push('\n');
    for (row, counts) in confusion.ai_modalities.iter().zip(&confusion.counts) {
        section.push_str(&format!("| **{}** |", cell(row)));
        for count in counts {
            if *count > 0 {
                section.push_str(&format!(" {} |", count));
            } else {
                section.push_str(" · |");
            }
        }
        section.push('\n');
    }
    section.push('\n');

    section.push_str("#### Detailed Breakdown\n\n");
    section.push_str("| AI Scan | Clinician Scan | Count |\n");
    section.push_str("|:---|:---|:---:|\n");
    for matrix_cell in &confusion.breakdown {
        section.push_str(&format!(
            "| {} | {} | {} |\n",
            cell(&matrix_cell.ai_modality),
            cell(&matrix_cell.clinician_modality),
            matrix_cell.count
        ));
    }
    section.push('\n');

    // Agreement by scan type
    section.push_str("### Agreement by Scan Type\n\n");
    section.push_str("| Scan Type | Agreements | Total | Rate |\n");
    section.push_str("|:---|:---:|:---:|:---:|\n");
    for rated in &performance.by_modality {
        section.push_str(&format!(
            "| {} | {} | {} | {} {:.0}% |\n",
            cell(&rated.stats.modality),
            rated.stats.agreements,
            rated.stats.total,
            rated.band.emoji(),
            rated.stats.rate * 100.0
        ));
    }
    section.push('\n');

    section.push_str(&generate_disagreements_section(performance));
    section.push_str(&generate_recent_feedback_section(&performance.recent_feedback));

    section
}

fn generate_disagreements_section(performance: &PerformanceSection) -> String {
    let disagreements = &performance.disagreements;
    let mut section = String::new();

    section.push_str("### Where AI Gets It Wrong\n\n");
    if disagreements.count == 0 {
        section.push_str("🎉 Perfect agreement!\n\n");
        return section;
    }

    section.push_str(&generate_value_table(
        "Most Overridden AI Scans",
        "AI Scan",
        &disagreements.most_overridden,
    ));
    section.push_str(&generate_value_table(
        "Clinician Preferred",
        "Clinician Scan",
        &disagreements.clinician_preferred,
    ));

    section.push_str("#### Recent Disagreements\n\n");
    section.push_str("| Date | AI Said | Clinician Chose | Comment |\n");
    section.push_str("|:---|:---|:---|:---|\n");
    for row in &disagreements.recent {
        section.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            row.created_at.format("%Y-%m-%d %H:%M"),
            cell(row.ai_modality()),
            cell(row.clinician_modality()),
            optional_cell(row.comment.as_deref()),
        ));
    }
    section.push('\n');

    section
}

fn generate_value_table(title: &str, label: &str, values: &[ValueCount]) -> String {
    let mut table = String::new();

    table.push_str(&format!("#### {}\n\n", title));
    table.push_str(&format!("| {} | Count |\n", label));
    table.push_str("|:---|:---:|\n");
    for vc in values {
        table.push_str(&format!("| {} | {} |\n", cell(&vc.value), vc.count));
    }
    table.push('\n');

    table
}

fn generate_recent_feedback_section(feedback: &[JoinedFeedback]) -> String {
    let mut section = String::new();

    section.push_str("### Recent Feedback\n\n");
    section.push_str("| Date | AI Scan | Clinician Scan | Accepted | Comment |\n");
    section.push_str("|:---|:---|:---|:---:|:---|\n");
    for row in feedback {
        section.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            row.created_at.format("%Y-%m-%d %H:%M"),
            cell(row.ai_modality()),
            cell(row.clinician_modality()),
            if row.accepted_recommendation { "✅" } else { "❌" },
            optional_cell(row.comment.as_deref()),
        ));
    }
    section.push('\n');

    section
}

fn generate_volume_section(snapshot: &DashboardSnapshot) -> String {
    let mut section = String::new();

    section.push_str("## Volume & Trends\n\n");
    section.push_str("### Daily Volume\n\n");
    section.push_str("| Date | Cases |\n");
    section.push_str("|:---|:---:|\n");
    for day in &snapshot.daily_volume {
        section.push_str(&format!("| {} | {} |\n", day.date, day.count));
    }
    section.push('\n');

    section.push_str("### Classification\n\n");
    section.push_str("| Triage | Cases | Share |\n");
    section.push_str("|:---|:---:|:---:|\n");
    for vc in &snapshot.triage_distribution {
        let share = vc.count as f64 / snapshot.summary.total as f64;
        section.push_str(&format!(
            "| {} | {} | {} |\n",
            cell(&vc.value),
            vc.count,
            pct(share)
        ));
    }
    section.push('\n');

    section
}

fn generate_distribution_section(top_modalities: &[ValueCount]) -> String {
    let mut section = String::new();

    section.push_str("## Scan Distribution\n\n");
    section.push_str(&generate_value_table(
        "Top Recommended Scans",
        "Scan",
        top_modalities,
    ));

    section
}

fn generate_recent_events_section(events: &[TriageEvent]) -> String {
    let mut section = String::new();

    section.push_str("## Recent Triage Logs\n\n");
    section.push_str("| Time | Symptoms | Age | Sex | Triage | Scan |\n");
    section.push_str("|:---|:---|:---:|:---:|:---|:---|\n");
    for event in events {
        let triage = if event.triage.is_emergency() {
            format!("🔴 {}", event.triage)
        } else {
            format!("🟢 {}", event.triage)
        };
        section.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} |\n",
            event.created_at.format("%Y-%m-%d %H:%M"),
            cell(&event.symptoms_text),
            event
                .age
                .map(|a| a.to_string())
                .unwrap_or_else(|| "-".to_string()),
            optional_cell(event.sex.as_deref()),
            cell(&triage),
            cell(event.modality_label()),
        ));
    }
    section.push('\n');

    section
}

fn generate_footer() -> String {
    "---\n\n*Generated by Triage Insights*\n".to_string()
}

/// Generate a JSON dashboard.
pub fn generate_json_report(snapshot: &DashboardSnapshot) -> Result<String> {
    serde_json::to_string_pretty(snapshot).map_err(Into::into)
}

/// Describe a rate band in words, for terminal summaries.
pub fn describe_band(band: AgreementBand) -> &'static str {
    match band {
        AgreementBand::Low => "below 60%",
        AgreementBand::Fair => "below target",
        AgreementBand::OnTarget => "on target",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DashboardConfig;
    use crate::error::DashboardError;
    use crate::models::TriageLevel;
    use crate::store::Loaded;
    use chrono::{DateTime, TimeZone, Utc};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap()
    }

    fn create_test_snapshot(with_feedback: bool) -> DashboardSnapshot {
        let events = vec![
            TriageEvent::new(1, now(), "chest pain | radiating", TriageLevel::UrgentEmergency)
                .with_modality("CT"),
            TriageEvent::new(2, now(), "knee swelling", TriageLevel::NonEmergency)
                .with_modality("MRI"),
        ];
        let feedback = if with_feedback {
            vec![JoinedFeedback {
                feedback_id: 1,
                triage_log_id: 1,
                clinician_scan: Some("CTA".to_string()),
                accepted_recommendation: false,
                comment: Some("rule out dissection".to_string()),
                created_at: now(),
                primary_modality: Some("CT".to_string()),
                symptoms_text: "chest pain".to_string(),
            }]
        } else {
            Vec::new()
        };

        DashboardSnapshot::build(
            "sqlite:///./test.db",
            &Loaded::ok(events),
            &Loaded::ok(feedback),
            &DashboardConfig::default(),
            now(),
        )
    }

    #[test]
    fn test_generate_markdown_report() {
        let markdown = generate_markdown_report(&create_test_snapshot(true));

        assert!(markdown.contains("# Triage Insights Dashboard"));
        assert!(markdown.contains("## Key Metrics"));
        assert!(markdown.contains("| 2 | 1 (50.0%) | 1 (50.0%) | 1 (50.0%) |"));
        assert!(markdown.contains("## Agreement Analysis"));
        assert!(markdown.contains("| **CT** | 1 |"));
        assert!(markdown.contains("Most Overridden AI Scans"));
        assert!(markdown.contains("rule out dissection"));
        assert!(markdown.contains("## Recent Triage Logs"));
        assert!(markdown.contains("chest pain \\| radiating"));
    }

    #[test]
    fn test_markdown_without_feedback() {
        let markdown = generate_markdown_report(&create_test_snapshot(false));
        assert!(markdown.contains("Waiting for clinician feedback..."));
        assert!(!markdown.contains("## Agreement Analysis"));
        assert!(markdown.contains("## Scan Distribution"));
    }

    #[test]
    fn test_markdown_empty_store() {
        let snapshot = DashboardSnapshot::build(
            "sqlite:///./missing.db",
            &Loaded::failed(DashboardError::StoreUnavailable("no such file".to_string())),
            &Loaded::ok(Vec::new()),
            &DashboardConfig::default(),
            now(),
        );
        let markdown = generate_markdown_report(&snapshot);

        assert!(markdown.contains("## Load Warnings"));
        assert!(markdown.contains("no such file"));
        assert!(markdown.contains("No triage logs found yet."));
        assert!(!markdown.contains("## Key Metrics"));
        assert!(!markdown.contains("## AI Performance"));
    }

    #[test]
    fn test_markdown_keeps_feedback_when_events_fail() {
        let feedback = vec![JoinedFeedback {
            feedback_id: 1,
            triage_log_id: 7,
            clinician_scan: Some("MRI".to_string()),
            accepted_recommendation: false,
            comment: None,
            created_at: now(),
            primary_modality: Some("CT".to_string()),
            symptoms_text: "back pain".to_string(),
        }];
        let snapshot = DashboardSnapshot::build(
            "sqlite:///./locked.db",
            &Loaded::failed(DashboardError::StoreUnavailable("locked".to_string())),
            &Loaded::ok(feedback),
            &DashboardConfig::default(),
            now(),
        );
        let markdown = generate_markdown_report(&snapshot);

        assert!(markdown.contains("## Load Warnings"));
        assert!(markdown.contains("No triage logs found yet."));
        assert!(markdown.contains("## AI Performance"));
        assert!(markdown.contains("## Agreement Analysis"));
        assert!(markdown.contains("| CT | MRI | 1 |"));
        assert!(!markdown.contains("## Key Metrics"));
        assert!(!markdown.contains("## Recent Triage Logs"));
    }

    #[test]
    fn test_generate_json_report() {
        let json = generate_json_report(&create_test_snapshot(true)).unwrap();

        assert!(json.contains("\"summary\""));
        assert!(json.contains("\"performance\""));
        assert!(json.contains("\"daily_volume\""));
    }

    #[test]
    fn test_pct_and_cell() {
        assert_eq!(pct(0.5), "50.0%");
        assert_eq!(pct(1.0 / 3.0), "33.3%");
        assert_eq!(cell("a|b\nc"), "a\\|b c");
    }
}
