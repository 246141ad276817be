//! Triage Insights - analytics for AI triage recommendations
//!
//! A CLI tool that reads triage events and clinician feedback from a
//! SQLite store and renders a dashboard of how often clinicians agree
//! with the AI's recommended scan.
//!
//! Exit codes:
//!   0 - Success (including renders where one table failed to load)
//!   1 - Runtime error (bad config, rejected submission, unreadable import, etc.)

mod analysis;
mod cli;
mod config;
mod error;
mod models;
mod report;
mod store;

use analysis::DashboardSnapshot;
use anyhow::{Context, Result};
use chrono::Utc;
use cli::{Args, Command, Decision, OutputFormat};
use config::{Config, CONFIG_FILE_NAME};
use indicatif::{ProgressBar, ProgressStyle};
use models::{FeedbackSubmission, NewTriageEvent};
use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use store::Store;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle init-config early (no logging needed)
    if matches!(args.command, Command::InitConfig) {
        return handle_init_config();
    }

    // Load configuration before logging so the file can raise verbosity
    let (mut config, source) = match load_config(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("❌ Error: {:#}", e);
            std::process::exit(1);
        }
    };
    config.merge_with_args(&args);

    // Initialize logging
    init_logging(args.log_level(config.general.verbose));

    info!("Triage Insights v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);
    match source {
        ConfigSource::File(path) => info!("Loaded config from: {}", path.display()),
        ConfigSource::Defaults => debug!("No config file found, using defaults"),
        ConfigSource::Fallback(e) => warn!("Failed to load config: {:#}", e),
    }

    if let Err(e) = run(args, config).await {
        error!("Command failed: {:#}", e);
        eprintln!("\n❌ Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Handle init-config: generate a default .triage-insights.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE_NAME);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE_NAME
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", CONFIG_FILE_NAME))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE_NAME);
    println!("   Edit it to change the store, display limits and report format.");
    Ok(())
}

/// Initialize logging at the given level.
///
/// `RUST_LOG` wins over the flags when set. Logs go to stderr so a report
/// written to stdout stays clean.
fn init_logging(level: tracing::Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Dispatch the parsed command.
async fn run(args: Args, config: Config) -> Result<()> {
    let store = open_store(&config)?;
    debug!("Using store at {}", store.path().display());

    match args.command {
        Command::Report(_) => handle_report(&store, &config, args.quiet),
        Command::Watch { iterations, .. } => handle_watch(store, config, iterations).await,
        Command::Cases { limit } => handle_cases(&store, limit),
        Command::Submit {
            case_id,
            ref scan,
            decision,
            ref comment,
        } => handle_submit(&store, case_id, scan, decision, comment.clone()),
        Command::Import { ref file } => handle_import(&store, file),
        Command::InitDb => handle_init_db(&store),
        Command::InitConfig => handle_init_config(),
    }
}

/// Where the configuration came from, reported once logging is up.
enum ConfigSource {
    File(PathBuf),
    Defaults,
    /// The default file exists but could not be used.
    Fallback(anyhow::Error),
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<(Config, ConfigSource)> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        let config = Config::load(config_path)?;
        return Ok((config, ConfigSource::File(config_path.clone())));
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => Ok((config, ConfigSource::File(PathBuf::from(CONFIG_FILE_NAME)))),
        Ok(None) => Ok((Config::default(), ConfigSource::Defaults)),
        Err(e) => Ok((Config::default(), ConfigSource::Fallback(e))),
    }
}

fn open_store(config: &Config) -> Result<Store> {
    let store = Store::open(&config.store.connection)
        .with_context(|| format!("Invalid store connection: {}", config.store.connection))?;
    Ok(store.with_busy_timeout(Duration::from_millis(config.store.busy_timeout_ms)))
}

/// Load both tables and compute every aggregate.
///
/// Never fails: a table that cannot be loaded shows up as a warning.
fn build_snapshot(store: &Store, config: &Config) -> DashboardSnapshot {
    let events = store::load_events(store);
    let feedback = store::load_feedback(store);

    DashboardSnapshot::build(
        &config.store.connection,
        &events,
        &feedback,
        &config.dashboard,
        Utc::now(),
    )
}

fn render(snapshot: &DashboardSnapshot, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => report::generate_json_report(snapshot),
        OutputFormat::Markdown => Ok(report::generate_markdown_report(snapshot)),
    }
}

/// Write a rendered report to a file, or stdout when no file is given.
fn emit(rendered: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => std::fs::write(path, rendered)
            .with_context(|| format!("Failed to write report to {}", path.display())),
        None => {
            println!("{}", rendered);
            Ok(())
        }
    }
}

/// Build, render and write one dashboard.
fn render_once(store: &Store, config: &Config) -> Result<DashboardSnapshot> {
    let snapshot = build_snapshot(store, config);
    let rendered = render(&snapshot, config.report.format)?;
    emit(&rendered, config.report.output.as_deref())?;
    Ok(snapshot)
}

fn handle_report(store: &Store, config: &Config, quiet: bool) -> Result<()> {
    let spinner = if quiet {
        None
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message("Loading triage data...");
        pb.enable_steady_tick(Duration::from_millis(100));
        Some(pb)
    };

    let snapshot = build_snapshot(store, config);

    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }

    let rendered = render(&snapshot, config.report.format)?;
    emit(&rendered, config.report.output.as_deref())?;

    if snapshot.is_degraded() {
        warn!(
            "Rendered with {} load warning(s); sections from the failed table are empty",
            snapshot.warnings.len()
        );
    }

    if let Some(ref path) = config.report.output {
        print_summary(&snapshot);
        println!("\n✅ Dashboard saved to: {}", path.display());
    }

    Ok(())
}

fn print_summary(snapshot: &DashboardSnapshot) {
    let summary = &snapshot.summary;
    println!("\n📊 Dashboard Summary:");
    println!("   Total cases: {}", summary.total);
    println!(
        "   - 🔴 Emergency: {} | 🟢 Non-emergency: {}",
        summary.emergencies, summary.non_emergencies
    );
    println!(
        "   Feedback: {} cases ({:.1}%)",
        summary.cases_with_feedback,
        summary.feedback_coverage * 100.0
    );
    if let Some(ref performance) = snapshot.performance {
        println!(
            "   Agreement: {} {:.1}% ({})",
            performance.band.emoji(),
            performance.agreement_rate * 100.0,
            report::describe_band(performance.band)
        );
    }
}

async fn handle_watch(store: Store, config: Config, iterations: Option<usize>) -> Result<()> {
    let period = Duration::from_secs(config.dashboard.refresh_seconds);
    info!(
        "Refreshing every {}s{}",
        config.dashboard.refresh_seconds,
        iterations
            .map(|n| format!(" for {} iteration(s)", n))
            .unwrap_or_default()
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let renders = watch_loop(period, iterations, shutdown, || {
        let store = store.clone();
        let config = config.clone();
        async move {
            match tokio::task::spawn_blocking(move || render_once(&store, &config)).await {
                Ok(result) => result.map(|_| ()),
                Err(e) => Err(anyhow::anyhow!("Render task failed: {}", e)),
            }
        }
    })
    .await;

    info!("Watch stopped after {} render(s)", renders);
    Ok(())
}

/// Call `tick` on every interval tick until `shutdown` resolves or
/// `iterations` ticks have run. A failing tick is logged and skipped.
///
/// Returns the number of ticks that ran.
async fn watch_loop<F, Fut, S>(
    period: Duration,
    iterations: Option<usize>,
    shutdown: S,
    mut tick: F,
) -> usize
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
    S: Future<Output = ()>,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    let mut ran = 0;
    loop {
        if iterations.is_some_and(|limit| ran >= limit) {
            break;
        }

        tokio::select! {
            _ = &mut shutdown => {
                info!("Interrupted, stopping");
                break;
            }
            _ = interval.tick() => {
                ran += 1;
                debug!("Refresh #{}", ran);
                if let Err(e) = tick().await {
                    error!("Refresh #{} failed: {:#}", ran, e);
                }
            }
        }
    }

    ran
}

/// One line per case, newest first.
fn list_cases(store: &Store, limit: usize) -> Result<Vec<String>> {
    let events = store::load_events(store);
    if let Some(e) = events.error {
        return Err(e).context("Failed to load triage events");
    }

    let feedback = store::load_feedback(store);
    if feedback.is_degraded() {
        warn!("Feedback status unavailable; every case is shown as pending");
    }
    let reviewed: HashSet<i64> = feedback.rows.iter().map(|f| f.triage_log_id).collect();

    let lines = analysis::recent_events(&events.rows, limit)
        .iter()
        .map(|event| {
            let status = if reviewed.contains(&event.id) {
                "✅ reviewed"
            } else {
                "⏳ pending"
            };
            format!(
                "{} | AI: {} ({}) | {}",
                event.case_label(),
                event.modality_label(),
                event.primary_priority.as_deref().unwrap_or("-"),
                status
            )
        })
        .collect();

    Ok(lines)
}

fn handle_cases(store: &Store, limit: usize) -> Result<()> {
    let lines = list_cases(store, limit)?;

    if lines.is_empty() {
        println!("No triage logs found yet.");
        return Ok(());
    }

    println!("📋 Recent cases ({}):\n", lines.len());
    for line in &lines {
        println!("   {}", line);
    }
    Ok(())
}

fn handle_submit(
    store: &Store,
    case_id: i64,
    scan: &str,
    decision: Decision,
    comment: Option<String>,
) -> Result<()> {
    let submission = FeedbackSubmission {
        triage_log_id: case_id,
        clinician_scan: scan.to_string(),
        accepted: decision.accepted(),
        comment,
    };

    let saved = store::submit_feedback(store, &submission)
        .with_context(|| format!("Feedback for case {} was not saved", case_id))?;

    println!(
        "✅ Feedback {} saved for case {} ({}, clinician chose {})",
        saved.id,
        case_id,
        if saved.accepted_recommendation {
            "accepted"
        } else {
            "overridden"
        },
        saved.clinician_scan
    );
    Ok(())
}

/// Read a JSON array of triage events and append them to the store.
///
/// Returns the ids assigned to the new rows.
fn import_events(store: &Store, file: &Path) -> Result<Vec<i64>> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read import file: {}", file.display()))?;
    let events: Vec<NewTriageEvent> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse import file: {}", file.display()))?;

    info!("Importing {} triage event(s)", events.len());

    let mut ids = Vec::with_capacity(events.len());
    for (index, event) in events.iter().enumerate() {
        let id = store
            .record_event(event)
            .with_context(|| format!("Failed to import event #{}", index + 1))?;
        ids.push(id);
    }
    Ok(ids)
}

fn handle_import(store: &Store, file: &Path) -> Result<()> {
    let ids = import_events(store, file)?;
    println!("✅ Imported {} triage event(s).", ids.len());
    Ok(())
}

fn handle_init_db(store: &Store) -> Result<()> {
    store
        .init_schema()
        .with_context(|| format!("Failed to initialize {}", store.path().display()))?;
    println!("✅ Schema ready at {}", store.path().display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DashboardError;
    use crate::models::TriageLevel;
    use crate::store::test_support::{event_at, temp_store};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn config_for(store: &Store) -> Config {
        let mut config = Config::default();
        config.store.connection = store.path().display().to_string();
        config
    }

    #[test]
    fn test_import_sample_fixture() {
        let (_dir, store) = temp_store();
        let fixture = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures/sample_events.json");

        let ids = import_events(&store, &fixture).unwrap();
        assert_eq!(ids.len(), 6);

        let loaded = store::load_events(&store);
        assert!(!loaded.is_degraded());
        assert_eq!(loaded.rows.len(), 6);
        assert!(loaded
            .rows
            .iter()
            .any(|e| e.triage == TriageLevel::UrgentEmergency));
    }

    #[test]
    fn test_import_rejects_malformed_json() {
        let (dir, store) = temp_store();
        let file = dir.path().join("bad.json");
        std::fs::write(&file, "{ not an array").unwrap();

        assert!(import_events(&store, &file).is_err());
    }

    #[test]
    fn test_list_cases_marks_reviewed() {
        let (_dir, store) = temp_store();
        let first = store
            .record_event(&event_at("2025-05-01 09:00:00", TriageLevel::NonEmergency, "MRI"))
            .unwrap();
        store
            .record_event(&event_at("2025-05-02 09:00:00", TriageLevel::UrgentEmergency, "CT"))
            .unwrap();
        handle_submit(&store, first, "MRI", Decision::Accept, None).unwrap();

        let lines = list_cases(&store, 10).unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("2 | 2025-05-02 09:00:00"));
        assert!(lines[0].contains("⏳ pending"));
        assert!(lines[1].contains("AI: MRI"));
        assert!(lines[1].contains("✅ reviewed"));

        assert_eq!(list_cases(&store, 1).unwrap().len(), 1);
    }

    #[test]
    fn test_list_cases_missing_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("absent.db").display().to_string()).unwrap();
        assert!(list_cases(&store, 5).is_err());
    }

    #[test]
    fn test_submit_records_clinician_scan() {
        let (_dir, store) = temp_store();
        let id = store
            .record_event(&event_at("2025-05-01 09:00:00", TriageLevel::NonEmergency, "CT"))
            .unwrap();

        handle_submit(&store, id, "MRI", Decision::Override, Some("prefers MRI".to_string()))
            .unwrap();

        let feedback = store::load_feedback(&store);
        assert_eq!(feedback.rows.len(), 1);
        assert_eq!(feedback.rows[0].clinician_scan.as_deref(), Some("MRI"));
        assert!(!feedback.rows[0].accepted_recommendation);
    }

    #[test]
    fn test_submit_duplicate_is_error() {
        let (_dir, store) = temp_store();
        let id = store
            .record_event(&event_at("2025-05-01 09:00:00", TriageLevel::NonEmergency, "CT"))
            .unwrap();

        handle_submit(&store, id, "CT", Decision::Accept, None).unwrap();
        let err = handle_submit(&store, id, "MRI", Decision::Override, None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DashboardError>(),
            Some(DashboardError::Conflict(_))
        ));
    }

    #[test]
    fn test_render_once_writes_file() {
        let (dir, store) = temp_store();
        store
            .record_event(&event_at("2025-05-01 09:00:00", TriageLevel::NonEmergency, "CT"))
            .unwrap();

        let mut config = config_for(&store);
        let output = dir.path().join("dashboard.json");
        config.report.format = OutputFormat::Json;
        config.report.output = Some(output.clone());

        let snapshot = render_once(&store, &config).unwrap();
        assert_eq!(snapshot.summary.total, 1);

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(written["summary"]["total"], 1);
        assert!(written["performance"].is_null());
    }

    #[test]
    fn test_build_snapshot_missing_store_is_degraded() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("absent.db").display().to_string()).unwrap();
        let snapshot = build_snapshot(&store, &config_for(&store));

        assert!(snapshot.is_degraded());
        assert_eq!(snapshot.warnings.len(), 2);
        assert_eq!(snapshot.summary.total, 0);
        assert!(!store.path().exists());
    }

    #[test]
    fn test_watch_loop_stops_after_iterations() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let ran = tokio_test::block_on(watch_loop(
            Duration::from_millis(1),
            Some(3),
            std::future::pending::<()>(),
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
        ));

        assert_eq!(ran, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_watch_loop_survives_failed_tick() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let ran = tokio_test::block_on(watch_loop(
            Duration::from_millis(1),
            Some(2),
            std::future::pending::<()>(),
            move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        anyhow::bail!("store locked");
                    }
                    Ok(())
                }
            },
        ));

        assert_eq!(ran, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_watch_loop_stops_on_shutdown() {
        let ran = tokio_test::block_on(watch_loop(
            Duration::from_secs(3600),
            None,
            async {},
            || async { Ok(()) },
        ));

        assert!(ran <= 1);
    }

    #[test]
    fn test_watch_renders_through_blocking_pool() {
        let (dir, store) = temp_store();
        let mut config = config_for(&store);
        config.dashboard.refresh_seconds = 1;
        config.report.output = Some(dir.path().join("dashboard.md"));

        tokio_test::block_on(handle_watch(store, config.clone(), Some(1))).unwrap();

        let written = std::fs::read_to_string(config.report.output.unwrap()).unwrap();
        assert!(written.contains("No triage logs found yet."));
    }
}
