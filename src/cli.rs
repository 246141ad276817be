//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Triage Insights - analytics for AI triage recommendations
///
/// Summarizes how clinicians respond to AI triage recommendations:
/// agreement rates, AI-vs-clinician scan matrix, daily volume and more.
///
/// Examples:
///   triage-insights --store sqlite:///./skannr_ai.db report
///   triage-insights report --format json -o dashboard.json
///   triage-insights watch --interval 30 -o dashboard.md
///   triage-insights cases --limit 10
///   triage-insights submit --case 12 --scan MRI --decision override
///   triage-insights init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Store connection string (sqlite:///path, sqlite://path or a file path)
    ///
    /// Overrides the [store] section of the configuration file.
    #[arg(long, global = true, value_name = "CONN", env = "TRIAGE_INSIGHTS_STORE")]
    pub store: Option<String>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .triage-insights.toml in the current directory
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Render the dashboard once
    Report(RenderArgs),

    /// Re-render the dashboard on a fixed interval until interrupted
    Watch {
        #[command(flatten)]
        render: RenderArgs,

        /// Seconds between refreshes
        #[arg(long, value_name = "SECS")]
        interval: Option<u64>,

        /// Stop after this many refreshes
        #[arg(long, value_name = "COUNT")]
        iterations: Option<usize>,
    },

    /// List recent cases available for review
    Cases {
        /// Number of cases to show
        #[arg(long, default_value = "20", value_name = "COUNT")]
        limit: usize,
    },

    /// Record clinician feedback for a case
    Submit {
        /// Triage event id
        #[arg(long = "case", value_name = "ID")]
        case_id: i64,

        /// Scan the clinician chose
        #[arg(long, value_name = "SCAN")]
        scan: String,

        /// Whether the clinician accepted the AI recommendation
        #[arg(long, value_name = "DECISION")]
        decision: Decision,

        /// Optional note
        #[arg(long, value_name = "TEXT")]
        comment: Option<String>,
    },

    /// Append triage events from a JSON array
    Import {
        /// JSON file containing an array of triage events
        #[arg(long, value_name = "FILE")]
        file: PathBuf,
    },

    /// Create the database schema
    InitDb,

    /// Generate a default .triage-insights.toml configuration file
    InitConfig,
}

/// Rendering options shared by `report` and `watch`.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct RenderArgs {
    /// Output format (markdown, json)
    #[arg(long, value_name = "FORMAT")]
    pub format: Option<OutputFormat>,

    /// Output file path; stdout when omitted
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

/// Output format for the report.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

/// Clinician decision on a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Decision {
    /// The clinician agreed with the AI
    Accept,
    /// The clinician chose something else
    Override,
}

impl Decision {
    pub fn accepted(self) -> bool {
        matches!(self, Decision::Accept)
    }
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(ref store) = self.store {
            if store.trim().is_empty() {
                return Err("Store connection string cannot be empty".to_string());
            }
        }

        match &self.command {
            Command::Watch {
                interval,
                iterations,
                ..
            } => {
                if *interval == Some(0) {
                    return Err("Interval must be at least 1 second".to_string());
                }
                if *iterations == Some(0) {
                    return Err("Iterations must be at least 1".to_string());
                }
            }
            Command::Cases { limit } => {
                if *limit == 0 {
                    return Err("Limit must be at least 1".to_string());
                }
            }
            Command::Submit { case_id, scan, .. } => {
                if *case_id <= 0 {
                    return Err("Case id must be positive".to_string());
                }
                if scan.trim().is_empty() {
                    return Err("Scan cannot be empty".to_string());
                }
            }
            Command::Import { file } => {
                if !file.exists() {
                    return Err(format!("Import file does not exist: {}", file.display()));
                }
            }
            Command::Report(_) | Command::InitDb | Command::InitConfig => {}
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    ///
    /// `config_verbose` is the `[general] verbose` setting; `--quiet` still wins.
    pub fn log_level(&self, config_verbose: bool) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose || config_verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }

    /// Rendering options of the current command, if it renders.
    pub fn render_args(&self) -> Option<&RenderArgs> {
        match &self.command {
            Command::Report(render) => Some(render),
            Command::Watch { render, .. } => Some(render),
            _ => None,
        }
    }
}
