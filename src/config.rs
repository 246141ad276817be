//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.triage-insights.toml` files.

use crate::cli::{Args, Command, OutputFormat};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = ".triage-insights.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Store settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Aggregation and display limits.
    #[serde(default)]
    pub dashboard: DashboardConfig,

    /// Report settings.
    #[serde(default)]
    pub report: ReportConfig,
}

/// General application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

/// Database connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Connection string.
    #[serde(default = "default_connection")]
    pub connection: String,

    /// How long to wait on a locked database, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            connection: default_connection(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

fn default_connection() -> String {
    "sqlite:///./skannr_ai.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

/// Aggregation limits and thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    /// Number of modalities in the scan distribution.
    #[serde(default = "default_top_modalities")]
    pub top_modalities: usize,

    /// Length of each disagreement frequency list.
    #[serde(default = "default_top_disagreements")]
    pub top_disagreements: usize,

    /// Number of recent disagreements shown.
    #[serde(default = "default_recent_disagreements")]
    pub recent_disagreements: usize,

    /// Number of recent feedback rows shown.
    #[serde(default = "default_recent_feedback")]
    pub recent_feedback: usize,

    /// Number of recent triage events shown.
    #[serde(default = "default_recent_events")]
    pub recent_events: usize,

    /// Agreement rate considered on target (fraction).
    #[serde(default = "default_agreement_target")]
    pub agreement_target: f64,

    /// Seconds between refreshes in watch mode.
    #[serde(default = "default_refresh_seconds")]
    pub refresh_seconds: u64,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            top_modalities: default_top_modalities(),
            top_disagreements: default_top_disagreements(),
            recent_disagreements: default_recent_disagreements(),
            recent_feedback: default_recent_feedback(),
            recent_events: default_recent_events(),
            agreement_target: default_agreement_target(),
            refresh_seconds: default_refresh_seconds(),
        }
    }
}

fn default_top_modalities() -> usize {
    10
}

fn default_top_disagreements() -> usize {
    5
}

fn default_recent_disagreements() -> usize {
    5
}

fn default_recent_feedback() -> usize {
    25
}

fn default_recent_events() -> usize {
    30
}

fn default_agreement_target() -> f64 {
    0.8
}

fn default_refresh_seconds() -> u64 {
    30
}

/// Report output settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Output format.
    #[serde(default)]
    pub format: OutputFormat,

    /// Output file; stdout when unset.
    #[serde(default)]
    pub output: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE_NAME);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Reject values the dashboard cannot work with.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.dashboard.agreement_target) {
            anyhow::bail!(
                "dashboard.agreement_target must be between 0.0 and 1.0, got {}",
                self.dashboard.agreement_target
            );
        }
        if self.dashboard.refresh_seconds == 0 {
            anyhow::bail!("dashboard.refresh_seconds must be at least 1");
        }
        if self.store.connection.trim().is_empty() {
            anyhow::bail!("store.connection cannot be empty");
        }
        Ok(())
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// This method only overrides config when CLI provides explicit values.
    pub fn merge_with_args(&mut self, args: &Args) {
        if let Some(ref store) = args.store {
            self.store.connection = store.clone();
        }

        if let Some(render) = args.render_args() {
            if let Some(format) = render.format {
                self.report.format = format;
            }
            if let Some(ref output) = render.output {
                self.report.output = Some(output.clone());
            }
        }

        if let Command::Watch {
            interval: Some(interval),
            ..
        } = args.command
        {
            self.dashboard.refresh_seconds = interval;
        }

        // Flags always override
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
