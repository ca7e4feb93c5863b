//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/convcost/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/convcost/` (~/.config/convcost/)
//! - State/Logs: `$XDG_STATE_HOME/convcost/` (~/.local/state/convcost/)

use crate::analytics::pricing::{CostTable, RateLookup, RateResolver};
use crate::analytics::tokenizer::{CounterKind, Encoding};
use crate::error::{Error, Result};
use crate::types::CalculationMode;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Accrual settings
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Cost table and rate fallback
    #[serde(default)]
    pub pricing: PricingConfig,

    /// Report export settings
    #[serde(default)]
    pub report: ReportConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Accrual engine configuration
#[derive(Debug, Deserialize)]
pub struct AnalysisConfig {
    /// Default calculation mode when the CLI does not pick one
    #[serde(default)]
    pub mode: CalculationMode,

    /// Weight applied to hidden thought content when billed as output
    #[serde(default = "default_thought_multiplier")]
    pub thought_multiplier: f64,

    /// Encoding used for model identifiers the tokenizer does not recognize
    #[serde(default)]
    pub default_encoding: Encoding,

    /// Token counter backend
    #[serde(default)]
    pub tokenizer: CounterKind,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            mode: CalculationMode::default(),
            thought_multiplier: default_thought_multiplier(),
            default_encoding: Encoding::default(),
            tokenizer: CounterKind::default(),
        }
    }
}

/// Default weight for thought content
pub const DEFAULT_THOUGHT_MULTIPLIER: f64 = 1.2;

fn default_thought_multiplier() -> f64 {
    DEFAULT_THOUGHT_MULTIPLIER
}

/// Pricing configuration
///
/// When `models` is absent the built-in cost table is used. A configured
/// table replaces the built-in one entirely; the built-in table only comes
/// back as the last step of the rate fallback chain.
#[derive(Debug, Deserialize)]
pub struct PricingConfig {
    /// Rate key used for simple mode and for slugs missing from the table
    #[serde(default = "default_representative_model")]
    pub representative_model: String,

    /// Fall back to the built-in table when nothing else resolves
    #[serde(default = "default_builtin_fallback")]
    pub builtin_fallback: bool,

    /// Ordered model → rates table
    #[serde(default)]
    pub models: Option<CostTable>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            representative_model: default_representative_model(),
            builtin_fallback: default_builtin_fallback(),
            models: None,
        }
    }
}

fn default_representative_model() -> String {
    "o3".to_string()
}

fn default_builtin_fallback() -> bool {
    true
}

impl PricingConfig {
    /// The effective cost table.
    pub fn cost_table(&self) -> CostTable {
        self.models.clone().unwrap_or_default()
    }

    /// Builds the rate resolver for the effective table.
    pub fn resolver(&self) -> RateResolver {
        let mut chain = vec![
            RateLookup::ExactSlug,
            RateLookup::Named(self.representative_model.clone()),
            RateLookup::FirstEntry,
        ];
        if self.builtin_fallback {
            chain.push(RateLookup::Builtin(self.representative_model.clone()));
        }
        RateResolver::new(self.cost_table(), chain)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.representative_model.trim().is_empty() {
            return Err(Error::Config(
                "pricing.representative_model must not be empty".to_string(),
            ));
        }
        if let Some(models) = &self.models {
            models.validate()?;
        }
        Ok(())
    }
}

/// Output format for exported reports
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
    /// Three tables: summary, models and daily
    Csv,
}

impl ReportFormat {
    /// File extension for exported reports
    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Text => "txt",
            ReportFormat::Json => "json",
            ReportFormat::Csv => "csv",
        }
    }
}

impl std::str::FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "txt" => Ok(ReportFormat::Text),
            "json" => Ok(ReportFormat::Json),
            "csv" => Ok(ReportFormat::Csv),
            _ => Err(format!("unknown report format: {}", s)),
        }
    }
}

/// Report export configuration
#[derive(Debug, Deserialize)]
pub struct ReportConfig {
    #[serde(default)]
    pub format: ReportFormat,

    /// Directory reports are written to (relative paths resolve against the cwd)
    #[serde(default = "default_report_directory")]
    pub directory: PathBuf,

    /// Include per-conversation details in reports
    #[serde(default)]
    pub verbose: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            format: ReportFormat::default(),
            directory: default_report_directory(),
            verbose: false,
        }
    }
}

fn default_report_directory() -> PathBuf {
    PathBuf::from("reports")
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate all sections
    pub fn validate(&self) -> Result<()> {
        let multiplier = self.analysis.thought_multiplier;
        if !multiplier.is_finite() || multiplier <= 0.0 {
            return Err(Error::Config(format!(
                "analysis.thought_multiplier must be a positive number, got {}",
                multiplier
            )));
        }
        self.pricing.validate()
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/convcost/config.toml` (~/.config/convcost/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("convcost").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/convcost/` (~/.local/state/convcost/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("convcost")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/convcost/convcost.log` (~/.local/state/convcost/convcost.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("convcost.log")
    }

    /// Ensure XDG base directory environment variables are set.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}
