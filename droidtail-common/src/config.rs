//! Configuration Management Module
//!
//! This module provides configuration loading with support for:
//! - TOML and YAML configuration files
//! - Environment variable overrides
//! - Configuration validation
//!
//! Persisting configuration back to disk is left to the embedding UI.

use crate::{DroidtailError, FilterConfig, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Share of `max_display_lines` a buffer may overshoot before trimming
pub const TRIM_THRESHOLD_RATIO: f64 = 0.05;

/// Tuning knobs for the adaptive scheduler and the display buffer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveParams {
    pub base_batch_size: usize,
    pub max_batch_size: usize,
    pub base_interval_ms: u64,
    pub min_interval_ms: u64,
    pub high_load_threshold: usize,
    pub medium_load_threshold: usize,
    pub max_display_lines: usize,
    /// Derived from `max_display_lines` unless set explicitly
    pub trim_threshold_lines: usize,
}

impl Default for AdaptiveParams {
    fn default() -> Self {
        let max_display_lines = 10_000;
        Self {
            base_batch_size: 100,
            max_batch_size: 500,
            base_interval_ms: 50,
            min_interval_ms: 10,
            high_load_threshold: 1000,
            medium_load_threshold: 200,
            max_display_lines,
            trim_threshold_lines: derive_trim_threshold(max_display_lines),
        }
    }
}

/// Trim threshold for a given display cap, at least one line
pub fn derive_trim_threshold(max_display_lines: usize) -> usize {
    ((max_display_lines as f64 * TRIM_THRESHOLD_RATIO).round() as usize).max(1)
}

impl AdaptiveParams {
    /// Change the display cap and re-derive the trim threshold
    pub fn set_max_display_lines(&mut self, max_display_lines: usize) {
        self.max_display_lines = max_display_lines;
        self.trim_threshold_lines = derive_trim_threshold(max_display_lines);
    }

    pub fn with_max_display_lines(mut self, max_display_lines: usize) -> Self {
        self.set_max_display_lines(max_display_lines);
        self
    }

    pub fn base_interval(&self) -> Duration {
        Duration::from_millis(self.base_interval_ms)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    /// Validate the parameter invariants
    pub fn validate(&self) -> Result<()> {
        if self.base_batch_size == 0 {
            return Err(DroidtailError::config("Base batch size must be greater than 0"));
        }

        if self.base_batch_size > self.max_batch_size {
            return Err(DroidtailError::config(format!(
                "Base batch size {} exceeds max batch size {}",
                self.base_batch_size, self.max_batch_size
            )));
        }

        if self.min_interval_ms > self.base_interval_ms {
            return Err(DroidtailError::config(format!(
                "Min interval {}ms exceeds base interval {}ms",
                self.min_interval_ms, self.base_interval_ms
            )));
        }

        if self.medium_load_threshold >= self.high_load_threshold {
            return Err(DroidtailError::config(format!(
                "Medium load threshold {} must be below high load threshold {}",
                self.medium_load_threshold, self.high_load_threshold
            )));
        }

        if self.max_display_lines == 0 {
            return Err(DroidtailError::config("Max display lines must be greater than 0"));
        }

        Ok(())
    }
}

/// Parameters shared between the controlling UI and running sessions
///
/// Sessions take a snapshot once per tick, so a change lands on the next
/// tick and never mid-batch.
pub type SharedParams = Arc<RwLock<AdaptiveParams>>;

pub fn shared_params(params: AdaptiveParams) -> SharedParams {
    Arc::new(RwLock::new(params))
}

/// External command producing the log stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl LogCommand {
    pub fn new<P: Into<String>>(program: P) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Human-readable command line for logs
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

impl Default for LogCommand {
    fn default() -> Self {
        Self::new("adb").args(["logcat", "-b", "all", "-v", "time"])
    }
}

/// Logging configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub adaptive: AdaptiveParams,
    pub filter: FilterConfig,
    pub command: LogCommand,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.adaptive.validate()?;

        if self.command.program.trim().is_empty() {
            return Err(DroidtailError::config("Log command program cannot be empty"));
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(DroidtailError::config(format!(
                    "Invalid logging level: {}",
                    self.logging.level
                )))
            }
        }

        Ok(())
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(log_level) = std::env::var("DROIDTAIL_LOG_LEVEL") {
            self.logging.level = log_level;
        }

        if let Ok(max_lines_str) = std::env::var("DROIDTAIL_MAX_DISPLAY_LINES") {
            match max_lines_str.parse::<usize>() {
                Ok(max_lines) => self.adaptive.set_max_display_lines(max_lines),
                Err(_) => warn!("Ignoring invalid DROIDTAIL_MAX_DISPLAY_LINES: {}", max_lines_str),
            }
        }

        if let Ok(keyword) = std::env::var("DROIDTAIL_KEYWORD") {
            self.filter.keyword = keyword;
        }

        if let Ok(adb_path) = std::env::var("DROIDTAIL_ADB_PATH") {
            self.command.program = adb_path;
        }
    }
}

/// Configuration format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Yaml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => ConfigFormat::Yaml,
            _ => ConfigFormat::Toml, // Default to TOML
        }
    }
}

/// Loads and holds the application configuration
#[derive(Debug, Default)]
pub struct ConfigManager {
    config: AppConfig,
    config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Create a configuration manager with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration manager and load from file
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut manager = Self::new();
        manager.load_from_file(path).await?;
        Ok(manager)
    }

    /// Load configuration from file, or fall back to defaults if it is missing
    pub async fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            Self::from_file(path).await
        } else {
            warn!("Configuration file '{}' not found, using defaults", path.display());
            let mut config = AppConfig::default();
            config.apply_env_overrides();
            config.validate()?;
            Ok(Self {
                config,
                config_path: None,
            })
        }
    }

    /// Load configuration from file
    pub async fn load_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        let format = ConfigFormat::from_path(&path);

        info!("Loading configuration from: {}", path.display());

        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            DroidtailError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        let mut config = Self::parse(&content, format)?;

        // Apply environment variable overrides
        config.apply_env_overrides();

        // Validate configuration
        config.validate()?;

        debug!("Configuration loaded: {:?}", config);
        self.config = config;
        self.config_path = Some(path);
        Ok(())
    }

    /// Parse configuration text in the given format
    ///
    /// Unless the `adaptive` section sets `trim_threshold_lines` itself, the
    /// threshold is derived from the parsed cap.
    pub fn parse(content: &str, format: ConfigFormat) -> Result<AppConfig> {
        let (mut config, explicit_threshold): (AppConfig, bool) = match format {
            ConfigFormat::Toml => {
                let value: toml::Value = toml::from_str(content)?;
                let explicit = value
                    .get("adaptive")
                    .and_then(|adaptive| adaptive.get("trim_threshold_lines"))
                    .is_some();
                (value.try_into()?, explicit)
            }
            ConfigFormat::Yaml => {
                let value: serde_yaml::Value = serde_yaml::from_str(content)?;
                let explicit = value
                    .get("adaptive")
                    .and_then(|adaptive| adaptive.get("trim_threshold_lines"))
                    .is_some();
                (serde_yaml::from_value(value)?, explicit)
            }
        };

        if !explicit_threshold {
            let max = config.adaptive.max_display_lines;
            config.adaptive.set_max_display_lines(max);
        }

        Ok(config)
    }

    pub fn get_config(&self) -> AppConfig {
        self.config.clone()
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Update configuration in memory, keeping it only if it still validates
    pub fn update_config<F>(&mut self, updater: F) -> Result<()>
    where
        F: FnOnce(&mut AppConfig) -> Result<()>,
    {
        let mut candidate = self.config.clone();
        updater(&mut candidate)?;
        candidate.validate()?;
        self.config = candidate;
        info!("Configuration updated");
        Ok(())
    }
}
