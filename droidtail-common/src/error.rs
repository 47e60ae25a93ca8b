//! Error handling for the droidtail pipeline

use thiserror::Error;

/// Result type alias for the droidtail pipeline
pub type Result<T> = std::result::Result<T, DroidtailError>;

/// Main error type for the droidtail pipeline
///
/// Only start-time failures and caller mistakes are surfaced through this
/// type. Steady-state trouble (undecodable bytes, trim failures, queue
/// overload) is absorbed by the pipeline and shows up in the performance
/// snapshot instead.
#[derive(Error, Debug, Clone)]
pub enum DroidtailError {
    #[error("Failed to start log producer '{program}': {reason}")]
    ProcessSpawn { program: String, reason: String },

    #[error("Invalid pattern '{pattern}': {reason}")]
    Pattern { pattern: String, reason: String },

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Display buffer trim failed: {0}")]
    TrimFailure(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

impl DroidtailError {
    /// Create a new process spawn error
    pub fn spawn<P: Into<String>, S: Into<String>>(program: P, reason: S) -> Self {
        Self::ProcessSpawn {
            program: program.into(),
            reason: reason.into(),
        }
    }

    /// Create a new pattern error
    pub fn pattern<P: Into<String>, S: Into<String>>(pattern: P, reason: S) -> Self {
        Self::Pattern {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }

    /// Create a new invalid state error
    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create a new trim failure
    pub fn trim<S: Into<String>>(msg: S) -> Self {
        Self::TrimFailure(msg.into())
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Create a new poisoned-lock error naming the guarded structure
    pub fn poisoned<S: Into<String>>(what: S) -> Self {
        Self::LockPoisoned(what.into())
    }

    /// Get the error category for classification
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ProcessSpawn { .. } | Self::InvalidState(_) => ErrorCategory::Startup,
            Self::Pattern { .. } => ErrorCategory::Pattern,
            Self::TrimFailure(_) | Self::LockPoisoned(_) => ErrorCategory::Pipeline,
            Self::ConfigError(_) => ErrorCategory::Configuration,
            Self::IoError(_) | Self::SerializationError(_) => ErrorCategory::System,
        }
    }

    /// Check if the pipeline can keep running after this error
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::TrimFailure(_) => true, // Buffer keeps growing, stream continues
            Self::Pattern { .. } => true, // Caller can fix the pattern and retry
            Self::InvalidState(_) => true,
            Self::ProcessSpawn { .. } => false,
            Self::ConfigError(_) => false,
            Self::IoError(_) | Self::SerializationError(_) => false,
            Self::LockPoisoned(_) => false,
        }
    }

    /// Get suggested recovery action
    pub fn recovery_suggestion(&self) -> Option<String> {
        match self {
            Self::ProcessSpawn { program, .. } => Some(format!(
                "Ensure '{}' is installed and on PATH, or set DROIDTAIL_ADB_PATH",
                program
            )),
            Self::Pattern { .. } => {
                Some("Fix the regular expression or disable regex mode".to_string())
            }
            Self::InvalidState(_) => {
                Some("Stop the running session before starting a new one".to_string())
            }
            Self::ConfigError(_) => Some("Review and correct configuration settings".to_string()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for DroidtailError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

impl From<regex::Error> for DroidtailError {
    fn from(err: regex::Error) -> Self {
        // regex::Error does not carry the offending pattern
        Self::Pattern {
            pattern: String::new(),
            reason: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for DroidtailError {
    fn from(err: toml::de::Error) -> Self {
        Self::ConfigError(format!("Failed to parse TOML config: {}", err))
    }
}

impl From<serde_yaml::Error> for DroidtailError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::ConfigError(format!("Failed to parse YAML config: {}", err))
    }
}

impl From<serde_json::Error> for DroidtailError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

/// Error categories for classification and handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Startup,
    Pattern,
    Pipeline,
    Configuration,
    System,
}
