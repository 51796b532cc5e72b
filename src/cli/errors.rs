//! CLI-specific error types

use std::fmt;

use crate::config::ConfigError;
use crate::snapshot::SnapshotError;

/// CLI error codes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliErrorCode {
    /// Configuration file error
    ConfigError,
    /// A snapshot operation failed
    SnapshotFailed,
    /// A scenario step did not produce the expected outcome
    ScenarioFailed,
    /// A stress reader saw an inconsistent state
    InconsistentRead,
    /// A worker thread panicked
    WorkerPanicked,
}

impl CliErrorCode {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError => "SNAP_CLI_CONFIG_ERROR",
            Self::SnapshotFailed => "SNAP_CLI_SNAPSHOT_FAILED",
            Self::ScenarioFailed => "SNAP_CLI_SCENARIO_FAILED",
            Self::InconsistentRead => "SNAP_CLI_INCONSISTENT_READ",
            Self::WorkerPanicked => "SNAP_CLI_WORKER_PANICKED",
        }
    }
}

/// CLI error
#[derive(Debug)]
pub struct CliError {
    code: CliErrorCode,
    message: String,
}

impl CliError {
    /// Create a new CLI error
    pub fn new(code: CliErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn scenario_failed(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ScenarioFailed, msg)
    }

    pub fn inconsistent_read(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::InconsistentRead, msg)
    }

    pub fn worker_panicked(role: &str) -> Self {
        Self::new(CliErrorCode::WorkerPanicked, format!("{} thread panicked", role))
    }

    /// Get the error code
    pub fn code(&self) -> &CliErrorCode {
        &self.code
    }

    /// Get the error code string
    pub fn code_str(&self) -> &'static str {
        self.code.code()
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.code(), self.message)
    }
}

impl std::error::Error for CliError {}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        Self::new(CliErrorCode::ConfigError, e.to_string())
    }
}

impl From<SnapshotError> for CliError {
    fn from(e: SnapshotError) -> Self {
        Self::new(CliErrorCode::SnapshotFailed, format!("{} ({})", e, e.code()))
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_code() {
        let err = CliError::inconsistent_read("pair 3 read (1, 2)");
        assert_eq!(err.to_string(), "SNAP_CLI_INCONSISTENT_READ: pair 3 read (1, 2)");
    }

    #[test]
    fn test_snapshot_error_conversion() {
        let err: CliError = SnapshotError::GlobalApply.into();
        assert_eq!(err.code(), &CliErrorCode::SnapshotFailed);
        assert!(err.message().contains("SNAP_GLOBAL_APPLY"));
    }

    #[test]
    fn test_config_error_conversion() {
        let err: CliError = ConfigError::Invalid("bad".to_string()).into();
        assert_eq!(err.code_str(), "SNAP_CLI_CONFIG_ERROR");
    }
}
