//! Runtime configuration
//!
//! Loaded from JSON. Every field has a default, so `{}` is a valid config.
//!
//! ```json
//! { "record_reuse": true, "trim_records": true, "max_merge_attempts": 3 }
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Config text is not valid JSON for `SnapshotConfig`
    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is out of range
    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Snapshot runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Reuse records hidden from every open snapshot instead of allocating
    #[serde(default = "default_record_reuse")]
    pub record_reuse: bool,

    /// Compact record chains after apply and dispose
    #[serde(default = "default_trim_records")]
    pub trim_records: bool,

    /// Optimistic merge passes per apply before stale merges count as conflicts
    #[serde(default = "default_max_merge_attempts")]
    pub max_merge_attempts: u32,
}

fn default_record_reuse() -> bool {
    true
}

fn default_trim_records() -> bool {
    true
}

fn default_max_merge_attempts() -> u32 {
    3
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            record_reuse: default_record_reuse(),
            trim_records: default_trim_records(),
            max_merge_attempts: default_max_merge_attempts(),
        }
    }
}

impl SnapshotConfig {
    /// All record recycling enabled
    pub fn enabled() -> Self {
        Self::default()
    }

    /// Every write allocates and chains are never compacted
    pub fn disabled() -> Self {
        Self {
            record_reuse: false,
            trim_records: false,
            max_merge_attempts: 1,
        }
    }

    /// Parse and validate a JSON document
    pub fn from_json_str(text: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON file
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Reject values the runtime cannot honor
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_merge_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_merge_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = SnapshotConfig::default();
        assert!(config.record_reuse);
        assert!(config.trim_records);
        assert_eq!(config.max_merge_attempts, 3);
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let config = SnapshotConfig::from_json_str("{}").unwrap();
        assert_eq!(config, SnapshotConfig::default());
    }

    #[test]
    fn test_partial_json() {
        let config = SnapshotConfig::from_json_str(r#"{"record_reuse": false}"#).unwrap();
        assert!(!config.record_reuse);
        assert!(config.trim_records);
    }

    #[test]
    fn test_zero_merge_attempts_rejected() {
        let err = SnapshotConfig::from_json_str(r#"{"max_merge_attempts": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_malformed_json_rejected() {
        let err = SnapshotConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"trim_records": false, "max_merge_attempts": 5}}"#).unwrap();

        let config = SnapshotConfig::load(file.path()).unwrap();
        assert!(!config.trim_records);
        assert_eq!(config.max_merge_attempts, 5);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = SnapshotConfig::load(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_disabled_preset() {
        let config = SnapshotConfig::disabled();
        assert!(!config.record_reuse);
        assert!(!config.trim_records);
        assert!(config.validate().is_ok());
    }
}
