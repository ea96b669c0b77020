//! Bridge configuration.
//!
//! All fields have defaults, so a TOML file only needs the values it changes:
//!
//! ```toml
//! default_room = "design-review"
//! echo_timeout_ms = 500
//! auto_resync = true
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Bridge configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Name of the shared text inside the replicated document.
    pub text_name: String,
    /// Room used when the host does not supply one.
    pub default_room: String,
    /// How long an applied remote edit may wait for its buffer notification.
    pub echo_timeout_ms: u64,
    /// How often stale pending echoes are swept.
    pub echo_sweep_interval_ms: u64,
    /// Attempts per remote batch before the session is desynchronized.
    pub max_apply_attempts: u32,
    /// First retry delay; doubles on every further attempt.
    pub initial_backoff_ms: u64,
    /// Resynchronize the buffer from the shared document on desync.
    pub auto_resync: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            text_name: "shared-text".to_string(),
            default_room: "vscode-peershare-room".to_string(),
            echo_timeout_ms: 300,
            echo_sweep_interval_ms: 100,
            max_apply_attempts: 5,
            initial_backoff_ms: 20,
            auto_resync: false,
        }
    }
}

impl BridgeConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.text_name.is_empty() {
            return Err(ConfigError::Invalid("text_name must not be empty".into()));
        }
        if self.max_apply_attempts == 0 {
            return Err(ConfigError::Invalid("max_apply_attempts must be at least 1".into()));
        }
        if self.echo_timeout_ms == 0 || self.echo_sweep_interval_ms == 0 {
            return Err(ConfigError::Invalid("echo timings must be non-zero".into()));
        }
        Ok(())
    }

    pub fn echo_timeout(&self) -> Duration {
        Duration::from_millis(self.echo_timeout_ms)
    }

    pub fn echo_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.echo_sweep_interval_ms)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.text_name, "shared-text");
        assert_eq!(config.max_apply_attempts, 5);
        assert_eq!(config.initial_backoff(), Duration::from_millis(20));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = BridgeConfig::from_toml_str("echo_timeout_ms = 750\nauto_resync = true\n").unwrap();
        assert_eq!(config.echo_timeout(), Duration::from_millis(750));
        assert!(config.auto_resync);
        assert_eq!(config.default_room, "vscode-peershare-room");
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let err = BridgeConfig::from_toml_str("max_apply_attempts = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_bad_types() {
        let err = BridgeConfig::from_toml_str("echo_timeout_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "default_room = \"pairing\"").unwrap();
        let config = BridgeConfig::load(file.path()).unwrap();
        assert_eq!(config.default_room, "pairing");
    }

    #[test]
    fn test_load_missing_file() {
        let err = BridgeConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
