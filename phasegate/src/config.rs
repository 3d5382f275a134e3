//! Configuration for executors, verification, storage and logging.
//!
//! Every field has a serde default, so a partial document (or an empty one)
//! yields a usable configuration:
//!
//! ```yaml
//! executor:
//!   max_parallel: 8
//! artifacts:
//!   root: /var/lib/phasegate/artifacts
//! logging:
//!   json: true
//! ```

use crate::errors::PhasegateError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhasegateConfig {
    /// Scheduler settings.
    #[serde(default)]
    pub executor: ExecutorConfig,
    /// Contract verification settings.
    #[serde(default)]
    pub verification: VerificationConfig,
    /// Artifact store settings.
    #[serde(default)]
    pub artifacts: ArtifactStoreConfig,
    /// Checkpoint persistence settings.
    #[serde(default)]
    pub checkpoints: CheckpointConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl PhasegateConfig {
    /// Parses and validates a JSON configuration document.
    pub fn from_json_str(input: &str) -> Result<Self, PhasegateError> {
        let config: Self = serde_json::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses and validates a YAML configuration document.
    pub fn from_yaml_str(input: &str) -> Result<Self, PhasegateError> {
        let config: Self = serde_yaml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration file, choosing the format from its extension.
    ///
    /// `.yaml` and `.yml` are parsed as YAML; everything else as JSON.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, PhasegateError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml" | "yml") => Self::from_yaml_str(&input),
            _ => Self::from_json_str(&input),
        }
    }

    /// Rejects values the executor cannot run with.
    pub fn validate(&self) -> Result<(), PhasegateError> {
        if self.executor.max_parallel == 0 {
            return Err(PhasegateError::Config(
                "executor.max_parallel must be at least 1".to_string(),
            ));
        }
        if self.executor.event_queue_size == 0 {
            return Err(PhasegateError::Config(
                "executor.event_queue_size must be at least 1".to_string(),
            ));
        }
        if let Some(timeout) = self.executor.node_timeout_seconds {
            if !(timeout.is_finite() && timeout > 0.0) {
                return Err(PhasegateError::Config(format!(
                    "executor.node_timeout_seconds must be positive, got {timeout}"
                )));
            }
        }
        let validator_timeout = self.verification.validator_timeout_seconds;
        if !(validator_timeout.is_finite() && validator_timeout > 0.0) {
            return Err(PhasegateError::Config(format!(
                "verification.validator_timeout_seconds must be positive, got {validator_timeout}"
            )));
        }
        if self.logging.filter.trim().is_empty() {
            return Err(PhasegateError::Config(
                "logging.filter must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Scheduler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Maximum number of node attempts in flight at once.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Per-attempt timeout; a timed-out attempt is a retryable failure.
    #[serde(default)]
    pub node_timeout_seconds: Option<f64>,
    /// Capacity of the bounded event queue.
    #[serde(default = "default_event_queue_size")]
    pub event_queue_size: usize,
}

fn default_max_parallel() -> usize {
    4
}

fn default_event_queue_size() -> usize {
    1024
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            node_timeout_seconds: None,
            event_queue_size: default_event_queue_size(),
        }
    }
}

impl ExecutorConfig {
    /// Sets the parallelism cap.
    #[must_use]
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_node_timeout(mut self, seconds: f64) -> Self {
        self.node_timeout_seconds = Some(seconds);
        self
    }

    /// Sets the event queue capacity.
    #[must_use]
    pub fn with_event_queue_size(mut self, size: usize) -> Self {
        self.event_queue_size = size;
        self
    }

    /// Returns the per-attempt timeout as a `Duration`.
    #[must_use]
    pub fn node_timeout(&self) -> Option<Duration> {
        self.node_timeout_seconds
            .filter(|s| s.is_finite() && *s > 0.0)
            .map(Duration::from_secs_f64)
    }
}

/// Contract verification settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Upper bound on a single validator invocation.
    #[serde(default = "default_validator_timeout")]
    pub validator_timeout_seconds: f64,
}

fn default_validator_timeout() -> f64 {
    30.0
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            validator_timeout_seconds: default_validator_timeout(),
        }
    }
}

impl VerificationConfig {
    /// Sets the validator timeout.
    #[must_use]
    pub fn with_validator_timeout(mut self, seconds: f64) -> Self {
        self.validator_timeout_seconds = seconds;
        self
    }

    /// Returns the validator timeout as a `Duration`.
    #[must_use]
    pub fn validator_timeout(&self) -> Duration {
        if self.validator_timeout_seconds.is_finite() && self.validator_timeout_seconds > 0.0 {
            Duration::from_secs_f64(self.validator_timeout_seconds)
        } else {
            Duration::from_secs_f64(default_validator_timeout())
        }
    }
}

/// Artifact store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactStoreConfig {
    /// Root directory of the content-addressable store.
    #[serde(default = "default_artifact_root")]
    pub root: PathBuf,
}

fn default_artifact_root() -> PathBuf {
    PathBuf::from(".phasegate/artifacts")
}

impl Default for ArtifactStoreConfig {
    fn default() -> Self {
        Self {
            root: default_artifact_root(),
        }
    }
}

/// Checkpoint persistence settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Directory for checkpoint files; checkpoints stay in memory when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_filter")]
    pub filter: String,
    /// Emit JSON lines instead of the compact text format.
    #[serde(default)]
    pub json: bool,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
        }
    }
}

impl LoggingConfig {
    /// Sets the default filter directive.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Enables or disables JSON output.
    #[must_use]
    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = PhasegateConfig::default();
        assert_eq!(config.executor.max_parallel, 4);
        assert_eq!(config.executor.event_queue_size, 1024);
        assert_eq!(config.executor.node_timeout(), None);
        assert_eq!(config.verification.validator_timeout(), Duration::from_secs(30));
        assert_eq!(config.artifacts.root, PathBuf::from(".phasegate/artifacts"));
        assert_eq!(config.checkpoints.dir, None);
        assert_eq!(config.logging.filter, "info");
        assert!(!config.logging.json);
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let config = PhasegateConfig::from_json_str("{}").unwrap();
        assert_eq!(config, PhasegateConfig::default());
    }

    #[test]
    fn test_partial_yaml() {
        let config = PhasegateConfig::from_yaml_str(
            "executor:\n  max_parallel: 8\n  node_timeout_seconds: 2.5\nlogging:\n  json: true\n",
        )
        .unwrap();
        assert_eq!(config.executor.max_parallel, 8);
        assert_eq!(config.executor.node_timeout(), Some(Duration::from_millis(2500)));
        assert_eq!(config.executor.event_queue_size, 1024);
        assert!(config.logging.json);
    }

    #[test]
    fn test_validate_rejects_zero_parallelism() {
        let err = PhasegateConfig::from_json_str(r#"{"executor": {"max_parallel": 0}}"#).unwrap_err();
        assert!(matches!(err, PhasegateError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_non_positive_timeouts() {
        let mut config = PhasegateConfig::default();
        config.verification.validator_timeout_seconds = 0.0;
        assert!(config.validate().is_err());

        let config = PhasegateConfig {
            executor: ExecutorConfig::default().with_node_timeout(-1.0),
            ..PhasegateConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_path_dispatches_on_extension() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("phasegate.yml");
        std::fs::write(&yaml, "checkpoints:\n  dir: /tmp/checkpoints\n").unwrap();
        let config = PhasegateConfig::from_path(&yaml).unwrap();
        assert_eq!(config.checkpoints.dir, Some(PathBuf::from("/tmp/checkpoints")));

        let json = dir.path().join("phasegate.json");
        std::fs::write(&json, r#"{"verification": {"validator_timeout_seconds": 5}}"#).unwrap();
        let config = PhasegateConfig::from_path(&json).unwrap();
        assert_eq!(config.verification.validator_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_yaml_is_reported() {
        let err = PhasegateConfig::from_yaml_str("executor: [1, 2").unwrap_err();
        assert!(matches!(err, PhasegateError::Yaml(_)));
    }
}
