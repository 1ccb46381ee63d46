//! `vigil.toml`: one file covering every component the CLI wires up.
//!
//! ```toml
//! [ledger]
//! data_dir = "./vigil-data"
//!
//! [tracker]
//! abandon_after_secs = 120
//! policy = "record_incomplete"
//!
//! [classifier]
//! sensitive_domains = ["bank.example"]
//! timing_multiplier = 3.0
//!
//! [integrity]
//! checkpoint_interval_secs = 300
//! ```
//!
//! Every section and key is optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use vigil_contracts::error::{VigilError, VigilResult};
use vigil_tamper::ClassifierPolicy;
use vigil_tracker::{AbandonPolicy, TrackerConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSection {
    pub data_dir: PathBuf,
}

impl Default for LedgerSection {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("vigil-data"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSection {
    pub abandon_after_secs: u64,
    pub policy: AbandonPolicy,
    pub completed_window: usize,
}

impl Default for TrackerSection {
    fn default() -> Self {
        let defaults = TrackerConfig::default();
        Self {
            abandon_after_secs: defaults.abandon_after.as_secs(),
            policy: defaults.policy,
            completed_window: defaults.completed_window,
        }
    }
}

impl TrackerSection {
    pub fn to_config(&self) -> TrackerConfig {
        TrackerConfig {
            abandon_after: Duration::from_secs(self.abandon_after_secs),
            policy: self.policy,
            completed_window: self.completed_window,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegritySection {
    /// Zero disables periodic checkpoints.
    pub checkpoint_interval_secs: u64,
}

impl Default for IntegritySection {
    fn default() -> Self {
        Self {
            checkpoint_interval_secs: 300,
        }
    }
}

impl IntegritySection {
    pub fn interval(&self) -> Option<Duration> {
        match self.checkpoint_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VigilConfig {
    pub ledger: LedgerSection,
    pub tracker: TrackerSection,
    pub classifier: ClassifierPolicy,
    pub integrity: IntegritySection,
}

impl VigilConfig {
    pub fn from_toml_str(s: &str) -> VigilResult<Self> {
        let config: VigilConfig = toml::from_str(s).map_err(|e| VigilError::ConfigError {
            reason: format!("failed to parse config TOML: {}", e),
        })?;
        config.classifier.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> VigilResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| VigilError::ConfigError {
            reason: format!("failed to read config file '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = VigilConfig::from_toml_str("").unwrap();
        assert_eq!(config, VigilConfig::default());
        assert_eq!(config.tracker.to_config().abandon_after, Duration::from_secs(120));
        assert_eq!(config.integrity.interval(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_sections_parse() {
        let config = VigilConfig::from_toml_str(
            r#"
            [ledger]
            data_dir = "/var/lib/vigil"

            [tracker]
            abandon_after_secs = 30
            policy = "discard"

            [classifier]
            enhanced_monitoring_domains = ["watch.example"]
            timing_multiplier = 4.0

            [integrity]
            checkpoint_interval_secs = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.ledger.data_dir, PathBuf::from("/var/lib/vigil"));
        let tracker = config.tracker.to_config();
        assert_eq!(tracker.abandon_after, Duration::from_secs(30));
        assert_eq!(tracker.policy, AbandonPolicy::Discard);
        assert_eq!(tracker.completed_window, TrackerConfig::default().completed_window);
        assert!(config.classifier.is_enhanced_monitoring("watch.example"));
        assert_eq!(config.classifier.timing_multiplier, 4.0);
        assert_eq!(config.integrity.interval(), None);
    }

    /// The classifier section is validated like a standalone policy file.
    #[test]
    fn test_invalid_classifier_rejected() {
        let err = VigilConfig::from_toml_str("[classifier]\ntiming_multiplier = 0.5\n").unwrap_err();
        assert!(matches!(err, VigilError::ConfigError { .. }));
    }

    #[test]
    fn test_malformed_toml_rejected() {
        let err = VigilConfig::from_toml_str("[tracker\n").unwrap_err();
        assert!(err.to_string().contains("failed to parse config TOML"));
    }

    #[test]
    fn test_missing_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = VigilConfig::from_file(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, VigilError::ConfigError { .. }));
    }
}
