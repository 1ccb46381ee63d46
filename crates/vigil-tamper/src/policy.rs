//! Classifier policy and its TOML schema.
//!
//! Thresholds and domain lists are heuristics, so they live in
//! configuration rather than code.  Every field has a default; an empty
//! TOML document yields the built-in policy.
//!
//! ```toml
//! sensitive_domains = ["bank.example", "pay.example"]
//! enhanced_monitoring_domains = ["watched.example"]
//! timing_multiplier = 2.0
//!
//! [[extra_script_patterns]]
//! pattern = "atob("
//! detection = "script_injection"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use vigil_contracts::{
    error::{VigilError, VigilResult},
    tamper::DetectionType,
};

/// A substring the script scan looks for, and what finding it implies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptPattern {
    pub pattern: String,
    pub detection: DetectionType,
}

impl ScriptPattern {
    fn new(pattern: &str, detection: DetectionType) -> Self {
        Self {
            pattern: pattern.to_string(),
            detection,
        }
    }
}

/// Built-in script patterns, checked in this order.
pub fn default_script_patterns() -> Vec<ScriptPattern> {
    vec![
        ScriptPattern::new("eval(", DetectionType::ScriptInjection),
        ScriptPattern::new("new Function(", DetectionType::ScriptInjection),
        ScriptPattern::new("document.write(", DetectionType::DomManipulation),
        ScriptPattern::new("innerHTML", DetectionType::DomManipulation),
        ScriptPattern::new("outerHTML", DetectionType::DomManipulation),
        ScriptPattern::new("insertAdjacentHTML", DetectionType::DomManipulation),
        ScriptPattern::new("navigator.userAgent", DetectionType::UserAgentAccess),
        ScriptPattern::new("XMLHttpRequest.prototype", DetectionType::FetchInterception),
        ScriptPattern::new("window.fetch =", DetectionType::FetchInterception),
    ]
}

fn default_sensitive_domains() -> Vec<String> {
    [
        "paypal.com",
        "accounts.google.com",
        "login.microsoftonline.com",
        "appleid.apple.com",
        "chase.com",
        "bankofamerica.com",
        "wellsfargo.com",
    ]
    .iter()
    .map(|d| d.to_string())
    .collect()
}

fn default_timing_multiplier() -> f64 {
    2.0
}

/// Tunables for `TamperClassifier`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierPolicy {
    /// Domains whose findings are escalated one severity step.  A listed
    /// domain also covers its subdomains.
    #[serde(default = "default_sensitive_domains")]
    pub sensitive_domains: Vec<String>,

    /// Domains that always produce a low-severity `EnhancedMonitoring`
    /// event when seen.
    #[serde(default)]
    pub enhanced_monitoring_domains: Vec<String>,

    /// A timing anomaly is flagged when observed > multiplier × expected.
    #[serde(default = "default_timing_multiplier")]
    pub timing_multiplier: f64,

    /// Checked after the built-in patterns.
    #[serde(default)]
    pub extra_script_patterns: Vec<ScriptPattern>,
}

impl Default for ClassifierPolicy {
    fn default() -> Self {
        Self {
            sensitive_domains: default_sensitive_domains(),
            enhanced_monitoring_domains: Vec::new(),
            timing_multiplier: default_timing_multiplier(),
            extra_script_patterns: Vec::new(),
        }
    }
}

impl ClassifierPolicy {
    /// Parse `s` as TOML.
    ///
    /// Returns `ConfigError` on malformed TOML, a schema mismatch, or a
    /// timing multiplier that is not a finite number of at least 1.
    pub fn from_toml_str(s: &str) -> VigilResult<Self> {
        let policy: ClassifierPolicy = toml::from_str(s).map_err(|e| VigilError::ConfigError {
            reason: format!("failed to parse classifier policy TOML: {}", e),
        })?;
        policy.validate()?;
        Ok(policy)
    }

    pub fn from_file(path: &Path) -> VigilResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| VigilError::ConfigError {
            reason: format!("failed to read policy file '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> VigilResult<()> {
        if !self.timing_multiplier.is_finite() || self.timing_multiplier < 1.0 {
            return Err(VigilError::ConfigError {
                reason: format!(
                    "timing_multiplier must be a finite number >= 1, got {}",
                    self.timing_multiplier
                ),
            });
        }
        if let Some(empty) = self.extra_script_patterns.iter().find(|p| p.pattern.is_empty()) {
            return Err(VigilError::ConfigError {
                reason: format!("empty script pattern for '{}'", empty.detection),
            });
        }
        Ok(())
    }

    pub fn is_sensitive(&self, domain: &str) -> bool {
        matches_any(&self.sensitive_domains, domain)
    }

    pub fn is_enhanced_monitoring(&self, domain: &str) -> bool {
        matches_any(&self.enhanced_monitoring_domains, domain)
    }

    /// Built-in patterns followed by the configured extras.
    pub fn script_patterns(&self) -> Vec<ScriptPattern> {
        let mut patterns = default_script_patterns();
        patterns.extend(self.extra_script_patterns.iter().cloned());
        patterns
    }
}

/// Exact match or subdomain-suffix match, case-insensitive.
fn matches_any(list: &[String], domain: &str) -> bool {
    let domain = domain.trim_end_matches('.').to_ascii_lowercase();
    if domain.is_empty() {
        return false;
    }
    list.iter().any(|entry| {
        let entry = entry.trim_end_matches('.').to_ascii_lowercase();
        !entry.is_empty()
            && (domain == entry
                || (domain.len() > entry.len()
                    && domain.ends_with(&entry)
                    && domain.as_bytes()[domain.len() - entry.len() - 1] == b'.'))
    })
}
