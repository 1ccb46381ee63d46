//! Tamper events and their severity scale.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How serious a detection is.  Ordered: `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// One step up, saturating at `Critical`.
    pub fn escalate(self) -> Self {
        match self {
            Severity::Low => Severity::Medium,
            Severity::Medium => Severity::High,
            Severity::High | Severity::Critical => Severity::Critical,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// The fixed set of things the classifier can detect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionType {
    ScriptInjection,
    DomManipulation,
    UserAgentAccess,
    HeaderInjection,
    CertificateMismatch,
    CookieTampering,
    DnsSpoofing,
    TimingAnomaly,
    FetchInterception,
    EnhancedMonitoring,
}

impl fmt::Display for DetectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DetectionType::ScriptInjection => "script_injection",
            DetectionType::DomManipulation => "dom_manipulation",
            DetectionType::UserAgentAccess => "user_agent_access",
            DetectionType::HeaderInjection => "header_injection",
            DetectionType::CertificateMismatch => "certificate_mismatch",
            DetectionType::CookieTampering => "cookie_tampering",
            DetectionType::DnsSpoofing => "dns_spoofing",
            DetectionType::TimingAnomaly => "timing_anomaly",
            DetectionType::FetchInterception => "fetch_interception",
            DetectionType::EnhancedMonitoring => "enhanced_monitoring",
        };
        f.write_str(s)
    }
}

/// A classified detection, ready to be appended to the tamper stream.
///
/// `evidence` is free-form but the classifier always fills it with an
/// object of the shape `{ "inputs": …, "explanation": …, "evidence_hash": … }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TamperEvent {
    pub domain: String,
    pub detection_type: DetectionType,
    pub evidence: serde_json::Value,
    pub severity: Severity,
}
