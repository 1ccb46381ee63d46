//! The tamper classifier.
//!
//! Every check is a pure function of its evidence and the policy: no I/O,
//! no shared state, no errors.  A check returns `None` when there is
//! nothing to report, including when the evidence is too thin to judge.
//!
//! Severity rules:
//!
//! | check        | base     | on a sensitive domain |
//! |--------------|----------|-----------------------|
//! | script       | medium   | high                  |
//! | headers      | high     | high                  |
//! | certificate  | critical | critical              |
//! | cookies      | medium   | high                  |
//! | dns          | critical | critical              |
//! | timing       | low      | medium                |
//! | enhanced     | low      | low                   |

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use vigil_contracts::tamper::{DetectionType, Severity, TamperEvent};

use crate::{
    evidence::{
        CertificateEvidence, CookieEvidence, DnsEvidence, HeaderEvidence, ScriptEvidence,
        TamperEvidence, TimingEvidence,
    },
    policy::ClassifierPolicy,
};

/// Lowercase markers of markup or script smuggled into a header value.
const HEADER_MARKUP: [&str; 6] = [
    "<script",
    "<iframe",
    "<svg",
    "javascript:",
    "vbscript:",
    "data:text/html",
];

/// Wrap `inputs` and `explanation` into the evidence object, with a
/// SHA-256 over the canonical JSON of `inputs`.
pub fn build_evidence<T: Serialize>(inputs: &T, explanation: impl Into<String>) -> Value {
    let inputs = serde_json::to_value(inputs).unwrap_or(Value::Null);
    let canonical = serde_json::to_vec(&inputs).unwrap_or_default();
    let evidence_hash = hex::encode(Sha256::digest(&canonical));
    json!({
        "inputs": inputs,
        "explanation": explanation.into(),
        "evidence_hash": evidence_hash,
    })
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn has_crlf(s: &str) -> bool {
    s.contains(|c: char| c == '\r' || c == '\n')
}

/// Lowercase hex with `:` separators and whitespace removed.
fn normalize_fingerprint(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect::<String>()
        .to_ascii_lowercase()
}

#[derive(Debug, Clone)]
pub struct TamperClassifier {
    policy: ClassifierPolicy,
}

impl Default for TamperClassifier {
    fn default() -> Self {
        Self::new(ClassifierPolicy::default())
    }
}

impl TamperClassifier {
    pub fn new(policy: ClassifierPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ClassifierPolicy {
        &self.policy
    }

    fn event(
        &self,
        domain: &str,
        detection_type: DetectionType,
        severity: Severity,
        evidence: Value,
    ) -> TamperEvent {
        debug!(domain, detection = %detection_type, severity = %severity, "tamper detected");
        TamperEvent {
            domain: domain.to_ascii_lowercase(),
            detection_type,
            evidence,
            severity,
        }
    }

    /// Base severity, stepped up once on a sensitive domain.
    fn escalated(&self, base: Severity, domain: &str) -> Severity {
        if self.policy.is_sensitive(domain) {
            base.escalate()
        } else {
            base
        }
    }

    /// Dispatch to the matching check.
    pub fn classify(&self, evidence: &TamperEvidence) -> Option<TamperEvent> {
        match evidence {
            TamperEvidence::Script(e) => self.classify_script(e),
            TamperEvidence::Headers(e) => self.classify_headers(e),
            TamperEvidence::Certificate(e) => self.classify_certificate(e),
            TamperEvidence::Cookies(e) => self.classify_cookies(e),
            TamperEvidence::Dns(e) => self.classify_dns(e),
            TamperEvidence::Timing(e) => self.classify_timing(e),
        }
    }

    // ── Script content ────────────────────────────────────────────────────────

    /// The first matching pattern decides the detection type; every match
    /// is listed in the evidence.  The script itself is recorded by hash.
    pub fn classify_script(&self, evidence: &ScriptEvidence) -> Option<TamperEvent> {
        let patterns = self.policy.script_patterns();
        let matched: Vec<_> = patterns
            .iter()
            .filter(|p| evidence.script.contains(&p.pattern))
            .collect();
        let first = matched.first()?;

        let inputs = json!({
            "domain": evidence.domain,
            "source": evidence.source,
            "script_sha256": sha256_hex(evidence.script.as_bytes()),
            "script_len": evidence.script.len(),
            "matched_patterns": matched.iter().map(|p| &p.pattern).collect::<Vec<_>>(),
        });
        let explanation = format!(
            "script contains {} suspicious pattern(s); first match '{}'",
            matched.len(),
            first.pattern
        );

        Some(self.event(
            &evidence.domain,
            first.detection,
            self.escalated(Severity::Medium, &evidence.domain),
            build_evidence(&inputs, explanation),
        ))
    }

    // ── Headers ───────────────────────────────────────────────────────────────

    /// CR/LF anywhere in a header name or value, or markup / script URIs in
    /// a value.  Always high.
    pub fn classify_headers(&self, evidence: &HeaderEvidence) -> Option<TamperEvent> {
        let mut findings = Vec::new();
        for (name, value) in &evidence.headers {
            if has_crlf(name) || has_crlf(value) {
                findings.push(json!({ "header": name, "issue": "crlf" }));
                continue;
            }
            let lower = value.to_ascii_lowercase();
            if let Some(marker) = HEADER_MARKUP.iter().find(|m| lower.contains(*m)) {
                findings.push(json!({ "header": name, "issue": "markup", "marker": marker }));
            }
        }
        if findings.is_empty() {
            return None;
        }

        let explanation = format!(
            "{} header(s) carry CR/LF or embedded markup (possible header or response splitting)",
            findings.len()
        );
        // Cookie values are recorded by hash only.
        let headers: BTreeMap<&String, String> = evidence
            .headers
            .iter()
            .map(|(name, value)| {
                let shown = if name.eq_ignore_ascii_case("cookie")
                    || name.eq_ignore_ascii_case("set-cookie")
                {
                    format!("sha256:{}", sha256_hex(value.as_bytes()))
                } else {
                    value.clone()
                };
                (name, shown)
            })
            .collect();
        let inputs = json!({
            "domain": evidence.domain,
            "headers": headers,
            "findings": findings,
        });
        Some(self.event(
            &evidence.domain,
            DetectionType::HeaderInjection,
            Severity::High,
            build_evidence(&inputs, explanation),
        ))
    }

    // ── Certificate pin ───────────────────────────────────────────────────────

    /// Any difference from the pinned fingerprint is critical.  Without a
    /// pin or an observation there is nothing to compare.
    pub fn classify_certificate(&self, evidence: &CertificateEvidence) -> Option<TamperEvent> {
        let expected = normalize_fingerprint(&evidence.expected_fingerprint);
        let observed = normalize_fingerprint(&evidence.observed_fingerprint);
        if expected.is_empty() || observed.is_empty() || expected == observed {
            return None;
        }

        let inputs = json!({
            "domain": evidence.domain,
            "expected_fingerprint": expected,
            "observed_fingerprint": observed,
        });
        Some(self.event(
            &evidence.domain,
            DetectionType::CertificateMismatch,
            Severity::Critical,
            build_evidence(
                &inputs,
                "presented certificate does not match the pinned fingerprint (possible interception)",
            ),
        ))
    }

    // ── Cookies ───────────────────────────────────────────────────────────────

    /// Missing, unexpected, or changed cookies.  Only names reach the
    /// evidence.
    pub fn classify_cookies(&self, evidence: &CookieEvidence) -> Option<TamperEvent> {
        let missing: Vec<&String> = evidence
            .expected
            .keys()
            .filter(|k| !evidence.observed.contains_key(*k))
            .collect();
        let unexpected: Vec<&String> = evidence
            .observed
            .keys()
            .filter(|k| !evidence.expected.contains_key(*k))
            .collect();
        let changed: Vec<&String> = evidence
            .expected
            .iter()
            .filter(|(k, v)| evidence.observed.get(*k).is_some_and(|o| o != *v))
            .map(|(k, _)| k)
            .collect();

        if missing.is_empty() && unexpected.is_empty() && changed.is_empty() {
            return None;
        }

        let explanation = format!(
            "cookie jar diverged: {} missing, {} unexpected, {} changed",
            missing.len(),
            unexpected.len(),
            changed.len()
        );
        let inputs = json!({
            "domain": evidence.domain,
            "missing": missing,
            "unexpected": unexpected,
            "changed": changed,
        });
        Some(self.event(
            &evidence.domain,
            DetectionType::CookieTampering,
            self.escalated(Severity::Medium, &evidence.domain),
            build_evidence(&inputs, explanation),
        ))
    }

    // ── DNS ───────────────────────────────────────────────────────────────────

    /// Any difference between the address sets is critical.  An empty
    /// expected set means there is no baseline.
    pub fn classify_dns(&self, evidence: &DnsEvidence) -> Option<TamperEvent> {
        let expected: BTreeSet<String> = evidence
            .expected_addresses
            .iter()
            .map(|a| a.trim().to_ascii_lowercase())
            .filter(|a| !a.is_empty())
            .collect();
        if expected.is_empty() {
            return None;
        }
        let observed: BTreeSet<String> = evidence
            .observed_addresses
            .iter()
            .map(|a| a.trim().to_ascii_lowercase())
            .filter(|a| !a.is_empty())
            .collect();
        if expected == observed {
            return None;
        }

        let unexpected: Vec<&String> = observed.difference(&expected).collect();
        let missing: Vec<&String> = expected.difference(&observed).collect();
        let explanation = format!(
            "resolved addresses differ from baseline: {} unexpected, {} missing",
            unexpected.len(),
            missing.len()
        );
        let inputs = json!({
            "domain": evidence.domain,
            "expected": expected,
            "observed": observed,
            "unexpected": unexpected,
            "missing": missing,
        });
        Some(self.event(
            &evidence.domain,
            DetectionType::DnsSpoofing,
            Severity::Critical,
            build_evidence(&inputs, explanation),
        ))
    }

    // ── Timing ────────────────────────────────────────────────────────────────

    /// Observed strictly above `timing_multiplier × expected`.  A zero
    /// baseline is no baseline.
    pub fn classify_timing(&self, evidence: &TimingEvidence) -> Option<TamperEvent> {
        if evidence.expected_ms == 0 {
            return None;
        }
        let threshold = evidence.expected_ms as f64 * self.policy.timing_multiplier;
        if (evidence.observed_ms as f64) <= threshold {
            return None;
        }

        let explanation = format!(
            "{} took {}ms, over {:.1}x the {}ms baseline",
            evidence.operation,
            evidence.observed_ms,
            self.policy.timing_multiplier,
            evidence.expected_ms
        );
        let inputs = json!({
            "domain": evidence.domain,
            "operation": evidence.operation,
            "expected_ms": evidence.expected_ms,
            "observed_ms": evidence.observed_ms,
            "multiplier": self.policy.timing_multiplier,
        });
        Some(self.event(
            &evidence.domain,
            DetectionType::TimingAnomaly,
            self.escalated(Severity::Low, &evidence.domain),
            build_evidence(&inputs, explanation),
        ))
    }

    // ── Enhanced monitoring ───────────────────────────────────────────────────

    /// A low-severity marker for domains under enhanced monitoring.
    pub fn flag_enhanced_monitoring(&self, domain: &str) -> Option<TamperEvent> {
        if !self.policy.is_enhanced_monitoring(domain) {
            return None;
        }
        let inputs = json!({ "domain": domain });
        Some(self.event(
            domain,
            DetectionType::EnhancedMonitoring,
            Severity::Low,
            build_evidence(&inputs, "domain is under enhanced monitoring"),
        ))
    }
}
