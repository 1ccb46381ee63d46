//! # vigil-tamper
//!
//! Tamper classification for the Vigil forensic ledger.
//!
//! ## Overview
//!
//! [`TamperClassifier`] runs six independent checks (script content,
//! headers, certificate pin, cookies, DNS, timing) plus an
//! enhanced-monitoring flag.  Each check is a pure function of its typed
//! evidence and a [`ClassifierPolicy`] loaded from TOML, and yields zero or
//! one [`TamperEvent`](vigil_contracts::tamper::TamperEvent).
//! [`TamperMonitor`] appends every positive result to the tamper stream.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::path::Path;
//! use vigil_tamper::{ClassifierPolicy, TamperClassifier, TamperMonitor};
//!
//! let policy = ClassifierPolicy::from_file(Path::new("vigil.classifier.toml"))?;
//! let monitor = TamperMonitor::new(TamperClassifier::new(policy), ledger.clone());
//! monitor.inspect(&evidence)?;
//! ```

pub mod classifier;
pub mod evidence;
pub mod monitor;
pub mod policy;

pub use classifier::{build_evidence, TamperClassifier};
pub use evidence::{
    CertificateEvidence, CookieEvidence, DnsEvidence, HeaderEvidence, ScriptEvidence,
    TamperEvidence, TimingEvidence,
};
pub use monitor::TamperMonitor;
pub use policy::{default_script_patterns, ClassifierPolicy, ScriptPattern};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    use vigil_contracts::{
        error::{VigilError, VigilResult},
        payload::{RecordPayload, Submission},
        stream::StreamId,
        tamper::{DetectionType, Severity},
    };
    use vigil_core::traits::AuditSink;

    use super::*;

    // ── Helpers ───────────────────────────────────────────────────────────────

    /// Classifier with `bank.example` as the only sensitive domain.
    fn classifier() -> TamperClassifier {
        let policy = ClassifierPolicy::from_toml_str(
            r#"
            sensitive_domains = ["bank.example"]
            enhanced_monitoring_domains = ["watched.example"]
        "#,
        )
        .unwrap();
        TamperClassifier::new(policy)
    }

    fn headers(pairs: &[(&str, &str)]) -> HeaderEvidence {
        HeaderEvidence {
            domain: "shop.example".to_string(),
            headers: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn script(domain: &str, body: &str) -> ScriptEvidence {
        ScriptEvidence {
            domain: domain.to_string(),
            script: body.to_string(),
            source: Some("inline".to_string()),
        }
    }

    fn cookies(domain: &str, expected: &[(&str, &str)], observed: &[(&str, &str)]) -> CookieEvidence {
        let map = |pairs: &[(&str, &str)]| -> BTreeMap<String, String> {
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        };
        CookieEvidence {
            domain: domain.to_string(),
            expected: map(expected),
            observed: map(observed),
        }
    }

    fn timing(domain: &str, expected_ms: u64, observed_ms: u64) -> TimingEvidence {
        TimingEvidence {
            domain: domain.to_string(),
            operation: "tls_handshake".to_string(),
            expected_ms,
            observed_ms,
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        appended: Mutex<Vec<(StreamId, Submission)>>,
    }

    impl AuditSink for RecordingSink {
        fn append(&self, stream: StreamId, submission: Submission) -> VigilResult<u64> {
            let mut appended = self.appended.lock().unwrap();
            appended.push((stream, submission));
            Ok(appended.len() as u64)
        }
    }

    // ── 1. headers ────────────────────────────────────────────────────────────

    /// A line feed in a header value is header injection, severity high.
    #[test]
    fn test_header_line_feed() {
        let event = classifier()
            .classify_headers(&headers(&[("X-Forwarded-For", "1.2.3.4\nSet-Cookie: a=b")]))
            .unwrap();
        assert_eq!(event.detection_type, DetectionType::HeaderInjection);
        assert_eq!(event.severity, Severity::High);
    }

    #[test]
    fn test_header_markup_and_clean() {
        let c = classifier();
        let event = c
            .classify_headers(&headers(&[("Referer", "JavaScript:alert(1)")]))
            .unwrap();
        assert_eq!(event.severity, Severity::High);
        assert_eq!(event.evidence["inputs"]["findings"][0]["issue"], "markup");

        assert!(c
            .classify_headers(&headers(&[("Accept", "text/html"), ("Host", "shop.example")]))
            .is_none());
        assert!(c.classify_headers(&headers(&[])).is_none());
    }

    /// Cookie values in offending headers are kept out of the evidence.
    #[test]
    fn test_header_evidence_hides_cookies() {
        let event = classifier()
            .classify_headers(&headers(&[("Cookie", "sid=secret\r\n")]))
            .unwrap();
        let text = event.evidence.to_string();
        assert!(!text.contains("secret"));
    }

    // ── 2. script ─────────────────────────────────────────────────────────────

    #[test]
    fn test_script_first_pattern_decides_type() {
        let c = classifier();
        let event = c
            .classify_script(&script("shop.example", "el.innerHTML = x; eval(y)"))
            .unwrap();
        // `eval(` precedes `innerHTML` in the pattern list.
        assert_eq!(event.detection_type, DetectionType::ScriptInjection);
        assert_eq!(event.severity, Severity::Medium);
        assert_eq!(
            event.evidence["inputs"]["matched_patterns"]
                .as_array()
                .unwrap()
                .len(),
            2
        );

        let ua = c
            .classify_script(&script("shop.example", "send(navigator.userAgent)"))
            .unwrap();
        assert_eq!(ua.detection_type, DetectionType::UserAgentAccess);

        let hook = c
            .classify_script(&script("shop.example", "window.fetch = wrap(window.fetch)"))
            .unwrap();
        assert_eq!(hook.detection_type, DetectionType::FetchInterception);

        assert!(c.classify_script(&script("shop.example", "console.log(1)")).is_none());
    }

    /// Sensitive domains, including subdomains, escalate medium to high.
    #[test]
    fn test_script_sensitive_escalation() {
        let c = classifier();
        for domain in ["bank.example", "login.bank.example", "BANK.example"] {
            let event = c.classify_script(&script(domain, "eval(x)")).unwrap();
            assert_eq!(event.severity, Severity::High, "domain {}", domain);
        }
        let event = c.classify_script(&script("notbank.example", "eval(x)")).unwrap();
        assert_eq!(event.severity, Severity::Medium);
    }

    #[test]
    fn test_extra_script_patterns() {
        let policy = ClassifierPolicy::from_toml_str(
            r#"
            [[extra_script_patterns]]
            pattern = "atob("
            detection = "script_injection"
        "#,
        )
        .unwrap();
        let c = TamperClassifier::new(policy);
        let event = c.classify_script(&script("a.example", "run(atob(p))")).unwrap();
        assert_eq!(event.detection_type, DetectionType::ScriptInjection);
    }

    // ── 3. certificate ────────────────────────────────────────────────────────

    #[test]
    fn test_certificate_mismatch_critical() {
        let c = classifier();
        let mismatch = CertificateEvidence {
            domain: "shop.example".to_string(),
            expected_fingerprint: "AA:BB:CC".to_string(),
            observed_fingerprint: "aabbcd".to_string(),
        };
        let event = c.classify_certificate(&mismatch).unwrap();
        assert_eq!(event.detection_type, DetectionType::CertificateMismatch);
        assert_eq!(event.severity, Severity::Critical);

        // Separators and case do not matter.
        let same = CertificateEvidence {
            observed_fingerprint: "aabbcc".to_string(),
            ..mismatch.clone()
        };
        assert!(c.classify_certificate(&same).is_none());

        // No pin, no finding.
        let unpinned = CertificateEvidence {
            expected_fingerprint: String::new(),
            ..mismatch
        };
        assert!(c.classify_certificate(&unpinned).is_none());
    }

    // ── 4. cookies ────────────────────────────────────────────────────────────

    #[test]
    fn test_cookie_divergence() {
        let c = classifier();
        let event = c
            .classify_cookies(&cookies(
                "shop.example",
                &[("sid", "1"), ("pref", "dark")],
                &[("sid", "2"), ("tracker", "x")],
            ))
            .unwrap();
        assert_eq!(event.detection_type, DetectionType::CookieTampering);
        assert_eq!(event.severity, Severity::Medium);
        let inputs = &event.evidence["inputs"];
        assert_eq!(inputs["missing"][0], "pref");
        assert_eq!(inputs["unexpected"][0], "tracker");
        assert_eq!(inputs["changed"][0], "sid");
        assert!(!event.evidence.to_string().contains("dark"));

        let sensitive = c
            .classify_cookies(&cookies("bank.example", &[("sid", "1")], &[]))
            .unwrap();
        assert_eq!(sensitive.severity, Severity::High);

        assert!(c
            .classify_cookies(&cookies("shop.example", &[("sid", "1")], &[("sid", "1")]))
            .is_none());
    }

    // ── 5. dns ────────────────────────────────────────────────────────────────

    #[test]
    fn test_dns_set_difference() {
        let c = classifier();
        let evidence = DnsEvidence {
            domain: "shop.example".to_string(),
            expected_addresses: vec!["203.0.113.1".to_string(), "203.0.113.2".to_string()],
            observed_addresses: vec!["203.0.113.2".to_string(), "198.51.100.9".to_string()],
        };
        let event = c.classify_dns(&evidence).unwrap();
        assert_eq!(event.detection_type, DetectionType::DnsSpoofing);
        assert_eq!(event.severity, Severity::Critical);
        assert_eq!(event.evidence["inputs"]["unexpected"][0], "198.51.100.9");

        // Order and duplicates do not matter.
        let reordered = DnsEvidence {
            observed_addresses: vec![
                "203.0.113.2".to_string(),
                "203.0.113.1".to_string(),
                "203.0.113.1".to_string(),
            ],
            ..evidence.clone()
        };
        assert!(c.classify_dns(&reordered).is_none());

        let no_baseline = DnsEvidence {
            expected_addresses: Vec::new(),
            ..evidence
        };
        assert!(c.classify_dns(&no_baseline).is_none());
    }

    // ── 6. timing ─────────────────────────────────────────────────────────────

    #[test]
    fn test_timing_threshold() {
        let c = classifier();
        assert!(c.classify_timing(&timing("shop.example", 100, 200)).is_none());
        let event = c.classify_timing(&timing("shop.example", 100, 201)).unwrap();
        assert_eq!(event.detection_type, DetectionType::TimingAnomaly);
        assert_eq!(event.severity, Severity::Low);

        let sensitive = c.classify_timing(&timing("bank.example", 100, 500)).unwrap();
        assert_eq!(sensitive.severity, Severity::Medium);

        assert!(c.classify_timing(&timing("shop.example", 0, 500)).is_none());
    }

    #[test]
    fn test_timing_multiplier_configurable() {
        let policy = ClassifierPolicy::from_toml_str("timing_multiplier = 3.0").unwrap();
        let c = TamperClassifier::new(policy);
        assert!(c.classify_timing(&timing("a.example", 100, 250)).is_none());
        assert!(c.classify_timing(&timing("a.example", 100, 301)).is_some());
    }

    // ── 7. enhanced monitoring ────────────────────────────────────────────────

    #[test]
    fn test_enhanced_monitoring() {
        let c = classifier();
        let event = c.flag_enhanced_monitoring("cdn.watched.example").unwrap();
        assert_eq!(event.detection_type, DetectionType::EnhancedMonitoring);
        assert_eq!(event.severity, Severity::Low);
        assert!(c.flag_enhanced_monitoring("other.example").is_none());
    }

    // ── 8. evidence ───────────────────────────────────────────────────────────

    /// Evidence carries inputs, an explanation, and a stable hash.
    #[test]
    fn test_evidence_shape_and_hash() {
        let c = classifier();
        let a = c.classify_timing(&timing("shop.example", 10, 50)).unwrap();
        let b = c.classify_timing(&timing("shop.example", 10, 50)).unwrap();
        let other = c.classify_timing(&timing("shop.example", 10, 51)).unwrap();

        assert!(a.evidence["explanation"].as_str().unwrap().contains("tls_handshake"));
        let hash = a.evidence["evidence_hash"].as_str().unwrap();
        assert_eq!(hash.len(), 64);
        assert_eq!(a.evidence["evidence_hash"], b.evidence["evidence_hash"]);
        assert_ne!(a.evidence["evidence_hash"], other.evidence["evidence_hash"]);
    }

    // ── 9. policy loading ─────────────────────────────────────────────────────

    #[test]
    fn test_policy_defaults() {
        let policy = ClassifierPolicy::from_toml_str("").unwrap();
        assert_eq!(policy, ClassifierPolicy::default());
        assert!(policy.is_sensitive("www.paypal.com"));
        assert_eq!(policy.timing_multiplier, 2.0);
    }

    #[test]
    fn test_policy_errors() {
        match ClassifierPolicy::from_toml_str("this is not valid toml ][[[") {
            Err(VigilError::ConfigError { reason }) => {
                assert!(reason.contains("failed to parse classifier policy TOML"), "{reason}")
            }
            other => panic!("expected ConfigError, got {:?}", other),
        }
        assert!(matches!(
            ClassifierPolicy::from_toml_str("timing_multiplier = 0.5"),
            Err(VigilError::ConfigError { .. })
        ));
        assert!(matches!(
            ClassifierPolicy::from_toml_str(
                "[[extra_script_patterns]]\npattern = \"\"\ndetection = \"dom_manipulation\""
            ),
            Err(VigilError::ConfigError { .. })
        ));
    }

    // ── 10. monitor ───────────────────────────────────────────────────────────

    /// Positive results land on the tamper stream; negatives append nothing.
    #[test]
    fn test_monitor_appends_positives() {
        let sink = Arc::new(RecordingSink::default());
        let monitor = TamperMonitor::new(classifier(), sink.clone());

        let hit = TamperEvidence::Headers(headers(&[("X-Test", "a\r\nb")]));
        let miss = TamperEvidence::Timing(timing("shop.example", 100, 100));
        assert_eq!(monitor.inspect(&hit).unwrap(), Some(1));
        assert_eq!(monitor.inspect(&miss).unwrap(), None);
        assert_eq!(monitor.observe_domain("watched.example").unwrap(), Some(2));
        assert_eq!(monitor.observe_domain("shop.example").unwrap(), None);

        let appended = sink.appended.lock().unwrap();
        assert_eq!(appended.len(), 2);
        assert!(appended.iter().all(|(stream, _)| *stream == StreamId::Tamper));
        match &appended[0].1.payload {
            RecordPayload::Tamper(event) => {
                assert_eq!(event.detection_type, DetectionType::HeaderInjection)
            }
            other => panic!("expected tamper payload, got {:?}", other),
        }
    }
}
