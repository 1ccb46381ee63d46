//! Simulated page load driven through the whole pipeline.
//!
//! One navigation to a sensitive domain:
//!   1. History and DNS records for the navigation
//!   2. The document request tracked from start to completion, with its
//!      signals arriving out of order and cookies on both legs
//!   3. The certificate presented during the handshake
//!   4. Tamper evidence from the page: an injected header, a forged DNS
//!      answer, a swapped certificate, a slow handshake, and one clean
//!      script that must not raise anything
//!   5. Checkpoints for every stream, then a full verification pass

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use uuid::Uuid;

use vigil_contracts::{
    error::VigilResult,
    payload::{CertificateRecord, DnsRecord, HistoryRecord, RecordPayload, Submission},
    record::RevealedRead,
    request::{
        domain_of, CacheStatus, CompletionInfo, ConnectInfo, DnsInfo, RequestStart,
        ResponseInfo, TlsInfo,
    },
    stream::StreamId,
};
use vigil_core::traits::AuditSink;
use vigil_integrity::{IntegrityChecker, IntegrityReport};
use vigil_ledger::Ledger;
use vigil_tamper::{
    evidence::{
        CertificateEvidence, DnsEvidence, HeaderEvidence, ScriptEvidence, TamperEvidence,
        TimingEvidence,
    },
    TamperClassifier, TamperMonitor,
};
use vigil_tracker::{RequestTracker, REQUEST_COOKIE_FIELD};

use crate::config::VigilConfig;

const TARGET: &str = "https://accounts.google.com/signin?continue=mail";
const PINNED_FINGERPRINT: &str =
    "3f:a1:9c:0e:57:d2:4b:88:10:6e:af:21:c4:93:7d:5a:e0:b6:12:44:9f:38:ca:71:05:dd:8e:63:2b:f0:a9:17";
const OBSERVED_FINGERPRINT: &str =
    "b7e2c40a19f35d6e882a0c71f4d953be6a2708c1d5e4f930ab17628cd04e5f91";

/// What one scenario run committed.
#[derive(Debug)]
pub struct ScenarioOutcome {
    pub request_id: String,
    pub network_sequence: u64,
    pub tamper_sequences: Vec<u64>,
    pub checkpoints: Vec<(StreamId, u64)>,
    pub report: IntegrityReport,
}

pub fn run_scenario(ledger: Arc<Ledger>, config: &VigilConfig) -> VigilResult<ScenarioOutcome> {
    let sink: Arc<dyn AuditSink> = ledger.clone();
    let tracker = RequestTracker::new(sink.clone(), config.tracker.to_config());
    let monitor = TamperMonitor::new(TamperClassifier::new(config.classifier.clone()), sink.clone());
    let checker = Arc::new(IntegrityChecker::new(ledger.clone()));
    let periodic = config
        .integrity
        .interval()
        .map(|interval| checker.spawn_periodic(interval));

    let domain = domain_of(TARGET);
    let navigation_id = Uuid::new_v4().to_string();
    let request_id = Uuid::new_v4().to_string();

    println!("=== Scenario: page load of {} ===", domain);
    println!();

    // ── 1. navigation ─────────────────────────────────────────────────────────

    let history = sink.append(
        StreamId::History,
        Submission::new(RecordPayload::History(HistoryRecord {
            url: TARGET.to_string(),
            domain: domain.clone(),
            title: Some("Sign in".to_string()),
            transition: "typed".to_string(),
            navigation_id: Some(navigation_id.clone()),
        })),
    )?;
    let dns = sink.append(
        StreamId::Dns,
        Submission::new(RecordPayload::Dns(DnsRecord {
            domain: domain.clone(),
            query_type: "A".to_string(),
            resolved_addresses: vec!["203.0.113.77".to_string()],
            resolver: "192.0.2.53".to_string(),
            duration_ms: 18,
            dnssec_validated: Some(false),
        })),
    )?;
    println!("  History record:         history#{}", history);
    println!("  DNS record:             dns#{}", dns);

    // ── 2. tracked request ────────────────────────────────────────────────────

    let mut start = RequestStart::new(request_id.clone(), TARGET, "GET")
        .with_header("Accept", "text/html")
        .with_header("Cookie", "SID=31d4d96e407aad42; HSID=AYQEVn")
        .with_header("User-Agent", "Mozilla/5.0 (X11; Linux x86_64)");
    start.user_initiated = true;
    start.navigation_id = Some(navigation_id);
    start.process_id = Some(std::process::id());
    tracker.start(start)?;

    let response = ResponseInfo {
        status_code: 200,
        headers: [
            ("Content-Type", "text/html; charset=utf-8"),
            ("Set-Cookie", "SID=8c1a2f0b; Secure; HttpOnly"),
            ("X-Injected", "<script src=//cdn.evil.example/k.js></script>"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect(),
        first_byte_ms: 212,
    };
    let response_headers = response.headers.clone();

    // Response first, DNS last: assembly does not depend on arrival order.
    tracker.on_response(&request_id, response);
    tracker.on_tls(
        &request_id,
        TlsInfo {
            tls_version: "TLSv1.3".to_string(),
            cipher_suite: "TLS_AES_128_GCM_SHA256".to_string(),
            certificate_chain: vec![OBSERVED_FINGERPRINT.to_string()],
            handshake_time_ms: 190,
        },
    );
    tracker.on_connect(
        &request_id,
        ConnectInfo {
            connect_time_ms: 31,
            remote_address: "203.0.113.77".to_string(),
            remote_port: 443,
            protocol: "h2".to_string(),
        },
    );
    tracker.on_dns(
        &request_id,
        DnsInfo {
            dns_time_ms: 18,
            resolved_addresses: vec!["203.0.113.77".to_string()],
        },
    );
    let network_sequence = tracker.complete(
        &request_id,
        CompletionInfo {
            completion_time_ms: 264,
            bytes_sent: 812,
            bytes_received: 48_203,
            cache_status: CacheStatus::Miss,
        },
    )?;
    println!("  Request record:         network#{} (id {})", network_sequence, request_id);

    match ledger
        .read_range_revealed(StreamId::Network, network_sequence, network_sequence)?
        .first()
    {
        Some(RevealedRead::Intact(revealed)) => {
            println!(
                "  Sealed fields:          {} (ciphertext in the record)",
                revealed.record.sealed.len()
            );
            if let Some(cookie) = revealed.fields.get(REQUEST_COOKIE_FIELD) {
                println!("  Request cookie opened:  {:?}", cookie);
            }
        }
        other => println!("  Request record unreadable: {:?}", other),
    }

    // ── 3. certificate ────────────────────────────────────────────────────────

    let now = Utc::now();
    let certificate = sink.append(
        StreamId::Certificate,
        Submission::new(RecordPayload::Certificate(CertificateRecord {
            domain: domain.clone(),
            subject: format!("CN={}", domain),
            issuer: "CN=Intercept Root CA".to_string(),
            serial: "04:b2:19:7e".to_string(),
            fingerprint_sha256: OBSERVED_FINGERPRINT.to_string(),
            not_before: now - ChronoDuration::days(2),
            not_after: now + ChronoDuration::days(28),
            validation_result: "valid".to_string(),
            ocsp_status: None,
            ct_logged: Some(false),
        })),
    )?;
    println!("  Certificate record:     certificate#{}", certificate);
    println!();

    // ── 4. tamper evidence ────────────────────────────────────────────────────

    let evidence = vec![
        TamperEvidence::Script(ScriptEvidence {
            domain: domain.clone(),
            script: "document.getElementById('next').disabled = false;".to_string(),
            source: Some("inline".to_string()),
        }),
        TamperEvidence::Headers(HeaderEvidence {
            domain: domain.clone(),
            headers: response_headers,
        }),
        TamperEvidence::Dns(DnsEvidence {
            domain: domain.clone(),
            expected_addresses: vec!["142.250.74.109".to_string()],
            observed_addresses: vec!["203.0.113.77".to_string()],
        }),
        TamperEvidence::Certificate(CertificateEvidence {
            domain: domain.clone(),
            expected_fingerprint: PINNED_FINGERPRINT.to_string(),
            observed_fingerprint: OBSERVED_FINGERPRINT.to_string(),
        }),
        TamperEvidence::Timing(TimingEvidence {
            domain: domain.clone(),
            operation: "tls_handshake".to_string(),
            expected_ms: 40,
            observed_ms: 190,
        }),
    ];

    let mut tamper_sequences = Vec::new();
    if let Some(sequence) = monitor.observe_domain(&domain)? {
        tamper_sequences.push(sequence);
    }
    for item in &evidence {
        let label = match item {
            TamperEvidence::Script(_) => "script",
            TamperEvidence::Headers(_) => "headers",
            TamperEvidence::Certificate(_) => "certificate",
            TamperEvidence::Cookies(_) => "cookies",
            TamperEvidence::Dns(_) => "dns",
            TamperEvidence::Timing(_) => "timing",
        };
        match monitor.inspect(item)? {
            Some(sequence) => {
                println!("  Tamper check {:<11} DETECTED -> tamper#{}", label, sequence);
                tamper_sequences.push(sequence);
            }
            None => println!("  Tamper check {:<11} clean", label),
        }
    }
    println!();

    // ── 5. checkpoints and verification ───────────────────────────────────────

    if let Some(periodic) = periodic {
        periodic.stop();
    }
    let checkpoints = checker.checkpoint_all()?;
    for (stream, sequence) in &checkpoints {
        println!("  Checkpoint:             {} -> integrity#{}", stream, sequence);
    }

    let report = checker.verify_all()?;
    print_report(&report);

    Ok(ScenarioOutcome {
        request_id,
        network_sequence,
        tamper_sequences,
        checkpoints,
        report,
    })
}

/// Per-stream verdicts followed by any findings.
pub fn print_report(report: &IntegrityReport) {
    println!();
    println!("  {:<12} {:>8} {:>8}  {}", "stream", "records", "checked", "status");
    for status in &report.streams {
        let checkpoint = match &status.checkpoint {
            Some(cp) if cp.matches => format!("checkpoint @{} ok", cp.recorded.last_sequence),
            Some(cp) => format!("checkpoint @{} MISMATCH", cp.recorded.last_sequence),
            None => "no checkpoint".to_string(),
        };
        println!(
            "  {:<12} {:>8} {:>8}  {} / {}",
            status.stream.as_str(),
            status.record_count,
            status.records_checked,
            if status.chain_valid { "chain ok" } else { "CHAIN BROKEN" },
            checkpoint
        );
    }
    println!();
    if report.is_clean() {
        println!("  RESULT: ledger intact");
    } else {
        for finding in &report.findings {
            println!(
                "  FINDING [{}] {} {:?} at {:?}: {}",
                finding.severity, finding.stream, finding.kind, finding.sequence, finding.detail
            );
        }
        println!("  RESULT: {} finding(s)", report.findings.len());
    }
    println!();
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use vigil_contracts::{
        payload::RecordPayload,
        record::{RecordRead, RevealedField},
        tamper::DetectionType,
    };
    use vigil_crypto::{EncryptionKey, KeySlot};

    use super::*;

    fn ledger() -> Arc<Ledger> {
        Arc::new(Ledger::in_memory(Arc::new(KeySlot::with_key(
            EncryptionKey::from_bytes([9; 32]),
        ))))
    }

    fn config() -> VigilConfig {
        let mut config = VigilConfig::default();
        config.classifier.enhanced_monitoring_domains = vec!["google.com".to_string()];
        config.integrity.checkpoint_interval_secs = 0;
        config
    }

    #[test]
    fn test_scenario_commits_every_stream() {
        let ledger = ledger();
        let outcome = run_scenario(ledger.clone(), &config()).unwrap();

        assert!(outcome.report.is_clean(), "findings: {:?}", outcome.report.findings);
        for stream in [
            StreamId::Network,
            StreamId::Certificate,
            StreamId::Dns,
            StreamId::History,
            StreamId::Tamper,
        ] {
            assert!(ledger.record_count(stream).unwrap() > 0, "{} is empty", stream);
        }
        assert_eq!(outcome.checkpoints.len(), 5);
        assert_eq!(ledger.record_count(StreamId::Integrity).unwrap(), 5);
    }

    /// Enhanced monitoring, headers, DNS, certificate and timing fire; the
    /// clean script does not.
    #[test]
    fn test_scenario_tamper_detections() {
        let ledger = ledger();
        let outcome = run_scenario(ledger.clone(), &config()).unwrap();
        assert_eq!(outcome.tamper_sequences, vec![1, 2, 3, 4, 5]);

        let detections: Vec<DetectionType> = ledger
            .read_range(StreamId::Tamper, 1, 5)
            .unwrap()
            .iter()
            .filter_map(|read| match read {
                RecordRead::Intact(record) => match &record.payload {
                    RecordPayload::Tamper(event) => Some(event.detection_type),
                    _ => None,
                },
                _ => None,
            })
            .collect();
        assert_eq!(
            detections,
            vec![
                DetectionType::EnhancedMonitoring,
                DetectionType::HeaderInjection,
                DetectionType::DnsSpoofing,
                DetectionType::CertificateMismatch,
                DetectionType::TimingAnomaly,
            ]
        );
    }

    #[test]
    fn test_scenario_request_cookie_sealed() {
        let ledger = ledger();
        let outcome = run_scenario(ledger.clone(), &config()).unwrap();
        let seq = outcome.network_sequence;

        let reads = ledger.read_range(StreamId::Network, seq, seq).unwrap();
        let record = reads[0].record().unwrap();
        let text = serde_json::to_string(record).unwrap();
        assert!(!text.contains("31d4d96e407aad42"));

        let revealed = ledger.read_range_revealed(StreamId::Network, seq, seq).unwrap();
        match &revealed[0] {
            RevealedRead::Intact(r) => assert_eq!(
                r.fields.get(REQUEST_COOKIE_FIELD),
                Some(&RevealedField::Plain("SID=31d4d96e407aad42; HSID=AYQEVn".to_string()))
            ),
            other => panic!("expected intact read, got {:?}", other),
        }
    }
}
