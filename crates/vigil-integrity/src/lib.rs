//! # vigil-integrity
//!
//! Checkpoints and whole-ledger verification for the Vigil forensic ledger.
//!
//! [`IntegrityChecker::checkpoint`] commits a stream's record count and a
//! Merkle root over its content hashes to the integrity stream.
//! [`IntegrityChecker::verify_all`] re-verifies every chain and compares
//! each stream against its last checkpoint, which catches rewrites that
//! re-chain a stream consistently and truncations that chain checks alone
//! cannot see.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vigil_integrity::IntegrityChecker;
//!
//! let checker = Arc::new(IntegrityChecker::new(ledger.clone()));
//! checker.checkpoint(StreamId::Network)?;
//! let report = checker.verify_all()?;
//! assert!(report.is_clean());
//! ```

pub mod checker;
pub mod merkle;

pub use checker::{
    CheckpointStatus, FindingKind, IntegrityChecker, IntegrityFinding, IntegrityReport,
    PeriodicCheckpoints, StreamStatus,
};
pub use merkle::merkle_root;

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use vigil_contracts::{
        error::VigilError,
        payload::{DnsRecord, RecordPayload, Submission},
        record::{LedgerRecord, RecordRead},
        stream::StreamId,
        tamper::Severity,
    };
    use vigil_crypto::{EncryptionKey, KeySlot};
    use vigil_ledger::{hash_record, FileRecordStore, Ledger};

    use super::*;

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn keys() -> Arc<KeySlot> {
        Arc::new(KeySlot::with_key(EncryptionKey::from_bytes([3; 32])))
    }

    fn lookup(domain: &str) -> Submission {
        Submission::new(RecordPayload::Dns(DnsRecord {
            domain: domain.to_string(),
            query_type: "A".to_string(),
            resolved_addresses: vec!["192.0.2.10".to_string()],
            resolver: "system".to_string(),
            duration_ms: 4,
            dnssec_validated: None,
        }))
    }

    fn open_ledger(dir: &Path) -> Arc<Ledger> {
        let store = Arc::new(FileRecordStore::open(dir).unwrap());
        Arc::new(Ledger::open(store, keys()).unwrap())
    }

    fn fill(ledger: &Ledger, domains: &[&str]) {
        for domain in domains {
            ledger.append(StreamId::Dns, lookup(domain)).unwrap();
        }
    }

    /// Rewrite the DNS stream file with `edit` applied to every record, then
    /// re-chain it so the chain alone still verifies.
    fn forge_dns_stream(dir: &Path, edit: impl Fn(&mut LedgerRecord)) {
        let path = dir.join("dns.jsonl");
        let text = std::fs::read_to_string(&path).unwrap();
        let mut previous = LedgerRecord::GENESIS_HASH.to_string();
        let mut out = String::new();
        for line in text.lines() {
            let mut record: LedgerRecord = serde_json::from_str(line).unwrap();
            edit(&mut record);
            record.previous_hash = previous.clone();
            record.content_hash = hash_record(&record).unwrap();
            previous = record.content_hash.clone();
            out.push_str(&serde_json::to_string(&record).unwrap());
            out.push('\n');
        }
        std::fs::write(&path, out).unwrap();
    }

    // ── 1. merkle ─────────────────────────────────────────────────────────────

    #[test]
    fn test_merkle_root_properties() {
        let hashes: Vec<String> = ["a", "b", "c"].iter().map(|s| s.repeat(64)).collect();

        assert_eq!(merkle_root(&[]), LedgerRecord::GENESIS_HASH);
        assert_eq!(merkle_root(&hashes).len(), 64);
        assert_eq!(merkle_root(&hashes), merkle_root(&hashes.clone()));

        let mut reordered = hashes.clone();
        reordered.swap(0, 1);
        assert_ne!(merkle_root(&hashes), merkle_root(&reordered));
        assert_ne!(merkle_root(&hashes), merkle_root(&hashes[..2]));
        // A single leaf is still hashed, never returned raw.
        assert_ne!(merkle_root(&hashes[..1]), hashes[0]);
    }

    // ── 2. checkpoint ─────────────────────────────────────────────────────────

    #[test]
    fn test_checkpoint_and_clean_verify() {
        let ledger = Arc::new(Ledger::in_memory(keys()));
        fill(&ledger, &["a.example", "b.example", "c.example"]);
        let checker = IntegrityChecker::new(ledger.clone());

        assert_eq!(checker.checkpoint(StreamId::Dns).unwrap(), 1);

        let reads = ledger.read_range(StreamId::Integrity, 1, 1).unwrap();
        match &reads[0] {
            RecordRead::Intact(record) => match &record.payload {
                RecordPayload::Checkpoint(cp) => {
                    assert_eq!(cp.target, StreamId::Dns);
                    assert_eq!(cp.record_count, 3);
                    assert_eq!(cp.last_sequence, 3);
                }
                other => panic!("expected checkpoint, got {:?}", other),
            },
            other => panic!("expected intact read, got {:?}", other),
        }

        let report = checker.verify_all().unwrap();
        assert!(report.is_clean(), "findings: {:?}", report.findings);
        assert_eq!(report.streams.len(), StreamId::ALL.len());
        let dns = report.status(StreamId::Dns).unwrap();
        assert!(dns.passed());
        assert!(dns.checkpoint.as_ref().unwrap().matches);
        assert!(report.status(StreamId::Network).unwrap().checkpoint.is_none());
    }

    /// Appends after a checkpoint do not disturb it.
    #[test]
    fn test_growth_after_checkpoint_is_clean() {
        let ledger = Arc::new(Ledger::in_memory(keys()));
        fill(&ledger, &["a.example"]);
        let checker = IntegrityChecker::new(ledger.clone());
        checker.checkpoint(StreamId::Dns).unwrap();
        fill(&ledger, &["b.example", "c.example"]);

        assert!(checker.verify_all().unwrap().is_clean());
    }

    #[test]
    fn test_checkpoint_integrity_stream_rejected() {
        let checker = IntegrityChecker::new(Arc::new(Ledger::in_memory(keys())));
        assert!(matches!(
            checker.checkpoint(StreamId::Integrity),
            Err(VigilError::ConfigError { .. })
        ));
    }

    #[test]
    fn test_checkpoint_all_skips_empty_streams() {
        let ledger = Arc::new(Ledger::in_memory(keys()));
        fill(&ledger, &["a.example"]);
        let checker = IntegrityChecker::new(ledger.clone());

        let recorded = checker.checkpoint_all().unwrap();
        assert_eq!(recorded, vec![(StreamId::Dns, 1)]);
        assert_eq!(checker.last_checkpoints().unwrap().len(), 1);
    }

    // ── 3. tamper findings ────────────────────────────────────────────────────

    /// A stream rewritten and re-chained verifies as a chain but fails its
    /// checkpoint.
    #[test]
    fn test_rewritten_stream_caught_by_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        {
            let ledger = open_ledger(dir.path());
            fill(&ledger, &["a.example", "b.example", "c.example"]);
            IntegrityChecker::new(ledger).checkpoint(StreamId::Dns).unwrap();
        }

        forge_dns_stream(dir.path(), |record| {
            if let RecordPayload::Dns(dns) = &mut record.payload {
                dns.resolved_addresses = vec!["198.51.100.66".to_string()];
            }
        });

        let checker = IntegrityChecker::new(open_ledger(dir.path()));
        let report = checker.verify_all().unwrap();
        let dns = report.status(StreamId::Dns).unwrap();
        assert!(dns.chain_valid, "forged chain links correctly");
        assert!(!dns.passed());
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].kind, FindingKind::CheckpointMismatch);
        assert_eq!(report.findings[0].severity, Severity::Critical);
    }

    /// Dropping the tail of a stream and reopening leaves a valid chain,
    /// but the checkpoint still remembers the lost records.
    #[test]
    fn test_truncation_caught_by_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        {
            let ledger = open_ledger(dir.path());
            fill(&ledger, &["a.example", "b.example", "c.example"]);
            IntegrityChecker::new(ledger).checkpoint(StreamId::Dns).unwrap();
        }

        let path = dir.path().join("dns.jsonl");
        let text = std::fs::read_to_string(&path).unwrap();
        let kept: Vec<&str> = text.lines().take(2).collect();
        std::fs::write(&path, format!("{}\n", kept.join("\n"))).unwrap();

        let checker = IntegrityChecker::new(open_ledger(dir.path()));
        let report = checker.verify_all().unwrap();
        assert!(report.status(StreamId::Dns).unwrap().chain_valid);
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].kind, FindingKind::CheckpointBeyondHead);
        assert_eq!(report.findings[0].sequence, Some(3));
    }

    /// A tampered record breaks the chain; checkpointing it is refused.
    #[test]
    fn test_broken_chain_reported() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = open_ledger(dir.path());
        fill(&ledger, &["a.example", "b.example", "c.example"]);
        let checker = IntegrityChecker::new(ledger.clone());

        let path = dir.path().join("dns.jsonl");
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, text.replacen("b.example", "x.example", 1)).unwrap();

        let report = checker.verify_all().unwrap();
        let finding = &report.findings[0];
        assert_eq!(finding.kind, FindingKind::ChainBroken);
        assert_eq!(finding.stream, StreamId::Dns);
        assert_eq!(finding.sequence, Some(2));
        assert_eq!(finding.severity, Severity::Critical);

        assert!(matches!(
            checker.checkpoint(StreamId::Dns),
            Err(VigilError::IntegrityViolation { sequence: 2, .. })
        ));
    }

    // ── 4. periodic ───────────────────────────────────────────────────────────

    #[test]
    fn test_periodic_checkpoints() {
        let ledger = Arc::new(Ledger::in_memory(keys()));
        fill(&ledger, &["a.example", "b.example"]);
        let checker = Arc::new(IntegrityChecker::new(ledger.clone()));

        let periodic = checker.spawn_periodic(Duration::from_millis(10));
        thread::sleep(Duration::from_millis(200));
        periodic.stop();

        // Unchanged streams are checkpointed once, not on every tick.
        assert_eq!(ledger.record_count(StreamId::Integrity).unwrap(), 1);
        assert!(checker.verify_all().unwrap().is_clean());
    }
}
