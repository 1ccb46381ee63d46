//! # vigil-contracts
//!
//! Shared record types, payloads, and the error taxonomy for the Vigil
//! forensic ledger.
//!
//! All crates in the workspace import from here. No business logic lives in
//! this crate: only data definitions, error types, and small pure helpers.

pub mod error;
pub mod payload;
pub mod record;
pub mod request;
pub mod stream;
pub mod tamper;

#[cfg(test)]
mod tests {
    use super::*;
    use error::VigilError;
    use payload::{CheckpointRecord, RecordPayload};
    use request::domain_of;
    use stream::StreamId;
    use tamper::Severity;

    // ── StreamId ─────────────────────────────────────────────────────────────

    #[test]
    fn stream_id_parses_its_own_name() {
        for id in StreamId::ALL {
            let parsed: StreamId = id.as_str().parse().unwrap();
            assert_eq!(parsed, id);
        }
    }

    #[test]
    fn stream_id_rejects_unknown_name() {
        let err = "cookies".parse::<StreamId>().unwrap_err();
        assert!(err.to_string().contains("cookies"));
    }

    // ── Severity ─────────────────────────────────────────────────────────────

    #[test]
    fn severity_is_ordered() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn severity_escalation_saturates() {
        assert_eq!(Severity::Low.escalate(), Severity::Medium);
        assert_eq!(Severity::Medium.escalate(), Severity::High);
        assert_eq!(Severity::High.escalate(), Severity::Critical);
        assert_eq!(Severity::Critical.escalate(), Severity::Critical);
    }

    // ── Payload routing ──────────────────────────────────────────────────────

    #[test]
    fn checkpoint_payload_belongs_to_integrity_stream() {
        let payload = RecordPayload::Checkpoint(CheckpointRecord {
            target: StreamId::Network,
            record_count: 0,
            last_sequence: 0,
            aggregate_root: String::new(),
        });
        assert_eq!(payload.stream(), StreamId::Integrity);
        assert_eq!(payload.domain(), None);
    }

    // ── domain_of ────────────────────────────────────────────────────────────

    #[test]
    fn domain_of_strips_scheme_port_path_and_userinfo() {
        assert_eq!(domain_of("https://Example.com/a?b#c"), "example.com");
        assert_eq!(domain_of("http://user:pw@api.bank.test:8443/x"), "api.bank.test");
        assert_eq!(domain_of("news.test"), "news.test");
        assert_eq!(domain_of("https://[::1]:443/"), "::1");
        assert_eq!(domain_of(""), "");
    }

    // ── VigilError ───────────────────────────────────────────────────────────

    #[test]
    fn error_classes_are_distinguishable() {
        let not_init = VigilError::NotInitialized {
            reason: "no key".to_string(),
        };
        assert!(not_init.is_initialization());
        assert!(!not_init.is_integrity());

        let broken = VigilError::IntegrityViolation {
            stream: StreamId::Dns,
            sequence: 7,
            reason: "previous hash mismatch".to_string(),
        };
        assert!(broken.is_integrity());
        assert!(!broken.is_initialization());
    }

    #[test]
    fn error_sequence_conflict_display() {
        let err = VigilError::SequenceConflict {
            stream: StreamId::Network,
            expected: 4,
            found: 5,
        };
        let msg = err.to_string();
        assert!(msg.contains("network"));
        assert!(msg.contains('4'));
        assert!(msg.contains('5'));
    }

    #[test]
    fn error_stream_mismatch_display() {
        let err = VigilError::StreamMismatch {
            stream: StreamId::Tamper,
            payload_kind: "dns".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("tamper"));
        assert!(msg.contains("dns"));
    }
}
