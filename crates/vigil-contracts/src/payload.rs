//! Category-specific record payloads.
//!
//! `RecordPayload` is what producers hand to the ledger.  Each variant maps
//! to exactly one `StreamId`; the ledger rejects a payload submitted to any
//! other stream.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{request::RequestRecord, stream::StreamId, tamper::TamperEvent};

/// A certificate validation result as reported by the TLS layer.
///
/// Revocation and transparency checks are performed elsewhere, if at all;
/// their fields are `None` whenever the reporter had nothing to say.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    pub domain: String,
    pub subject: String,
    pub issuer: String,
    pub serial: String,
    /// Hex SHA-256 of the DER certificate.
    pub fingerprint_sha256: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    /// Free-form result from the validator, e.g. `"trusted"`.
    pub validation_result: String,
    pub ocsp_status: Option<String>,
    pub ct_logged: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecord {
    pub domain: String,
    /// e.g. `"A"`, `"AAAA"`, `"HTTPS"`.
    pub query_type: String,
    pub resolved_addresses: Vec<String>,
    pub resolver: String,
    pub duration_ms: u64,
    pub dnssec_validated: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub url: String,
    pub domain: String,
    pub title: Option<String>,
    /// e.g. `"link"`, `"typed"`, `"reload"`.
    pub transition: String,
    pub navigation_id: Option<String>,
}

/// Aggregate commitment to a prefix of one stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// The stream this checkpoint covers (never `Integrity` itself).
    pub target: StreamId,
    pub record_count: u64,
    pub last_sequence: u64,
    /// Hex Merkle root over the covered records' content hashes.
    pub aggregate_root: String,
}

/// Everything the ledger can store, tagged by category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordPayload {
    NetworkRequest(RequestRecord),
    Certificate(CertificateRecord),
    Dns(DnsRecord),
    Tamper(TamperEvent),
    History(HistoryRecord),
    Checkpoint(CheckpointRecord),
}

impl RecordPayload {
    /// The only stream this payload may be appended to.
    pub fn stream(&self) -> StreamId {
        match self {
            RecordPayload::NetworkRequest(_) => StreamId::Network,
            RecordPayload::Certificate(_) => StreamId::Certificate,
            RecordPayload::Dns(_) => StreamId::Dns,
            RecordPayload::Tamper(_) => StreamId::Tamper,
            RecordPayload::History(_) => StreamId::History,
            RecordPayload::Checkpoint(_) => StreamId::Integrity,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RecordPayload::NetworkRequest(_) => "network_request",
            RecordPayload::Certificate(_) => "certificate",
            RecordPayload::Dns(_) => "dns",
            RecordPayload::Tamper(_) => "tamper",
            RecordPayload::History(_) => "history",
            RecordPayload::Checkpoint(_) => "checkpoint",
        }
    }

    /// The domain this payload is about, used by the secondary index.
    pub fn domain(&self) -> Option<&str> {
        match self {
            RecordPayload::NetworkRequest(r) => Some(&r.domain),
            RecordPayload::Certificate(c) => Some(&c.domain),
            RecordPayload::Dns(d) => Some(&d.domain),
            RecordPayload::Tamper(t) => Some(&t.domain),
            RecordPayload::History(h) => Some(&h.domain),
            RecordPayload::Checkpoint(_) => None,
        }
    }
}

/// A payload plus the plaintext values the ledger must seal before storing.
///
/// Sensitive values (cookie contents and the like) are sealed one field at a
/// time, so a single undecipherable value never hides the rest of a record.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub payload: RecordPayload,
    pub sensitive: BTreeMap<String, String>,
}

impl Submission {
    pub fn new(payload: RecordPayload) -> Self {
        Self {
            payload,
            sensitive: BTreeMap::new(),
        }
    }

    pub fn with_sensitive(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.sensitive.insert(name.into(), value.into());
        self
    }
}

impl From<RecordPayload> for Submission {
    fn from(payload: RecordPayload) -> Self {
        Submission::new(payload)
    }
}
