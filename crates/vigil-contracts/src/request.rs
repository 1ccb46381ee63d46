//! Network request signals and the finalized request record.
//!
//! The network layer reports a request in pieces: a start signal, then any
//! of the DNS / connect / TLS / response signals in whatever order they
//! happen to arrive, then a completion signal.  Each piece is a plain struct
//! here; the tracker stores each in its own slot so assembly does not depend
//! on arrival order.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// First signal for a request.  Creates the tracker entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestStart {
    pub request_id: String,
    /// Full target URL.
    pub target: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub user_initiated: bool,
    pub navigation_id: Option<String>,
    pub process_id: Option<u32>,
    /// Wall-clock start reported by the producer.  Informational only.
    pub started_at: DateTime<Utc>,
}

impl RequestStart {
    /// A start signal with empty headers, stamped now.
    pub fn new(
        request_id: impl Into<String>,
        target: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            target: target.into(),
            method: method.into(),
            headers: BTreeMap::new(),
            user_initiated: false,
            navigation_id: None,
            process_id: None,
            started_at: Utc::now(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsInfo {
    pub dns_time_ms: u64,
    pub resolved_addresses: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectInfo {
    pub connect_time_ms: u64,
    pub remote_address: String,
    pub remote_port: u16,
    /// e.g. `"http/1.1"`, `"h2"`, `"h3"`.
    pub protocol: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsInfo {
    pub tls_version: String,
    pub cipher_suite: String,
    /// Leaf-first certificate fingerprints (hex SHA-256).  May be empty.
    pub certificate_chain: Vec<String>,
    pub handshake_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseInfo {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub first_byte_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    Hit,
    Miss,
    Revalidated,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionInfo {
    pub completion_time_ms: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub cache_status: CacheStatus,
}

/// Whether the request ran to completion or was closed out by a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CompletionStatus {
    Complete,
    Incomplete { reason: String },
}

/// The immutable record committed to the network stream for one request.
///
/// Cookie headers are never present here in plaintext: the tracker moves
/// them into sealed fields before the record is appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub request_id: String,
    pub target: String,
    pub domain: String,
    pub method: String,
    pub started_at: DateTime<Utc>,
    pub request_headers: BTreeMap<String, String>,
    pub dns: Option<DnsInfo>,
    pub connection: Option<ConnectInfo>,
    pub tls: Option<TlsInfo>,
    pub response: Option<ResponseInfo>,
    pub completion: Option<CompletionInfo>,
    pub user_initiated: bool,
    pub navigation_id: Option<String>,
    pub process_id: Option<u32>,
    pub status: CompletionStatus,
}

/// Extract the host portion of a URL-like target.
///
/// Handles `scheme://user@host:port/path?query#frag` and bare hosts.  IPv6
/// literals keep their brackets stripped.  Returns an empty string when
/// nothing host-like is present.
pub fn domain_of(target: &str) -> String {
    let rest = match target.find("://") {
        Some(idx) => &target[idx + 3..],
        None => target,
    };
    let authority = rest
        .split(|c| c == '/' || c == '?' || c == '#')
        .next()
        .unwrap_or("");
    let host_port = match authority.rfind('@') {
        Some(idx) => &authority[idx + 1..],
        None => authority,
    };
    let host = if let Some(stripped) = host_port.strip_prefix('[') {
        stripped.split(']').next().unwrap_or("")
    } else {
        host_port.split(':').next().unwrap_or("")
    };
    host.to_ascii_lowercase()
}
