//! Typed inputs for the six tamper checks.
//!
//! Producers build these from whatever they observed.  Nothing here is
//! validated: a field that is empty or nonsensical simply means the check
//! has nothing to report.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Script text seen executing on a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptEvidence {
    pub domain: String,
    pub script: String,
    /// Where the script came from (URL or `"inline"`), if known.
    pub source: Option<String>,
}

/// Headers of one request or response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderEvidence {
    pub domain: String,
    pub headers: BTreeMap<String, String>,
}

/// A pinned certificate hash against the one actually presented.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateEvidence {
    pub domain: String,
    pub expected_fingerprint: String,
    pub observed_fingerprint: String,
}

/// Cookies the browser set against cookies later observed for a domain.
///
/// Values are compared but never copied into the resulting evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieEvidence {
    pub domain: String,
    pub expected: BTreeMap<String, String>,
    pub observed: BTreeMap<String, String>,
}

/// Expected resolution of a name against what the resolver returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsEvidence {
    pub domain: String,
    pub expected_addresses: Vec<String>,
    pub observed_addresses: Vec<String>,
}

/// A measured duration against its baseline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingEvidence {
    pub domain: String,
    /// What was timed, e.g. `"tls_handshake"`.
    pub operation: String,
    pub expected_ms: u64,
    pub observed_ms: u64,
}

/// Any one of the six checks' inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum TamperEvidence {
    Script(ScriptEvidence),
    Headers(HeaderEvidence),
    Certificate(CertificateEvidence),
    Cookies(CookieEvidence),
    Dns(DnsEvidence),
    Timing(TimingEvidence),
}

impl TamperEvidence {
    pub fn domain(&self) -> &str {
        match self {
            TamperEvidence::Script(e) => &e.domain,
            TamperEvidence::Headers(e) => &e.domain,
            TamperEvidence::Certificate(e) => &e.domain,
            TamperEvidence::Cookies(e) => &e.domain,
            TamperEvidence::Dns(e) => &e.domain,
            TamperEvidence::Timing(e) => &e.domain,
        }
    }
}
