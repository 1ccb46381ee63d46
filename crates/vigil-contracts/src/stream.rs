//! Stream identifiers.
//!
//! A stream is one independently hash-chained, sequentially numbered record
//! series.  The set is closed: every payload kind belongs to exactly one.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::VigilError;

/// One of the ledger's record categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamId {
    Network,
    Certificate,
    Dns,
    Tamper,
    History,
    Integrity,
}

impl StreamId {
    /// Every stream, in a fixed order.
    pub const ALL: [StreamId; 6] = [
        StreamId::Network,
        StreamId::Certificate,
        StreamId::Dns,
        StreamId::Tamper,
        StreamId::History,
        StreamId::Integrity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamId::Network => "network",
            StreamId::Certificate => "certificate",
            StreamId::Dns => "dns",
            StreamId::Tamper => "tamper",
            StreamId::History => "history",
            StreamId::Integrity => "integrity",
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamId {
    type Err = VigilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StreamId::ALL
            .iter()
            .copied()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| VigilError::ConfigError {
                reason: format!("unknown stream '{}'", s),
            })
    }
}
