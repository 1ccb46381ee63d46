//! Committed ledger records and read results.
//!
//! `LedgerRecord` is the durable unit of every stream.  Once the ledger
//! returns its sequence number the record is immutable; the only way to
//! "correct" it is to append another record.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{payload::RecordPayload, stream::StreamId};

/// A sensitive value sealed with the ledger key.
///
/// `ciphertext` is the hex encoding of `nonce || ciphertext || tag`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedField {
    pub ciphertext: String,
}

/// A single committed entry in one stream's hash chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub stream: StreamId,

    /// Position in the stream, starting at 1, gap-free.
    pub sequence: u64,

    /// Wall clock at commit.  Informational; never used for ordering.
    pub wall_timestamp: DateTime<Utc>,

    /// Process-local monotonic nanoseconds at commit.  Only meaningful for
    /// duration math within one process lifetime.
    pub monotonic_ns: u64,

    pub payload: RecordPayload,

    /// Sensitive sub-fields, sealed.  Hashed as ciphertext.
    #[serde(default)]
    pub sealed: BTreeMap<String, SealedField>,

    /// `content_hash` of the preceding record, or `GENESIS_HASH`.
    pub previous_hash: String,

    /// SHA-256 (hex) over the canonical fields and `previous_hash`.
    pub content_hash: String,
}

impl LedgerRecord {
    /// The `previous_hash` of the first record in every stream.
    ///
    /// 64 hex zeros: no real SHA-256 output is expected to collide with it,
    /// so genesis is unambiguous.
    pub const GENESIS_HASH: &'static str =
        "0000000000000000000000000000000000000000000000000000000000000000";
}

/// One slot of a range read.
///
/// A record that fails to parse or whose stored hash does not match its
/// content is returned as `Corrupt` rather than dropped, and a sequence with
/// nothing stored under it is returned as `Missing`: absence and damage are
/// different findings.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordRead {
    Intact(LedgerRecord),
    Corrupt { sequence: u64, reason: String },
    Missing { sequence: u64 },
}

impl RecordRead {
    pub fn sequence(&self) -> u64 {
        match self {
            RecordRead::Intact(r) => r.sequence,
            RecordRead::Corrupt { sequence, .. } | RecordRead::Missing { sequence } => *sequence,
        }
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self, RecordRead::Corrupt { .. })
    }

    pub fn record(&self) -> Option<&LedgerRecord> {
        match self {
            RecordRead::Intact(r) => Some(r),
            _ => None,
        }
    }
}

/// A sealed field after an attempt to open it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevealedField {
    Plain(String),
    Undecipherable { reason: String },
}

/// A record with its sealed fields opened.
#[derive(Debug, Clone, PartialEq)]
pub struct RevealedRecord {
    pub record: LedgerRecord,
    pub fields: BTreeMap<String, RevealedField>,
}

/// One slot of a decrypting range read.
#[derive(Debug, Clone, PartialEq)]
pub enum RevealedRead {
    Intact(RevealedRecord),
    Corrupt { sequence: u64, reason: String },
    Missing { sequence: u64 },
}
