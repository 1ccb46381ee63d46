//! Hash-chain primitives: record hashing and chain verification.
//!
//! Hash input layout (bytes, in order):
//!   1. canonical JSON of (stream, sequence, wall_timestamp, monotonic_ns,
//!      payload, sealed); serde_json, no pretty-printing, `BTreeMap` keys
//!   2. previous_hash as UTF-8 bytes (64 ASCII hex chars)
//!
//! Sealed fields enter the hash as ciphertext, so a chain verifies without
//! the encryption key.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use vigil_contracts::{
    error::VigilResult,
    payload::RecordPayload,
    record::{LedgerRecord, SealedField},
    stream::StreamId,
};

/// Everything in a record except its two hashes.
#[derive(Serialize)]
struct Canonical<'a> {
    stream: StreamId,
    sequence: u64,
    wall_timestamp: &'a DateTime<Utc>,
    monotonic_ns: u64,
    payload: &'a RecordPayload,
    sealed: &'a BTreeMap<String, SealedField>,
}

/// Canonical bytes of `record`: the part `content_hash` commits to besides
/// `previous_hash`.
pub fn canonical_bytes(record: &LedgerRecord) -> VigilResult<Vec<u8>> {
    let canonical = Canonical {
        stream: record.stream,
        sequence: record.sequence,
        wall_timestamp: &record.wall_timestamp,
        monotonic_ns: record.monotonic_ns,
        payload: &record.payload,
        sealed: &record.sealed,
    };
    Ok(serde_json::to_vec(&canonical)?)
}

/// SHA-256 over `canonical` followed by `previous_hash`.
///
/// Returns a lowercase 64-character hex string.
pub fn digest(canonical: &[u8], previous_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical);
    hasher.update(previous_hash.as_bytes());
    hex::encode(hasher.finalize())
}

/// Recompute the content hash `record` should carry.
pub fn hash_record(record: &LedgerRecord) -> VigilResult<String> {
    Ok(digest(&canonical_bytes(record)?, &record.previous_hash))
}

/// Why a chain stopped verifying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakKind {
    /// `sequence` is not the next expected number (a record is missing,
    /// duplicated, or reordered).
    SequenceGap { expected: u64, found: u64 },
    /// `previous_hash` does not equal the preceding record's `content_hash`.
    PreviousHashMismatch,
    /// The stored `content_hash` does not match the recomputed one.
    ContentHashMismatch,
    /// The stored bytes could not be decoded into a record at all.
    Unreadable { reason: String },
    /// Storage ends before the committed head: trailing records are gone.
    Truncated { expected_last: u64, found_last: u64 },
}

/// The first point at which a chain failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainBreak {
    pub sequence: u64,
    pub kind: BreakKind,
}

/// Outcome of walking a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainVerification {
    pub valid: bool,
    /// Records that passed before the walk stopped.
    pub records_checked: u64,
    pub first_break: Option<ChainBreak>,
}

/// Incremental chain verifier.
///
/// Feed records in ascending storage order with `push`; the walker stops
/// accepting input at the first break and remembers where it happened.
/// Used by the ledger to verify a stream in batches without holding the
/// whole stream in memory.
#[derive(Debug, Clone)]
pub struct ChainWalker {
    expected_sequence: u64,
    expected_previous: String,
    checked: u64,
    first_break: Option<ChainBreak>,
}

impl Default for ChainWalker {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainWalker {
    /// A walker expecting sequence 1 linked to the genesis sentinel.
    pub fn new() -> Self {
        Self {
            expected_sequence: 1,
            expected_previous: LedgerRecord::GENESIS_HASH.to_string(),
            checked: 0,
            first_break: None,
        }
    }

    pub fn is_broken(&self) -> bool {
        self.first_break.is_some()
    }

    /// Check one record against the chain so far.
    pub fn push(&mut self, record: &LedgerRecord) {
        if self.first_break.is_some() {
            return;
        }

        if record.sequence != self.expected_sequence {
            self.fail(
                self.expected_sequence,
                BreakKind::SequenceGap {
                    expected: self.expected_sequence,
                    found: record.sequence,
                },
            );
            return;
        }

        if record.previous_hash != self.expected_previous {
            self.fail(record.sequence, BreakKind::PreviousHashMismatch);
            return;
        }

        match hash_record(record) {
            Ok(recomputed) if recomputed == record.content_hash => {}
            Ok(_) => {
                self.fail(record.sequence, BreakKind::ContentHashMismatch);
                return;
            }
            Err(e) => {
                self.fail(
                    record.sequence,
                    BreakKind::Unreadable {
                        reason: e.to_string(),
                    },
                );
                return;
            }
        }

        self.expected_previous = record.content_hash.clone();
        self.expected_sequence += 1;
        self.checked += 1;
    }

    /// Record that the bytes stored under `sequence` could not be decoded.
    pub fn push_unreadable(&mut self, sequence: u64, reason: impl Into<String>) {
        if self.first_break.is_some() {
            return;
        }
        if sequence != self.expected_sequence {
            self.fail(
                self.expected_sequence,
                BreakKind::SequenceGap {
                    expected: self.expected_sequence,
                    found: sequence,
                },
            );
            return;
        }
        self.fail(
            sequence,
            BreakKind::Unreadable {
                reason: reason.into(),
            },
        );
    }

    /// Require that the walk reached `last`.  Fails with `Truncated` if the
    /// records fed so far stop short of it.
    pub fn expect_through(&mut self, last: u64) {
        if self.first_break.is_some() || self.expected_sequence > last {
            return;
        }
        self.fail(
            self.expected_sequence,
            BreakKind::Truncated {
                expected_last: last,
                found_last: self.expected_sequence - 1,
            },
        );
    }

    /// Consume the walker and report what it saw.
    pub fn finish(self) -> ChainVerification {
        ChainVerification {
            valid: self.first_break.is_none(),
            records_checked: self.checked,
            first_break: self.first_break,
        }
    }

    fn fail(&mut self, sequence: u64, kind: BreakKind) {
        self.first_break = Some(ChainBreak { sequence, kind });
    }
}

/// Verify a complete stream held in memory.
///
/// Valid only when sequences run 1, 2, 3, … without gaps, every
/// `previous_hash` links to its predecessor (or `GENESIS_HASH` for the
/// first record), and every `content_hash` recomputes.  An empty chain is
/// valid.
pub fn verify_chain(records: &[LedgerRecord]) -> ChainVerification {
    let mut walker = ChainWalker::new();
    for record in records {
        walker.push(record);
        if walker.is_broken() {
            break;
        }
    }
    walker.finish()
}

/// Boolean form of `verify_chain`.
pub fn verify(records: &[LedgerRecord]) -> bool {
    verify_chain(records).valid
}
