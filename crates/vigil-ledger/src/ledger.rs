//! The ledger: single writer per stream, snapshot readers, chain verification.
//!
//! Each stream has its own writer mutex.  An append holds, in this order,
//! the key slot's read guard and the stream's writer mutex, from sequence
//! assignment until the store confirms the write.  Appends to different
//! streams share nothing but the key slot's read side, so they never block
//! each other; `set_key` / `clear_key` wait for in-flight appends to finish.
//!
//! Readers never take the writer mutex.  They read the stream's committed
//! sequence (published only after the store confirms a write) and ask the
//! store for records up to that point, so a record whose write is still in
//! progress is never observed.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use vigil_contracts::{
    error::{VigilError, VigilResult},
    payload::Submission,
    record::{LedgerRecord, RecordRead, RevealedField, RevealedRead, RevealedRecord},
    stream::StreamId,
};
use vigil_core::{
    clock::monotonic_ns,
    traits::{AuditSink, RecordStore, StoredRecord},
};
use vigil_crypto::{open_field, seal_field, EncryptionKey, KeySlot};

use crate::{
    chain::{self, ChainVerification, ChainWalker},
    index::RecordIndex,
    memory::InMemoryRecordStore,
};

/// Records fetched per store call while walking a whole stream.
const SCAN_BATCH: u64 = 1024;

// ── Per-stream writer state ───────────────────────────────────────────────────

#[derive(Debug)]
struct StreamHead {
    last_sequence: u64,
    last_hash: String,
}

#[derive(Debug)]
struct StreamWriter {
    head: Mutex<StreamHead>,
    /// Highest sequence whose write the store has confirmed.
    committed: AtomicU64,
}

impl StreamWriter {
    fn new(last_sequence: u64, last_hash: String) -> Self {
        Self {
            head: Mutex::new(StreamHead {
                last_sequence,
                last_hash,
            }),
            committed: AtomicU64::new(last_sequence),
        }
    }
}

// ── Ledger ────────────────────────────────────────────────────────────────────

/// Owner of every stream's hash chain.
///
/// Construct one per data directory and share it as `Arc<Ledger>`; the
/// request tracker, tamper monitor, and integrity checker all take it (or
/// its `AuditSink` face) explicitly.
pub struct Ledger {
    store: Arc<dyn RecordStore>,
    keys: Arc<KeySlot>,
    writers: HashMap<StreamId, StreamWriter>,
    index: RwLock<RecordIndex>,
}

impl Ledger {
    /// Open a ledger over `store`, recovering each stream's head and
    /// rebuilding the secondary index.
    ///
    /// Fails with `IntegrityViolation` if a stream's last record cannot be
    /// decoded: appending after an unreadable head would chain new records
    /// to an unknown hash.
    pub fn open(store: Arc<dyn RecordStore>, keys: Arc<KeySlot>) -> VigilResult<Self> {
        let mut writers = HashMap::new();
        let mut index = RecordIndex::new();

        for stream in StreamId::ALL {
            let head = store.head(stream)?;
            let mut last_hash = LedgerRecord::GENESIS_HASH.to_string();

            if head > 0 {
                let tail = store.range(stream, head, head)?;
                let stored = tail.into_iter().next().ok_or_else(|| {
                    VigilError::IntegrityViolation {
                        stream,
                        sequence: head,
                        reason: "head record is missing from storage".to_string(),
                    }
                })?;
                let record: LedgerRecord = serde_json::from_slice(&stored.bytes).map_err(|e| {
                    VigilError::IntegrityViolation {
                        stream,
                        sequence: head,
                        reason: format!("head record is unreadable: {}", e),
                    }
                })?;
                last_hash = record.content_hash;
            }

            scan(store.as_ref(), stream, head, |stored| {
                if let RecordRead::Intact(record) = decode(stream, stored) {
                    index.insert(&record);
                }
            })?;

            debug!(stream = %stream, head, "stream recovered");
            writers.insert(stream, StreamWriter::new(head, last_hash));
        }

        info!("ledger opened");
        Ok(Self {
            store,
            keys,
            writers,
            index: RwLock::new(index),
        })
    }

    /// A ledger over a fresh in-memory store.
    pub fn in_memory(keys: Arc<KeySlot>) -> Self {
        let writers = StreamId::ALL
            .iter()
            .map(|stream| {
                (
                    *stream,
                    StreamWriter::new(0, LedgerRecord::GENESIS_HASH.to_string()),
                )
            })
            .collect();
        Self {
            store: Arc::new(InMemoryRecordStore::new()),
            keys,
            writers,
            index: RwLock::new(RecordIndex::new()),
        }
    }

    /// The key slot shared with the key-management collaborator.
    pub fn keys(&self) -> &Arc<KeySlot> {
        &self.keys
    }

    /// Install `key`, waiting for in-flight appends to finish.
    pub fn set_key(&self, key: EncryptionKey) -> VigilResult<()> {
        self.keys.set_key(key)
    }

    /// Drop the key; appends and decrypting reads refuse until a new one is set.
    pub fn clear_key(&self) -> VigilResult<()> {
        self.keys.clear_key()
    }

    fn writer(&self, stream: StreamId) -> VigilResult<&StreamWriter> {
        self.writers
            .get(&stream)
            .ok_or_else(|| VigilError::StorageUnavailable {
                reason: format!("stream '{}' is not open", stream),
            })
    }

    // ── Writes ────────────────────────────────────────────────────────────────

    /// Seal, hash, persist, and return the new record's sequence.
    ///
    /// Nothing is committed unless this returns `Ok`.  Errors:
    /// - `StreamMismatch` if the payload belongs to another stream
    /// - `NotInitialized` if no key is set
    /// - `Encryption` if a sensitive field cannot be sealed
    /// - `StorageWrite` / `StorageUnavailable` if persistence fails
    /// - `SequenceConflict` if the store head moved under this writer
    pub fn append(&self, stream: StreamId, submission: Submission) -> VigilResult<u64> {
        if submission.payload.stream() != stream {
            return Err(VigilError::StreamMismatch {
                stream,
                payload_kind: submission.payload.kind().to_string(),
            });
        }
        let writer = self.writer(stream)?;

        let record = self.keys.use_key(move |key| {
            let mut head = writer.head.lock().map_err(|e| VigilError::StorageWrite {
                stream,
                reason: format!("writer lock poisoned: {}", e),
            })?;

            let sequence = head.last_sequence + 1;
            let store_head = self.store.head(stream)?;
            if store_head != head.last_sequence {
                error!(
                    stream = %stream,
                    expected = sequence,
                    store_head,
                    "store head moved under the stream writer"
                );
                return Err(VigilError::SequenceConflict {
                    stream,
                    expected: sequence,
                    found: store_head,
                });
            }

            let mut sealed = BTreeMap::new();
            for (name, value) in &submission.sensitive {
                sealed.insert(name.clone(), seal_field(name, value, key)?);
            }

            let mut record = LedgerRecord {
                stream,
                sequence,
                wall_timestamp: Utc::now(),
                monotonic_ns: monotonic_ns(),
                payload: submission.payload,
                sealed,
                previous_hash: head.last_hash.clone(),
                content_hash: String::new(),
            };
            record.content_hash = chain::hash_record(&record)?;

            let bytes = serde_json::to_vec(&record)?;
            self.store.put(stream, sequence, &bytes)?;

            head.last_sequence = sequence;
            head.last_hash = record.content_hash.clone();
            writer.committed.store(sequence, Ordering::Release);
            Ok(record)
        })?;

        match self.index.write() {
            Ok(mut index) => index.insert(&record),
            Err(e) => warn!(stream = %stream, error = %e, "index lock poisoned; record not indexed"),
        }

        debug!(
            stream = %stream,
            sequence = record.sequence,
            kind = record.payload.kind(),
            content_hash = %record.content_hash,
            "record committed"
        );
        Ok(record.sequence)
    }

    // ── Reads ─────────────────────────────────────────────────────────────────

    /// Number of committed records in `stream` (equal to its last sequence).
    pub fn record_count(&self, stream: StreamId) -> VigilResult<u64> {
        Ok(self.writer(stream)?.committed.load(Ordering::Acquire))
    }

    /// `content_hash` of the last record, or `GENESIS_HASH` when empty.
    pub fn last_hash(&self, stream: StreamId) -> VigilResult<String> {
        let head = self
            .writer(stream)?
            .head
            .lock()
            .map_err(|e| VigilError::StorageUnavailable {
                reason: format!("writer lock poisoned: {}", e),
            })?;
        Ok(head.last_hash.clone())
    }

    /// Records `from..=to` (clamped to what is committed), in order.
    ///
    /// Sealed fields stay sealed; no key is needed.  Each slot is `Intact`,
    /// `Corrupt`, or `Missing` (nothing stored under that sequence).  A record
    /// is corrupt when it is undecodable, misplaced, fails its own content
    /// hash, or its `previous_hash` does not link to an intact predecessor.
    /// The predecessor of `from` is read as well so the first slot is
    /// checked too.
    pub fn read_range(&self, stream: StreamId, from: u64, to: u64) -> VigilResult<Vec<RecordRead>> {
        let committed = self.record_count(stream)?;
        let from = from.max(1);
        let to = to.min(committed);
        if from > to {
            return Ok(Vec::new());
        }

        let anchor = if from == 1 {
            Some(LedgerRecord::GENESIS_HASH.to_string())
        } else {
            self.store
                .range(stream, from - 1, from - 1)?
                .first()
                .and_then(|stored| match decode(stream, stored) {
                    RecordRead::Intact(record) => Some(record.content_hash),
                    _ => None,
                })
        };

        let stored = self.store.range(stream, from, to)?;
        let mut out = Vec::new();
        let mut next = from;
        for item in &stored {
            while next < item.sequence {
                out.push(RecordRead::Missing { sequence: next });
                next += 1;
            }
            out.push(decode(stream, item));
            next = item.sequence + 1;
        }
        while next <= to {
            out.push(RecordRead::Missing { sequence: next });
            next += 1;
        }
        Ok(check_links(out, anchor))
    }

    /// Like `read_range`, with every sealed field opened.
    ///
    /// Requires the key (`NotInitialized` otherwise).  A field that fails to
    /// open is marked `Undecipherable`; the rest of its record is returned.
    pub fn read_range_revealed(
        &self,
        stream: StreamId,
        from: u64,
        to: u64,
    ) -> VigilResult<Vec<RevealedRead>> {
        self.keys.use_key(|key| {
            let reads = self.read_range(stream, from, to)?;
            Ok(reads
                .into_iter()
                .map(|read| match read {
                    RecordRead::Intact(record) => RevealedRead::Intact(reveal(record, key)),
                    RecordRead::Corrupt { sequence, reason } => {
                        RevealedRead::Corrupt { sequence, reason }
                    }
                    RecordRead::Missing { sequence } => RevealedRead::Missing { sequence },
                })
                .collect())
        })
    }

    /// Sequences in `stream` whose payload names `domain`.
    pub fn find_by_domain(&self, stream: StreamId, domain: &str) -> VigilResult<Vec<u64>> {
        let index = self.index.read().map_err(|e| VigilError::StorageUnavailable {
            reason: format!("index lock poisoned: {}", e),
        })?;
        Ok(index.by_domain(stream, domain))
    }

    /// Sequences in `stream` committed between `from` and `to` (wall clock).
    pub fn find_by_time(
        &self,
        stream: StreamId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> VigilResult<Vec<u64>> {
        let index = self.index.read().map_err(|e| VigilError::StorageUnavailable {
            reason: format!("index lock poisoned: {}", e),
        })?;
        Ok(index.by_time(stream, from, to))
    }

    // ── Export ────────────────────────────────────────────────────────────────

    /// Last sequence of `stream` marked exported, or 0.
    pub fn export_marker(&self, stream: StreamId) -> VigilResult<u64> {
        self.store.export_marker(stream)
    }

    /// Everything committed after the export marker, sealed fields intact.
    pub fn records_since_export(&self, stream: StreamId) -> VigilResult<Vec<RecordRead>> {
        let marker = self.store.export_marker(stream)?;
        self.read_range(stream, marker.saturating_add(1), u64::MAX)
    }

    /// Advance the export marker.  It never moves backwards and never past
    /// the committed head.
    pub fn mark_exported(&self, stream: StreamId, sequence: u64) -> VigilResult<()> {
        let committed = self.record_count(stream)?;
        let current = self.store.export_marker(stream)?;
        if sequence > committed {
            return Err(VigilError::ConfigError {
                reason: format!(
                    "cannot mark sequence {} of '{}' exported: only {} committed",
                    sequence, stream, committed
                ),
            });
        }
        if sequence < current {
            return Err(VigilError::ConfigError {
                reason: format!(
                    "export marker for '{}' cannot move back from {} to {}",
                    stream, current, sequence
                ),
            });
        }
        self.store.set_export_marker(stream, sequence)?;
        info!(stream = %stream, sequence, "export marker advanced");
        Ok(())
    }

    // ── Verification ──────────────────────────────────────────────────────────

    /// Walk the whole stream and report the first break, if any.
    pub fn verify_stream(&self, stream: StreamId) -> VigilResult<ChainVerification> {
        let committed = self.record_count(stream)?;
        let mut walker = ChainWalker::new();

        scan(self.store.as_ref(), stream, committed, |stored| {
            if walker.is_broken() {
                return;
            }
            match serde_json::from_slice::<LedgerRecord>(&stored.bytes) {
                Ok(record) => walker.push(&record),
                Err(e) => walker.push_unreadable(stored.sequence, e.to_string()),
            }
        })?;
        walker.expect_through(committed);

        let verification = walker.finish();
        match &verification.first_break {
            Some(brk) => error!(
                stream = %stream,
                sequence = brk.sequence,
                kind = ?brk.kind,
                "hash chain broken"
            ),
            None => debug!(
                stream = %stream,
                records = verification.records_checked,
                "hash chain verified"
            ),
        }
        Ok(verification)
    }

    /// `true` iff the stream's chain is unbroken and gap-free.
    pub fn verify_integrity(&self, stream: StreamId) -> VigilResult<bool> {
        Ok(self.verify_stream(stream)?.valid)
    }

    /// Content hashes of records `1..=through`, in order.
    ///
    /// Used for checkpoint aggregation.  Fails with `IntegrityViolation` on
    /// the first record that is missing or does not decode, since an
    /// aggregate over a damaged prefix would be meaningless.
    pub fn content_hashes(&self, stream: StreamId, through: u64) -> VigilResult<Vec<String>> {
        let through = through.min(self.record_count(stream)?);
        let mut hashes = Vec::with_capacity(through as usize);
        let mut failure = None;
        scan(self.store.as_ref(), stream, through, |stored| {
            if failure.is_some() {
                return;
            }
            let expected = hashes.len() as u64 + 1;
            match serde_json::from_slice::<LedgerRecord>(&stored.bytes) {
                Ok(record) if stored.sequence == expected => hashes.push(record.content_hash),
                Ok(_) => failure = Some((expected, "record missing".to_string())),
                Err(e) => failure = Some((stored.sequence, format!("unreadable: {}", e))),
            }
        })?;
        if failure.is_none() && (hashes.len() as u64) < through {
            failure = Some((hashes.len() as u64 + 1, "record missing".to_string()));
        }
        match failure {
            Some((sequence, reason)) => Err(VigilError::IntegrityViolation {
                stream,
                sequence,
                reason,
            }),
            None => Ok(hashes),
        }
    }

    /// Force everything committed so far to durable storage.
    pub fn flush(&self) -> VigilResult<()> {
        self.store.flush()
    }
}

impl AuditSink for Ledger {
    fn append(&self, stream: StreamId, submission: Submission) -> VigilResult<u64> {
        Ledger::append(self, stream, submission)
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Visit stored records `1..=through` in batches.
fn scan(
    store: &dyn RecordStore,
    stream: StreamId,
    through: u64,
    mut visit: impl FnMut(&StoredRecord),
) -> VigilResult<()> {
    let mut from = 1;
    while from <= through {
        let to = from.saturating_add(SCAN_BATCH - 1).min(through);
        for stored in store.range(stream, from, to)? {
            visit(&stored);
        }
        from = to + 1;
    }
    Ok(())
}

/// Decode and self-check one stored record.
fn decode(stream: StreamId, stored: &StoredRecord) -> RecordRead {
    let corrupt = |reason: String| RecordRead::Corrupt {
        sequence: stored.sequence,
        reason,
    };

    let record: LedgerRecord = match serde_json::from_slice(&stored.bytes) {
        Ok(record) => record,
        Err(e) => return corrupt(format!("unreadable record: {}", e)),
    };
    if record.sequence != stored.sequence {
        return corrupt(format!(
            "stored as sequence {} but claims sequence {}",
            stored.sequence, record.sequence
        ));
    }
    if record.stream != stream {
        return corrupt(format!(
            "stored in stream '{}' but claims stream '{}'",
            stream, record.stream
        ));
    }
    match chain::hash_record(&record) {
        Ok(hash) if hash == record.content_hash => RecordRead::Intact(record),
        Ok(_) => corrupt("content hash does not match record contents".to_string()),
        Err(e) => corrupt(format!("cannot recompute hash: {}", e)),
    }
}

/// Demote intact records whose `previous_hash` does not match the intact
/// record before them.  `anchor` is the hash the first slot must link to,
/// or `None` when its predecessor is not intact.
fn check_links(reads: Vec<RecordRead>, mut anchor: Option<String>) -> Vec<RecordRead> {
    reads
        .into_iter()
        .map(|read| match read {
            RecordRead::Intact(record) => {
                let linked = anchor
                    .as_ref()
                    .map_or(true, |previous| *previous == record.previous_hash);
                anchor = Some(record.content_hash.clone());
                if linked {
                    RecordRead::Intact(record)
                } else {
                    RecordRead::Corrupt {
                        sequence: record.sequence,
                        reason: "previous_hash does not link to predecessor".to_string(),
                    }
                }
            }
            other => {
                anchor = None;
                other
            }
        })
        .collect()
}

fn reveal(record: LedgerRecord, key: &EncryptionKey) -> RevealedRecord {
    let fields = record
        .sealed
        .iter()
        .map(|(name, field)| {
            let revealed = match open_field(name, field, key) {
                Ok(value) => RevealedField::Plain(value),
                Err(e) => {
                    warn!(
                        stream = %record.stream,
                        sequence = record.sequence,
                        field = %name,
                        "sealed field could not be opened"
                    );
                    RevealedField::Undecipherable {
                        reason: e.to_string(),
                    }
                }
            };
            (name.clone(), revealed)
        })
        .collect();
    RevealedRecord { record, fields }
}
