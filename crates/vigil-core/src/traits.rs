//! Trait seams of the forensic ledger.
//!
//! - `RecordStore`: durable, append-only byte storage keyed by
//!   `(stream, sequence)`.  Knows nothing about hashes or encryption.
//! - `AuditSink`: where finished records go.  The ledger implements it;
//!   the request tracker and tamper monitor only ever see this trait.
//!
//! Keeping producers behind `AuditSink` means tests can hand them a
//! recording sink instead of a full ledger.

use vigil_contracts::{error::VigilResult, payload::Submission, stream::StreamId};

/// Raw bytes of one persisted record, as read back from a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    /// The key the bytes were stored under.
    pub sequence: u64,
    pub bytes: Vec<u8>,
}

/// Durable per-stream record storage.
///
/// Implementations must be thread-safe.  The ledger guarantees a single
/// writer per stream, so `put` for one stream is never called concurrently;
/// `range` may run concurrently with `put` and must only ever return
/// records whose write has fully completed.
pub trait RecordStore: Send + Sync {
    /// Durably store `bytes` as record `sequence` of `stream`.
    ///
    /// Must fail (and store nothing) unless `sequence == head(stream) + 1`.
    fn put(&self, stream: StreamId, sequence: u64, bytes: &[u8]) -> VigilResult<()>;

    /// Highest committed sequence of `stream`, or 0 when empty.
    fn head(&self, stream: StreamId) -> VigilResult<u64>;

    /// Records with `from <= sequence <= to`, ascending.  Missing keys are
    /// simply absent from the result.
    fn range(&self, stream: StreamId, from: u64, to: u64) -> VigilResult<Vec<StoredRecord>>;

    /// Last sequence handed to the export collaborator, or 0.
    fn export_marker(&self, stream: StreamId) -> VigilResult<u64>;

    fn set_export_marker(&self, stream: StreamId, sequence: u64) -> VigilResult<()>;

    /// Flush pending writes to durable storage.
    fn flush(&self) -> VigilResult<()>;
}

/// The destination for finished audit records.
pub trait AuditSink: Send + Sync {
    /// Append `submission` to `stream` and return its assigned sequence.
    ///
    /// Returns only after the record is durably committed.  An `Err` means
    /// nothing was committed.
    fn append(&self, stream: StreamId, submission: Submission) -> VigilResult<u64>;
}
