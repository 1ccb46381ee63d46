//! Error taxonomy for the forensic ledger.
//!
//! Every fallible operation in the workspace returns `VigilResult<T>`.
//! Variants fall into five classes (initialization, integrity, transient
//! write, correlation, and decryption) and carry enough context to be
//! written into a finding or a log line without further lookups.

use thiserror::Error;

use crate::stream::StreamId;

/// The unified error type for the Vigil ledger.
#[derive(Debug, Error)]
pub enum VigilError {
    /// No encryption key is loaded; appends and decrypting reads refuse.
    #[error("ledger not initialized: {reason}")]
    NotInitialized { reason: String },

    /// The persistence backend cannot be opened or read.
    #[error("storage unavailable: {reason}")]
    StorageUnavailable { reason: String },

    /// A durable write failed.  Nothing was committed; retry the whole append.
    #[error("storage write failed on stream '{stream}': {reason}")]
    StorageWrite { stream: StreamId, reason: String },

    /// Sealing a sensitive field failed.
    #[error("encryption failed: {reason}")]
    Encryption { reason: String },

    /// Opening a sealed value failed: wrong key, truncation, or tampering.
    #[error("decryption failed: {reason}")]
    Decryption { reason: String },

    /// The next sequence number would not be contiguous with the store head.
    ///
    /// Indicates two writers on one stream.  Fatal, never retried silently.
    #[error("sequence conflict on stream '{stream}': expected {expected}, store head is {found}")]
    SequenceConflict {
        stream: StreamId,
        expected: u64,
        found: u64,
    },

    /// The hash chain, a sequence, or a checkpoint does not match.
    #[error("integrity violation on stream '{stream}' at sequence {sequence}: {reason}")]
    IntegrityViolation {
        stream: StreamId,
        sequence: u64,
        reason: String,
    },

    /// A payload was submitted to a stream it does not belong to.
    #[error("payload of kind '{payload_kind}' cannot be appended to stream '{stream}'")]
    StreamMismatch {
        stream: StreamId,
        payload_kind: String,
    },

    /// `start` was called for a request id that is already tracked.
    #[error("request '{request_id}' is already being tracked")]
    DuplicateRequest { request_id: String },

    /// A signal arrived for a request id the tracker does not know.
    #[error("request '{request_id}' is not tracked")]
    UnknownRequest { request_id: String },

    /// `complete` was called again for a request that already committed.
    #[error("request '{request_id}' was already completed")]
    AlreadyCompleted { request_id: String },

    /// A configuration value is missing or malformed.
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },

    /// A record or payload could not be (de)serialized.
    #[error("serialization error: {reason}")]
    Serialization { reason: String },
}

impl VigilError {
    /// True for broken chains, sequence gaps, and checkpoint mismatches.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            VigilError::IntegrityViolation { .. } | VigilError::SequenceConflict { .. }
        )
    }

    /// True when the ledger cannot operate at all (no key, no storage).
    pub fn is_initialization(&self) -> bool {
        matches!(
            self,
            VigilError::NotInitialized { .. } | VigilError::StorageUnavailable { .. }
        )
    }
}

impl From<serde_json::Error> for VigilError {
    fn from(e: serde_json::Error) -> Self {
        VigilError::Serialization {
            reason: e.to_string(),
        }
    }
}

/// Convenience alias used throughout the Vigil crates.
pub type VigilResult<T> = Result<T, VigilError>;
