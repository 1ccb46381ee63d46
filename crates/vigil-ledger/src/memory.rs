//! In-memory implementation of `RecordStore`.
//!
//! `InMemoryRecordStore` keeps every stream in its own `BTreeMap` behind its
//! own `RwLock`, so writers on different streams never contend and readers
//! only block a writer for the length of a map lookup.  Nothing survives the
//! process; use it for tests and for embedding where persistence is handled
//! by the host.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use vigil_contracts::{
    error::{VigilError, VigilResult},
    stream::StreamId,
};
use vigil_core::traits::{RecordStore, StoredRecord};

// ── Internal mutable state ────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub(crate) struct MemoryStream {
    pub(crate) records: BTreeMap<u64, Vec<u8>>,
    pub(crate) head: u64,
    pub(crate) export_marker: u64,
}

// ── Public store ──────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct InMemoryRecordStore {
    pub(crate) streams: HashMap<StreamId, RwLock<MemoryStream>>,
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        let streams = StreamId::ALL
            .iter()
            .map(|id| (*id, RwLock::new(MemoryStream::default())))
            .collect();
        Self { streams }
    }

    fn stream(&self, stream: StreamId) -> VigilResult<&RwLock<MemoryStream>> {
        self.streams
            .get(&stream)
            .ok_or_else(|| VigilError::StorageUnavailable {
                reason: format!("no storage for stream '{}'", stream),
            })
    }
}

fn poisoned(stream: StreamId, e: impl std::fmt::Display) -> VigilError {
    VigilError::StorageUnavailable {
        reason: format!("stream '{}' lock poisoned: {}", stream, e),
    }
}

impl RecordStore for InMemoryRecordStore {
    fn put(&self, stream: StreamId, sequence: u64, bytes: &[u8]) -> VigilResult<()> {
        let mut slot = self.stream(stream)?.write().map_err(|e| poisoned(stream, e))?;
        if sequence != slot.head + 1 {
            return Err(VigilError::SequenceConflict {
                stream,
                expected: sequence,
                found: slot.head,
            });
        }
        slot.records.insert(sequence, bytes.to_vec());
        slot.head = sequence;
        Ok(())
    }

    fn head(&self, stream: StreamId) -> VigilResult<u64> {
        let slot = self.stream(stream)?.read().map_err(|e| poisoned(stream, e))?;
        Ok(slot.head)
    }

    fn range(&self, stream: StreamId, from: u64, to: u64) -> VigilResult<Vec<StoredRecord>> {
        if from > to {
            return Ok(Vec::new());
        }
        let slot = self.stream(stream)?.read().map_err(|e| poisoned(stream, e))?;
        Ok(slot
            .records
            .range(from..=to)
            .map(|(sequence, bytes)| StoredRecord {
                sequence: *sequence,
                bytes: bytes.clone(),
            })
            .collect())
    }

    fn export_marker(&self, stream: StreamId) -> VigilResult<u64> {
        let slot = self.stream(stream)?.read().map_err(|e| poisoned(stream, e))?;
        Ok(slot.export_marker)
    }

    fn set_export_marker(&self, stream: StreamId, sequence: u64) -> VigilResult<()> {
        let mut slot = self.stream(stream)?.write().map_err(|e| poisoned(stream, e))?;
        slot.export_marker = sequence;
        Ok(())
    }

    fn flush(&self) -> VigilResult<()> {
        Ok(())
    }
}
