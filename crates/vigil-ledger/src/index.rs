//! Secondary lookup by domain and by wall-clock time.
//!
//! The index only answers "which sequence numbers might be relevant".  It
//! carries no ordering authority: callers read the records back through the
//! ledger, and the chain decides what is genuine.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use vigil_contracts::{record::LedgerRecord, stream::StreamId};

#[derive(Debug, Default)]
pub struct RecordIndex {
    by_domain: HashMap<(StreamId, String), Vec<u64>>,
    by_time: HashMap<StreamId, BTreeSet<(DateTime<Utc>, u64)>>,
}

impl RecordIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index `record` by its domain (if any) and wall timestamp.
    pub fn insert(&mut self, record: &LedgerRecord) {
        if let Some(domain) = record.payload.domain() {
            if !domain.is_empty() {
                self.by_domain
                    .entry((record.stream, domain.to_ascii_lowercase()))
                    .or_default()
                    .push(record.sequence);
            }
        }
        self.by_time
            .entry(record.stream)
            .or_default()
            .insert((record.wall_timestamp, record.sequence));
    }

    /// Sequences in `stream` whose payload names `domain`, ascending.
    pub fn by_domain(&self, stream: StreamId, domain: &str) -> Vec<u64> {
        let mut hits = self
            .by_domain
            .get(&(stream, domain.to_ascii_lowercase()))
            .cloned()
            .unwrap_or_default();
        hits.sort_unstable();
        hits
    }

    /// Sequences in `stream` committed with `from <= wall_timestamp <= to`,
    /// ordered by timestamp.
    pub fn by_time(&self, stream: StreamId, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<u64> {
        if from > to {
            return Vec::new();
        }
        self.by_time
            .get(&stream)
            .map(|set| {
                set.range((from, 0)..=(to, u64::MAX))
                    .map(|(_, sequence)| *sequence)
                    .collect()
            })
            .unwrap_or_default()
    }
}
