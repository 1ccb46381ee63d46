//! Stream checkpoints and whole-ledger verification.
//!
//! `verify_all` runs in two phases per stream:
//!
//! 1. **Chain**: the ledger walks the stream and reports the first break.
//! 2. **Checkpoint**: the last checkpoint recorded for the stream is
//!    compared against a root recomputed from the records it covers.  This
//!    is what catches a stream that was rewritten wholesale (re-chained so
//!    that it verifies) or cut short.
//!
//! Every discrepancy becomes a critical `IntegrityFinding`.  Nothing is
//! repaired: the broken state is the evidence.

use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use vigil_contracts::{
    error::{VigilError, VigilResult},
    payload::{CheckpointRecord, RecordPayload, Submission},
    record::RecordRead,
    stream::StreamId,
    tamper::Severity,
};
use vigil_ledger::{BreakKind, Ledger};

use crate::merkle::merkle_root;

// ── Report types ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    /// The hash chain itself does not verify.
    ChainBroken,
    /// Records covered by a checkpoint no longer aggregate to its root.
    CheckpointMismatch,
    /// A checkpoint covers more records than the stream now holds.
    CheckpointBeyondHead,
    /// The records a checkpoint covers could not be read back.
    CheckpointUnverifiable,
}

/// One integrity discrepancy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityFinding {
    pub stream: StreamId,
    /// The first sequence implicated, when one is known.
    pub sequence: Option<u64>,
    pub kind: FindingKind,
    pub severity: Severity,
    pub detail: String,
}

/// The most recent checkpoint for a stream, with its verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckpointStatus {
    /// Where the checkpoint sits in the integrity stream.
    pub checkpoint_sequence: u64,
    pub recorded: CheckpointRecord,
    /// `None` when the covered records could not be aggregated.
    pub recomputed_root: Option<String>,
    pub matches: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamStatus {
    pub stream: StreamId,
    pub record_count: u64,
    pub chain_valid: bool,
    pub records_checked: u64,
    pub checkpoint: Option<CheckpointStatus>,
}

impl StreamStatus {
    pub fn passed(&self) -> bool {
        self.chain_valid && self.checkpoint.as_ref().map_or(true, |c| c.matches)
    }
}

/// Outcome of `verify_all`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub streams: Vec<StreamStatus>,
    pub findings: Vec<IntegrityFinding>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn status(&self, stream: StreamId) -> Option<&StreamStatus> {
        self.streams.iter().find(|s| s.stream == stream)
    }
}

fn describe(kind: &BreakKind) -> String {
    match kind {
        BreakKind::SequenceGap { expected, found } => {
            format!("sequence gap: expected {}, found {}", expected, found)
        }
        BreakKind::PreviousHashMismatch => "previous_hash does not link to predecessor".to_string(),
        BreakKind::ContentHashMismatch => "content_hash does not match record".to_string(),
        BreakKind::Unreadable { reason } => format!("record unreadable: {}", reason),
        BreakKind::Truncated {
            expected_last,
            found_last,
        } => format!(
            "stream ends at {} but {} records were committed",
            found_last, expected_last
        ),
    }
}

// ── IntegrityChecker ──────────────────────────────────────────────────────────

pub struct IntegrityChecker {
    ledger: Arc<Ledger>,
}

impl IntegrityChecker {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }

    /// Record a checkpoint of `stream` on the integrity stream.
    ///
    /// Refuses to checkpoint the integrity stream into itself, and refuses
    /// to checkpoint a stream whose chain is broken: a checkpoint would
    /// otherwise commit to tampered contents.
    pub fn checkpoint(&self, stream: StreamId) -> VigilResult<u64> {
        if stream == StreamId::Integrity {
            return Err(VigilError::ConfigError {
                reason: "the integrity stream cannot checkpoint itself".to_string(),
            });
        }

        let record_count = self.ledger.record_count(stream)?;
        let verification = self.ledger.verify_stream(stream)?;
        if let Some(brk) = verification.first_break {
            error!(stream = %stream, sequence = brk.sequence, "refusing to checkpoint a broken chain");
            return Err(VigilError::IntegrityViolation {
                stream,
                sequence: brk.sequence,
                reason: describe(&brk.kind),
            });
        }

        let hashes = self.ledger.content_hashes(stream, record_count)?;
        let record = CheckpointRecord {
            target: stream,
            record_count,
            last_sequence: record_count,
            aggregate_root: merkle_root(&hashes),
        };
        let root = record.aggregate_root.clone();
        let sequence = self.ledger.append(
            StreamId::Integrity,
            Submission::new(RecordPayload::Checkpoint(record)),
        )?;

        info!(
            stream = %stream,
            record_count,
            root = %root,
            checkpoint_sequence = sequence,
            "checkpoint recorded"
        );
        Ok(sequence)
    }

    /// Checkpoint every non-empty stream except the integrity stream.
    pub fn checkpoint_all(&self) -> VigilResult<Vec<(StreamId, u64)>> {
        let mut recorded = Vec::new();
        for stream in StreamId::ALL {
            if stream == StreamId::Integrity || self.ledger.record_count(stream)? == 0 {
                continue;
            }
            recorded.push((stream, self.checkpoint(stream)?));
        }
        Ok(recorded)
    }

    /// The most recent intact checkpoint per target stream, with its
    /// sequence in the integrity stream.
    pub fn last_checkpoints(&self) -> VigilResult<HashMap<StreamId, (u64, CheckpointRecord)>> {
        let count = self.ledger.record_count(StreamId::Integrity)?;
        let mut latest = HashMap::new();
        for read in self.ledger.read_range(StreamId::Integrity, 1, count)? {
            if let RecordRead::Intact(record) = read {
                if let RecordPayload::Checkpoint(checkpoint) = record.payload {
                    latest.insert(checkpoint.target, (record.sequence, checkpoint));
                }
            }
        }
        Ok(latest)
    }

    /// Verify every stream's chain and its last checkpoint.
    pub fn verify_all(&self) -> VigilResult<IntegrityReport> {
        let checkpoints = self.last_checkpoints()?;
        let mut streams = Vec::new();
        let mut findings = Vec::new();

        for stream in StreamId::ALL {
            let record_count = self.ledger.record_count(stream)?;
            let verification = self.ledger.verify_stream(stream)?;

            if let Some(brk) = &verification.first_break {
                findings.push(IntegrityFinding {
                    stream,
                    sequence: Some(brk.sequence),
                    kind: FindingKind::ChainBroken,
                    severity: Severity::Critical,
                    detail: describe(&brk.kind),
                });
            }

            let checkpoint = checkpoints.get(&stream).map(|(checkpoint_sequence, recorded)| {
                self.compare_checkpoint(stream, record_count, *checkpoint_sequence, recorded, &mut findings)
            });

            streams.push(StreamStatus {
                stream,
                record_count,
                chain_valid: verification.valid,
                records_checked: verification.records_checked,
                checkpoint,
            });
        }

        for finding in &findings {
            error!(
                stream = %finding.stream,
                sequence = ?finding.sequence,
                kind = ?finding.kind,
                detail = %finding.detail,
                "integrity finding"
            );
        }
        if findings.is_empty() {
            info!(streams = streams.len(), "all streams verified");
        }

        Ok(IntegrityReport { streams, findings })
    }

    fn compare_checkpoint(
        &self,
        stream: StreamId,
        record_count: u64,
        checkpoint_sequence: u64,
        recorded: &CheckpointRecord,
        findings: &mut Vec<IntegrityFinding>,
    ) -> CheckpointStatus {
        let mut status = CheckpointStatus {
            checkpoint_sequence,
            recorded: recorded.clone(),
            recomputed_root: None,
            matches: false,
        };

        if recorded.last_sequence > record_count {
            findings.push(IntegrityFinding {
                stream,
                sequence: Some(record_count + 1),
                kind: FindingKind::CheckpointBeyondHead,
                severity: Severity::Critical,
                detail: format!(
                    "checkpoint {} covers {} records but the stream holds {}",
                    checkpoint_sequence, recorded.last_sequence, record_count
                ),
            });
            return status;
        }

        match self.ledger.content_hashes(stream, recorded.last_sequence) {
            Ok(hashes) => {
                let root = merkle_root(&hashes);
                status.matches = root == recorded.aggregate_root;
                if !status.matches {
                    findings.push(IntegrityFinding {
                        stream,
                        sequence: None,
                        kind: FindingKind::CheckpointMismatch,
                        severity: Severity::Critical,
                        detail: format!(
                            "checkpoint {} root {} does not match recomputed {}",
                            checkpoint_sequence, recorded.aggregate_root, root
                        ),
                    });
                }
                status.recomputed_root = Some(root);
            }
            Err(e) => {
                let sequence = match &e {
                    VigilError::IntegrityViolation { sequence, .. } => Some(*sequence),
                    _ => None,
                };
                findings.push(IntegrityFinding {
                    stream,
                    sequence,
                    kind: FindingKind::CheckpointUnverifiable,
                    severity: Severity::Critical,
                    detail: e.to_string(),
                });
            }
        }
        status
    }

    /// Checkpoint every stream that has grown, every `interval`, on a
    /// background thread.  The thread stops when the handle is stopped or
    /// dropped.
    pub fn spawn_periodic(self: &Arc<Self>, interval: Duration) -> PeriodicCheckpoints {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let checker = Arc::clone(self);

        let handle = thread::spawn(move || {
            let mut checkpointed: HashMap<StreamId, u64> = HashMap::new();
            loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }

                for stream in StreamId::ALL {
                    if stream == StreamId::Integrity {
                        continue;
                    }
                    let count = match checker.ledger.record_count(stream) {
                        Ok(count) => count,
                        Err(e) => {
                            warn!(stream = %stream, error = %e, "periodic checkpoint skipped");
                            continue;
                        }
                    };
                    if count == 0 || checkpointed.get(&stream) == Some(&count) {
                        continue;
                    }
                    match checker.checkpoint(stream) {
                        Ok(_) => {
                            checkpointed.insert(stream, count);
                        }
                        Err(e) => error!(stream = %stream, error = %e, "periodic checkpoint failed"),
                    }
                }
            }
            debug!("periodic checkpointing stopped");
        });

        PeriodicCheckpoints {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }
    }
}

/// Handle to the background checkpoint thread.
pub struct PeriodicCheckpoints {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicCheckpoints {
    /// Signal the thread and wait for it to finish its current pass.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            // The thread may already have exited; nothing to signal then.
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("periodic checkpoint thread panicked");
            }
        }
    }
}

impl Drop for PeriodicCheckpoints {
    fn drop(&mut self) {
        self.shutdown();
    }
}
