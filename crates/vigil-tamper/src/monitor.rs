//! `TamperMonitor`: classifier plus a sink for positive results.

use std::sync::Arc;

use tracing::warn;

use vigil_contracts::{
    error::VigilResult,
    payload::{RecordPayload, Submission},
    stream::StreamId,
    tamper::TamperEvent,
};
use vigil_core::traits::AuditSink;

use crate::{classifier::TamperClassifier, evidence::TamperEvidence};

/// Runs evidence through the classifier and appends every detection to
/// the tamper stream.
pub struct TamperMonitor {
    classifier: TamperClassifier,
    sink: Arc<dyn AuditSink>,
}

impl TamperMonitor {
    pub fn new(classifier: TamperClassifier, sink: Arc<dyn AuditSink>) -> Self {
        Self { classifier, sink }
    }

    pub fn classifier(&self) -> &TamperClassifier {
        &self.classifier
    }

    /// Classify `evidence`; if it yields an event, append it.
    ///
    /// Returns the committed sequence, or `None` when nothing was detected.
    pub fn inspect(&self, evidence: &TamperEvidence) -> VigilResult<Option<u64>> {
        match self.classifier.classify(evidence) {
            Some(event) => self.record(event).map(Some),
            None => Ok(None),
        }
    }

    /// Emit the enhanced-monitoring marker for `domain` if it is listed.
    pub fn observe_domain(&self, domain: &str) -> VigilResult<Option<u64>> {
        match self.classifier.flag_enhanced_monitoring(domain) {
            Some(event) => self.record(event).map(Some),
            None => Ok(None),
        }
    }

    /// Append an already classified event to the tamper stream.
    pub fn record(&self, event: TamperEvent) -> VigilResult<u64> {
        let domain = event.domain.clone();
        let detection = event.detection_type;
        let severity = event.severity;
        let sequence = self.sink.append(
            StreamId::Tamper,
            Submission::new(RecordPayload::Tamper(event)),
        )?;
        warn!(
            domain = %domain,
            detection = %detection,
            severity = %severity,
            sequence,
            "tamper event recorded"
        );
        Ok(sequence)
    }
}
