//! # vigil-tracker
//!
//! Correlates the signals a network layer emits for one request (start,
//! DNS, connect, TLS, response, completion) into a single immutable record
//! on the ledger's network stream.
//!
//! The tracker only sees the ledger through `AuditSink`.  Cookie headers
//! never reach the record in plaintext: they are submitted as sensitive
//! fields and sealed by the ledger.

pub mod tracker;

pub use tracker::{
    AbandonPolicy, RequestTracker, SweepReport, TrackerConfig, REQUEST_COOKIE_FIELD,
    RESPONSE_SET_COOKIE_FIELD,
};

// ── Tests ─────────────────────────────────────────────────────────────────────
