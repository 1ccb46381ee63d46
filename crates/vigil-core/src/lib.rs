//! # vigil-core
//!
//! Trait seams shared by the Vigil crates.
//!
//! This crate provides:
//! - `RecordStore`, the durable byte store behind the ledger
//! - `AuditSink`, the append-only destination producers write into
//! - a process-local monotonic clock used for record timestamps
//!
//! ## Usage
//!
//! ```rust,ignore
//! use vigil_core::traits::{AuditSink, RecordStore};
//! ```

pub mod clock;
pub mod traits;

pub use traits::{AuditSink, RecordStore, StoredRecord};
