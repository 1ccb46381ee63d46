//! # vigil-ledger
//!
//! Encrypted, append-only, SHA-256 hash-chained record streams.
//!
//! ## Overview
//!
//! Every record committed to a stream links to the previous record via its
//! content hash.  Changing any stored byte, removing a record, or reordering
//! records breaks the chain, and `Ledger::verify_stream` reports where.
//! Sensitive sub-fields are sealed with the key held in a shared `KeySlot`
//! before hashing, so chains verify and export without the key.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vigil_crypto::{EncryptionKey, KeySlot};
//! use vigil_ledger::{FileRecordStore, Ledger};
//!
//! let keys = Arc::new(KeySlot::with_key(EncryptionKey::from_hex(hex_key)?));
//! let store = Arc::new(FileRecordStore::open("/var/lib/vigil")?);
//! let ledger = Ledger::open(store, keys)?;
//!
//! let seq = ledger.append(StreamId::History, submission)?;
//! assert!(ledger.verify_integrity(StreamId::History)?);
//! ```

pub mod chain;
pub mod file;
pub mod index;
pub mod ledger;
pub mod memory;

pub use chain::{hash_record, verify, verify_chain, BreakKind, ChainBreak, ChainVerification};
pub use file::FileRecordStore;
pub use ledger::Ledger;
pub use memory::InMemoryRecordStore;

// ── Tests ─────────────────────────────────────────────────────────────────────
