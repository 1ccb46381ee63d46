//! The ledger key and the slot that holds it.
//!
//! The key is derived and revoked elsewhere.  `KeySlot` only stores it for
//! as long as it is valid.  Appends hold the slot's read guard from start to
//! commit; `set_key` and `clear_key` take the write guard, so a key change
//! can never land in the middle of an append.

use std::fmt;
use std::sync::RwLock;

use tracing::info;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use vigil_contracts::error::{VigilError, VigilResult};

pub const KEY_LEN: usize = 32;

/// A 256-bit symmetric key.  Zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_LEN]);

impl EncryptionKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a 64-character hex string.
    pub fn from_hex(s: &str) -> VigilResult<Self> {
        let raw = Zeroizing::new(hex::decode(s.trim()).map_err(|e| VigilError::ConfigError {
            reason: format!("key is not valid hex: {}", e),
        })?);
        if raw.len() != KEY_LEN {
            return Err(VigilError::ConfigError {
                reason: format!("key must be {} bytes, got {}", KEY_LEN, raw.len()),
            });
        }
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&raw);
        Ok(Self(bytes))
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

/// Shared, replaceable holder for the current key.
#[derive(Debug, Default)]
pub struct KeySlot {
    inner: RwLock<Option<EncryptionKey>>,
}

impl KeySlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(key: EncryptionKey) -> Self {
        Self {
            inner: RwLock::new(Some(key)),
        }
    }

    /// Install `key`, replacing (and zeroizing) any previous one.
    pub fn set_key(&self, key: EncryptionKey) -> VigilResult<()> {
        let mut slot = self.inner.write().map_err(|e| VigilError::NotInitialized {
            reason: format!("key slot lock poisoned: {}", e),
        })?;
        *slot = Some(key);
        info!("ledger key installed");
        Ok(())
    }

    /// Drop the current key.  Subsequent appends fail with `NotInitialized`.
    pub fn clear_key(&self) -> VigilResult<()> {
        let mut slot = self.inner.write().map_err(|e| VigilError::NotInitialized {
            reason: format!("key slot lock poisoned: {}", e),
        })?;
        *slot = None;
        info!("ledger key cleared");
        Ok(())
    }

    pub fn is_set(&self) -> bool {
        self.inner.read().map(|slot| slot.is_some()).unwrap_or(false)
    }

    /// Run `f` with the current key, holding the read guard throughout.
    ///
    /// Returns `NotInitialized` when no key is set.
    pub fn use_key<T>(&self, f: impl FnOnce(&EncryptionKey) -> VigilResult<T>) -> VigilResult<T> {
        let slot = self.inner.read().map_err(|e| VigilError::NotInitialized {
            reason: format!("key slot lock poisoned: {}", e),
        })?;
        match slot.as_ref() {
            Some(key) => f(key),
            None => Err(VigilError::NotInitialized {
                reason: "no encryption key is set".to_string(),
            }),
        }
    }
}
