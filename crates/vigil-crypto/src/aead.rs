//! Authenticated encryption of individual field values.
//!
//! Uses XChaCha20-Poly1305 with a random 192-bit nonce per seal.
//!
//! Sealed wire format:
//!   [ nonce (24 bytes) | ciphertext | tag (16 bytes) ]

use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    XChaCha20Poly1305, XNonce,
};
use zeroize::Zeroizing;

use vigil_contracts::{
    error::{VigilError, VigilResult},
    record::SealedField,
};

use crate::key::EncryptionKey;

pub const NONCE_LEN: usize = 24;
pub const TAG_LEN: usize = 16;

/// Seal `plaintext` under `key`.
pub fn seal(plaintext: &[u8], key: &EncryptionKey) -> VigilResult<Vec<u8>> {
    seal_with_aad(plaintext, &[], key)
}

/// Open a value produced by `seal`.
///
/// Fails with `VigilError::Decryption` on a wrong key, a truncated value, or
/// any modified byte.  Never returns unauthenticated plaintext.
pub fn open(sealed: &[u8], key: &EncryptionKey) -> VigilResult<Zeroizing<Vec<u8>>> {
    open_with_aad(sealed, &[], key)
}

/// Seal with additional authenticated data that must be presented again on
/// `open_with_aad`.
pub fn seal_with_aad(plaintext: &[u8], aad: &[u8], key: &EncryptionKey) -> VigilResult<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new_from_slice(key.as_bytes()).map_err(|e| {
        VigilError::Encryption {
            reason: format!("invalid key: {}", e),
        }
    })?;
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, Payload { msg: plaintext, aad })
        .map_err(|_| VigilError::Encryption {
            reason: "aead encryption failed".to_string(),
        })?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

pub fn open_with_aad(
    sealed: &[u8],
    aad: &[u8],
    key: &EncryptionKey,
) -> VigilResult<Zeroizing<Vec<u8>>> {
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(VigilError::Decryption {
            reason: format!(
                "sealed value too short: {} bytes, need at least {}",
                sealed.len(),
                NONCE_LEN + TAG_LEN
            ),
        });
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    let nonce = XNonce::from_slice(nonce_bytes);

    let cipher = XChaCha20Poly1305::new_from_slice(key.as_bytes()).map_err(|e| {
        VigilError::Decryption {
            reason: format!("invalid key: {}", e),
        }
    })?;

    let plaintext = cipher
        .decrypt(nonce, Payload { msg: ciphertext, aad })
        .map_err(|_| VigilError::Decryption {
            reason: "authentication tag mismatch (wrong key or tampered value)".to_string(),
        })?;

    Ok(Zeroizing::new(plaintext))
}

/// Seal a named string field.  The field name is bound as AAD, so a sealed
/// value moved under a different name will not open.
pub fn seal_field(name: &str, value: &str, key: &EncryptionKey) -> VigilResult<SealedField> {
    let sealed = seal_with_aad(value.as_bytes(), name.as_bytes(), key)?;
    Ok(SealedField {
        ciphertext: hex::encode(sealed),
    })
}

/// Open a field sealed by `seal_field` under the same name.
pub fn open_field(name: &str, field: &SealedField, key: &EncryptionKey) -> VigilResult<String> {
    let sealed = hex::decode(&field.ciphertext).map_err(|e| VigilError::Decryption {
        reason: format!("sealed field '{}' is not valid hex: {}", name, e),
    })?;
    let plaintext = open_with_aad(&sealed, name.as_bytes(), key)?;
    String::from_utf8(plaintext.to_vec()).map_err(|e| VigilError::Decryption {
        reason: format!("sealed field '{}' is not valid UTF-8: {}", name, e),
    })
}
