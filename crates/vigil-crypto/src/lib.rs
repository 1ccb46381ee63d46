//! # vigil-crypto
//!
//! Per-field authenticated encryption for the Vigil ledger.
//!
//! Sensitive values (cookie contents, mostly) are sealed one at a time with
//! XChaCha20-Poly1305 so that a single damaged value never prevents reading
//! the rest of its record.  The chain hash covers the ciphertext, so chains
//! verify without the key.
//!
//! This crate does no key management.  The key arrives from outside through
//! `KeySlot::set_key` and leaves through `KeySlot::clear_key`.

pub mod aead;
pub mod key;

pub use aead::{open, open_field, seal, seal_field};
pub use key::{EncryptionKey, KeySlot, KEY_LEN};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use rand::{Rng, RngCore};

    use vigil_contracts::error::VigilError;

    use super::*;

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn random_key() -> EncryptionKey {
        let mut bytes = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        EncryptionKey::from_bytes(bytes)
    }

    // ── seal / open ───────────────────────────────────────────────────────────

    /// Random byte strings of assorted lengths, including empty, open back
    /// to exactly what was sealed.
    #[test]
    fn test_seal_open_returns_original_bytes() {
        let mut rng = rand::thread_rng();
        let key = random_key();
        for _ in 0..64 {
            let len = rng.gen_range(0..512);
            let mut plaintext = vec![0u8; len];
            rng.fill_bytes(&mut plaintext);

            let sealed = seal(&plaintext, &key).unwrap();
            let opened = open(&sealed, &key).unwrap();
            assert_eq!(opened.as_slice(), plaintext.as_slice());
        }
    }

    #[test]
    fn test_open_with_wrong_key_fails() {
        let sealed = seal(b"session=abc123", &random_key()).unwrap();
        let err = open(&sealed, &random_key()).unwrap_err();
        assert!(matches!(err, VigilError::Decryption { .. }));
    }

    /// Flipping any single byte of nonce, body, or tag must fail to open.
    #[test]
    fn test_open_detects_every_flipped_byte() {
        let key = random_key();
        let sealed = seal(b"theme=dark; sid=42", &key).unwrap();
        for idx in 0..sealed.len() {
            let mut tampered = sealed.clone();
            tampered[idx] ^= 0x01;
            assert!(open(&tampered, &key).is_err(), "flip at byte {} was accepted", idx);
        }
    }

    #[test]
    fn test_open_truncated_fails() {
        let key = random_key();
        let sealed = seal(b"value", &key).unwrap();
        assert!(open(&sealed[..sealed.len() - 1], &key).is_err());
        assert!(open(&sealed[..10], &key).is_err());
        assert!(open(&[], &key).is_err());
    }

    #[test]
    fn test_sealing_twice_uses_fresh_nonces() {
        let key = random_key();
        let a = seal(b"same", &key).unwrap();
        let b = seal(b"same", &key).unwrap();
        assert_ne!(a, b);
    }

    // ── Named fields ──────────────────────────────────────────────────────────

    #[test]
    fn test_field_round_trip() {
        let key = random_key();
        let field = seal_field("request.cookie", "sid=1; pref=2", &key).unwrap();
        assert_eq!(open_field("request.cookie", &field, &key).unwrap(), "sid=1; pref=2");
    }

    /// A sealed value copied under another field name must not open.
    #[test]
    fn test_field_bound_to_its_name() {
        let key = random_key();
        let field = seal_field("request.cookie", "sid=1", &key).unwrap();
        assert!(open_field("response.set-cookie", &field, &key).is_err());
    }

    // ── KeySlot ───────────────────────────────────────────────────────────────

    #[test]
    fn test_key_slot_refuses_when_empty() {
        let slot = KeySlot::new();
        let err = slot.use_key(|_| Ok(())).unwrap_err();
        assert!(err.is_initialization());
    }

    #[test]
    fn test_key_slot_set_and_clear() {
        let slot = KeySlot::new();
        slot.set_key(random_key()).unwrap();
        assert!(slot.is_set());
        slot.use_key(|key| seal(b"x", key)).unwrap();

        slot.clear_key().unwrap();
        assert!(!slot.is_set());
        assert!(slot.use_key(|_| Ok(())).is_err());
    }

    #[test]
    fn test_key_from_hex() {
        let hex_key = "11".repeat(KEY_LEN);
        assert!(EncryptionKey::from_hex(&hex_key).is_ok());
        assert!(EncryptionKey::from_hex("abcd").is_err());
        assert!(EncryptionKey::from_hex("zz").is_err());
    }

    #[test]
    fn test_key_debug_is_redacted() {
        let key = EncryptionKey::from_bytes([7u8; KEY_LEN]);
        assert_eq!(format!("{:?}", key), "EncryptionKey(<redacted>)");
    }
}
