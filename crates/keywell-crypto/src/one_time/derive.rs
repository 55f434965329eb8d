//! Sealing key derivation using HKDF

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

/// Label used for sealing key derivation
const SEALING_KEY_LABEL: &[u8] = b"keywellOneTimeV1";

/// A symmetric key derived for a single seal or open operation.
///
/// Used immediately and then discarded. Zeroized on drop.
pub struct SealingKey {
    key: [u8; 32],
}

impl SealingKey {
    /// 32-byte symmetric key for XChaCha20-Poly1305 AEAD.
    pub fn key(&self) -> &[u8; 32] {
        &self.key
    }
}

impl Drop for SealingKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// Derive the sealing key from a Diffie-Hellman shared secret.
///
/// Binds the derived key to both public halves of the exchange, so a
/// ciphertext cannot be replayed against a different recipient key even
/// if the shared secret were to collide.
///
/// # Security
///
/// - Different ephemeral keys produce different sealing keys
/// - Different recipient keys produce different sealing keys
/// - Deterministic: same inputs always produce same output
pub fn derive_sealing_key(
    shared_secret: &[u8; 32],
    ephemeral_public: &[u8; 32],
    recipient_public: &[u8; 32],
) -> SealingKey {
    let hkdf = Hkdf::<Sha256>::new(None, shared_secret);

    // Build the info parameter: label || ephemeral_public || recipient_public
    // Capacity: 16 (label) + 32 + 32 = 80
    let mut info = Vec::with_capacity(80);
    info.extend_from_slice(SEALING_KEY_LABEL);
    info.extend_from_slice(ephemeral_public);
    info.extend_from_slice(recipient_public);

    let mut key = [0u8; 32];
    let Ok(()) = hkdf.expand(&info, &mut key) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    SealingKey { key }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_produces_32_byte_key() {
        let key = derive_sealing_key(&[0x01; 32], &[0x02; 32], &[0x03; 32]);
        assert_eq!(key.key().len(), 32);
    }

    #[test]
    fn derive_is_deterministic() {
        let key1 = derive_sealing_key(&[0x01; 32], &[0x02; 32], &[0x03; 32]);
        let key2 = derive_sealing_key(&[0x01; 32], &[0x02; 32], &[0x03; 32]);

        assert_eq!(key1.key(), key2.key(), "same inputs must produce same output");
    }

    #[test]
    fn different_shared_secrets_produce_different_keys() {
        let key_a = derive_sealing_key(&[0x01; 32], &[0x02; 32], &[0x03; 32]);
        let key_b = derive_sealing_key(&[0xFF; 32], &[0x02; 32], &[0x03; 32]);

        assert_ne!(key_a.key(), key_b.key());
    }

    #[test]
    fn different_ephemeral_keys_produce_different_keys() {
        let key_a = derive_sealing_key(&[0x01; 32], &[0x02; 32], &[0x03; 32]);
        let key_b = derive_sealing_key(&[0x01; 32], &[0xFF; 32], &[0x03; 32]);

        assert_ne!(key_a.key(), key_b.key(), "ephemeral key must bind the derived key");
    }

    #[test]
    fn different_recipient_keys_produce_different_keys() {
        let key_a = derive_sealing_key(&[0x01; 32], &[0x02; 32], &[0x03; 32]);
        let key_b = derive_sealing_key(&[0x01; 32], &[0x02; 32], &[0xFF; 32]);

        assert_ne!(key_a.key(), key_b.key(), "recipient key must bind the derived key");
    }
}
