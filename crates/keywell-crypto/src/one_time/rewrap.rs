//! Re-sealing stored secrets onto fresh one-time keys

use zeroize::Zeroizing;

use super::{
    error::OneTimeError,
    keypair::OneTimeKeyPair,
    sealing::{Sealed, open, seal},
};

/// Move a sealed secret from a retiring key pair onto a fresh one.
///
/// The plaintext exists only inside this function and is zeroized before
/// returning. Used when rotating pool contents: blobs sealed to consumed
/// or expiring pairs are rewrapped so the old secret halves can be
/// destroyed without losing the stored data.
///
/// # Errors
///
/// - `DecryptionFailed`: `old_pair` does not open the blob
/// - `NonContributoryKey`: Either public key involved is a small-order point
pub fn rewrap(
    sealed: &Sealed,
    old_pair: &OneTimeKeyPair,
    new_recipient_public: &[u8; 32],
    ephemeral_seed: [u8; 32],
    nonce: [u8; 24],
) -> Result<Sealed, OneTimeError> {
    let plaintext = Zeroizing::new(open(sealed, old_pair)?);
    seal(&plaintext, new_recipient_public, ephemeral_seed, nonce)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn pair(fill: u8) -> OneTimeKeyPair {
        let mut seed = [fill; 32];
        seed[31] = fill.wrapping_mul(3);
        OneTimeKeyPair::from_seed(seed)
    }

    #[test]
    fn rewrap_moves_blob_to_new_pair() {
        let old = pair(0x01);
        let new = pair(0x02);

        let sealed = seal(b"durable secret", &old.public_bytes(), [0xE1; 32], [0x11; 24]).unwrap();
        let rewrapped = rewrap(&sealed, &old, &new.public_bytes(), [0xE2; 32], [0x22; 24]).unwrap();

        assert_eq!(open(&rewrapped, &new).unwrap(), b"durable secret");
    }

    #[test]
    fn old_pair_cannot_open_rewrapped_blob() {
        let old = pair(0x01);
        let new = pair(0x02);

        let sealed = seal(b"durable secret", &old.public_bytes(), [0xE1; 32], [0x11; 24]).unwrap();
        let rewrapped = rewrap(&sealed, &old, &new.public_bytes(), [0xE2; 32], [0x22; 24]).unwrap();

        assert!(open(&rewrapped, &old).is_err());
    }

    #[test]
    fn rewrap_with_wrong_pair_fails() {
        let old = pair(0x01);
        let wrong = pair(0x03);
        let new = pair(0x02);

        let sealed = seal(b"durable secret", &old.public_bytes(), [0xE1; 32], [0x11; 24]).unwrap();
        let result = rewrap(&sealed, &wrong, &new.public_bytes(), [0xE2; 32], [0x22; 24]);

        assert!(result.is_err());
    }

    #[test]
    fn rewrapped_blob_carries_new_recipient_key() {
        let old = pair(0x01);
        let new = pair(0x02);

        let sealed = seal(b"durable secret", &old.public_bytes(), [0xE1; 32], [0x11; 24]).unwrap();
        let rewrapped = rewrap(&sealed, &old, &new.public_bytes(), [0xE2; 32], [0x22; 24]).unwrap();

        assert_eq!(rewrapped.recipient_public, new.public_bytes());
        assert_ne!(rewrapped.recipient_public, sealed.recipient_public);
    }
}
