//! Single-use X25519 key pairs
//!
//! Key pairs are constructed from caller-provided 32-byte seeds rather than
//! an internal RNG. This keeps the crate pure and lets tests derive the full
//! key sequence from a fixed seed.

use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use super::error::OneTimeError;

/// An X25519 key pair intended for exactly one decryption.
///
/// The secret half lives only in memory and is zeroized on drop. Once a
/// pair has opened (or rewrapped) a message it must be discarded; reuse
/// is the caller's responsibility to prevent.
#[derive(Clone)]
pub struct OneTimeKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl OneTimeKeyPair {
    /// Create a key pair from a 32-byte seed.
    ///
    /// The seed is clamped per RFC 7748, so any 32 bytes produce a valid
    /// scalar. Same seed always produces the same pair.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let seed = Zeroizing::new(seed);
        let secret = StaticSecret::from(*seed);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// The public half, as raw bytes suitable for the wire.
    pub fn public_bytes(&self) -> [u8; 32] {
        *self.public.as_bytes()
    }

    /// Compute the X25519 shared secret with a peer's public key.
    ///
    /// # Errors
    ///
    /// - `NonContributoryKey`: The peer supplied a small-order point, so the
    ///   result does not depend on our secret
    pub fn diffie_hellman(
        &self,
        their_public: &[u8; 32],
    ) -> Result<Zeroizing<[u8; 32]>, OneTimeError> {
        let their_public = PublicKey::from(*their_public);
        let shared = self.secret.diffie_hellman(&their_public);

        if !shared.was_contributory() {
            return Err(OneTimeError::NonContributoryKey);
        }

        Ok(Zeroizing::new(*shared.as_bytes()))
    }
}

impl std::fmt::Debug for OneTimeKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the secret half
        f.debug_struct("OneTimeKeyPair").field("public", &self.public_bytes()).finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn test_seed(fill: u8) -> [u8; 32] {
        let mut seed = [fill; 32];
        seed[0] = seed[0].wrapping_add(1);
        seed
    }

    #[test]
    fn from_seed_is_deterministic() {
        let pair1 = OneTimeKeyPair::from_seed(test_seed(0x11));
        let pair2 = OneTimeKeyPair::from_seed(test_seed(0x11));

        assert_eq!(pair1.public_bytes(), pair2.public_bytes());
    }

    #[test]
    fn different_seeds_produce_different_keys() {
        let pair1 = OneTimeKeyPair::from_seed(test_seed(0x11));
        let pair2 = OneTimeKeyPair::from_seed(test_seed(0x22));

        assert_ne!(pair1.public_bytes(), pair2.public_bytes());
    }

    #[test]
    fn diffie_hellman_agrees_both_ways() {
        let alice = OneTimeKeyPair::from_seed(test_seed(0xAA));
        let bob = OneTimeKeyPair::from_seed(test_seed(0xBB));

        let ab = alice.diffie_hellman(&bob.public_bytes()).unwrap();
        let ba = bob.diffie_hellman(&alice.public_bytes()).unwrap();

        assert_eq!(*ab, *ba);
    }

    #[test]
    fn small_order_point_rejected() {
        let alice = OneTimeKeyPair::from_seed(test_seed(0xAA));

        // The identity point forces an all-zero shared secret
        let result = alice.diffie_hellman(&[0u8; 32]);
        assert_eq!(result.unwrap_err(), OneTimeError::NonContributoryKey);
    }

    #[test]
    fn debug_hides_secret() {
        let pair = OneTimeKeyPair::from_seed(test_seed(0x42));
        let rendered = format!("{pair:?}");

        assert!(rendered.contains("public"));
        assert!(!rendered.contains("secret"));
    }
}
