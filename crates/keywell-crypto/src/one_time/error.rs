//! Error types for one-time key operations

use thiserror::Error;

/// Errors from one-time key sealing and opening.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OneTimeError {
    /// The peer's public key is not a valid Curve25519 point
    #[error("invalid public key: {reason}")]
    InvalidPublicKey {
        /// Why the key was rejected
        reason: String,
    },

    /// Diffie-Hellman produced a low-order result
    ///
    /// A non-contributory shared secret means the peer sent a small-order
    /// point and could force the session key regardless of our secret.
    #[error("non-contributory shared secret")]
    NonContributoryKey,

    /// Authentication tag or key mismatch during opening
    #[error("decryption failed: {reason}")]
    DecryptionFailed {
        /// Why the ciphertext was rejected
        reason: String,
    },

    /// The sealed blob is too short to contain the declared structure
    #[error("sealed data truncated: expected at least {expected} bytes, got {actual}")]
    SealedTruncated {
        /// Minimum length for a well-formed blob
        expected: usize,
        /// Length actually provided
        actual: usize,
    },
}
