//! Message sealing using X25519 + XChaCha20-Poly1305
//!
//! All functions are pure - random bytes must be provided by the caller.
//! This enables deterministic testing and maintains action-based compatibility.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};

use super::{derive::derive_sealing_key, error::OneTimeError, keypair::OneTimeKeyPair};

/// Poly1305 tag size (16 bytes)
const POLY1305_TAG_SIZE: usize = 16;

/// Byte length of the metadata prefix in [`Sealed::to_bytes`]:
/// ephemeral key (32) + recipient key (32) + nonce (24)
const METADATA_SIZE: usize = 88;

/// A sealed message with the metadata needed to open it.
///
/// Opening requires the secret half of the key pair whose public half is
/// `recipient_public`. Nothing else about the recipient is recoverable
/// from the blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    /// The sender's ephemeral X25519 public key
    pub ephemeral_public: [u8; 32],
    /// Public half of the one-time pair this message was sealed to
    pub recipient_public: [u8; 32],
    /// The 24-byte `XChaCha20` nonce
    pub nonce: [u8; 24],
    /// The ciphertext including 16-byte Poly1305 tag
    pub ciphertext: Vec<u8>,
}

impl Sealed {
    /// Plaintext length (ciphertext length minus authentication tag).
    pub fn plaintext_len(&self) -> usize {
        self.ciphertext.len().saturating_sub(POLY1305_TAG_SIZE)
    }

    /// Serialize to a self-contained blob.
    ///
    /// Layout: `ephemeral_public || recipient_public || nonce || ciphertext`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(METADATA_SIZE + self.ciphertext.len());
        out.extend_from_slice(&self.ephemeral_public);
        out.extend_from_slice(&self.recipient_public);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Parse a blob produced by [`Sealed::to_bytes`].
    ///
    /// # Errors
    ///
    /// - `SealedTruncated`: The blob is too short to hold the metadata and
    ///   an authentication tag
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, OneTimeError> {
        let min = METADATA_SIZE + POLY1305_TAG_SIZE;
        if bytes.len() < min {
            return Err(OneTimeError::SealedTruncated { expected: min, actual: bytes.len() });
        }

        let mut ephemeral_public = [0u8; 32];
        let mut recipient_public = [0u8; 32];
        let mut nonce = [0u8; 24];
        ephemeral_public.copy_from_slice(&bytes[0..32]);
        recipient_public.copy_from_slice(&bytes[32..64]);
        nonce.copy_from_slice(&bytes[64..88]);

        Ok(Self {
            ephemeral_public,
            recipient_public,
            nonce,
            ciphertext: bytes[METADATA_SIZE..].to_vec(),
        })
    }
}

/// Seal a message to a one-time public key.
///
/// A fresh ephemeral pair is derived from `ephemeral_seed`, combined with
/// the recipient key via X25519, and the result feeds HKDF to produce the
/// AEAD key. The ephemeral public half travels with the ciphertext; the
/// ephemeral secret never leaves this function.
///
/// # Security
///
/// - Caller MUST provide cryptographically secure random bytes for the
///   seed and nonce in production
/// - One seed and nonce per message; reuse breaks confidentiality
/// - Authenticated encryption prevents tampering
///
/// # Errors
///
/// - `NonContributoryKey`: The recipient key is a small-order point
pub fn seal(
    plaintext: &[u8],
    recipient_public: &[u8; 32],
    ephemeral_seed: [u8; 32],
    nonce: [u8; 24],
) -> Result<Sealed, OneTimeError> {
    let ephemeral = OneTimeKeyPair::from_seed(ephemeral_seed);
    let ephemeral_public = ephemeral.public_bytes();

    let shared = ephemeral.diffie_hellman(recipient_public)?;
    let key = derive_sealing_key(&shared, &ephemeral_public, recipient_public);

    let cipher = XChaCha20Poly1305::new(key.key().into());
    let Ok(ciphertext) = cipher.encrypt(XNonce::from_slice(&nonce), plaintext) else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };

    Ok(Sealed { ephemeral_public, recipient_public: *recipient_public, nonce, ciphertext })
}

/// Open a sealed message with the matching one-time key pair.
///
/// Returns the decrypted plaintext.
///
/// # Errors
///
/// - `DecryptionFailed`: The pair does not match the recipient key, or the
///   authentication tag is invalid (tamper)
/// - `NonContributoryKey`: The ephemeral key is a small-order point
pub fn open(sealed: &Sealed, pair: &OneTimeKeyPair) -> Result<Vec<u8>, OneTimeError> {
    if pair.public_bytes() != sealed.recipient_public {
        return Err(OneTimeError::DecryptionFailed {
            reason: "key pair does not match the recipient key".to_string(),
        });
    }

    let shared = pair.diffie_hellman(&sealed.ephemeral_public)?;
    let key = derive_sealing_key(&shared, &sealed.ephemeral_public, &sealed.recipient_public);

    let cipher = XChaCha20Poly1305::new(key.key().into());
    let nonce = XNonce::from_slice(&sealed.nonce);

    cipher.decrypt(nonce, sealed.ciphertext.as_slice()).map_err(|_| {
        OneTimeError::DecryptionFailed { reason: "authentication failed".to_string() }
    })
}
