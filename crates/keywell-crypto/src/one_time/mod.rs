//! One-time key sealing
//!
//! Implements the single-use key pair model: each X25519 pair opens exactly
//! one message. Sealing combines a fresh ephemeral pair with the recipient's
//! one-time public key, derives an AEAD key via HKDF, and encrypts with
//! XChaCha20-Poly1305.

pub mod derive;
pub mod error;
pub mod keypair;
pub mod rewrap;
pub mod sealing;

pub use derive::{SealingKey, derive_sealing_key};
pub use error::OneTimeError;
pub use keypair::OneTimeKeyPair;
pub use rewrap::rewrap;
pub use sealing::{Sealed, open, seal};
